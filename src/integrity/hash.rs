//! Content hashing and copying of module source trees.
//!
//! The digest covers, in file-name order, every entry's relative path and
//! kind, symlink targets and regular file contents. Timestamps and
//! permissions are not part of the digest.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::IntegrityError;

const READ_CHUNK: usize = 64 * 1024;

/// Hash and size of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDigest {
    pub hash: String,
    pub file_count: usize,
}

/// Compute the SHA-256 digest of the tree rooted at `root`.
pub fn hash_tree(root: &Path) -> Result<TreeDigest, IntegrityError> {
    if !root.is_dir() {
        return Err(IntegrityError::SourceMissing(root.to_path_buf()));
    }

    let mut hasher = Sha256::new();
    let mut file_count = 0usize;
    let mut buf = vec![0u8; READ_CHUNK];

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = relative_name(root, entry.path());
        let file_type = entry.file_type();

        if file_type.is_dir() {
            hasher.update(b"D");
            hasher.update(rel.as_bytes());
            hasher.update([0u8]);
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            hasher.update(b"L");
            hasher.update(rel.as_bytes());
            hasher.update([0u8]);
            hasher.update(target.to_string_lossy().as_bytes());
            hasher.update([0u8]);
        } else if file_type.is_file() {
            let mut file = fs::File::open(entry.path())?;
            let len = file.metadata()?.len();
            hasher.update(b"F");
            hasher.update(rel.as_bytes());
            hasher.update([0u8]);
            hasher.update(len.to_le_bytes());
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            file_count += 1;
        } else {
            return Err(IntegrityError::UnsupportedEntry(entry.path().to_path_buf()));
        }
    }

    Ok(TreeDigest {
        hash: hex::encode(hasher.finalize()),
        file_count,
    })
}

/// Copy `src` into the existing directory `dst`, preserving symlinks.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize, IntegrityError> {
    if !src.is_dir() {
        return Err(IntegrityError::SourceMissing(src.to_path_buf()));
    }
    fs::create_dir_all(dst)?;

    let mut copied = 0usize;
    for entry in WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| IntegrityError::IndexCorrupt(e.to_string()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        } else {
            // fifos, sockets and device nodes would block or copy garbage
            return Err(IntegrityError::UnsupportedEntry(entry.path().to_path_buf()));
        }
    }
    Ok(copied)
}

fn relative_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
