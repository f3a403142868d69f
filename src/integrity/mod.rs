//! Integrity manager: durable backups of the module sources and verified
//! clean copies handed to the builder.

pub mod hash;
pub mod store;

pub use hash::{copy_tree, hash_tree, TreeDigest};
pub use store::{CleanCopy, IntegrityManager};
