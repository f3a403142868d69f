//! Decoupled logging pipeline.
//!
//! # Architecture
//!
//! ```text
//! log::info!() / warn!() / ...
//!     |
//! [LogCollector]  (non-blocking, any thread)
//!     | crossbeam unbounded channel
//!     v
//! [writer thread] -> <log_dir>/<YYYYmmdd_HHMMSS>.log
//! ```
//!
//! Records at or above the stderr level are also echoed to stderr from the
//! calling thread, so operators see warnings even if the disk write lags.

use chrono::Local;
use crossbeam_channel::{bounded, unbounded, Sender};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Internal log line or special marker
enum LogMessage {
    Line(LogLine),
    /// Flush marker; the writer acknowledges once everything before it is on disk
    Flush(Sender<()>),
}

/// A formatted log line.
#[derive(Clone, Debug)]
pub struct LogLine {
    pub timestamp: String,
    pub level: log::Level,
    pub message: String,
}

impl LogLine {
    pub fn new(level: log::Level, message: impl Into<String>) -> Self {
        LogLine {
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
            level,
            message: message.into(),
        }
    }

    fn render(&self) -> String {
        format!("[{}] [{}] {}\n", self.timestamp, self.level, self.message)
    }
}

/// `log` backend writing to a per-session file.
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_path: PathBuf,
    level: LevelFilter,
    stderr_level: LevelFilter,
}

impl LogCollector {
    /// Create `<log_dir>/<timestamp>.log` and start the writer thread.
    pub fn new(log_dir: &Path, level: LevelFilter) -> io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;

        let log_path = log_dir.join(format!("{}.log", Local::now().format("%Y%m%d_%H%M%S")));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let (tx, rx) = unbounded::<LogMessage>();

        std::thread::Builder::new()
            .name("vmod-forge-log".to_string())
            .spawn(move || {
                let mut file: File = file;
                while let Ok(msg) = rx.recv() {
                    match msg {
                        LogMessage::Line(line) => {
                            if let Err(e) = file.write_all(line.render().as_bytes()) {
                                eprintln!("[Log] Failed to write log line: {}", e);
                            }
                        }
                        LogMessage::Flush(ack) => {
                            let _ = file.flush();
                            let _ = file.sync_data();
                            let _ = ack.send(());
                        }
                    }
                }
            })?;

        Ok(LogCollector {
            tx,
            log_path,
            level,
            stderr_level: LevelFilter::Warn,
        })
    }

    /// Echo records at or above `level` to stderr.
    pub fn with_stderr_level(mut self, level: LevelFilter) -> Self {
        self.stderr_level = level;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Queue a line for the writer. Never blocks.
    pub fn log_line(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    /// Block until every line queued before this call is on disk.
    pub fn wait_for_empty(&self) -> Result<(), String> {
        let (ack_tx, ack_rx) = bounded::<()>(1);
        self.tx
            .send(LogMessage::Flush(ack_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        ack_rx
            .recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    /// Install a clone of this collector as the global logger.
    pub fn install(&self) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(self.clone()))?;
        log::set_max_level(self.level.max(self.stderr_level));
        Ok(())
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level || metadata.level() <= self.stderr_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = record.args().to_string();
        if record.level() <= self.stderr_level {
            eprintln!("{}: {}", record.level().as_str().to_lowercase(), message);
        }
        if record.level() <= self.level {
            self.log_line(LogLine::new(record.level(), message));
        }
    }

    fn flush(&self) {
        if let Err(e) = self.wait_for_empty() {
            eprintln!("[Log] {}", e);
        }
    }
}
