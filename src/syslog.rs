//! Leveled logging that tees to stdout and an append-only file.
//!
//! Errors are never surfaced through the data plane; every component logs
//! through `tracing` and keeps going. The file side of the tee is synced to
//! disk every [`SYSLOG_SYNC_FREQ`] records so a power cut costs at most a
//! handful of lines.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// How many records may be written between syncs of the syslog file.
pub const SYSLOG_SYNC_FREQ: usize = 8;

#[derive(Clone)]
pub struct TeeWriter {
    file: Option<Arc<Mutex<File>>>,
    records: Arc<AtomicUsize>,
}

impl TeeWriter {
    fn stdout_only() -> Self {
        Self {
            file: None,
            records: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        if let Some(file) = &self.file {
            let mut file = file.lock();
            // Keep logging to stdout even if the file side fails
            if file.write_all(buf).is_ok() {
                let count = self.records.fetch_add(1, Ordering::Relaxed);
                if (count + 1) % SYSLOG_SYNC_FREQ == 0 {
                    let _ = file.sync_data();
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

impl<'a> MakeWriter<'a> for TeeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Install the global subscriber, teeing records to stdout and the given
/// file. Falls back to stdout alone if the file cannot be opened.
pub fn init(syslog_path: &Path) -> io::Result<()> {
    let writer = match OpenOptions::new().create(true).append(true).open(syslog_path) {
        Ok(file) => TeeWriter {
            file: Some(Arc::new(Mutex::new(file))),
            records: Arc::new(AtomicUsize::new(0)),
        },
        Err(err) => {
            eprintln!("could not open syslog file {}: {err}", syslog_path.display());
            TeeWriter::stdout_only()
        }
    };
    tracing_subscriber::fmt().with_writer(writer).init();
    Ok(())
}
