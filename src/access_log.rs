//! Access logging (spec §2 component B, "external collaborator"). The
//! concrete sink lives outside this crate's core responsibility per spec
//! §1, but a working file-based implementation is ambient plumbing every
//! shippable daemon needs, so it lives here behind a trait the connection
//! loop depends on rather than a concrete type.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// One logged request-response exchange.
pub struct AccessRecord<'a> {
    pub peer_ip: &'a str,
    pub method: &'a str,
    pub path: &'a [u8],
    pub status: u16,
    pub bytes_sent: u64,
    pub duration_micros: u64,
}

/// The interface the connection loop uses to record completed exchanges.
/// Kept as a trait (rather than calling a concrete `FileAccessLog`
/// directly) so tests can substitute an in-memory recorder.
pub trait AccessLog: Send {
    fn record(&self, entry: &AccessRecord<'_>);
}

/// Appends one line per request to the configured log path (spec §6 `log`
/// key), formatted as a compact combined-log-style line.
pub struct FileAccessLog {
    file: Mutex<File>,
}

impl FileAccessLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileAccessLog { file: Mutex::new(file) })
    }
}

impl AccessLog for FileAccessLog {
    fn record(&self, entry: &AccessRecord<'_>) {
        let path = String::from_utf8_lossy(entry.path);
        let line = format!(
            "{} \"{} {}\" {} {} {}us\n",
            entry.peer_ip, entry.method, path, entry.status, entry.bytes_sent, entry.duration_micros
        );
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
        }
    }
}

/// Discards every record. Used when no log path can be opened at startup
/// and the operator has chosen to continue serving anyway, or in tests that
/// don't care about access logging.
pub struct NullAccessLog;

impl AccessLog for NullAccessLog {
    fn record(&self, _entry: &AccessRecord<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let log = FileAccessLog::open(&path).unwrap();
        log.record(&AccessRecord {
            peer_ip: "127.0.0.1",
            method: "GET",
            path: b"/index.html",
            status: 200,
            bytes_sent: 42,
            duration_micros: 150,
        });
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("127.0.0.1"));
        assert!(contents.contains("GET /index.html"));
        assert!(contents.contains("200"));
    }
}
