//! Access-log sink: a line-oriented JSON writer over either an append-mode
//! file or stderr, selected by the `logfile` config field. `GET /_log`
//! serves the file back out; there is nothing to serve when logging to
//! stderr.

use crate::core::access_log::AccessRecord;
use crate::core::errors::CdnError;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub enum LogSink {
    File { path: PathBuf, handle: Mutex<File> },
    Stderr,
}

impl LogSink {
    pub fn open(logfile: Option<&str>) -> io::Result<Self> {
        match logfile {
            Some(path) => {
                let handle = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(Self::File {
                    path: PathBuf::from(path),
                    handle: Mutex::new(handle),
                })
            }
            None => Ok(Self::Stderr),
        }
    }

    /// Appends one JSON line. Stderr logging never fails the caller; a file
    /// write failure is surfaced so the control channel can log it.
    pub fn write_record(&self, record: &AccessRecord) -> Result<(), CdnError> {
        let line = serde_json::to_string(record).unwrap_or_default();
        match self {
            Self::File { handle, .. } => {
                let mut handle = handle.lock();
                writeln!(handle, "{line}")?;
                handle.flush()?;
                Ok(())
            }
            Self::Stderr => {
                eprintln!("{line}");
                Ok(())
            }
        }
    }

    /// The path `GET /_log` should stream, if logging to a file.
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::File { path, .. } => Some(path),
            Self::Stderr => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_sink_has_no_file_path() {
        let sink = LogSink::Stderr;
        assert_eq!(sink.file_path(), None);
    }

    #[test]
    fn file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let sink = LogSink::open(Some(path.to_str().unwrap())).unwrap();
        let record = AccessRecord::new("1.2.3.4".into(), "/a".into(), true, "curl".into(), None, None);
        sink.write_record(&record).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert_eq!(sink.file_path(), Some(path.as_path()));
    }
}
