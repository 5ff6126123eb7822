//! The per-particle error log.
//!
//! Workers never touch the log file. They send [`ErrorRecord`]s over a channel and a
//! single writer thread appends them, so entries from different workers can not
//! interleave. The file is only created once the first entry arrives.
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::JoinHandle;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// One failure while writing a stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub worker_id: usize,
    pub group: String,
    /// Position of the particle within its group; None for failures of the whole group
    pub particle: Option<usize>,
    pub message: String,
}

impl ErrorRecord {
    pub fn particle(worker_id: usize, group: &str, particle: usize, message: String) -> Self {
        Self {
            worker_id,
            group: group.to_string(),
            particle: Some(particle),
            message,
        }
    }

    pub fn group(worker_id: usize, group: &str, message: String) -> Self {
        Self {
            worker_id,
            group: group.to_string(),
            particle: None,
            message,
        }
    }

    /// Format as a single log line (without the newline)
    pub fn to_line(&self, timestamp: &str) -> String {
        match self.particle {
            Some(particle) => format!(
                "{timestamp}\tworker {}\t{}\tparticle {particle}\t{}",
                self.worker_id, self.group, self.message
            ),
            None => format!(
                "{timestamp}\tworker {}\t{}\tgroup\t{}",
                self.worker_id, self.group, self.message
            ),
        }
    }
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("unknown-time"))
}

/// Appends records to the log file, opening it on first use
#[derive(Debug)]
struct ErrorLogWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    n_entries: usize,
}

impl ErrorLogWriter {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
            n_entries: 0,
        }
    }

    fn append(&mut self, record: &ErrorRecord) -> std::io::Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(BufWriter::new(file));
        }
        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{}", record.to_line(&timestamp()))?;
        }
        self.n_entries += 1;
        Ok(())
    }

    fn finish(mut self) -> std::io::Result<usize> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(self.n_entries)
    }
}

fn run_writer(path: PathBuf, rx: Receiver<ErrorRecord>) -> std::io::Result<usize> {
    let mut writer = ErrorLogWriter::new(&path);
    for record in rx {
        spdlog::warn!("{}", record.to_line("error"));
        writer.append(&record)?;
    }
    writer.finish()
}

/// Handle to the error log writer thread
#[derive(Debug)]
pub struct ErrorLog {
    tx: Sender<ErrorRecord>,
    handle: JoinHandle<std::io::Result<usize>>,
}

impl ErrorLog {
    /// Spawn the writer thread for the log at `path`
    pub fn spawn(path: &Path) -> Self {
        let (tx, rx) = channel::<ErrorRecord>();
        let path = path.to_path_buf();
        let handle = std::thread::spawn(move || run_writer(path, rx));
        Self { tx, handle }
    }

    /// A sender for one worker
    pub fn sender(&self) -> Sender<ErrorRecord> {
        self.tx.clone()
    }

    /// Wait for every sender to be dropped and return the number of entries written.
    ///
    /// Returns None if the writer thread panicked.
    pub fn finish(self) -> Option<std::io::Result<usize>> {
        drop(self.tx);
        self.handle.join().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_from_many_senders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        std::fs::write(&path, "earlier run\n").unwrap();

        let log = ErrorLog::spawn(&path);
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let tx = log.sender();
                std::thread::spawn(move || {
                    for particle in 0..5 {
                        tx.send(ErrorRecord::particle(
                            worker,
                            "mic.mrcs",
                            particle,
                            String::from("bad frame"),
                        ))
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.finish().unwrap().unwrap(), 20);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 21);
        assert_eq!(lines[0], "earlier run");
        for line in &lines[1..] {
            let fields: Vec<&str> = line.split('\t').collect();
            assert_eq!(fields.len(), 5);
            assert!(fields[1].starts_with("worker "));
            assert_eq!(fields[2], "mic.mrcs");
            assert_eq!(fields[4], "bad frame");
        }
    }

    #[test]
    fn test_no_entries_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        let log = ErrorLog::spawn(&path);
        assert_eq!(log.finish().unwrap().unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_group_line() {
        let record = ErrorRecord::group(2, "a.mrcs", String::from("no source"));
        assert_eq!(record.to_line("t"), "t\tworker 2\ta.mrcs\tgroup\tno source");
    }
}
