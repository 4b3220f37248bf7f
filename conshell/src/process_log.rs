//! Per-process append-only log files.
//!
//! Each run with logging enabled gets `process-<id>-<yyyyMMdd-HHmmss>.log` in the configured
//! directory: a header with the command and start time, one `[HH:MM:SS] text` line per
//! output line with style codes removed, and a footer with the end time.

use crate::{
    decoder::ansi::strip_style_codes,
    utils::time::{clock_stamp, file_stamp, full_stamp},
};
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

const RULE: &str = "-----";

#[derive(Debug)]
pub struct ProcessLog {
    path: PathBuf,
    file: File,
}

impl ProcessLog {
    /// Creates the log directory if needed and writes the header.
    pub fn create(dir: &Path, id: u32, command: &str, started_at: SystemTime) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("process-{id}-{}.log", file_stamp(started_at)));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "Command: {command}")?;
        writeln!(file, "Start Time: {}", full_stamp(started_at))?;
        writeln!(file, "{RULE}")?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, line: &str) -> io::Result<()> {
        writeln!(
            self.file,
            "[{}] {}",
            clock_stamp(SystemTime::now()),
            strip_style_codes(line)
        )
    }

    /// Writes the footer. Consuming `self` makes a second close impossible.
    pub fn close(mut self) -> io::Result<()> {
        writeln!(self.file, "{RULE}")?;
        writeln!(self.file, "End Time: {}", full_stamp(SystemTime::now()))?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn log_has_header_stripped_lines_and_footer() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let mut log = ProcessLog::create(&logs, 7, "echo hi", SystemTime::now()).unwrap();
        let path = log.path().to_path_buf();
        log.append("§chello §lworld§r").unwrap();
        log.close().unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("process-7-"));
        assert!(name.ends_with(".log"));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Command: echo hi");
        assert!(lines[1].starts_with("Start Time: "));
        assert_eq!(lines[2], "-----");
        assert!(lines[3].starts_with('['));
        assert!(lines[3].ends_with("] hello world"));
        assert_eq!(lines[4], "-----");
        assert!(lines[5].starts_with("End Time: "));
    }
}
