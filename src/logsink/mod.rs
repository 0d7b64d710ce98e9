//! Append-only run logs.
//!
//! Every run owns two files: a core log for operational errors and a result
//! log with one line per evaluated rule. All writes funnel through a single
//! writer task so concurrent probe tasks never interleave partial lines.

use crate::error::ScanError;
use chrono::Local;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Vulnerable,
    NotVulnerable,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Vulnerable => "There is a security vulnerability",
            Self::NotVulnerable => "There is not a security vulnerability",
        };
        f.write_str(s)
    }
}

enum Record {
    Error {
        message: String,
        context: String,
    },
    Result {
        url: String,
        verdict: Verdict,
        name: String,
        detail: String,
    },
}

/// Cheap clonable writer front-end handed to every probe task.
#[derive(Clone)]
pub struct LogHandle {
    tx: mpsc::UnboundedSender<Record>,
}

impl LogHandle {
    /// Appends an error line to the core log. Context names the target the
    /// error belongs to; empty context drops the suffix.
    pub fn error(&self, message: impl Into<String>, context: impl Into<String>) {
        let _ = self.tx.send(Record::Error {
            message: message.into(),
            context: context.into(),
        });
    }

    /// Appends one rule outcome to the result log.
    pub fn result(
        &self,
        url: impl Into<String>,
        verdict: Verdict,
        name: impl Into<String>,
        detail: impl Into<String>,
    ) {
        let _ = self.tx.send(Record::Result {
            url: url.into(),
            verdict,
            name: name.into(),
            detail: detail.into(),
        });
    }
}

pub struct LogSink {
    tx: Option<mpsc::UnboundedSender<Record>>,
    writer: JoinHandle<()>,
    core_path: PathBuf,
    result_path: PathBuf,
}

fn timestamp() -> String {
    Local::now().format("[%Y-%m-%d %H:%M:%S] ").to_string()
}

impl LogSink {
    /// Creates both run files and starts the writer task. File names carry
    /// the run start time so successive runs never collide.
    pub async fn create(dir: &Path) -> Result<Self, ScanError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ScanError::RunFatal(format!("cannot create log dir: {e}")))?;
        let stamp = Local::now().format("%Y_%m_%d_%H%M%S");
        let core_path = dir.join(format!("CORELOG_{stamp}"));
        let result_path = dir.join(format!("CORELOG_{stamp}_result"));

        let mut core = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&core_path)
            .await
            .map_err(|e| ScanError::RunFatal(format!("cannot open core log: {e}")))?;
        let mut result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&result_path)
            .await
            .map_err(|e| ScanError::RunFatal(format!("cannot open result log: {e}")))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let (file, line) = match record {
                    Record::Error { message, context } => {
                        let suffix = if context.is_empty() {
                            String::new()
                        } else {
                            format!("--- For target:{context}")
                        };
                        (&mut core, format!("{}{message}{suffix}\n", timestamp()))
                    }
                    Record::Result {
                        url,
                        verdict,
                        name,
                        detail,
                    } => (
                        &mut result,
                        format!("{}{url} {verdict} \"{name}\" {detail}\n", timestamp()),
                    ),
                };
                if file.write_all(line.as_bytes()).await.is_ok() {
                    let _ = file.flush().await;
                }
            }
        });

        Ok(Self {
            tx: Some(tx),
            writer,
            core_path,
            result_path,
        })
    }

    pub fn handle(&self) -> LogHandle {
        LogHandle {
            // Sink keeps its sender until shutdown, so unwrap cannot trip
            // while handles are being created.
            tx: self.tx.clone().expect("log sink already shut down"),
        }
    }

    pub fn core_log_path(&self) -> &Path {
        &self.core_path
    }

    pub fn result_log_path(&self) -> &Path {
        &self.result_path
    }

    /// Drops the sender and waits for the writer to drain every queued
    /// record. Callers must drop their handles first or this will wait on
    /// them.
    pub async fn shutdown(mut self) {
        self.tx.take();
        let _ = self.writer.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn result_lines_follow_the_grammar() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::create(dir.path()).await.unwrap();
        let handle = sink.handle();
        handle.result(
            "http://example.com",
            Verdict::Vulnerable,
            "weak admin panel",
            "POC-250101-010101-001 status == 200",
        );
        handle.result(
            "http://example.com",
            Verdict::NotVulnerable,
            "weak admin panel",
            "POC-250101-010101-002",
        );
        let path = sink.result_log_path().to_path_buf();
        drop(handle);
        sink.shutdown().await;

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(
            "http://example.com There is a security vulnerability \"weak admin panel\" POC-250101-010101-001 status == 200"
        ));
        assert!(lines[1].contains("There is not a security vulnerability"));
        assert!(lines[0].starts_with('['));
    }

    #[tokio::test]
    async fn error_lines_carry_the_target_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::create(dir.path()).await.unwrap();
        let handle = sink.handle();
        handle.error("connection refused", "http://example.com");
        handle.error("no checks resolved", "");
        let path = sink.core_log_path().to_path_buf();
        drop(handle);
        sink.shutdown().await;

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines[0].contains("connection refused--- For target:http://example.com"));
        assert!(lines[1].ends_with("no checks resolved"));
    }

    #[tokio::test]
    async fn log_files_are_append_only_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::create(dir.path()).await.unwrap();
        assert!(sink.core_log_path().exists());
        assert!(sink.result_log_path().exists());
        assert!(sink
            .result_log_path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_result"));
        sink.shutdown().await;
    }
}
