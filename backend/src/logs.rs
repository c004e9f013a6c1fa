//! Per-run log fan-out.
//!
//! Every pipeline log line is emitted as a `tracing` event and also pushed to
//! a broadcast channel so a host UI can follow a run live.
//!
//! ```text
//! pipeline stage ──► RunLog::log ──┬──► tracing (subscriber / RUST_LOG)
//!                                  └──► broadcast ──► subscribe() receivers
//! ```
//!
//! A `RunLog` is constructed by the composition root and injected; there is
//! no process-wide instance.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Log level for subscribers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    /// Pipeline stage that produced the line (`validate`, `gate`, ...).
    pub stage: String,
    pub message: String,
    /// Nesting depth, for per-item lines under a stage summary.
    #[serde(default)]
    pub indent: u8,
}

impl LogEntry {
    pub fn new(level: LogLevel, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            stage: stage.into(),
            message: message.into(),
            indent: 0,
        }
    }

    pub fn with_indent(mut self, indent: u8) -> Self {
        self.indent = indent;
        self
    }
}

/// Broadcasts run log entries to all subscribers.
#[derive(Debug, Clone)]
pub struct RunLog {
    sender: broadcast::Sender<LogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emit `entry` to tracing and to every subscriber.
    pub fn log(&self, entry: LogEntry) {
        let stage = entry.stage.as_str();
        let message = entry.message.as_str();
        match entry.level {
            LogLevel::Debug => tracing::debug!(stage, indent = entry.indent, "{}", message),
            LogLevel::Info | LogLevel::Success => {
                tracing::info!(stage, indent = entry.indent, "{}", message)
            }
            LogLevel::Warning => tracing::warn!(stage, "{}", message),
            LogLevel::Error => tracing::error!(stage, "{}", message),
        }

        // No receivers is fine.
        let _ = self.sender.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }

    pub fn debug(&self, stage: &str, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Debug, stage, message));
    }

    pub fn info(&self, stage: &str, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, stage, message));
    }

    pub fn success(&self, stage: &str, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Success, stage, message));
    }

    pub fn warning(&self, stage: &str, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warning, stage, message));
    }

    pub fn error(&self, stage: &str, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Error, stage, message));
    }

    /// Stage summary: `info` when `verbose`, otherwise `debug`.
    pub fn summary(&self, verbose: bool, stage: &str, message: impl Into<String>) {
        let level = if verbose { LogLevel::Info } else { LogLevel::Debug };
        self.log(LogEntry::new(level, stage, message));
    }

    /// Indented per-item decision line, always at `debug`.
    pub fn item(&self, stage: &str, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Debug, stage, message).with_indent(1));
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_entries() {
        let log = RunLog::new();
        let mut rx = log.subscribe();

        log.info("validate", "3 of 4 valid");
        log.item("validate", "filtered: Unknown Artist");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.level, LogLevel::Info);
        assert_eq!(first.stage, "validate");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.level, LogLevel::Debug);
        assert_eq!(second.indent, 1);
    }

    #[tokio::test]
    async fn test_summary_level_follows_verbosity() {
        let log = RunLog::new();
        let mut rx = log.subscribe();

        log.summary(false, "gate", "quiet");
        log.summary(true, "gate", "loud");

        assert_eq!(rx.recv().await.unwrap().level, LogLevel::Debug);
        assert_eq!(rx.recv().await.unwrap().level, LogLevel::Info);
    }

    #[test]
    fn test_log_without_subscribers_does_not_panic() {
        RunLog::new().warning("topup", "no provider");
    }

    #[test]
    fn test_entry_serializes_lowercase_level() {
        let entry = LogEntry::new(LogLevel::Warning, "pipeline", "short by 2");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "warning");
        assert_eq!(json["indent"], 0);
    }
}
