//! Structured logging for task and workflow outcomes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use console::style;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::context::Context;
use crate::result::{Result as TaskResult, Status};

/// A structured record of one task/workflow outcome, independent of
/// whatever sink ends up rendering it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub task_name: String,
    pub status: Status,
    pub reason: Option<String>,
    pub metadata: Value,
}

impl LogEntry {
    #[must_use]
    pub fn from_result(result: &TaskResult) -> Self {
        Self {
            timestamp: Utc::now(),
            task_name: result.task_name().to_string(),
            status: result.status(),
            reason: result.reason().map(str::to_string),
            metadata: result.metadata().clone(),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "timestamp": self.timestamp,
            "taskName": self.task_name,
            "status": self.status,
            "reason": self.reason,
            "metadata": self.metadata,
        })
    }
}

/// A sink for task/workflow outcomes. Implementations receive the result
/// and, when available, the context it was produced against.
#[async_trait]
pub trait Logger: Send + Sync {
    async fn log(&self, result: &TaskResult, context: Option<&Context>);
}

/// The default logger: routes every outcome through `tracing`, at `warn`
/// for failures and `info` otherwise.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger;

#[async_trait]
impl Logger for TracingLogger {
    async fn log(&self, result: &TaskResult, _context: Option<&Context>) {
        let entry = LogEntry::from_result(result);
        if result.failed() {
            tracing::warn!(task = %entry.task_name, status = ?entry.status, reason = entry.reason.as_deref().unwrap_or_default(), "task outcome");
        } else {
            tracing::info!(task = %entry.task_name, status = ?entry.status, "task outcome");
        }
    }
}

/// A colorized, human-oriented logger for interactive CLI use.
#[derive(Debug, Clone, Default)]
pub struct ConsoleLogger;

#[async_trait]
impl Logger for ConsoleLogger {
    async fn log(&self, result: &TaskResult, _context: Option<&Context>) {
        match result.status() {
            Status::Success => println!("  {} {}", style("\u{2713}").green(), style(format!("{} succeeded", result.task_name())).green()),
            Status::Skipped => println!(
                "  {} {}",
                style("\u{21bc}").yellow(),
                style(format!("{} skipped{}", result.task_name(), reason_suffix(result))).yellow()
            ),
            Status::Failed => println!(
                "  {} {}",
                style("\u{2717}").red().bold(),
                style(format!("{} failed{}", result.task_name(), reason_suffix(result))).red().bold()
            ),
        }
    }
}

fn reason_suffix(result: &TaskResult) -> String {
    match result.reason() {
        Some(reason) => format!(": {reason}"),
        None => String::new(),
    }
}
