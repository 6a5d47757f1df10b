//! Step counters, timing, and structured progress events.
//!
//! The emitter is driven synchronously by the executor. Every event is logged
//! locally and then handed to the caller's sink, in order, before the next
//! step begins.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::conflict::ConflictType;
use crate::error::Result;

/// Receives progress events one at a time.
///
/// A failing sink never aborts the operation; the error is logged and dropped.
pub trait ProgressSink {
    fn send(&mut self, event: &ProgressEvent) -> Result<()>;
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressEvent) -> Result<()>,
{
    fn send(&mut self, event: &ProgressEvent) -> Result<()> {
        self(event)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub operation: String,
    pub current_step: usize,
    pub total_steps: usize,
    pub message: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "status",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ProgressKind {
    Started,
    StepRunning {
        command: String,
    },
    StepComplete {
        command: String,
        duration: String,
        stdout: String,
        stderr: String,
    },
    StepFailed {
        command: String,
        error: String,
        duration: String,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    ConflictDetected {
        conflict_type: ConflictType,
    },
    RollbackRunning {
        rollback_step: usize,
        total_rollback_steps: usize,
        command: String,
    },
    RollbackStepComplete {
        rollback_step: usize,
        total_rollback_steps: usize,
        command: String,
        duration: String,
    },
    RollbackStepWarning {
        rollback_step: usize,
        total_rollback_steps: usize,
        command: String,
        duration: String,
        error: String,
    },
    RollbackCompleted {
        duration: String,
        warnings: usize,
    },
    Completed {
        duration: String,
    },
    Failed {
        duration: String,
    },
}

impl ProgressKind {
    pub fn status(&self) -> &'static str {
        match self {
            ProgressKind::Started => "started",
            ProgressKind::StepRunning { .. } => "step-running",
            ProgressKind::StepComplete { .. } => "step-complete",
            ProgressKind::StepFailed { .. } => "step-failed",
            ProgressKind::ConflictDetected { .. } => "conflict-detected",
            ProgressKind::RollbackRunning { .. } => "rollback-running",
            ProgressKind::RollbackStepComplete { .. } => "rollback-step-complete",
            ProgressKind::RollbackStepWarning { .. } => "rollback-step-warning",
            ProgressKind::RollbackCompleted { .. } => "rollback-completed",
            ProgressKind::Completed { .. } => "completed",
            ProgressKind::Failed { .. } => "failed",
        }
    }
}

/// Wall-clock seconds with two decimals. Zero elapsed time renders as `0.00`.
pub fn format_seconds(elapsed: Duration) -> String {
    format!("{:.2}", elapsed.as_secs_f64())
}

pub struct ProgressEmitter<'a> {
    operation: String,
    run_id: Uuid,
    total_steps: usize,
    current_step: usize,
    start_time: Instant,
    step_start_time: Option<Instant>,
    sink: Option<&'a mut dyn ProgressSink>,
}

impl<'a> ProgressEmitter<'a> {
    pub fn new(
        operation: impl Into<String>,
        total_steps: usize,
        sink: Option<&'a mut dyn ProgressSink>,
    ) -> Self {
        Self {
            operation: operation.into(),
            run_id: Uuid::new_v4(),
            total_steps,
            current_step: 0,
            start_time: Instant::now(),
            step_start_time: None,
            sink,
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn start(&mut self, message: impl Into<String>) -> ProgressEvent {
        self.start_time = Instant::now();
        self.emit(ProgressKind::Started, message.into())
    }

    pub fn step_start(&mut self, command: &str) -> ProgressEvent {
        self.current_step += 1;
        self.step_start_time = Some(Instant::now());
        let message = format!("Executing step {}/{}", self.current_step, self.total_steps);
        self.emit(
            ProgressKind::StepRunning {
                command: command.to_string(),
            },
            message,
        )
    }

    pub fn step_complete(&mut self, command: &str, stdout: &str, stderr: &str) -> ProgressEvent {
        let duration = self.step_duration();
        let message = format!(
            "Step {}/{} completed ({}s)",
            self.current_step, self.total_steps, duration
        );
        self.emit(
            ProgressKind::StepComplete {
                command: command.to_string(),
                duration,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
            message,
        )
    }

    pub fn step_failed(
        &mut self,
        command: &str,
        error: &str,
        stdout: &str,
        stderr: &str,
        exit_code: Option<i32>,
    ) -> ProgressEvent {
        let duration = self.step_duration();
        let message = format!(
            "Step {}/{} failed ({}s)",
            self.current_step, self.total_steps, duration
        );
        self.emit(
            ProgressKind::StepFailed {
                command: command.to_string(),
                error: error.to_string(),
                duration,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            },
            message,
        )
    }

    pub fn conflict_detected(&mut self, conflict_type: ConflictType) -> ProgressEvent {
        self.emit(
            ProgressKind::ConflictDetected { conflict_type },
            format!("Git conflict detected: {}", conflict_type),
        )
    }

    pub fn complete(&mut self) -> ProgressEvent {
        let duration = self.get_total_duration();
        let message = format!("Operation completed successfully in {}s", duration);
        self.emit(ProgressKind::Completed { duration }, message)
    }

    pub fn failed(&mut self) -> ProgressEvent {
        let duration = self.get_total_duration();
        let message = format!(
            "Operation failed at step {}/{} after {}s",
            self.current_step, self.total_steps, duration
        );
        self.emit(ProgressKind::Failed { duration }, message)
    }

    /// Seconds since `start`, two decimals.
    pub fn get_total_duration(&self) -> String {
        format_seconds(self.start_time.elapsed())
    }

    fn step_duration(&self) -> String {
        self.step_start_time
            .map(|started| format_seconds(started.elapsed()))
            .unwrap_or_else(|| format_seconds(Duration::ZERO))
    }

    /// Log an event locally and forward it to the sink, if any.
    pub fn emit(&mut self, kind: ProgressKind, message: impl Into<String>) -> ProgressEvent {
        let event = ProgressEvent {
            run_id: self.run_id,
            operation: self.operation.clone(),
            current_step: self.current_step,
            total_steps: self.total_steps,
            message: message.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            kind,
        };

        self.log(&event);

        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = sink.send(&event) {
                log_status!(
                    self.operation,
                    "Progress sink rejected '{}' event: {}",
                    event.kind.status(),
                    err
                );
            }
        }

        event
    }

    fn log(&self, event: &ProgressEvent) {
        let step = format!("[{}/{}]", self.current_step, self.total_steps);
        match &event.kind {
            ProgressKind::Started => {
                log_status!(self.operation, "Starting operation ({} steps)", self.total_steps)
            }
            ProgressKind::StepRunning { command } => {
                log_status!(self.operation, "{} Running: {}", step, command)
            }
            ProgressKind::StepComplete { duration, .. } => {
                log_status!(self.operation, "{} Completed in {}s", step, duration)
            }
            ProgressKind::StepFailed {
                duration,
                error,
                stderr,
                ..
            } => {
                log_status!(self.operation, "{} FAILED after {}s", step, duration);
                if !stderr.is_empty() {
                    log_status!(self.operation, "Error output: {}", stderr);
                }
                log_status!(self.operation, "Error message: {}", error);
            }
            ProgressKind::Completed { duration } => log_status!(
                self.operation,
                "Completed all {} steps in {}s",
                self.total_steps,
                duration
            ),
            ProgressKind::Failed { duration } => log_status!(
                self.operation,
                "FAILED at step {} after {}s",
                step,
                duration
            ),
            _ => log_status!(self.operation, "{}", event.message),
        }
    }
}
