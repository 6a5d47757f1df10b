//! Compensating rollback after a git conflict.
//!
//! Cleanup restores the remote working tree to the baseline commit captured
//! before the update began. Every step is attempted once; a failing step is
//! reported as a warning and the sequence continues.

use serde::Serialize;
use std::time::Instant;

use crate::conflict::ConflictType;
use crate::plan::app_path;
use crate::progress::{format_seconds, ProgressEmitter, ProgressKind};
use crate::ssh::RemoteExec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    /// Every cleanup step succeeded.
    Complete,
    /// At least one cleanup step failed; the remote tree may need manual review.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackStepResult {
    pub step: usize,
    pub command: String,
    pub succeeded: bool,
    pub duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub status: RollbackStatus,
    pub steps: Vec<RollbackStepResult>,
    pub warnings: usize,
    pub duration: String,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.status == RollbackStatus::Complete
    }
}

/// User-facing conflict notice, routed separately from execution failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictNotice {
    pub conflict_type: ConflictType,
    pub directory: String,
    pub branch: String,
    pub message: String,
}

/// Build the cleanup sequence for a conflict.
///
/// The first command always enters the application directory. When no baseline
/// was captured the tree is reset without pinning it to a commit.
pub fn generate_cleanup_commands(
    directory: &str,
    conflict_type: ConflictType,
    original_head: Option<&str>,
) -> Vec<String> {
    let mut commands = vec![format!("cd {}", app_path(directory))];

    match conflict_type {
        ConflictType::MergeConflict | ConflictType::UnmergedIndex => {
            commands.push("git merge --abort || true".to_string());
        }
        ConflictType::StashConflict | ConflictType::UnmergedFile => {
            commands.push("git reset --hard".to_string());
        }
    }

    if let Some(head) = original_head.map(str::trim).filter(|h| !h.is_empty()) {
        commands.push(format!("git reset --hard {}", head));
    }

    commands.push("git stash pop || true".to_string());
    commands
}

/// Run the cleanup sequence against `host`, reporting each step through `emitter`.
///
/// The leading `cd` is not run on its own; each remaining step runs as
/// `cd <app-path> && <step>`. Rollback timing is independent of the emitter's
/// operation clock.
pub fn execute_conflict_cleanup(
    exec: &dyn RemoteExec,
    host: &str,
    directory: &str,
    conflict_type: ConflictType,
    original_head: Option<&str>,
    emitter: &mut ProgressEmitter<'_>,
) -> RollbackReport {
    let cleanup = generate_cleanup_commands(directory, conflict_type, original_head);
    let rollback_steps = &cleanup[1..];
    let total = rollback_steps.len();
    let enter_app = &cleanup[0];
    let rollback_start = Instant::now();

    log_status!(
        "rollback",
        "Starting rollback for {} ({} steps)",
        conflict_type,
        total
    );
    emitter.conflict_detected(conflict_type);

    let mut steps = Vec::with_capacity(total);

    for (index, command) in rollback_steps.iter().enumerate() {
        let step = index + 1;
        let step_start = Instant::now();

        emitter.emit(
            ProgressKind::RollbackRunning {
                rollback_step: step,
                total_rollback_steps: total,
                command: command.clone(),
            },
            format!("Rolling back: {}", command),
        );

        let chain = format!("{} && {}", enter_app, command);
        let outcome = exec.execute(host, &chain);
        let duration = format_seconds(step_start.elapsed());

        match outcome {
            Ok(_) => {
                emitter.emit(
                    ProgressKind::RollbackStepComplete {
                        rollback_step: step,
                        total_rollback_steps: total,
                        command: command.clone(),
                        duration: duration.clone(),
                    },
                    format!("Rollback step {}/{} completed ({}s)", step, total, duration),
                );
                steps.push(RollbackStepResult {
                    step,
                    command: command.clone(),
                    succeeded: true,
                    duration,
                    error: None,
                });
            }
            Err(failure) => {
                emitter.emit(
                    ProgressKind::RollbackStepWarning {
                        rollback_step: step,
                        total_rollback_steps: total,
                        command: command.clone(),
                        duration: duration.clone(),
                        error: failure.message.clone(),
                    },
                    format!(
                        "Rollback step {}/{} failed after {}s (non-critical)",
                        step, total, duration
                    ),
                );
                steps.push(RollbackStepResult {
                    step,
                    command: command.clone(),
                    succeeded: false,
                    duration,
                    error: Some(failure.message),
                });
            }
        }
    }

    let warnings = steps.iter().filter(|s| !s.succeeded).count();
    let duration = format_seconds(rollback_start.elapsed());
    let status = if warnings == 0 {
        RollbackStatus::Complete
    } else {
        RollbackStatus::Partial
    };

    let message = match status {
        RollbackStatus::Complete => {
            "All rollback operations completed. Server restored to stable state.".to_string()
        }
        RollbackStatus::Partial => format!(
            "Rollback finished with {} of {} steps failing. Server state needs manual review.",
            warnings, total
        ),
    };
    log_status!("rollback", "Rollback finished in {}s", duration);
    emitter.emit(
        ProgressKind::RollbackCompleted {
            duration: duration.clone(),
            warnings,
        },
        message,
    );

    RollbackReport {
        status,
        steps,
        warnings,
        duration,
    }
}

/// The end-user message for a conflict: names branch and directory and asks
/// for escalation.
pub fn create_conflict_notice(
    branch: &str,
    directory: &str,
    conflict_type: ConflictType,
) -> ConflictNotice {
    ConflictNotice {
        conflict_type,
        directory: directory.to_string(),
        branch: branch.to_string(),
        message: format!(
            "A conflict was encountered while pulling the {} development branch to the {} server. Please contact the developer.",
            branch, directory
        ),
    }
}
