//! Server update execution.
//!
//! Runs a command list step by step against one host. Each remote call replays
//! the whole executed prefix joined with ` && ` so `cd` and exported state carry
//! over between steps, since every call is a fresh login shell.
//!
//! After every step the output is checked for git conflict signatures. A
//! conflict triggers rollback to the baseline commit and ends the run with a
//! conflict outcome instead of a failure.

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::conflict::{detect_conflict, ConflictType};
use crate::error::{Error, Result};
use crate::plan::{app_path, DeploymentPlan};
use crate::progress::{ProgressEmitter, ProgressSink};
use crate::rollback::{self, RollbackReport};
use crate::ssh::{ExecFailure, ExecFailureKind, RemoteExec};
use crate::utils::{shell, validation};

/// Operation label carried by every progress event of a server update.
pub const OPERATION: &str = "serverUpdate";

/// Full or abbreviated git object id.
const OBJECT_ID_PATTERN: &str = r"^[0-9a-f]{7,64}$";

fn object_id_regex() -> &'static Regex {
    static OBJECT_ID: OnceLock<Regex> = OnceLock::new();
    OBJECT_ID.get_or_init(|| Regex::new(OBJECT_ID_PATTERN).expect("object id pattern must compile"))
}

/// Pull the commit id out of `git rev-parse HEAD` output. Login shells may
/// print profile noise first, so only the last line is considered and it must
/// be a bare object id.
pub fn parse_baseline(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .filter(|line| object_id_regex().is_match(line))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub commands: Vec<String>,
    pub ssh_host: String,
    pub directory: String,
    pub branch: String,
}

impl From<DeploymentPlan> for UpdateRequest {
    fn from(plan: DeploymentPlan) -> Self {
        Self {
            commands: plan.commands,
            ssh_host: plan.ssh_host,
            directory: plan.directory,
            branch: plan.branch,
        }
    }
}

impl UpdateRequest {
    fn validate(&self) -> Result<()> {
        validation::require_non_empty_items(&self.commands, "Commands")?;
        validation::require_non_empty(&self.ssh_host, "SSH host")?;
        let directory = validation::require_non_empty(&self.directory, "Directory")?;
        if directory != self.directory {
            return Err(Error::validation_invalid_argument(
                "Directory",
                "Directory must not have leading or trailing whitespace",
                Some(self.directory.clone()),
                None,
            ));
        }
        validation::require_non_empty(&self.branch, "Branch name")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSuccess {
    pub run_id: Uuid,
    pub ssh_host: String,
    pub total_steps: usize,
    pub total_duration: String,
    pub executed_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFailure {
    pub run_id: Uuid,
    pub ssh_host: String,
    pub total_steps: usize,
    pub failed_at_step: usize,
    pub failed_command: String,
    pub stdout: String,
    pub stderr: String,
    pub failure_reason: String,
    pub failure_kind: ExecFailureKind,
    pub exit_code: Option<i32>,
    pub total_duration: String,
    pub executed_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConflict {
    pub run_id: Uuid,
    pub ssh_host: String,
    pub conflict_type: ConflictType,
    pub directory: String,
    pub branch: String,
    pub total_steps: usize,
    pub failed_at_step: usize,
    pub total_duration: String,
    pub message: String,
    pub rollback: RollbackReport,
}

/// Terminal outcome of one update run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success(UpdateSuccess),
    Failure(UpdateFailure),
    Conflict(UpdateConflict),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            ExecutionResult::Success(s) => s.run_id,
            ExecutionResult::Failure(f) => f.run_id,
            ExecutionResult::Conflict(c) => c.run_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    CapturingBaseline,
    Running(usize),
    Succeeded,
    Failed,
    ConflictRollingBack,
    ConflictResolved,
}

/// State owned by a single run. `executed_commands` is always a prefix of the
/// request's command list.
pub struct ExecutionSession<'r> {
    request: &'r UpdateRequest,
    executed: usize,
    original_head: Option<String>,
    phase: Phase,
}

impl<'r> ExecutionSession<'r> {
    pub fn new(request: &'r UpdateRequest) -> Self {
        Self {
            request,
            executed: 0,
            original_head: None,
            phase: Phase::NotStarted,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn executed_commands(&self) -> &'r [String] {
        &self.request.commands[..self.executed]
    }

    pub fn original_head(&self) -> Option<&str> {
        self.original_head.as_deref()
    }

    /// Capture the remote HEAD as the rollback target. Failure only degrades rollback.
    fn capture_baseline(&mut self, exec: &dyn RemoteExec) {
        self.phase = Phase::CapturingBaseline;
        let command = format!("cd {} && git rev-parse HEAD", app_path(&self.request.directory));

        match exec.execute(&self.request.ssh_host, &command) {
            Ok(output) => match parse_baseline(&output.stdout) {
                Some(head) => {
                    log_status!(OPERATION, "Captured original HEAD: {}", head);
                    self.original_head = Some(head.to_string());
                }
                None if output.stdout.trim().is_empty() => {
                    log_status!(OPERATION, "Warning: git rev-parse HEAD returned no output");
                }
                None => {
                    log_status!(
                        OPERATION,
                        "Warning: git rev-parse HEAD returned no commit id, rollback will not pin HEAD"
                    );
                }
            },
            Err(failure) => {
                log_status!(
                    OPERATION,
                    "Warning: could not capture original HEAD: {}",
                    failure
                );
            }
        }
    }

    /// Drive the run to a terminal outcome. The session keeps its final phase
    /// and executed prefix for inspection afterwards.
    pub fn run(
        &mut self,
        exec: &dyn RemoteExec,
        emitter: &mut ProgressEmitter<'_>,
    ) -> ExecutionResult {
        let request = self.request;
        let total = request.commands.len();

        log_status!(
            OPERATION,
            "Executing update to {} ({} steps)",
            request.ssh_host,
            total
        );
        emitter.start(format!("Starting update to {}", request.ssh_host));

        self.capture_baseline(exec);

        for (index, command) in request.commands.iter().enumerate() {
            self.executed = index + 1;
            self.phase = Phase::Running(self.executed);
            emitter.step_start(command);

            let chain = shell::join_commands(self.executed_commands());

            match exec.execute(&request.ssh_host, &chain) {
                Ok(output) => {
                    if let Some(conflict_type) =
                        detect_conflict(&output.stdout, &output.stderr).conflict_type
                    {
                        return self.resolve_conflict(exec, emitter, conflict_type);
                    }
                    emitter.step_complete(command, &output.stdout, &output.stderr);
                }
                Err(failure) => {
                    if let Some(conflict_type) =
                        detect_conflict(&failure.stdout, &failure.stderr).conflict_type
                    {
                        log_status!(
                            OPERATION,
                            "Git conflict detected in failed command: {}",
                            conflict_type
                        );
                        return self.resolve_conflict(exec, emitter, conflict_type);
                    }
                    return self.fail(emitter, command, failure);
                }
            }
        }

        self.phase = Phase::Succeeded;
        let total_duration = emitter.get_total_duration();
        emitter.complete();
        log_status!(OPERATION, "Update completed in {}s", total_duration);

        ExecutionResult::Success(UpdateSuccess {
            run_id: emitter.run_id(),
            ssh_host: request.ssh_host.clone(),
            total_steps: total,
            total_duration,
            executed_at: now(),
        })
    }

    fn fail(
        &mut self,
        emitter: &mut ProgressEmitter<'_>,
        command: &str,
        failure: ExecFailure,
    ) -> ExecutionResult {
        self.phase = Phase::Failed;
        let stdout = failure.stdout.trim();
        let stderr = failure.stderr.trim();

        emitter.step_failed(command, &failure.message, stdout, stderr, failure.exit_code);
        let total_duration = emitter.get_total_duration();
        emitter.failed();

        ExecutionResult::Failure(UpdateFailure {
            run_id: emitter.run_id(),
            ssh_host: self.request.ssh_host.clone(),
            total_steps: self.request.commands.len(),
            failed_at_step: self.executed,
            failed_command: command.to_string(),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            failure_reason: failure.message.clone(),
            failure_kind: failure.kind,
            exit_code: failure.exit_code,
            total_duration,
            executed_at: now(),
        })
    }

    fn resolve_conflict(
        &mut self,
        exec: &dyn RemoteExec,
        emitter: &mut ProgressEmitter<'_>,
        conflict_type: ConflictType,
    ) -> ExecutionResult {
        self.phase = Phase::ConflictRollingBack;
        let request = self.request;

        let report = rollback::execute_conflict_cleanup(
            exec,
            &request.ssh_host,
            &request.directory,
            conflict_type,
            self.original_head.as_deref(),
            emitter,
        );
        self.phase = Phase::ConflictResolved;

        let notice = rollback::create_conflict_notice(&request.branch, &request.directory, conflict_type);
        let total_duration = emitter.get_total_duration();
        log_status!(
            OPERATION,
            "Update aborted at step {}/{} due to {} | Total: {}s",
            self.executed,
            request.commands.len(),
            conflict_type,
            total_duration
        );

        ExecutionResult::Conflict(UpdateConflict {
            run_id: emitter.run_id(),
            ssh_host: request.ssh_host.clone(),
            conflict_type,
            directory: notice.directory,
            branch: notice.branch,
            total_steps: request.commands.len(),
            failed_at_step: self.executed,
            total_duration,
            message: notice.message,
            rollback: report,
        })
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Execute a server update.
///
/// Returns `Err` only when the request is malformed, before any remote call.
/// Step failures and conflicts are outcomes, not errors.
pub fn execute_update(
    exec: &dyn RemoteExec,
    request: &UpdateRequest,
    sink: Option<&mut dyn ProgressSink>,
) -> Result<ExecutionResult> {
    request.validate()?;

    let mut emitter = ProgressEmitter::new(OPERATION, request.commands.len(), sink);
    let mut session = ExecutionSession::new(request);
    Ok(session.run(exec, &mut emitter))
}

/// Execute a reviewed plan. The plan is consumed.
pub fn execute(
    exec: &dyn RemoteExec,
    plan: DeploymentPlan,
    sink: Option<&mut dyn ProgressSink>,
) -> Result<ExecutionResult> {
    let request = UpdateRequest::from(plan);
    execute_update(exec, &request, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::ssh::CommandOutput;
    use std::cell::RefCell;

    struct NeverCalled;

    impl RemoteExec for NeverCalled {
        fn execute(
            &self,
            _host: &str,
            _command_sequence: &str,
        ) -> std::result::Result<CommandOutput, ExecFailure> {
            panic!("remote exec must not run for an invalid request");
        }
    }

    struct EchoExec {
        calls: RefCell<Vec<String>>,
    }

    impl RemoteExec for EchoExec {
        fn execute(
            &self,
            _host: &str,
            command_sequence: &str,
        ) -> std::result::Result<CommandOutput, ExecFailure> {
            self.calls.borrow_mut().push(command_sequence.to_string());
            Ok(CommandOutput {
                stdout: "0123abcd\n".to_string(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    fn request(commands: &[&str]) -> UpdateRequest {
        UpdateRequest {
            commands: commands.iter().map(|c| c.to_string()).collect(),
            ssh_host: "prod1".to_string(),
            directory: "shop".to_string(),
            branch: "main".to_string(),
        }
    }

    #[test]
    fn empty_command_list_fails_before_any_remote_call() {
        let err = execute_update(&NeverCalled, &request(&[]), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
    }

    #[test]
    fn blank_command_fails_before_any_remote_call() {
        let err = execute_update(&NeverCalled, &request(&["cd /var/webs/shop", " "]), None)
            .unwrap_err();
        assert_eq!(err.details["id"], "1");
    }

    #[test]
    fn blank_host_fails_before_any_remote_call() {
        let mut req = request(&["true"]);
        req.ssh_host = "".to_string();
        let err = execute_update(&NeverCalled, &req, None).unwrap_err();
        assert_eq!(err.message, "SSH host must be a non-empty string");
    }

    #[test]
    fn session_replays_prefix_and_ends_succeeded() {
        let exec = EchoExec {
            calls: RefCell::new(Vec::new()),
        };
        let req = request(&["cd /var/webs/shop", "git fetch origin"]);
        let mut emitter = ProgressEmitter::new(OPERATION, 2, None);
        let mut session = ExecutionSession::new(&req);
        assert_eq!(session.phase(), Phase::NotStarted);
        assert!(session.executed_commands().is_empty());

        let result = session.run(&exec, &mut emitter);

        assert!(result.is_success());
        assert_eq!(session.phase(), Phase::Succeeded);
        assert_eq!(session.executed_commands(), req.commands.as_slice());
        assert_eq!(session.original_head(), Some("0123abcd"));
        assert_eq!(
            *exec.calls.borrow(),
            vec![
                "cd /var/webs/shop && git rev-parse HEAD",
                "cd /var/webs/shop",
                "cd /var/webs/shop && git fetch origin",
            ]
        );
    }

    /// Answers the baseline with a commit id and `response` for any chain
    /// ending in `suffix`.
    struct StopAt {
        suffix: &'static str,
        response: std::result::Result<CommandOutput, ExecFailure>,
    }

    impl RemoteExec for StopAt {
        fn execute(
            &self,
            _host: &str,
            command_sequence: &str,
        ) -> std::result::Result<CommandOutput, ExecFailure> {
            if command_sequence.ends_with(self.suffix) {
                return self.response.clone();
            }
            let stdout = if command_sequence.ends_with("git rev-parse HEAD") {
                "0123abcd\n"
            } else {
                ""
            };
            Ok(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    fn run_session(
        exec: &dyn RemoteExec,
        req: &UpdateRequest,
    ) -> (ExecutionResult, Phase, usize) {
        let mut emitter = ProgressEmitter::new(OPERATION, req.commands.len(), None);
        let mut session = ExecutionSession::new(req);
        let result = session.run(exec, &mut emitter);
        (result, session.phase(), session.executed_commands().len())
    }

    #[test]
    fn failed_step_leaves_session_failed_with_prefix() {
        let exec = StopAt {
            suffix: "git stash",
            response: Err(ExecFailure {
                kind: ExecFailureKind::NonZeroExit,
                message: "Command failed with exit code 1".to_string(),
                stdout: String::new(),
                stderr: "error: could not write index".to_string(),
                exit_code: Some(1),
            }),
        };
        let req = request(&["cd /var/webs/shop", "git fetch origin", "git stash", "git checkout main"]);

        let (result, phase, executed) = run_session(&exec, &req);

        assert!(matches!(result, ExecutionResult::Failure(_)));
        assert_eq!(phase, Phase::Failed);
        assert_eq!(executed, 3);
    }

    #[test]
    fn conflict_leaves_session_resolved_with_prefix() {
        let exec = StopAt {
            suffix: "git pull origin main",
            response: Ok(CommandOutput {
                stdout: "CONFLICT (content): Merge conflict in Gemfile.lock".to_string(),
                stderr: String::new(),
                exit_code: 0,
            }),
        };
        let req = request(&[
            "cd /var/webs/shop",
            "git fetch origin",
            "git pull origin main",
            "rails db:migrate",
        ]);

        let (result, phase, executed) = run_session(&exec, &req);

        assert!(matches!(result, ExecutionResult::Conflict(_)));
        assert_eq!(phase, Phase::ConflictResolved);
        assert_eq!(executed, 3);
    }

    #[test]
    fn baseline_accepts_only_an_object_id() {
        assert_eq!(parse_baseline("0123abcd\n"), Some("0123abcd"));
        assert_eq!(
            parse_baseline("Welcome to prod1\n\n0123abcdef0123abcdef0123abcdef0123abcd\n"),
            Some("0123abcdef0123abcdef0123abcdef0123abcd")
        );
        assert_eq!(parse_baseline(""), None);
        assert_eq!(parse_baseline("abc"), None);
        assert_eq!(parse_baseline("0123abcd; rm -rf /"), None);
        assert_eq!(parse_baseline("0123abcd\nLast login: Mon"), None);
    }

    #[test]
    fn noisy_baseline_is_not_pinned_in_rollback() {
        struct Noisy {
            calls: RefCell<Vec<String>>,
        }

        impl RemoteExec for Noisy {
            fn execute(
                &self,
                _host: &str,
                command_sequence: &str,
            ) -> std::result::Result<CommandOutput, ExecFailure> {
                self.calls.borrow_mut().push(command_sequence.to_string());
                let stdout = if command_sequence.ends_with("git rev-parse HEAD") {
                    "fatal: not a git repository\necho pwned"
                } else if command_sequence.ends_with("git pull origin main") {
                    "CONFLICT (content): Merge conflict in app.rb"
                } else {
                    ""
                };
                Ok(CommandOutput {
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    exit_code: 0,
                })
            }
        }

        let exec = Noisy {
            calls: RefCell::new(Vec::new()),
        };
        let req = request(&["cd /var/webs/shop", "git pull origin main"]);
        let mut emitter = ProgressEmitter::new(OPERATION, 2, None);
        let mut session = ExecutionSession::new(&req);

        session.run(&exec, &mut emitter);

        assert_eq!(session.original_head(), None);
        let calls = exec.calls.borrow();
        assert!(calls.contains(&"cd /var/webs/shop && git merge --abort || true".to_string()));
        assert!(!calls.iter().any(|c| c.contains("reset --hard")));
    }

    #[test]
    fn padded_directory_fails_before_any_remote_call() {
        let mut req = request(&["cd /var/webs/shop"]);
        req.directory = " shop".to_string();
        let err = execute_update(&NeverCalled, &req, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
        assert_eq!(err.details["field"], "Directory");
    }

    #[test]
    fn result_serializes_with_outcome_tag() {
        let exec = EchoExec {
            calls: RefCell::new(Vec::new()),
        };
        let result = execute_update(&exec, &request(&["true"]), None).unwrap();
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["outcome"], "success");
        assert_eq!(json["totalSteps"], 1);
        assert_eq!(json["runId"], result.run_id().to_string());
    }
}
