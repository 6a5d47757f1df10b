use clap::{Args, ValueEnum};
use railyard::agent::{self, AgentType, PlanRequest};
use railyard::config;
use railyard::executor::ExecutionResult;
use railyard::plan::{self, DeploymentPlan};
use railyard::progress::{ProgressEvent, ProgressSink};
use railyard::ssh::{ExecLimits, SshExec};
use railyard::Error;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

use super::{CmdResult, GlobalArgs};

/// Exit code for a run that stopped on a failed step.
pub const EXIT_EXECUTION_FAILED: i32 = 20;
/// Exit code for a run that hit a git conflict and was rolled back.
pub const EXIT_CONFLICT: i32 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProgressMode {
    /// No event stream (status lines still go to a terminal stderr)
    #[value(name = "none")]
    Off,
    /// One JSON progress event per line on stderr
    Json,
}

#[derive(Args)]
pub struct ExecuteArgs {
    /// Server key from the whitelist
    #[arg(required_unless_present = "plan")]
    pub server: Option<String>,

    /// Application directory under /var/webs
    #[arg(required_unless_present = "plan")]
    pub directory: Option<String>,

    /// Branch to deploy
    #[arg(required_unless_present = "plan")]
    pub branch: Option<String>,

    /// Execute a reviewed plan from a file (`-` reads stdin)
    #[arg(long, value_name = "FILE", conflicts_with_all = ["server", "directory", "branch"])]
    pub plan: Option<String>,

    /// Operation type
    #[arg(long, default_value = "server-update")]
    pub agent: String,

    /// Progress event stream
    #[arg(long, value_enum, default_value_t = ProgressMode::Off)]
    pub progress: ProgressMode,

    /// Per-command timeout in seconds (default 300)
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOutput {
    pub agent: AgentType,
    pub server_key: String,
    pub directory: String,
    pub branch: String,
    pub result: ExecutionResult,
}

pub fn run(args: ExecuteArgs, global: &GlobalArgs) -> CmdResult<ExecuteOutput> {
    let agent: AgentType = args.agent.parse()?;
    let limits = exec_limits(args.timeout_secs)?;
    let (_, servers) = global.load_servers()?;

    let plan = match args.plan.as_deref() {
        Some(source) => {
            let plan = read_plan(source)?;
            plan::verify_plan(&plan, &servers)?;
            plan
        }
        None => {
            let request = plan_request(args.server, args.directory, args.branch)?;
            agent::plan_operation(agent, &request, &servers)?
        }
    };

    let server_key = plan.server_key.clone();
    let directory = plan.directory.clone();
    let branch = plan.branch.clone();

    let exec = SshExec::with_limits(limits);
    let mut json_sink = write_json_event;
    let sink: Option<&mut dyn ProgressSink> = match args.progress {
        ProgressMode::Json => Some(&mut json_sink),
        ProgressMode::Off => None,
    };

    let result = agent::execute_operation(agent, plan, &exec, sink)?;
    let exit_code = exit_code_for_result(&result);

    Ok((
        ExecuteOutput {
            agent,
            server_key,
            directory,
            branch,
            result,
        },
        exit_code,
    ))
}

pub fn exit_code_for_result(result: &ExecutionResult) -> i32 {
    match result {
        ExecutionResult::Success(_) => 0,
        ExecutionResult::Failure(_) => EXIT_EXECUTION_FAILED,
        ExecutionResult::Conflict(_) => EXIT_CONFLICT,
    }
}

fn exec_limits(timeout_secs: Option<u64>) -> railyard::Result<ExecLimits> {
    let mut limits = ExecLimits::default();
    if let Some(secs) = timeout_secs {
        if secs == 0 {
            return Err(Error::validation_invalid_argument(
                "timeout-secs",
                "timeout-secs must be greater than zero",
                Some(secs.to_string()),
                None,
            ));
        }
        limits.timeout = Duration::from_secs(secs);
    }
    Ok(limits)
}

fn plan_request(
    server: Option<String>,
    directory: Option<String>,
    branch: Option<String>,
) -> railyard::Result<PlanRequest> {
    match (server, directory, branch) {
        (Some(server_key), Some(directory), Some(branch)) => Ok(PlanRequest {
            server_key,
            directory,
            branch,
        }),
        (server, directory, branch) => {
            let missing = [("server", server), ("directory", directory), ("branch", branch)]
                .into_iter()
                .filter(|(_, value)| value.is_none())
                .map(|(name, _)| name.to_string())
                .collect();
            Err(Error::validation_missing_argument(missing))
        }
    }
}

/// Load a saved plan. Accepts a bare plan or the `railyard plan` envelope.
fn read_plan(source: &str) -> railyard::Result<DeploymentPlan> {
    let raw = config::read_json_source(source)?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| Error::validation_invalid_json(e, Some(format!("parse plan {}", source))))?;

    let plan_value = value
        .pointer("/data/plan")
        .cloned()
        .unwrap_or(value);

    serde_json::from_value(plan_value)
        .map_err(|e| Error::validation_invalid_json(e, Some(format!("parse plan {}", source))))
}

fn write_json_event(event: &ProgressEvent) -> railyard::Result<()> {
    let line = serde_json::to_string(event).map_err(|e| {
        Error::internal_json(e.to_string(), Some("serialize progress event".to_string()))
    })?;

    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    writeln!(handle, "{}", line)
        .map_err(|e| Error::internal_io(e.to_string(), Some("write progress event".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_is_rejected() {
        let err = exec_limits(Some(0)).unwrap_err();
        assert_eq!(err.code, railyard::ErrorCode::ValidationInvalidArgument);
    }

    #[test]
    fn timeout_override_keeps_output_cap() {
        let limits = exec_limits(Some(30)).unwrap();
        assert_eq!(limits.timeout, Duration::from_secs(30));
        assert_eq!(limits.max_output_bytes, ExecLimits::default().max_output_bytes);
    }

    #[test]
    fn missing_positionals_are_listed() {
        let err = plan_request(Some("prod1".to_string()), None, None).unwrap_err();
        assert_eq!(err.details["args"], serde_json::json!(["directory", "branch"]));
    }
}
