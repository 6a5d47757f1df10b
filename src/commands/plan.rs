use clap::Args;
use railyard::agent::{self, AgentType, PlanRequest};
use railyard::plan::DeploymentPlan;
use railyard::shell;
use railyard::ssh::build_remote_invocation;
use serde::Serialize;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct PlanArgs {
    /// Server key from the whitelist
    pub server: String,

    /// Application directory under /var/webs
    pub directory: String,

    /// Branch to deploy
    pub branch: String,

    /// Operation type
    #[arg(long, default_value = "server-update")]
    pub agent: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutput {
    pub agent: AgentType,
    pub plan: DeploymentPlan,
    /// Invocation the final step runs, with every command chained.
    pub final_invocation: String,
}

pub fn run(args: PlanArgs, global: &GlobalArgs) -> CmdResult<PlanOutput> {
    let agent: AgentType = args.agent.parse()?;
    let (_, config) = global.load_servers()?;

    let request = PlanRequest {
        server_key: args.server,
        directory: args.directory,
        branch: args.branch,
    };
    let plan = agent::plan_operation(agent, &request, &config)?;
    let final_invocation =
        build_remote_invocation(&plan.ssh_host, &shell::join_commands(&plan.commands)).to_string();

    Ok((
        PlanOutput {
            agent,
            plan,
            final_invocation,
        },
        0,
    ))
}
