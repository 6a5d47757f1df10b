//! Operation routing by agent type.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::ServersConfig;
use crate::error::{Error, Result};
use crate::executor::{self, ExecutionResult};
use crate::plan::{self, DeploymentPlan};
use crate::progress::ProgressSink;
use crate::ssh::RemoteExec;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    #[default]
    /// Pull a branch onto a whitelisted app directory and restart its service.
    ServerUpdate,
}

impl AgentType {
    pub const ALL: [AgentType; 1] = [AgentType::ServerUpdate];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::ServerUpdate => "server-update",
        }
    }

    pub fn available() -> Vec<String> {
        Self::ALL.iter().map(|a| a.as_str().to_string()).collect()
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|agent| agent.as_str() == s)
            .copied()
            .ok_or_else(|| Error::agent_unknown_type(s, Self::available()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub server_key: String,
    pub directory: String,
    pub branch: String,
}

pub fn plan_operation(
    agent: AgentType,
    request: &PlanRequest,
    config: &ServersConfig,
) -> Result<DeploymentPlan> {
    log_status!("agent", "Routing plan to {}", agent);

    match agent {
        AgentType::ServerUpdate => plan::plan_update(
            &request.server_key,
            &request.directory,
            &request.branch,
            config,
        ),
    }
}

pub fn execute_operation(
    agent: AgentType,
    plan: DeploymentPlan,
    exec: &dyn RemoteExec,
    sink: Option<&mut dyn ProgressSink>,
) -> Result<ExecutionResult> {
    log_status!("agent", "Routing execution to {}", agent);

    match agent {
        AgentType::ServerUpdate => executor::execute(exec, plan, sink),
    }
}
