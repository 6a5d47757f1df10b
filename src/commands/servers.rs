use clap::Args;
use serde::Serialize;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ServersArgs {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSummary {
    pub key: String,
    pub ssh_host: String,
    pub allowed_directories: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServersOutput {
    pub config_path: String,
    pub servers: Vec<ServerSummary>,
}

pub fn run(_args: ServersArgs, global: &GlobalArgs) -> CmdResult<ServersOutput> {
    let (path, config) = global.load_servers()?;

    let servers = config
        .iter()
        .map(|(key, server)| ServerSummary {
            key: key.clone(),
            ssh_host: server.ssh_host.clone(),
            allowed_directories: server.allowed_directories.clone(),
        })
        .collect();

    Ok((
        ServersOutput {
            config_path: path.display().to_string(),
            servers,
        },
        0,
    ))
}
