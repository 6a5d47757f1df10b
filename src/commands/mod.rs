use railyard::config::{self, ServersConfig};
use railyard::paths;
use std::path::PathBuf;

pub type CmdResult<T> = railyard::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    /// Explicit server whitelist path from `--config`.
    pub config: Option<String>,
}

impl GlobalArgs {
    pub fn load_servers(&self) -> railyard::Result<(PathBuf, ServersConfig)> {
        let path = paths::resolve_servers_config(self.config.as_deref())?;
        let servers = config::load_servers(&path)?;
        Ok((path, servers))
    }
}

pub mod execute;
pub mod plan;
pub mod servers;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (railyard::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Servers(args) => dispatch!(args, global, servers),
        crate::Commands::Plan(args) => dispatch!(args, global, plan),
        crate::Commands::Execute(args) => dispatch!(args, global, execute),
    }
}
