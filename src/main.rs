use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{execute, plan, servers};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "railyard")]
#[command(version = VERSION)]
#[command(about = "Plan and run whitelisted git deployments over SSH with rollback on conflict")]
struct Cli {
    /// Server whitelist file (default: ~/.config/railyard/servers.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured servers and their allowed directories
    Servers(servers::ServersArgs),
    /// Validate a deployment request and print its command plan
    Plan(plan::PlanArgs),
    /// Plan (or load a reviewed plan) and run it on the server
    Execute(execute::ExecuteArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let global = GlobalArgs { config: cli.config };

    if matches!(cli.command, Commands::Execute(_)) {
        tty::status("railyard is deploying...");
    }

    let (json_result, exit_code) = commands::run_json(cli.command, &global);

    if let Err(err) = output::print_json_result(json_result, exit_code) {
        eprintln!("{}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
