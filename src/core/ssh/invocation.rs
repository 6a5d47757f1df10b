use crate::utils::shell;
use serde::Serialize;

/// Options applied to every non-interactive ssh call so a stalled connection
/// or an unexpected prompt cannot hang a deployment step.
const SSH_BATCH_OPTIONS: [&str; 8] = [
    "-o",
    "BatchMode=yes",
    "-o",
    "ConnectTimeout=10",
    "-o",
    "ServerAliveInterval=15",
    "-o",
    "ServerAliveCountMax=3",
];

/// A fully-built process invocation: program plus argv, never passed through a local shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInvocation {
    pub host: String,
    pub program: String,
    pub args: Vec<String>,
    /// The command line the remote (or local) login shell receives.
    pub remote_command: String,
    pub is_local: bool,
}

impl std::fmt::Display for RemoteInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.program, shell::quote_args(&self.args))
    }
}

/// Build the invocation that runs `command_sequence` in a login shell on `host`.
///
/// The sequence travels as a single ssh argument, `bash -l -c '<escaped>'`, with every
/// embedded single quote rewritten as `'\''`. Escaping is total: any input string
/// produces a well-formed invocation.
///
/// Localhost targets skip ssh and run `bash -l -c <sequence>` directly.
pub fn build_remote_invocation(host: &str, command_sequence: &str) -> RemoteInvocation {
    if is_local_host(host) {
        return RemoteInvocation {
            host: host.to_string(),
            program: "bash".to_string(),
            args: vec![
                "-l".to_string(),
                "-c".to_string(),
                command_sequence.to_string(),
            ],
            remote_command: shell::login_shell_command(command_sequence),
            is_local: true,
        };
    }

    let remote_command = shell::login_shell_command(command_sequence);

    let mut args: Vec<String> = SSH_BATCH_OPTIONS.iter().map(|s| s.to_string()).collect();
    args.push(host.to_string());
    args.push(remote_command.clone());

    RemoteInvocation {
        host: host.to_string(),
        program: "ssh".to_string(),
        args,
        remote_command,
        is_local: false,
    }
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}
