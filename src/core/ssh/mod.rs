//! Remote command channel.
//!
//! - `invocation` - builds the `ssh <host> "bash -l -c '...'"` argv
//! - `client` - runs an invocation with a timeout and an output cap

pub mod client;
pub mod invocation;

pub use client::{CommandOutput, ExecFailure, ExecFailureKind, ExecLimits, RemoteExec, SshExec};
pub use invocation::{build_remote_invocation, is_local_host, RemoteInvocation};
