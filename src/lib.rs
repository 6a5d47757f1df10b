/// Macro for prefixed status logging to stderr (only when stderr is a terminal).
///
/// The prefix may be any `Display` expression.
///
/// Usage:
/// ```ignore
/// log_status!("plan", "Plan created for {}", server_key);
/// log_status!(self.operation, "Running: {}", command);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if ::std::io::IsTerminal::is_terminal(&::std::io::stderr()) {
            eprintln!("[{}] {}", $prefix, format_args!($($arg)*));
        }
    };
}

pub mod core;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `railyard::plan` instead of `railyard::core::plan`
pub use core::*;
pub use utils::*;
