//! Shell escaping and quoting utilities.

/// Separator used when chaining commands into one remote invocation.
/// Each command only runs if everything before it succeeded.
pub const COMMAND_SEPARATOR: &str = " && ";

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Wrap a value in single quotes, escaping embedded quotes (always quotes).
pub fn single_quote(value: &str) -> String {
    format!("'{}'", escape_single_quote_content(value))
}

/// Quote a single argument for shell execution.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
/// - Embedded single quotes are escaped
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    // Characters that require quoting
    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    single_quote(arg)
}

/// Quote and join multiple arguments for display as one command line.
pub fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|a| quote_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Join commands so they run in one shell, in order, stopping at the first failure.
pub fn join_commands<S: AsRef<str>>(commands: &[S]) -> String {
    commands
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join(COMMAND_SEPARATOR)
}

/// Build the `bash -l -c '<sequence>'` line executed by the remote login shell.
pub fn login_shell_command(sequence: &str) -> String {
    format!("bash -l -c {}", single_quote(sequence))
}
