use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Environment variable that overrides the server whitelist location.
pub const SERVERS_CONFIG_ENV: &str = "RAILYARD_SERVERS_CONFIG";

/// Base railyard config directory (universal ~/.config/railyard/ on all platforms)
pub fn railyard() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected("APPDATA environment variable not set on Windows".to_string())
        })?;
        Ok(PathBuf::from(appdata).join("railyard"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("railyard"))
    }
}

/// Default server whitelist file
pub fn servers_json() -> Result<PathBuf> {
    Ok(railyard()?.join("servers.json"))
}

/// Resolve the server whitelist path: explicit flag, then env override, then default.
///
/// Explicit and env paths are tilde- and variable-expanded.
pub fn resolve_servers_config(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return expand(path, "--config");
    }

    match env::var(SERVERS_CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => expand(&path, SERVERS_CONFIG_ENV),
        _ => servers_json(),
    }
}

fn expand(path: &str, source: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path).map_err(|e| {
        Error::config_invalid_value(
            source,
            Some(path.to_string()),
            format!("Cannot expand config path: {}", e),
        )
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let path = resolve_servers_config(Some("/etc/railyard/servers.json")).unwrap();
        assert_eq!(path, PathBuf::from("/etc/railyard/servers.json"));
    }

    #[cfg(not(windows))]
    #[test]
    fn explicit_path_expands_tilde() {
        let home = env::var("HOME").unwrap();
        let path = resolve_servers_config(Some("~/servers.json")).unwrap();
        assert_eq!(path, PathBuf::from(home).join("servers.json"));
    }

    #[test]
    fn default_file_lives_under_railyard_dir() {
        let path = servers_json().unwrap();
        assert!(path.ends_with("railyard/servers.json"));
    }
}
