//! Server whitelist loading and validation.
//!
//! The whitelist is a JSON object keyed by server key:
//!
//! ```json
//! { "prod1": { "sshHost": "deploy@prod1.internal", "allowedDirectories": ["shop"] } }
//! ```

use crate::error::{Error, Result};
use crate::utils::validation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub ssh_host: String,
    #[serde(default)]
    pub allowed_directories: Vec<String>,
}

impl ServerConfig {
    pub fn new(ssh_host: impl Into<String>, allowed_directories: Vec<String>) -> Self {
        Self {
            ssh_host: ssh_host.into(),
            allowed_directories,
        }
    }

    pub fn allows(&self, directory: &str) -> bool {
        self.allowed_directories.iter().any(|d| d == directory)
    }
}

/// Validated mapping from server key to its SSH host and allowed directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServersConfig {
    servers: BTreeMap<String, ServerConfig>,
}

impl ServersConfig {
    pub fn from_servers<I, K>(servers: I) -> Self
    where
        I: IntoIterator<Item = (K, ServerConfig)>,
        K: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, server_key: &str) -> Option<&ServerConfig> {
        self.servers.get(server_key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ServerConfig)> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Check structure: at least one server, each with an SSH host and a
    /// non-empty list of non-empty directories.
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::config_invalid_value(
                "servers",
                None,
                "Configuration must contain at least one server",
            ));
        }

        for (key, server) in &self.servers {
            if server.ssh_host.trim().is_empty() {
                return Err(Error::config_invalid_value(
                    format!("{}.sshHost", key),
                    None,
                    format!("Server \"{}\" must have a non-empty \"sshHost\" string", key),
                ));
            }

            validation::require_non_empty_items(&server.allowed_directories, "allowedDirectories")
                .map_err(|err| {
                    Error::config_invalid_value(
                        format!("{}.allowedDirectories", key),
                        err.details
                            .get("id")
                            .and_then(|v| v.as_str())
                            .map(str::to_string),
                        format!(
                            "Server \"{}\" must have at least one allowed directory, all non-empty strings",
                            key
                        ),
                    )
                })?;
        }

        Ok(())
    }
}

/// Parse and validate whitelist JSON. `source` names the origin in errors.
pub fn parse_servers(content: &str, source: &str) -> Result<ServersConfig> {
    let config: ServersConfig =
        serde_json::from_str(content).map_err(|e| Error::config_invalid_json(source, e))?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the whitelist file at `path`.
pub fn load_servers(path: &Path) -> Result<ServersConfig> {
    let display = path.display().to_string();

    let content = std::fs::read_to_string(path).map_err(|e| {
        let err = Error::internal_io(e.to_string(), Some(format!("read {}", display)));
        if e.kind() == std::io::ErrorKind::NotFound {
            err.with_hint(format!(
                "Create {} or pass --config <path> to point at a server whitelist",
                display
            ))
        } else {
            err
        }
    })?;

    let config = parse_servers(&content, &display)?;
    log_status!("config", "Loaded servers: {}", config.keys().join(", "));
    Ok(config)
}

/// Read JSON from a file path, or from stdin when the source is `-`.
pub fn read_json_source(source: &str) -> Result<String> {
    use std::io::IsTerminal;

    if source.trim() == "-" {
        let mut stdin = std::io::stdin();
        if stdin.is_terminal() {
            return Err(Error::validation_invalid_argument(
                "plan",
                "Cannot read JSON from stdin when stdin is a TTY",
                None,
                None,
            ));
        }
        let mut buf = String::new();
        stdin
            .read_to_string(&mut buf)
            .map_err(|e| Error::internal_io(e.to_string(), Some("read stdin".to_string())))?;
        return Ok(buf);
    }

    std::fs::read_to_string(source)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("read {}", source))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io::Write;

    const VALID: &str = r#"{
        "prod1": { "sshHost": "deploy@prod1", "allowedDirectories": ["shop", "blog"] },
        "staging": { "sshHost": "staging", "allowedDirectories": ["shop"] }
    }"#;

    #[test]
    fn parses_camel_case_whitelist() {
        let config = parse_servers(VALID, "inline").unwrap();
        assert_eq!(config.keys(), vec!["prod1", "staging"]);

        let prod = config.get("prod1").unwrap();
        assert_eq!(prod.ssh_host, "deploy@prod1");
        assert!(prod.allows("blog"));
        assert!(!prod.allows("admin"));
    }

    #[test]
    fn empty_object_is_rejected() {
        let err = parse_servers("{}", "inline").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidValue);
        assert_eq!(err.message, "Configuration must contain at least one server");
    }

    #[test]
    fn missing_ssh_host_is_rejected() {
        let err = parse_servers(r#"{"prod1": {"allowedDirectories": ["shop"]}}"#, "inline")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidValue);
        assert_eq!(err.details["key"], "prod1.sshHost");
    }

    #[test]
    fn blank_directory_is_rejected_with_index() {
        let err = parse_servers(
            r#"{"prod1": {"sshHost": "prod1", "allowedDirectories": ["shop", "  "]}}"#,
            "inline",
        )
        .unwrap_err();
        assert_eq!(err.details["key"], "prod1.allowedDirectories");
        assert_eq!(err.details["value"], "1");
    }

    #[test]
    fn empty_directory_list_is_rejected() {
        let err = parse_servers(
            r#"{"prod1": {"sshHost": "prod1", "allowedDirectories": []}}"#,
            "inline",
        )
        .unwrap_err();
        assert_eq!(err.details["key"], "prod1.allowedDirectories");
    }

    #[test]
    fn malformed_json_reports_source() {
        let err = parse_servers("{ not json", "/tmp/servers.json").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidJson);
        assert_eq!(err.details["path"], "/tmp/servers.json");
    }

    #[test]
    fn load_servers_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let config = load_servers(file.path()).unwrap();
        assert_eq!(config.len(), 2);
    }

    #[test]
    fn load_servers_missing_file_has_hint() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_servers(&dir.path().join("servers.json")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalIoError);
        assert_eq!(err.hints.len(), 1);
    }
}
