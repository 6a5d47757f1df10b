use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,
    ValidationInvalidJson,

    ServerNotFound,
    ServerNoSshHost,

    DeployDirectoryNotAllowed,
    DeployBranchInvalid,

    AgentUnknownType,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidJson => "validation.invalid_json",

            ErrorCode::ServerNotFound => "server.not_found",
            ErrorCode::ServerNoSshHost => "server.no_ssh_host",

            ErrorCode::DeployDirectoryNotAllowed => "deploy.directory_not_allowed",
            ErrorCode::DeployBranchInvalid => "deploy.branch_invalid",

            ErrorCode::AgentUnknownType => "agent.unknown_type",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// Validation-class errors are raised before any remote call is made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorCode::ValidationMissingArgument
                | ErrorCode::ValidationInvalidArgument
                | ErrorCode::ValidationInvalidJson
                | ErrorCode::ServerNotFound
                | ErrorCode::ServerNoSshHost
                | ErrorCode::DeployDirectoryNotAllowed
                | ErrorCode::DeployBranchInvalid
                | ErrorCode::AgentUnknownType
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryNotAllowedDetails {
    pub server_key: String,
    pub directory: String,
    pub allowed_directories: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInvalidDetails {
    pub branch: String,
    pub pattern: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(ErrorCode::ValidationInvalidArgument, problem, details)
    }

    pub fn validation_invalid_json(err: serde_json::Error, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": err.to_string(),
            "context": context,
        });

        Self::new(ErrorCode::ValidationInvalidJson, "Invalid JSON", details)
    }

    pub fn server_not_found(id: impl Into<String>, available: Vec<String>) -> Self {
        let id = id.into();
        let message = if available.is_empty() {
            format!("Unknown server: \"{}\"", id)
        } else {
            format!(
                "Unknown server: \"{}\". Available servers: {}",
                id,
                available.join(", ")
            )
        };

        Self::new(
            ErrorCode::ServerNotFound,
            message,
            to_details(NotFoundDetails { id, available }),
        )
        .with_hint("Run 'railyard servers' to see configured servers")
    }

    pub fn server_no_ssh_host(server_key: impl Into<String>) -> Self {
        let server_key = server_key.into();
        Self::new(
            ErrorCode::ServerNoSshHost,
            format!("Server \"{}\" has no SSH host configured", server_key),
            serde_json::json!({ "serverKey": server_key }),
        )
    }

    pub fn deploy_directory_not_allowed(
        server_key: impl Into<String>,
        directory: impl Into<String>,
        allowed_directories: Vec<String>,
    ) -> Self {
        let server_key = server_key.into();
        let directory = directory.into();
        let message = format!(
            "Directory \"{}\" is not allowed on server \"{}\". Allowed: {}",
            directory,
            server_key,
            allowed_directories.join(", ")
        );

        Self::new(
            ErrorCode::DeployDirectoryNotAllowed,
            message,
            to_details(DirectoryNotAllowedDetails {
                server_key,
                directory,
                allowed_directories,
            }),
        )
    }

    pub fn deploy_branch_invalid(branch: impl Into<String>, pattern: &str) -> Self {
        Self::new(
            ErrorCode::DeployBranchInvalid,
            "Invalid branch name. Only alphanumeric characters, hyphens, underscores, slashes, and dots are allowed",
            to_details(BranchInvalidDetails {
                branch: branch.into(),
                pattern: pattern.to_string(),
            }),
        )
    }

    pub fn agent_unknown_type(requested: impl Into<String>, available: Vec<String>) -> Self {
        let requested = requested.into();
        Self::new(
            ErrorCode::AgentUnknownType,
            format!(
                "Unknown agent type: \"{}\". Available types: {}",
                requested,
                available.join(", ")
            ),
            to_details(NotFoundDetails {
                id: requested,
                available,
            }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            to_details(ConfigInvalidJsonDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.clone(),
        });

        Self::new(ErrorCode::ConfigInvalidValue, problem, details)
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}
