use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Command execution failed: {stderr}")]
    Command { stderr: String },

    #[error("File access error: {0}")]
    FileAccess(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Serde YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),
}

impl SyncError {
    /// Stable code used for structured error output.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Config(_) | SyncError::SerdeJson(_) | SyncError::SerdeYaml(_) | SyncError::UrlParse(_) => {
                "CONFIG_ERROR"
            }
            SyncError::Validation(_) => "VALIDATION_ERROR",
            SyncError::Remote(_) | SyncError::Ssh(_) => "REMOTE_ERROR",
            SyncError::Database(_) => "DATABASE_ERROR",
            SyncError::Command { .. } => "COMMAND_ERROR",
            SyncError::FileAccess(_) | SyncError::Io(_) => "FILE_ACCESS_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_displays_stderr() {
        let err = SyncError::Command { stderr: "ERROR 1045 (28000): Access denied".to_string() };
        assert_eq!(err.to_string(), "Command execution failed: ERROR 1045 (28000): Access denied");
        assert_eq!(err.kind(), "COMMAND_ERROR");
    }

    #[test]
    fn test_io_error_maps_to_file_access_kind() {
        let err: SyncError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err.kind(), "FILE_ACCESS_ERROR");
    }
}
