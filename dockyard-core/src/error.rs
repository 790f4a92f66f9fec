//! Error types shared by the session controller and the CLI.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Configuration problem the operator can fix (missing watch rules, unknown service, ...)
    #[error("{0}")]
    Config(String),

    #[error("failed to read project file {}: {source}", path.display())]
    ProjectIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid project file: {0}")]
    ProjectParse(#[from] serde_yaml::Error),

    /// The `x-debug` extension block exists but does not decode
    #[error("invalid x-debug configuration for service '{service}': {source}")]
    DebugDecode {
        service: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A backend operation (create/start/stop/kill/watch) failed
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    #[error("could not start {program}: {source}")]
    AttachSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}")]
    AttachExited { program: String, code: i32 },

    #[error("could not open {url}: {source}")]
    OpenView {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// Exit code reported by the log printer. Callers use `code` as their own exit status.
    #[error("{status}")]
    ExitCode { code: i32, status: String },

    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),

    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
        }
    }

    /// Combine worker errors: `None` when empty, the error itself when alone.
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ExitCode { code, .. } => *code,
            Self::AttachExited { code, .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}
