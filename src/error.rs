// Error taxonomy shared by the API client, the archive builder and the
// command handlers. Every variant is terminal for the running command: the
// binary prints it as a single `Error: ...` line and exits non-zero.

use std::io;

use thiserror::Error;

/// Convenience alias for everything that can fail inside the CLI.
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    /// No token is stored locally; raised before any network call.
    #[error("not authenticated. Please run 'everywhere login' first")]
    NotAuthenticated,

    /// The server rejected the token, or reported it as not authenticated.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Any non-success HTTP status. `body` is the raw response text.
    #[error("{context}: {status} - {body}")]
    Remote {
        context: &'static str,
        status: u16,
        body: String,
    },

    /// HTTP success, but the payload carried a non-empty `error` field.
    #[error("{context}: {message}")]
    Execution {
        context: &'static str,
        message: String,
    },

    #[error("{context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{context}: invalid response body: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Local file, directory walk or archive failure.
    #[error("{context}: {source}")]
    Filesystem {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read from terminal: {0}")]
    Terminal(#[source] io::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),

    #[error("{0}")]
    Validation(String),
}

impl CliError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn filesystem(context: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Filesystem {
            context: context.into(),
            source: source.into(),
        }
    }

    pub(crate) fn transport(context: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Transport { context, source }
    }

    /// True for both the local "no token" case and a server-side rejection.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::Authentication(_))
    }
}
