use thiserror::Error;

/// Error taxonomy of the session layer.
///
/// Sink delivery failures never show up here: they are handled (and
/// swallowed) by the sink itself.
#[derive(Debug, Error)]
pub enum Error {
    /// A required field is missing or malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A live handle is already registered for the profile.
    #[error("session already exists for profile {profile_id}")]
    AlreadyExists { profile_id: String },

    /// No connected handle exists for the profile.
    #[error("no connected session for profile {profile_id}")]
    NotReady { profile_id: String },

    /// Failure reported by the messaging backend.
    #[error("messaging backend error: {message}")]
    Collaborator { message: String },
}

impl Error {
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn already_exists(profile_id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            profile_id: profile_id.into(),
        }
    }

    #[must_use]
    pub fn not_ready(profile_id: impl Into<String>) -> Self {
        Self::NotReady {
            profile_id: profile_id.into(),
        }
    }

    #[must_use]
    pub fn collaborator(message: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
