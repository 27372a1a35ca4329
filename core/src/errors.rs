use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing required secret `{0}`")] MissingSecret(String),
    #[error("Invalid setting `{0}`: {1}")] InvalidSetting(String, String),
    #[error("Database unavailable")] DbUnavailable,
    #[error("Session expired")] SessionExpired,
    #[error("Username must not be empty")] EmptyUsername,
    #[error("Unknown session")] UnknownSession,
    #[error("Invalid comparison request: {0}")] InvalidRequest(String),
    #[error("Unknown model: {0}")] UnknownModel(String),
    #[error("Unknown knowledge base: {0}")] UnknownKnowledgeBase(String),
    #[error("Feedback score must be between 1 and 5")] InvalidScore,
    #[error("Audit append failed: {0}")] Audit(String),
    #[error("Retrieval failed: {0}")] Retrieval(String),
    #[error(transparent)] Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSecret(_) => "CFG-1001",
            Self::InvalidSetting(..) => "CFG-1002",
            Self::DbUnavailable => "DB-1001",
            Self::SessionExpired => "SES-1001",
            Self::EmptyUsername => "SES-1002",
            Self::UnknownSession => "SES-1003",
            Self::InvalidRequest(_) => "CMP-1001",
            Self::UnknownModel(_) => "MDL-1001",
            Self::UnknownKnowledgeBase(_) => "KB-1001",
            Self::InvalidScore => "FBK-1001",
            Self::Audit(_) => "AUD-1001",
            Self::Retrieval(_) => "RET-1001",
            Self::Internal(_) => "GEN-1000",
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::MissingSecret(_) => {
                "Set the variable in the environment or in a .env file next to the binary, then restart."
            }
            Self::InvalidSetting(..) => "Fix the value in the environment or .env file, then restart.",
            Self::DbUnavailable => "The application could not access the SQLite database.",
            Self::SessionExpired => "No activity for 15 minutes; please sign in again.",
            Self::EmptyUsername => "Enter a name before starting.",
            Self::UnknownSession => "The session cookie does not match an active session.",
            Self::InvalidRequest(_) => "The comparison request was rejected before any model was called.",
            Self::UnknownModel(_) => "The model is not registered or its provider has no credential.",
            Self::UnknownKnowledgeBase(_) => "The knowledge base is not configured.",
            Self::InvalidScore => "Ratings are whole stars from 1 to 5.",
            Self::Audit(_) => "The audit spreadsheet rejected the row.",
            Self::Retrieval(_) => "The knowledge-base retrieval service did not answer.",
            Self::Internal(_) => "An unspecified error occurred.",
        }
    }

    /// Whether the error came from the caller rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyUsername
                | Self::InvalidRequest(_)
                | Self::UnknownModel(_)
                | Self::UnknownKnowledgeBase(_)
                | Self::InvalidScore
        )
    }
}

impl From<r2d2::Error> for AppError {
    fn from(_: r2d2::Error) -> Self {
        Self::DbUnavailable
    }
}
