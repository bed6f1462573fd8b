use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HarnessError {
    /// `Unauthorized` maps to 401: every current caller raises it for a
    /// missing or invalid credential (see `harness_server::auth`), never for
    /// an authenticated-but-forbidden action — there's no 403 case to carve
    /// out yet.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Unauthorized(_) => 401,
            Self::Conflict(_) => 409,
            Self::InvalidInput(_) => 400,
            Self::ServiceUnavailable(_) => 503,
            Self::Internal(_) => 500,
        }
    }
}
