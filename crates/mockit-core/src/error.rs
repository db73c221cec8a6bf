//! Error types for mockit-core

/// Result type alias for mockit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the instance manager and request-dispatch engine.
///
/// Each variant maps to exactly one `errorCode` tag and HTTP status in the
/// control-plane contract; see [`Error::error_code`] and [`Error::status_code`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("instance not found: {id}")]
    NotFound { id: String },

    #[error("instance already exists: {id}")]
    AlreadyExists { id: String },

    #[error("invalid certificate material: {message}")]
    InvalidCertificate { message: String },

    #[error("failed to create instance: {message}")]
    CreationFailed { message: String },

    #[error("invalid expectation: {message}")]
    InvalidExpectation { message: String },

    #[error("relay error: {message}")]
    RelayError { message: String },

    #[error("JsonMC parse error: {message}")]
    JsonMc { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("internal error: {0}")]
    Generic(String),
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::Generic(message)
    }
}

impl Error {
    /// Create a validation error.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Create a not-found error for the given instance id.
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an already-exists error for the given instance id.
    pub fn already_exists<S: Into<String>>(id: S) -> Self {
        Self::AlreadyExists { id: id.into() }
    }

    /// Create a certificate-validation error.
    pub fn invalid_certificate<S: Into<String>>(message: S) -> Self {
        Self::InvalidCertificate { message: message.into() }
    }

    /// Create a bring-up failure error.
    pub fn creation_failed<S: Into<String>>(message: S) -> Self {
        Self::CreationFailed { message: message.into() }
    }

    /// Create an expectation-validation error.
    pub fn invalid_expectation<S: Into<String>>(message: S) -> Self {
        Self::InvalidExpectation { message: message.into() }
    }

    /// Create a relay error.
    pub fn relay<S: Into<String>>(message: S) -> Self {
        Self::RelayError { message: message.into() }
    }

    /// Create a JsonMC parse error.
    pub fn jsonmc<S: Into<String>>(message: S) -> Self {
        Self::JsonMc { message: message.into() }
    }

    /// Create a generic/internal error.
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// The stable `errorCode` tag published on the control-plane error body.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "SERVER_NOT_FOUND",
            Self::AlreadyExists { .. } => "SERVER_ALREADY_EXISTS",
            Self::InvalidCertificate { .. } => "INVALID_CERTIFICATE",
            Self::CreationFailed { .. } => "SERVER_CREATION_FAILED",
            Self::InvalidExpectation { .. } => "INVALID_EXPECTATION",
            Self::Validation { .. } | Self::JsonMc { .. } => "VALIDATION_FAILED",
            Self::RelayError { .. } => "RELAY_ERROR",
            Self::Io(_) | Self::Json(_) | Self::Http(_) | Self::UrlParse(_) | Self::Generic(_) => {
                "INTERNAL_SERVER_ERROR"
            }
        }
    }

    /// The HTTP status the control-plane adapter renders this error as.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::InvalidCertificate { .. } | Self::JsonMc { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } => 409,
            Self::InvalidExpectation { .. } => 400,
            Self::RelayError { .. } => 502,
            Self::CreationFailed { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Http(_)
            | Self::UrlParse(_)
            | Self::Generic(_) => 500,
        }
    }
}
