use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Upstream error ({status}): {message}")]
    UpstreamError { status: u16, message: String },
    #[error("Request error: {0}")]
    RequestError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Model did not return an overlay brief (or overlay prompt); try a more specific instruction")]
    NoOverlayBrief,
    #[error("Model did not return image data")]
    NoImageReturned,
    #[error("Image error: {0}")]
    ImageError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Request cancelled before {0}")]
    Cancelled(String),
    #[error("request timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, OverlayError>;

/// Coarse failure classes a caller can act on. Each maps to one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    BadInput,
    Configuration,
    Unauthorized,
    RateLimited,
    ModelUnavailable,
    Generic,
}

impl FailureKind {
    pub fn status(&self) -> u16 {
        match self {
            FailureKind::BadInput => 400,
            FailureKind::Configuration => 500,
            FailureKind::Unauthorized => 401,
            FailureKind::RateLimited => 429,
            FailureKind::ModelUnavailable => 400,
            FailureKind::Generic => 500,
        }
    }
}

impl OverlayError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Local validation errors are typed; anything that came back from the
    /// model or the network is classified on its message text.
    pub fn kind(&self) -> FailureKind {
        match self {
            OverlayError::InvalidInput(_) => FailureKind::BadInput,
            OverlayError::ConfigError(_) => FailureKind::Configuration,
            OverlayError::UpstreamError { .. } | OverlayError::RequestError(_) => {
                classify_message(&self.to_string())
            }
            _ => FailureKind::Generic,
        }
    }

    /// Message shown to the caller in the `error` field of a failure record.
    pub fn user_message(&self) -> String {
        if let OverlayError::Timeout = self {
            return self.to_string();
        }
        match self.kind() {
            FailureKind::BadInput | FailureKind::Configuration => self.to_string(),
            FailureKind::Unauthorized => "API key is invalid or expired".to_string(),
            FailureKind::RateLimited => "API rate limit exceeded, please retry later".to_string(),
            FailureKind::ModelUnavailable => {
                "Model is unavailable or the model name is wrong".to_string()
            }
            FailureKind::Generic => format!("Generation failed: {}", self),
        }
    }
}

pub fn classify_message(message: &str) -> FailureKind {
    let lowered = message.to_lowercase();
    if lowered.contains("401") || lowered.contains("unauth") || lowered.contains("api key not valid")
    {
        FailureKind::Unauthorized
    } else if lowered.contains("429") || lowered.contains("resource_exhausted") {
        FailureKind::RateLimited
    } else if lowered.contains("not_found") || lowered.contains("404") {
        FailureKind::ModelUnavailable
    } else {
        FailureKind::Generic
    }
}

impl From<serde_json::Error> for OverlayError {
    fn from(e: serde_json::Error) -> Self {
        OverlayError::SerializationError(e.to_string())
    }
}

impl From<image::ImageError> for OverlayError {
    fn from(e: image::ImageError) -> Self {
        OverlayError::ImageError(e.to_string())
    }
}
