use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

#[derive(Debug, PartialEq)]
// As long as the struct member is private, we force people to use the `new` method and log the error.
// We box `ErrorDetails` per the `clippy::result_large_err` lint
pub struct Error(Box<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Box::new(details))
    }

    pub fn new_without_logging(details: ErrorDetails) -> Self {
        Error(Box::new(details))
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn code(&self) -> &'static str {
        self.0.code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    pub fn get_owned_details(self) -> ErrorDetails {
        *self.0
    }

    /// True for the expected "visitor is denied" outcomes of the authorization
    /// pipeline, false for system failures (store unreachable, bad state).
    pub fn is_denial(&self) -> bool {
        matches!(
            self.get_details(),
            ErrorDetails::NoSession
                | ErrorDetails::SessionExpired
                | ErrorDetails::CaptchaRequired
                | ErrorDetails::RateLimitExceeded { .. }
                | ErrorDetails::SpendCapExceeded { .. }
        )
    }

    pub fn log(&self) {
        self.0.log();
    }

    /// The status code and JSON body returned to the visitor.
    ///
    /// Denial bodies carry only the stable code plus actionable fields
    /// (`retryAfterMs`, `contactEmail`); internal numeric state (current
    /// spend, budget) and raw store error text are never included.
    pub fn to_response_json(&self) -> (StatusCode, Value) {
        let mut body = json!({
            "success": false,
            "error": self.0.public_message(),
            "code": self.0.code(),
        });
        match self.get_details() {
            ErrorDetails::RateLimitExceeded { retry_after_ms } => {
                body["retryAfterMs"] = json!(retry_after_ms);
            }
            ErrorDetails::SpendCapExceeded { contact_email } => {
                body["contactEmail"] = json!(contact_email);
            }
            _ => {}
        }
        (self.status_code(), body)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, PartialEq)]
pub enum ErrorDetails {
    AppState {
        message: String,
    },
    CaptchaRequired,
    CaptchaVerification {
        message: String,
    },
    Config {
        message: String,
    },
    InternalError {
        message: String,
    },
    JsonRequest {
        message: String,
    },
    NoSession,
    RateLimitExceeded {
        retry_after_ms: u64,
    },
    RouteNotFound {
        path: String,
        method: String,
    },
    SessionExpired,
    SpendCapExceeded {
        contact_email: String,
    },
    Storage {
        message: String,
    },
    ToolBackend {
        message: String,
    },
    UnknownTool {
        tool: String,
    },
}

impl ErrorDetails {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::AppState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::CaptchaRequired => StatusCode::FORBIDDEN,
            ErrorDetails::CaptchaVerification { .. } => StatusCode::BAD_GATEWAY,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::JsonRequest { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::NoSession => StatusCode::UNAUTHORIZED,
            ErrorDetails::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ErrorDetails::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::SessionExpired => StatusCode::UNAUTHORIZED,
            ErrorDetails::SpendCapExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ErrorDetails::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::ToolBackend { .. } => StatusCode::BAD_GATEWAY,
            ErrorDetails::UnknownTool { .. } => StatusCode::NOT_FOUND,
        }
    }

    /// Stable wire code, part of the tool endpoint contract.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorDetails::AppState { .. } => "INTERNAL_ERROR",
            ErrorDetails::CaptchaRequired => "CAPTCHA_REQUIRED",
            ErrorDetails::CaptchaVerification { .. } => "INTERNAL_ERROR",
            ErrorDetails::Config { .. } => "INTERNAL_ERROR",
            ErrorDetails::InternalError { .. } => "INTERNAL_ERROR",
            ErrorDetails::JsonRequest { .. } => "BAD_REQUEST",
            ErrorDetails::NoSession => "NO_SESSION",
            ErrorDetails::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            ErrorDetails::RouteNotFound { .. } => "NOT_FOUND",
            ErrorDetails::SessionExpired => "SESSION_EXPIRED",
            ErrorDetails::SpendCapExceeded { .. } => "SPEND_CAP_EXCEEDED",
            ErrorDetails::Storage { .. } => "STORAGE_ERROR",
            ErrorDetails::ToolBackend { .. } => "INTERNAL_ERROR",
            ErrorDetails::UnknownTool { .. } => "NOT_FOUND",
        }
    }

    /// Message safe to put in a response body. Internal variants collapse to
    /// a generic message; the detailed one goes to the logs only.
    fn public_message(&self) -> String {
        match self {
            ErrorDetails::CaptchaRequired => {
                "Please complete the captcha before using the tools".to_string()
            }
            ErrorDetails::NoSession => "No session found. Please reload the page".to_string(),
            ErrorDetails::RateLimitExceeded { .. } => {
                "Too many requests. Please slow down and try again shortly".to_string()
            }
            ErrorDetails::SessionExpired => {
                "Your session has expired. Please reload the page".to_string()
            }
            ErrorDetails::SpendCapExceeded { .. } => {
                "The monthly usage budget for these tools has been reached".to_string()
            }
            ErrorDetails::JsonRequest { message } => message.clone(),
            ErrorDetails::RouteNotFound { path, method } => {
                format!("No route found for {method} {path}")
            }
            ErrorDetails::UnknownTool { tool } => format!("Unknown tool: {tool}"),
            ErrorDetails::AppState { .. }
            | ErrorDetails::CaptchaVerification { .. }
            | ErrorDetails::Config { .. }
            | ErrorDetails::InternalError { .. }
            | ErrorDetails::Storage { .. }
            | ErrorDetails::ToolBackend { .. } => "Something went wrong on our end".to_string(),
        }
    }

    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::AppState { .. } => tracing::Level::ERROR,
            ErrorDetails::CaptchaRequired => tracing::Level::DEBUG,
            ErrorDetails::CaptchaVerification { .. } => tracing::Level::WARN,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::InternalError { .. } => tracing::Level::ERROR,
            ErrorDetails::JsonRequest { .. } => tracing::Level::DEBUG,
            ErrorDetails::NoSession => tracing::Level::DEBUG,
            ErrorDetails::RateLimitExceeded { .. } => tracing::Level::INFO,
            ErrorDetails::RouteNotFound { .. } => tracing::Level::DEBUG,
            ErrorDetails::SessionExpired => tracing::Level::DEBUG,
            ErrorDetails::SpendCapExceeded { .. } => tracing::Level::WARN,
            ErrorDetails::Storage { .. } => tracing::Level::ERROR,
            ErrorDetails::ToolBackend { .. } => tracing::Level::ERROR,
            ErrorDetails::UnknownTool { .. } => tracing::Level::DEBUG,
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            tracing::Level::INFO => tracing::info!("{self}"),
            tracing::Level::DEBUG => tracing::debug!("{self}"),
            tracing::Level::TRACE => tracing::trace!("{self}"),
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::AppState { message } => {
                write!(f, "Error initializing AppState: {message}")
            }
            ErrorDetails::CaptchaRequired => {
                write!(f, "Session has not passed the captcha")
            }
            ErrorDetails::CaptchaVerification { message } => {
                write!(f, "Captcha verification failed: {message}")
            }
            ErrorDetails::Config { message } => write!(f, "{message}"),
            ErrorDetails::InternalError { message } => write!(f, "Internal error: {message}"),
            ErrorDetails::JsonRequest { message } => {
                write!(f, "Invalid request body: {message}")
            }
            ErrorDetails::NoSession => write!(f, "Request carried no session id"),
            ErrorDetails::RateLimitExceeded { retry_after_ms } => {
                write!(f, "Rate limit exceeded, retry after {retry_after_ms}ms")
            }
            ErrorDetails::RouteNotFound { path, method } => {
                write!(f, "No route found for {method} {path}")
            }
            ErrorDetails::SessionExpired => write!(f, "Session is missing or expired"),
            ErrorDetails::SpendCapExceeded { .. } => {
                write!(f, "Monthly spend cap reached")
            }
            ErrorDetails::Storage { message } => write!(f, "Storage error: {message}"),
            ErrorDetails::ToolBackend { message } => {
                write!(f, "Tool backend error: {message}")
            }
            ErrorDetails::UnknownTool { tool } => write!(f, "Unknown tool: {tool}"),
        }
    }
}

impl IntoResponse for Error {
    /// Convert the error into an Axum response with the tool endpoint body contract
    fn into_response(self) -> Response {
        let (status_code, body) = self.to_response_json();
        (status_code, Json(body)).into_response()
    }
}
