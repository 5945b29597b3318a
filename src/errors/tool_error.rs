use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Configuration,
    InputRecovery,
    Http,
    UnsupportedContent,
    Timeout,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            status_code: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Configuration, "CONFIGURATION", message)
    }

    pub fn input_recovery(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InputRecovery, "INPUT_RECOVERY", message)
    }

    pub fn http(status_code: Option<u16>, message: impl Into<String>) -> Self {
        let err = Self::new(ToolErrorKind::Http, "HTTP", message);
        match status_code {
            Some(code) => err.with_status(code),
            None => err,
        }
    }

    pub fn unsupported_content(message: impl Into<String>) -> Self {
        Self::new(
            ToolErrorKind::UnsupportedContent,
            "UNSUPPORTED_CONTENT",
            message,
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, "TIMEOUT", message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Cancelled, "CANCELLED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, "INTERNAL", message)
    }

    /// Text handed back to the agent in place of a result.
    pub fn to_agent_text(&self) -> String {
        match self.kind {
            ToolErrorKind::Http => match self.status_code {
                Some(code) => format!("HTTP {}: {}", code, self.message),
                None => format!("HTTP request failed: {}", self.message),
            },
            ToolErrorKind::InputRecovery => {
                format!("Input provided by model is not valid: {}", self.message)
            }
            ToolErrorKind::UnsupportedContent => {
                serde_json::json!({ "error": self.message }).to_string()
            }
            _ => format!("There was an error: \"{}\"", self.message),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::internal(err.to_string())
    }
}
