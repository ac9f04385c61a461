//! Error taxonomy shared by the session controller, profile store and data cache.

use std::fmt;

use serde::{Deserialize, Serialize};

/// RFC7807 Problem Details (application/problem+json)
///
/// The data API is not required to speak it, but when it does the `detail`
/// is a better message than the raw body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type", default)]
    pub type_url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

// --- Authentication ---

/// Machine-readable identity provider error code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    InvalidCredential,
    UserNotFound,
    WrongPassword,
    InvalidEmail,
    EmailAlreadyInUse,
    WeakPassword,
    MissingFields,
    NetworkRequestFailed,
    Storage,
    Unknown(String),
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidCredential => "invalid-credential",
            Self::UserNotFound => "user-not-found",
            Self::WrongPassword => "wrong-password",
            Self::InvalidEmail => "invalid-email",
            Self::EmailAlreadyInUse => "email-already-in-use",
            Self::WeakPassword => "weak-password",
            Self::MissingFields => "missing-fields",
            Self::NetworkRequestFailed => "network-request-failed",
            Self::Storage => "storage",
            Self::Unknown(code) => code,
        }
    }

    /// Parse a code string, with or without the `auth/` prefix.
    pub fn parse(code: &str) -> Self {
        match code.trim().trim_start_matches("auth/") {
            "invalid-credential" => Self::InvalidCredential,
            "user-not-found" => Self::UserNotFound,
            "wrong-password" => Self::WrongPassword,
            "invalid-email" => Self::InvalidEmail,
            "email-already-in-use" => Self::EmailAlreadyInUse,
            "weak-password" => Self::WeakPassword,
            "missing-fields" => Self::MissingFields,
            "network-request-failed" => Self::NetworkRequestFailed,
            "storage" => Self::Storage,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which form the user was filling in when an auth error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    SignIn,
    SignUp,
}

/// Error reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AuthError {
    pub code: AuthErrorCode,
    pub message: String,
}

impl AuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn missing_fields() -> Self {
        Self::new(AuthErrorCode::MissingFields, "Please fill all fields")
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::NetworkRequestFailed, message)
    }

    /// Message suitable for showing to the user of the given form.
    pub fn user_message(&self, flow: AuthFlow) -> &'static str {
        use AuthErrorCode::*;

        match (flow, &self.code) {
            (_, MissingFields) => "Please fill all fields",
            (_, InvalidEmail) => "Invalid email address",
            (AuthFlow::SignIn, UserNotFound) => "No account found with this email",
            (AuthFlow::SignIn, WrongPassword) => "Incorrect password",
            (AuthFlow::SignIn, InvalidCredential) => "Invalid email or password",
            (AuthFlow::SignIn, _) => "Login failed",
            (AuthFlow::SignUp, EmailAlreadyInUse) => "This email is already registered",
            (AuthFlow::SignUp, WeakPassword) => "Password is too weak",
            (AuthFlow::SignUp, _) => "Registration failed",
        }
    }
}

// --- Profile store ---

/// Failure talking to the profile store. Never fatal for authentication.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("profile store unreachable: {0}")]
    Network(String),
    #[error("profile store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed profile document: {0}")]
    Decode(String),
    #[error("no signed-in user to authorize the profile request")]
    Unauthenticated,
}

// --- Remote data API ---

/// Failure fetching from the remote data API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl NetworkError {
    /// HTTP status, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Network(msg) | Self::Deserialize(msg) | Self::InvalidRequest(msg) => msg.clone(),
            Self::Http { status, body } => {
                try_problem_detail(body).unwrap_or_else(|| {
                    if body.trim().is_empty() {
                        format!("HTTP {status}")
                    } else {
                        body.clone()
                    }
                })
            }
        }
    }

    /// Transport failures and server errors may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Deserialize(_) | Self::InvalidRequest(_) => false,
        }
    }

    pub fn user_message(&self, resource: &str) -> String {
        format!("Failed to load {resource}")
    }
}
