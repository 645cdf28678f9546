use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Machine-readable discriminant for core errors, serialized to the
/// frontend for programmatic handling (e.g., distinguishing "tab gone"
/// from "fleet cap hit").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Bad input: wrong type, out of range, malformed value.
    Validation,
    /// Unknown session/tab/profile/folder id.
    NotFound,
    /// A fleet cap was hit (sessions, SFTP clients, profiles).
    Capacity,
    /// File or socket error with the OS cause retained.
    Io,
    /// No auth methods available, or authentication rejected.
    Auth,
    /// Host key unknown/changed, pending user approval.
    Trust,
    /// Dial, probe or session-close wait expired.
    Timeout,
    /// Operation illegal for the current status.
    State,
    /// Malformed remote response.
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::NotFound => "not-found",
            Self::Capacity => "capacity",
            Self::Io => "io",
            Self::Auth => "auth",
            Self::Trust => "trust",
            Self::Timeout => "timeout",
            Self::State => "state",
            Self::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

/// Crate-wide error type. Every surface-level operation returns this;
/// the core never panics across the command boundary.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Capacity(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Trust(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    State(String),

    #[error("{0}")]
    Protocol(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Capacity(_) => ErrorKind::Capacity,
            Self::Io { .. } => ErrorKind::Io,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Trust(_) => ErrorKind::Trust,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::State(_) => ErrorKind::State,
            Self::Protocol(_) => ErrorKind::Protocol,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::Capacity(msg.into())
    }

    /// Wraps an OS-level error with a short human context string.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn trust(msg: impl Into<String>) -> Self {
        Self::Trust(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

// Serialized as `{code, message}` so frontends can switch on the code.
impl Serialize for CoreError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("CoreError", 2)?;
        s.serialize_field("code", &self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_code_and_message() {
        let err = CoreError::not_found("tab", "t-42");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "not-found");
        assert_eq!(json["message"], "tab not found: t-42");
    }

    #[test]
    fn kind_maps_every_variant() {
        assert_eq!(CoreError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(CoreError::capacity("x").kind(), ErrorKind::Capacity);
        assert_eq!(CoreError::trust("x").kind(), ErrorKind::Trust);
        assert_eq!(
            CoreError::io("open", std::io::Error::other("boom")).kind(),
            ErrorKind::Io
        );
    }
}
