//! Error types for the network add-ons operator

use thiserror::Error;

use crate::pki::PkiError;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Malformed or contradictory NetworkAddonsConfig field.
    ///
    /// Not retriable until the NetworkAddonsConfig changes.
    #[error("configuration error in {field}: {message}")]
    Configuration {
        /// Spec field path that carries the bad value
        field: String,
        /// Description of the problem
        message: String,
    },

    /// Manifest rendering failed for a component
    #[error("render error for {component}: {message}")]
    Render {
        /// Component whose manifests could not be rendered
        component: String,
        /// Description of the problem
        message: String,
    },

    /// Certificate issuance or parsing failed
    #[error("pki error: {0}")]
    Pki(#[from] PkiError),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Broken internal invariant. The pass aborts without writing status.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant
        message: String,
    },
}

impl Error {
    /// Create a configuration error for the given spec field
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a render error for the given component
    pub fn render(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Render {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal invariant error with the given message
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Conflicts, throttling, server errors and transport failures are
    /// transient. Everything else needs a spec or code change.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(resp)) => {
                resp.code == 409 || resp.code == 429 || resp.code >= 500
            }
            Self::Kube(kube::Error::HyperError(_)) | Self::Kube(kube::Error::Service(_)) => true,
            _ => false,
        }
    }

    /// Whether the error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16) -> Error {
    Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("synthetic {code}"),
        reason: match code {
            404 => "NotFound",
            409 => "Conflict",
            429 => "TooManyRequests",
            _ => "InternalError",
        }
        .to_string(),
        code,
    }))
}
