//! Seam between the trigger state and the remote method endpoint.

use serde::Serialize;
use thiserror::Error;

/// Sends trigger requests to the application server.
///
/// Implementations block the calling worker until the server answered.
pub trait TriggerTransport: Send + Sync {
    /// Deliver one request.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] describing how the delivery failed.
    fn submit(&self, request: &TriggerRequest) -> Result<(), TransportError>;
}

/// Delivery failures, classified by how the poller reacts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server processed the request and reported a fault.
    #[error("trigger fault: {0}")]
    Fault(String),
    /// The target method or namespace could not be resolved. The request was
    /// not processed and the folder is held back until it succeeds.
    #[error("trigger target unresolved: {0}")]
    Unresolved(String),
    /// The request may not have reached the server.
    #[error("trigger transport failure: {0}")]
    Transport(String),
}

/// One remote method invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerRequest {
    /// Method name.
    pub method: String,
    /// Method namespace.
    pub namespace: String,
    /// Organisation identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// User identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Ordered parameters.
    pub parameters: Vec<RequestParameter>,
}

/// Named request parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: String,
    /// Whether `value` is an XML document to embed rather than text.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub xml: bool,
}

impl RequestParameter {
    /// Plain text parameter.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            xml: false,
        }
    }

    /// XML document parameter.
    pub fn xml(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            xml: true,
        }
    }
}

impl TriggerRequest {
    /// Value of the first parameter called `name`.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|parameter| parameter.name == name)
            .map(|parameter| parameter.value.as_str())
    }
}
