//! HTTP delivery of trigger requests.

use std::time::Duration;

use filedrop_poller::{TransportError, TriggerRequest, TriggerTransport};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::runtime::Handle;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct FaultBody {
    fault: String,
}

/// Posts each request as JSON to a fixed endpoint.
///
/// 2xx is success, 404 means the target could not be resolved, and a
/// `{"fault": ".."}` body or any other status is a fault.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    runtime: Handle,
}

impl HttpTransport {
    /// Build a transport bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error outside a runtime or when the client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let url = url.into();
        let runtime = Handle::try_current().map_err(|source| AppError::Runtime {
            operation: "transport.new",
            source,
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::http("transport.client", url.clone(), err))?;
        Ok(Self {
            client,
            url,
            runtime,
        })
    }

    /// Endpoint the requests are posted to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, request: &TriggerRequest) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::Unresolved(format!(
                "{}:{} not found at {}",
                request.namespace, request.method, self.url
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        debug!(status = status.as_u16(), method = %request.method, "trigger answered");
        classify(status, &body)
    }
}

fn classify(status: StatusCode, body: &str) -> Result<(), TransportError> {
    if let Ok(FaultBody { fault }) = serde_json::from_str(body) {
        return Err(TransportError::Fault(fault));
    }
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::Fault(format!("status {}: {}", status.as_u16(), body.trim())))
    }
}

impl TriggerTransport for HttpTransport {
    fn submit(&self, request: &TriggerRequest) -> Result<(), TransportError> {
        self.runtime.block_on(self.post(request))
    }
}
