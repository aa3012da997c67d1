//! Fake collaborators for the poller.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use filedrop_poller::{TransportError, TriggerRequest, TriggerTransport};

/// Transport that records every request and answers from a script.
///
/// Once the script is exhausted every request succeeds.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    requests: Mutex<Vec<TriggerRequest>>,
}

impl RecordingTransport {
    /// Transport that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer to the next unanswered request.
    pub fn respond(&self, response: Result<(), TransportError>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<TriggerRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl TriggerTransport for RecordingTransport {
    fn submit(&self, request: &TriggerRequest) -> Result<(), TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Ok(()))
    }
}
