//! HTTP messaging dispatcher.
//!
//! Posts `{to, link}` to the agent's configured endpoint after the call,
//! with the destination already normalized to `91XXXXXXXXXX`.

use async_trait::async_trait;
use serde::Serialize;

use voxgate_core::ports::{MessagingDispatcher, MessagingError};

#[derive(Debug, Serialize)]
struct DispatchBody<'a> {
    to: &'a str,
    link: &'a str,
}

/// Messaging dispatcher over plain HTTP POST.
pub struct HttpMessagingDispatcher {
    client: reqwest::Client,
}

impl HttpMessagingDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpMessagingDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingDispatcher for HttpMessagingDispatcher {
    async fn send(&self, endpoint: &str, to: &str, link: &str) -> Result<(), MessagingError> {
        // The destination must be the 12-digit prefixed form by now.
        if to.len() != 12 || !to.starts_with("91") {
            return Err(MessagingError::InvalidNumber(to.to_string()));
        }

        let response = self
            .client
            .post(endpoint)
            .json(&DispatchBody { to, link })
            .send()
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(to, "Follow-up message dispatched");
            Ok(())
        } else {
            Err(MessagingError::EndpointStatus(status.as_u16()))
        }
    }
}
