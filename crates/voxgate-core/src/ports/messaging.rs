//! Messaging dispatch port definition.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur dispatching a follow-up message.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Messaging endpoint returned status {0}")]
    EndpointStatus(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid destination number: {0}")]
    InvalidNumber(String),
}

/// Port for the post-call follow-up message dispatch.
///
/// `to` must already be normalized to the 12-digit `91XXXXXXXXXX` form;
/// implementations POST `{to, link}` and treat any HTTP 2xx as success.
#[async_trait]
pub trait MessagingDispatcher: Send + Sync {
    async fn send(&self, endpoint: &str, to: &str, link: &str) -> Result<(), MessagingError>;
}

/// Normalize a caller number to 12-digit E.164 with the `91` country prefix.
///
/// Returns `None` when the number has no usable 10-digit subscriber part.
#[must_use]
pub fn normalize_msisdn(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 10 {
        return None;
    }
    let subscriber = &digits[digits.len() - 10..];
    Some(format!("91{subscriber}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_ten_digit_number() {
        assert_eq!(normalize_msisdn("9876543210").as_deref(), Some("919876543210"));
    }

    #[test]
    fn normalizes_already_prefixed_number() {
        assert_eq!(normalize_msisdn("+919876543210").as_deref(), Some("919876543210"));
        assert_eq!(normalize_msisdn("0919876543210").as_deref(), Some("919876543210"));
    }

    #[test]
    fn rejects_short_numbers() {
        assert_eq!(normalize_msisdn("12345"), None);
        assert_eq!(normalize_msisdn(""), None);
    }
}
