//! Basket and response configuration types with validation.

use serde::{Deserialize, Serialize};

use super::record::{Headers, RequestData};
use crate::template::{validate_template, TemplateError};

/// Single basket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BasketConfig {
    pub forward_url: String,
    pub proxy_response: bool,
    pub insecure_tls: bool,
    pub expand_path: bool,
    pub capacity: usize,
}

impl BasketConfig {
    /// Default configuration for a freshly created basket.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            forward_url: String::new(),
            proxy_response: false,
            insecure_tls: false,
            expand_path: false,
            capacity,
        }
    }
}

/// Response that the service generates upon an HTTP request sent to a basket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
    pub is_template: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            body: String::new(),
            is_template: false,
        }
    }
}

/// Basket authentication payload, sent exactly once when a basket is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasketAuth {
    pub token: String,
}

/// Page of collected requests.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RequestsPage {
    pub requests: Vec<RequestData>,
    pub count: usize,
    pub total_count: u64,
    pub has_more: bool,
}

/// Page of found requests when a search filter is applied.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RequestsQueryPage {
    pub requests: Vec<RequestData>,
    pub has_more: bool,
}

/// Page of basket names managed by the service.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BasketNamesPage {
    pub names: Vec<String>,
    pub count: usize,
    pub has_more: bool,
}

/// Page of found basket names when a search filter is applied.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BasketNamesQueryPage {
    pub names: Vec<String>,
    pub has_more: bool,
}

/// A configuration update that failed validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("capacity should be a positive number, but was {0}")]
    CapacityNotPositive(i64),
    #[error("capacity may not be greater than {0}")]
    CapacityTooLarge(usize),
    #[error("invalid forward URL: {url} - {reason}")]
    InvalidForwardUrl { url: String, reason: String },
    #[error("invalid HTTP status of response: {0}")]
    InvalidStatus(i64),
    #[error(transparent)]
    InvalidTemplate(#[from] TemplateError),
}

/// Partial basket configuration as accepted over the wire.
///
/// Fields absent from the JSON body keep their current values, matching the
/// update-in-place semantics of the management API.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BasketConfigPatch {
    pub forward_url: Option<String>,
    pub proxy_response: Option<bool>,
    pub insecure_tls: Option<bool>,
    pub expand_path: Option<bool>,
    pub capacity: Option<i64>,
}

impl BasketConfigPatch {
    /// Applies the patch over `base` and validates the outcome.
    pub fn apply(
        self,
        base: BasketConfig,
        max_capacity: usize,
    ) -> Result<BasketConfig, ValidationError> {
        let mut config = base;

        if let Some(capacity) = self.capacity {
            if capacity < 1 {
                return Err(ValidationError::CapacityNotPositive(capacity));
            }
            if capacity as u64 > max_capacity as u64 {
                return Err(ValidationError::CapacityTooLarge(max_capacity));
            }
            config.capacity = capacity as usize;
        }

        if let Some(forward_url) = self.forward_url {
            if !forward_url.is_empty() {
                url::Url::parse(&forward_url).map_err(|e| ValidationError::InvalidForwardUrl {
                    url: forward_url.clone(),
                    reason: e.to_string(),
                })?;
            }
            config.forward_url = forward_url;
        }

        if let Some(proxy_response) = self.proxy_response {
            config.proxy_response = proxy_response;
        }
        if let Some(insecure_tls) = self.insecure_tls {
            config.insecure_tls = insecure_tls;
        }
        if let Some(expand_path) = self.expand_path {
            config.expand_path = expand_path;
        }

        Ok(config)
    }
}

/// Partial response configuration as accepted over the wire.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ResponseConfigPatch {
    pub status: Option<i64>,
    pub headers: Option<Headers>,
    pub body: Option<String>,
    pub is_template: Option<bool>,
}

impl ResponseConfigPatch {
    /// Applies the patch over `base` and validates the outcome.
    pub fn apply(self, base: ResponseConfig) -> Result<ResponseConfig, ValidationError> {
        let mut response = base;

        if let Some(status) = self.status {
            if !(100..600).contains(&status) {
                return Err(ValidationError::InvalidStatus(status));
            }
            response.status = status as u16;
        }

        if let Some(headers) = self.headers {
            response.headers = headers;
        }
        if let Some(body) = self.body {
            response.body = body;
        }
        if let Some(is_template) = self.is_template {
            response.is_template = is_template;
        }

        if response.is_template && !response.body.is_empty() {
            validate_template(&response.body)?;
        }

        Ok(response)
    }
}
