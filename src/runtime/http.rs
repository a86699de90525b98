//! HTTP transport for runtime extensions
//!
//! Requests are POSTed as JSON to `{endpoint}/{api-version}/{hook}`, where
//! `hook` is the lowercased hook name.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::client::ExtensionTransport;
use super::hooks::{Hook, HOOKS_API_VERSION};
use crate::{Error, Result};

/// [`ExtensionTransport`] over HTTPS using `reqwest`
#[derive(Clone)]
pub struct HttpExtensionTransport {
    http: reqwest::Client,
}

impl HttpExtensionTransport {
    /// Transport trusting the system roots
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Transport trusting an additional CA (PEM), typically the cluster CA
    /// extensions are served under
    pub fn with_ca(ca_pem: &[u8]) -> Result<Self> {
        let ca = reqwest::Certificate::from_pem(ca_pem)
            .map_err(|e| Error::config(format!("invalid CA certificate: {e}")))?;
        let http = reqwest::Client::builder()
            .add_root_certificate(ca)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

/// URL a hook request is sent to
pub fn hook_url(endpoint: &str, hook: Hook) -> String {
    format!(
        "{}/{}/{}",
        endpoint.trim_end_matches('/'),
        HOOKS_API_VERSION,
        hook.name().to_lowercase()
    )
}

#[async_trait]
impl ExtensionTransport for HttpExtensionTransport {
    async fn call(
        &self,
        endpoint: &str,
        hook: Hook,
        request: &Value,
        timeout: Duration,
    ) -> Result<Value> {
        let url = hook_url(endpoint, hook);
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::internal("extension transport", format!("{url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::internal(
                "extension transport",
                format!("{url} returned {status}: {body}"),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::serialization(format!("{url}: {e}")))
    }
}
