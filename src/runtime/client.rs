//! Calling runtime extensions
//!
//! Each call is bounded by the registration's timeout and never retried
//! within a pass. A transport error, a timeout, an undecodable response and
//! a `Failure` status are all the same thing to the caller: a failed call,
//! handled according to the registration's [`FailurePolicy`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use super::hooks::{
    BlockingResponse, Hook, HookResponse, NonBlockingResponse, ResponseStatus, HOOKS_API_VERSION,
};
use super::registry::{ExtensionRegistration, ExtensionRegistry, FailurePolicy};
use crate::{Error, Result};

/// Delivers a request document to an extension endpoint
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExtensionTransport: Send + Sync {
    /// Send a request and return the response document
    ///
    /// `timeout` is advisory for the transport; the caller enforces it too.
    async fn call(
        &self,
        endpoint: &str,
        hook: Hook,
        request: &Value,
        timeout: Duration,
    ) -> Result<Value>;
}

/// Aggregate outcome of a blocking hook across all extensions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockingOutcome {
    /// Shortest non-zero wait any extension asked for
    pub retry_after: Option<Duration>,
}

impl BlockingOutcome {
    /// Whether the gated step may proceed now
    pub fn proceed(&self) -> bool {
        self.retry_after.is_none()
    }
}

/// Calls registered extensions through a transport
pub struct RuntimeClient {
    transport: Arc<dyn ExtensionTransport>,
    registry: ExtensionRegistry,
}

impl RuntimeClient {
    /// Create a client
    pub fn new(transport: Arc<dyn ExtensionTransport>, registry: ExtensionRegistry) -> Self {
        Self { transport, registry }
    }

    /// Client with no registered extensions; every hook proceeds
    pub fn without_extensions() -> Self {
        Self::new(Arc::new(NoTransport), ExtensionRegistry::default())
    }

    /// Registered extensions
    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// Call one extension
    ///
    /// Returns `Ok(None)` when the call failed and the registration ignores
    /// failures.
    pub async fn call<Req, Resp>(
        &self,
        extension: &ExtensionRegistration,
        hook: Hook,
        request: &Req,
    ) -> Result<Option<Resp>>
    where
        Req: Serialize + Sync,
        Resp: HookResponse,
    {
        let body = envelope(hook, request)?;
        match self.try_call::<Resp>(extension, hook, &body).await {
            Ok(resp) => Ok(Some(resp)),
            Err(message) => match extension.failure_policy {
                FailurePolicy::Fail => Err(Error::extension(&extension.name, hook.name(), message)),
                FailurePolicy::Ignore => {
                    warn!(
                        extension = %extension.name,
                        hook = %hook,
                        error = %message,
                        "Extension call failed, ignoring per failure policy"
                    );
                    Ok(None)
                }
            },
        }
    }

    async fn try_call<Resp: HookResponse>(
        &self,
        extension: &ExtensionRegistration,
        hook: Hook,
        body: &Value,
    ) -> std::result::Result<Resp, String> {
        let timeout = extension.timeout();
        let raw = tokio::time::timeout(
            timeout,
            self.transport.call(&extension.endpoint, hook, body, timeout),
        )
        .await
        .map_err(|_| format!("timed out after {}s", timeout.as_secs()))?
        .map_err(|e| e.to_string())?;

        let resp: Resp = serde_json::from_value(raw).map_err(|e| format!("invalid response: {e}"))?;
        if resp.meta().status == ResponseStatus::Failure {
            return Err(if resp.meta().message.is_empty() {
                "extension reported failure".to_string()
            } else {
                resp.meta().message.clone()
            });
        }
        debug!(extension = %extension.name, hook = %hook, "Extension call succeeded");
        Ok(resp)
    }

    /// Call every extension serving a blocking hook
    ///
    /// The step may proceed only when no extension asked to wait; otherwise
    /// the shortest requested wait is returned.
    pub async fn call_blocking<Req>(&self, hook: Hook, request: &Req) -> Result<BlockingOutcome>
    where
        Req: Serialize + Sync,
    {
        let mut outcome = BlockingOutcome::default();
        for extension in self.registry.for_hook(hook) {
            let resp = self.call::<Req, BlockingResponse>(extension, hook, request).await?;
            let Some(resp) = resp else {
                continue;
            };
            if resp.retry_after_seconds > 0 {
                let wait = Duration::from_secs(u64::from(resp.retry_after_seconds));
                debug!(
                    extension = %extension.name,
                    hook = %hook,
                    retry_after = ?wait,
                    "Extension asked to wait"
                );
                outcome.retry_after = Some(outcome.retry_after.map_or(wait, |w| w.min(wait)));
            }
        }
        Ok(outcome)
    }

    /// Call every extension serving a non-blocking hook
    pub async fn call_non_blocking<Req>(&self, hook: Hook, request: &Req) -> Result<()>
    where
        Req: Serialize + Sync,
    {
        for extension in self.registry.for_hook(hook) {
            self.call::<Req, NonBlockingResponse>(extension, hook, request).await?;
        }
        Ok(())
    }
}

/// Transport for a registry that never calls anything
struct NoTransport;

#[async_trait]
impl ExtensionTransport for NoTransport {
    async fn call(&self, endpoint: &str, hook: Hook, _: &Value, _: Duration) -> Result<Value> {
        Err(Error::config(format!(
            "no extension transport configured to call {hook} at {endpoint}"
        )))
    }
}

/// Wrap a request body with its `apiVersion` and `kind`
pub fn envelope<Req: Serialize>(hook: Hook, request: &Req) -> Result<Value> {
    let mut body = serde_json::to_value(request)?;
    let map = body
        .as_object_mut()
        .ok_or_else(|| Error::serialization(format!("{hook} request is not a JSON object")))?;
    map.insert("apiVersion".to_string(), Value::from(HOOKS_API_VERSION));
    map.insert("kind".to_string(), Value::from(hook.request_kind()));
    Ok(body)
}
