//! Provider invocation boundary
//!
//! A [`ProviderInvoker`] executes one unit of work against one provider. The
//! coordinator treats it as stateless; connection pools, auth and rate limiting
//! live behind it.
//!
//! Providers are wired up through an explicit [`ProviderRegistry`] built at
//! startup and looked up by id at fan-out time.
//!
//! ```no_run
//! use provider_fanout::invoker::{FnInvoker, ProviderRegistry};
//! use serde_json::json;
//!
//! let registry = ProviderRegistry::builder()
//!     .register("echo", FnInvoker::new(|request, _cancel| async move {
//!         Ok(request.payload)
//!     }))
//!     .build();
//! assert!(registry.contains(&"echo".into()));
//! ```

use crate::error::ProviderError;
use crate::types::{ProviderId, ProviderRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executes one request against one provider
///
/// Implementations must:
/// - observe `cancel` at every suspension point so a cancelled fan-out unwinds promptly
/// - surface vendor-reported failures (4xx/5xx, error payloads) as [`ProviderError`]
///   with status code and vendor message rather than returning them as payloads
#[async_trait]
pub trait ProviderInvoker: Send + Sync {
    /// Run the request and return the provider's payload
    async fn invoke(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ProviderError>;
}

#[async_trait]
impl<T: ProviderInvoker + ?Sized> ProviderInvoker for Arc<T> {
    async fn invoke(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        (**self).invoke(request, cancel).await
    }
}

/// Adapts an async closure into a [`ProviderInvoker`]
///
/// The closure receives an owned copy of the request and a clone of the token.
pub struct FnInvoker<F> {
    f: F,
}

impl<F, Fut> FnInvoker<F>
where
    F: Fn(ProviderRequest, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, ProviderError>> + Send,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ProviderInvoker for FnInvoker<F>
where
    F: Fn(ProviderRequest, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, ProviderError>> + Send,
{
    async fn invoke(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        (self.f)(request.clone(), cancel.clone()).await
    }
}

/// Explicit mapping from provider id to invoker
///
/// The registry is itself a [`ProviderInvoker`]: it dispatches each request on
/// `request.provider_id`. An unregistered id fails that branch only.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    invokers: HashMap<ProviderId, Arc<dyn ProviderInvoker>>,
}

impl ProviderRegistry {
    /// Start building a registry
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Look up the invoker for a provider
    pub fn get(&self, id: &ProviderId) -> Option<&Arc<dyn ProviderInvoker>> {
        self.invokers.get(id)
    }

    /// Whether a provider is registered
    pub fn contains(&self, id: &ProviderId) -> bool {
        self.invokers.contains_key(id)
    }

    /// Registered provider ids, sorted
    pub fn providers(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.invokers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.invokers.len()
    }

    /// Whether no provider is registered
    pub fn is_empty(&self) -> bool {
        self.invokers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

#[async_trait]
impl ProviderInvoker for ProviderRegistry {
    async fn invoke(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        match self.invokers.get(&request.provider_id) {
            Some(invoker) => invoker.invoke(request, cancel).await,
            None => Err(ProviderError::unknown_provider(&request.provider_id)),
        }
    }
}

/// Builder for [`ProviderRegistry`]
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    invokers: HashMap<ProviderId, Arc<dyn ProviderInvoker>>,
}

impl ProviderRegistryBuilder {
    /// Register an invoker; a later registration for the same id replaces the earlier one
    #[must_use]
    pub fn register(
        mut self,
        id: impl Into<ProviderId>,
        invoker: impl ProviderInvoker + 'static,
    ) -> Self {
        let id = id.into();
        if self.invokers.insert(id.clone(), Arc::new(invoker)).is_some() {
            tracing::warn!(provider = %id, "Provider registered twice, keeping the last invoker");
        }
        self
    }

    /// Register an already shared invoker
    #[must_use]
    pub fn register_shared(
        mut self,
        id: impl Into<ProviderId>,
        invoker: Arc<dyn ProviderInvoker>,
    ) -> Self {
        self.invokers.insert(id.into(), invoker);
        self
    }

    /// Finish building
    pub fn build(self) -> ProviderRegistry {
        tracing::debug!(providers = self.invokers.len(), "Provider registry built");
        ProviderRegistry {
            invokers: self.invokers,
        }
    }
}
