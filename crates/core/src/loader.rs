//! Caller-facing delegating loader.

use crate::config::DelegationConfig;
use crate::filter::FilterBuilder;
use crate::provider::{ClassProvider, ResourceProvider};
use crate::registry::ProviderRegistry;
use async_trait::async_trait;
use crossload_api::{ClassRef, ClassResolver, DelegationError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Narrowing and wait budget of one load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub context: Option<String>,
    pub version: Option<String>,
    /// Falls back to the loader's default timeout when `None`.
    pub timeout: Option<Duration>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Loads classes and resources from whichever module provides them,
/// waiting a bounded time for a provider to appear.
///
/// Results are never cached: every call goes through the registry so that
/// a withdrawn provider is never used again.
#[derive(Debug, Clone)]
pub struct DelegatingLoader {
    registry: Arc<ProviderRegistry>,
    default_timeout: Duration,
    cancel: CancellationToken,
}

impl DelegatingLoader {
    pub fn new(registry: Arc<ProviderRegistry>, config: &DelegationConfig) -> Self {
        Self {
            registry,
            default_timeout: config.default_timeout(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Cancelling `token` fails every in-flight wait of this loader.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn load(&self, name: &str, options: &LoadOptions) -> Result<ClassRef> {
        let filter = FilterBuilder::build_class(
            name,
            options.context.as_deref(),
            options.version.as_deref(),
        )?;
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let record = self.registry.await_first(&filter, timeout, &self.cancel).await?;
        let provider = ClassProvider::new(record, self.registry.rules().membership);
        let class = provider.load_class(name)?;
        tracing::debug!(
            "Delegated {} to {} ({})",
            name,
            class.defining_module_name(),
            class.defining_module()
        );
        Ok(class)
    }

    pub async fn load_class(&self, name: &str) -> Result<ClassRef> {
        self.load(name, &LoadOptions::default()).await
    }

    pub async fn load_class_with_context(&self, name: &str, context: &str) -> Result<ClassRef> {
        self.load(name, &LoadOptions::new().context(context)).await
    }

    pub async fn load_class_with_version(
        &self,
        name: &str,
        context: Option<&str>,
        version: &str,
    ) -> Result<ClassRef> {
        let mut options = LoadOptions::new().version(version);
        options.context = context.map(str::to_string);
        self.load(name, &options).await
    }

    pub async fn load_resource(&self, path: &str, options: &LoadOptions) -> Result<Url> {
        let path = path.trim_start_matches('/');
        let filter = FilterBuilder::build_resource(
            path,
            options.context.as_deref(),
            options.version.as_deref(),
        )?;
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let record = self.registry.await_first(&filter, timeout, &self.cancel).await?;
        ResourceProvider::new(record)
            .load_resource(path)
            .ok_or_else(|| DelegationError::ResourceNotFound {
                path: path.to_string(),
            })
    }

    /// Resolver bound to `context` for a host's module loader.
    pub fn resolver(&self, context: Option<&str>) -> ScopedResolver {
        ScopedResolver {
            loader: self.clone(),
            context: context.map(str::to_string),
        }
    }
}

/// [`ClassResolver`] backed by a [`DelegatingLoader`] and a fixed context.
#[derive(Debug, Clone)]
pub struct ScopedResolver {
    loader: DelegatingLoader,
    context: Option<String>,
}

impl ScopedResolver {
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

#[async_trait]
impl ClassResolver for ScopedResolver {
    async fn resolve_class(&self, name: &str) -> Result<ClassRef> {
        let options = LoadOptions {
            context: self.context.clone(),
            ..LoadOptions::default()
        };
        self.loader.load(name, &options).await
    }
}
