//! Provider contract and the scheme-keyed provider registry

use crate::command::Command;
use crate::process::RemoteProcess;
use crate::system::ExecutionSystem;
use crate::{CommandContext, ExecError, OptionMap, ProviderTag, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

/// A backend that resolves URIs of one scheme into execution systems.
///
/// `execute` is implemented once here: the provenance check compares tags
/// by value, then the call is delegated to the command's bound system.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// URI scheme this provider is registered for
    fn scheme(&self) -> &str;

    /// Provenance tag stamped onto commands created through this provider
    fn provenance(&self) -> ProviderTag;

    /// Resolve a URI plus options into an open execution system, sharing
    /// an existing host context when one is live for the identity key
    async fn new_execution_system(
        &self,
        uri: &str,
        options: &OptionMap,
    ) -> Result<Arc<ExecutionSystem>>;

    /// Look up an already-open execution system for a URI without
    /// creating one. This scheme never supports opening implicitly by
    /// lookup, so after scheme validation the result is always `NotFound`.
    async fn get_execution_system(&self, uri: &str) -> Result<Arc<ExecutionSystem>>;

    /// Validate a command's provenance and delegate to its bound system
    async fn execute(&self, command: &Command, context: &CommandContext) -> Result<RemoteProcess> {
        let expected = self.provenance();
        if command.tag() != expected {
            return Err(ExecError::IncompatibleProvider {
                expected: expected.name().to_string(),
                actual: command.tag().name().to_string(),
            });
        }
        command.system().execute(command, context).await
    }
}

/// Entry point routing URIs and commands to registered providers
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn ExecutionProvider>>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a provider under its scheme
    pub async fn register(&self, provider: Arc<dyn ExecutionProvider>) -> Result<()> {
        let scheme = provider.scheme().to_string();
        let mut providers = self.providers.write().await;
        if providers.contains_key(&scheme) {
            return Err(ExecError::MalformedRequest(format!(
                "scheme '{scheme}' is already registered"
            )));
        }
        debug!(%scheme, "provider registered");
        providers.insert(scheme, provider);
        Ok(())
    }

    /// Provider registered for the URI's scheme
    pub async fn provider_for(&self, uri: &str) -> Result<Arc<dyn ExecutionProvider>> {
        let scheme = Url::parse(uri)
            .map_err(|e| ExecError::MalformedRequest(format!("invalid URI '{uri}': {e}")))?
            .scheme()
            .to_string();
        let providers = self.providers.read().await;
        providers.get(&scheme).cloned().ok_or_else(|| {
            ExecError::MalformedRequest(format!("no provider registered for scheme '{scheme}'"))
        })
    }

    /// Route `new_execution_system` to the provider for the URI's scheme
    pub async fn new_execution_system(
        &self,
        uri: &str,
        options: &OptionMap,
    ) -> Result<Arc<ExecutionSystem>> {
        self.provider_for(uri)
            .await?
            .new_execution_system(uri, options)
            .await
    }

    /// Route `get_execution_system` to the provider for the URI's scheme
    pub async fn get_execution_system(&self, uri: &str) -> Result<Arc<ExecutionSystem>> {
        self.provider_for(uri).await?.get_execution_system(uri).await
    }

    /// Route `execute` to the provider matching the command's provenance
    pub async fn execute(&self, command: &Command, context: &CommandContext) -> Result<RemoteProcess> {
        let provider = {
            let providers = self.providers.read().await;
            providers
                .values()
                .find(|p| p.provenance() == command.tag())
                .cloned()
        };
        match provider {
            Some(provider) => provider.execute(command, context).await,
            None => Err(ExecError::IncompatibleProvider {
                expected: "<unregistered>".to_string(),
                actual: command.tag().name().to_string(),
            }),
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
