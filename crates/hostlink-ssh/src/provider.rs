//! The SSH execution provider

use crate::{SshChannelProvider, SshConfig};
use async_trait::async_trait;
use hostlink::{
    ExecError, ExecRequest, ExecutionProvider, ExecutionSystem, HostRegistry, OptionMap,
    ProviderTag, Result,
};
use std::sync::Arc;

/// URI scheme registered for SSH execution systems
pub const EXEC_SCHEME: &str = "ssh+exec";

/// Provenance tag stamped onto SSH-bound commands
pub const SSH_TAG: ProviderTag = ProviderTag::new("ssh");

/// Provides access to remote execution systems using SSH.
///
/// External requests resolve through the host registry, so every identity
/// key shares one control-master connection between its filesystem and
/// execution views.
pub struct SshExecutionProvider {
    channels: Arc<SshChannelProvider>,
    hosts: Arc<HostRegistry>,
}

impl SshExecutionProvider {
    /// Create a provider with default client configuration
    pub fn new() -> Self {
        Self::with_config(SshConfig::default())
    }

    /// Create a provider with explicit client configuration
    pub fn with_config(config: SshConfig) -> Self {
        Self {
            channels: Arc::new(SshChannelProvider::new(config)),
            hosts: HostRegistry::new(),
        }
    }

    /// The host registry backing this provider
    pub fn hosts(&self) -> &Arc<HostRegistry> {
        &self.hosts
    }
}

impl Default for SshExecutionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionProvider for SshExecutionProvider {
    fn scheme(&self) -> &str {
        EXEC_SCHEME
    }

    fn provenance(&self) -> ProviderTag {
        SSH_TAG
    }

    async fn new_execution_system(
        &self,
        uri: &str,
        options: &OptionMap,
    ) -> Result<Arc<ExecutionSystem>> {
        let request = ExecRequest::parse(uri, EXEC_SCHEME, options)?;
        let host = self
            .hosts
            .get_or_build(self.channels.as_ref(), SSH_TAG, &request)
            .await?;
        Ok(Arc::clone(host.execution()))
    }

    async fn get_execution_system(&self, uri: &str) -> Result<Arc<ExecutionSystem>> {
        // validate before reporting; a bad URI is a MalformedRequest, not
        // a NotFound
        ExecRequest::parse(uri, EXEC_SCHEME, &OptionMap::new())?;
        Err(ExecError::NotFound(uri.to_string()))
    }
}
