//! OpenSSH subprocess transport
//!
//! Connections are OpenSSH control masters: one authenticated `ssh -M -N`
//! process per host identity, with every channel multiplexed over its
//! control socket. Existing client configuration (`~/.ssh/config`, agents)
//! applies unchanged.

use crate::connection::SshConnection;
use crate::{SshConfig, SshError};
use async_trait::async_trait;
use hostlink::{ChannelProvider, Connection, ExecRequest, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Channel provider backed by the OpenSSH client
pub struct SshChannelProvider {
    config: SshConfig,
}

impl SshChannelProvider {
    /// Create a provider with the given client configuration
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Arguments shared by the master and every channel
    pub(crate) fn base_args(&self, request: &ExecRequest, control_path: &PathBuf) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!(
                "ConnectTimeout={}",
                request.options().connect_timeout.as_secs()
            ),
            "-p".to_string(),
            request.port().to_string(),
            "-S".to_string(),
            control_path.to_string_lossy().to_string(),
        ];

        if let Some(key_path) = &self.config.key_path {
            args.push("-i".to_string());
            args.push(key_path.to_string_lossy().to_string());
        }

        for (key, value) in &self.config.options {
            args.push("-o".to_string());
            args.push(format!("{key}={value}"));
        }

        args
    }

    pub(crate) fn target(&self, request: &ExecRequest) -> String {
        match request.user().or(self.config.default_user.as_deref()) {
            Some(user) => format!("{}@{}", user, request.host()),
            None => request.host().to_string(),
        }
    }

    async fn control_check(control_path: &PathBuf, target: &str) -> bool {
        Command::new("ssh")
            .arg("-S")
            .arg(control_path)
            .arg("-O")
            .arg("check")
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ChannelProvider for SshChannelProvider {
    async fn connect(&self, request: &ExecRequest) -> Result<Arc<dyn Connection>> {
        let target = self.target(request);
        let control_path = self
            .config
            .control_dir
            .join(format!("hostlink-{}.sock", Uuid::new_v4()));
        let base_args = self.base_args(request, &control_path);

        info!(%target, "starting SSH control master");
        let mut master = Command::new("ssh")
            .args(&base_args)
            .arg("-M")
            .arg("-N")
            .arg(&target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SshError::Connection(format!("failed to start ssh: {e}")))?;

        // The master authenticates in the background; the connection is
        // usable once the control socket answers a check.
        let connect_timeout = request.options().connect_timeout;
        let deadline = Instant::now() + connect_timeout;
        loop {
            if Self::control_check(&control_path, &target).await {
                break;
            }
            if let Some(status) = master
                .try_wait()
                .map_err(|e| SshError::Connection(format!("ssh master vanished: {e}")))?
            {
                let mut stderr = String::new();
                if let Some(mut pipe) = master.stderr.take() {
                    let mut buf = Vec::new();
                    let _ = pipe.read_to_end(&mut buf).await;
                    stderr = String::from_utf8_lossy(&buf).trim().to_string();
                }
                return Err(SshError::Connection(format!(
                    "ssh master exited with {status}: {stderr}"
                ))
                .into());
            }
            if Instant::now() >= deadline {
                let _ = master.start_kill();
                return Err(SshError::Timeout {
                    duration: connect_timeout,
                }
                .into());
            }
            sleep(Duration::from_millis(100)).await;
        }

        debug!(%target, control_path = %control_path.display(), "control master ready");
        Ok(Arc::new(SshConnection::new(
            base_args,
            target,
            control_path,
            master,
        )))
    }
}
