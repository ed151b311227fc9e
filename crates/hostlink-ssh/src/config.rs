//! SSH client configuration

use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration applied to every connection the provider opens.
///
/// Connection coordinates (host, port, user, timeouts) come from the
/// request URI; this struct carries the client-side knobs that are not
/// addressable through it.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Private key path passed as `-i`, if any
    pub key_path: Option<PathBuf>,
    /// Extra `-o` options
    pub options: HashMap<String, String>,
    /// Directory for control sockets; the system temp dir by default
    pub control_dir: PathBuf,
    /// Username used when the URI carries none
    pub default_user: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            key_path: None,
            options: HashMap::new(),
            control_dir: std::env::temp_dir(),
            default_user: None,
        }
    }
}

impl SshConfig {
    /// Set the private key path
    pub fn with_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// Add an extra `-o` option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Set the control socket directory
    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = dir.into();
        self
    }

    /// Set the fallback username
    pub fn with_default_user(mut self, user: impl Into<String>) -> Self {
        self.default_user = Some(user.into());
        self
    }
}
