//! System and per-execution configuration options

use crate::{ExecError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Open, string-keyed option map accepted by `new_execution_system`
pub type OptionMap = HashMap<String, String>;

/// Option key bounding connection establishment, in whole seconds
pub const OPT_CONNECT_TIMEOUT: &str = "connect_timeout";

/// Option key capping concurrent sessions on one connection
pub const OPT_CHANNEL_LIMIT: &str = "channel_limit";

/// Reserved option key; rejected when supplied by external callers
pub const OPT_INTERNAL: &str = "internal";

/// Recognized options controlling an execution system's connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemOptions {
    /// Bounds connection establishment
    pub connect_timeout: Duration,
    /// Caps concurrent sessions multiplexed over the connection
    pub channel_limit: usize,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            channel_limit: 10,
        }
    }
}

impl SystemOptions {
    /// Fold a string-keyed option map into typed options.
    ///
    /// Unknown keys are rejected rather than ignored, so a misspelled
    /// option never silently reverts to a default. The reserved
    /// `internal` key is rejected here; the internal construction path is
    /// a distinct constructor and never passes through an option map.
    pub fn from_map(map: &OptionMap) -> Result<Self> {
        let mut options = Self::default();
        for (key, value) in map {
            match key.as_str() {
                OPT_CONNECT_TIMEOUT => {
                    let secs: u64 = value.parse().map_err(|_| {
                        ExecError::MalformedRequest(format!(
                            "option '{OPT_CONNECT_TIMEOUT}' must be a number of seconds, got '{value}'"
                        ))
                    })?;
                    options.connect_timeout = Duration::from_secs(secs);
                }
                OPT_CHANNEL_LIMIT => {
                    let limit: usize = value.parse().map_err(|_| {
                        ExecError::MalformedRequest(format!(
                            "option '{OPT_CHANNEL_LIMIT}' must be a positive integer, got '{value}'"
                        ))
                    })?;
                    if limit == 0 {
                        return Err(ExecError::MalformedRequest(format!(
                            "option '{OPT_CHANNEL_LIMIT}' must be at least 1"
                        )));
                    }
                    options.channel_limit = limit;
                }
                OPT_INTERNAL => {
                    return Err(ExecError::MalformedRequest(format!(
                        "option '{OPT_INTERNAL}' is reserved"
                    )));
                }
                other => {
                    return Err(ExecError::MalformedRequest(format!(
                        "unrecognized option '{other}'"
                    )));
                }
            }
        }
        Ok(options)
    }
}

/// Target for a remote invocation's captured output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputRedirect {
    /// Capture stdout/stderr locally and expose them on the future
    #[default]
    Capture,
    /// Discard output on the remote side
    Discard,
    /// Redirect stdout to a file on the remote host
    File(PathBuf),
}

/// Per-execution configuration, passed alongside a `Command`.
///
/// Not stored on the command itself; the same command may run under
/// different contexts.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    /// Bounds `wait()` on the resulting future; expiry cancels the
    /// invocation and reports a timeout-specific terminal state
    pub timeout: Option<Duration>,
    /// Combine stderr into stdout on the remote side
    pub merge_output: bool,
    /// Where captured output goes
    pub redirect: OutputRedirect,
}

impl CommandContext {
    /// Context with default settings: no timeout, separate streams, capture
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound `wait()` with a timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Merge stderr into stdout
    pub fn with_merged_output(mut self) -> Self {
        self.merge_output = true;
        self
    }

    /// Set the redirection target
    pub fn with_redirect(mut self, redirect: OutputRedirect) -> Self {
        self.redirect = redirect;
        self
    }
}
