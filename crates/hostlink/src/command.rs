//! Immutable command descriptions and their shell-line rendering

use crate::{CommandContext, ExecutionSystem, OutputRedirect};
use shell_escape::unix::escape;
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

/// Marker identifying which provider implementation created a command.
///
/// Compared by value when a command is routed through a provider; no
/// runtime type inspection is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderTag(&'static str);

impl ProviderTag {
    /// Create a tag from a provider name
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Provider name carried by this tag
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// An immutable description of a program invocation, bound to the
/// execution system that will run it.
///
/// Built through [`CommandBuilder`]; once built, nothing about it can
/// change. Only the bound system accepts it for execution.
#[derive(Clone)]
pub struct Command {
    system: Arc<ExecutionSystem>,
    tag: ProviderTag,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl Command {
    /// Program path or name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument sequence
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Working directory override, if any
    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Environment overrides
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Provenance tag of the provider that created this command
    pub fn tag(&self) -> ProviderTag {
        self.tag
    }

    /// The execution system this command is bound to
    pub fn system(&self) -> &Arc<ExecutionSystem> {
        &self.system
    }

    pub(crate) fn is_bound_to(&self, system: &ExecutionSystem) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.system), system)
    }

    /// Render the invocation as a single shell line.
    ///
    /// Every argument is escaped individually so whitespace and shell
    /// metacharacters pass through atomically instead of being re-split by
    /// the remote shell. Working directory and environment overrides
    /// become a `cd` / `env` prefix; redirection and stream merging from
    /// the context become a suffix.
    pub(crate) fn shell_line(&self, context: &CommandContext) -> String {
        let mut line = String::new();

        if let Some(dir) = &self.working_dir {
            line.push_str("cd ");
            line.push_str(&esc(&dir.to_string_lossy()));
            line.push_str(" && ");
        }

        if !self.env.is_empty() {
            line.push_str("env");
            for (key, value) in &self.env {
                line.push(' ');
                line.push_str(&esc(&format!("{key}={value}")));
            }
            line.push(' ');
        }

        line.push_str(&esc(&self.program));
        for arg in &self.args {
            line.push(' ');
            line.push_str(&esc(arg));
        }

        match &context.redirect {
            OutputRedirect::Capture => {}
            OutputRedirect::Discard => line.push_str(" >/dev/null"),
            OutputRedirect::File(path) => {
                line.push_str(" >");
                line.push_str(&esc(&path.to_string_lossy()));
            }
        }
        if context.merge_output {
            line.push_str(" 2>&1");
        }

        line
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("working_dir", &self.working_dir)
            .field("env", &self.env)
            .field("tag", &self.tag)
            .finish()
    }
}

fn esc(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

/// Builder for [`Command`], modeled after `std::process::Command`
pub struct CommandBuilder {
    system: Arc<ExecutionSystem>,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl CommandBuilder {
    pub(crate) fn new(system: Arc<ExecutionSystem>, program: impl Into<String>) -> Self {
        Self {
            system,
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the remote working directory
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment override
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Freeze into an immutable command
    pub fn build(self) -> Command {
        let tag = self.system.tag();
        Command {
            system: self.system,
            tag,
            program: self.program,
            args: self.args,
            working_dir: self.working_dir,
            env: self.env,
        }
    }
}
