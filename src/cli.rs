//! Builder for launching the Codex app-server process.
//!
//! The [`AppServerBuilder`] configures and spawns `codex app-server --listen stdio://`,
//! a long-lived process that speaks JSON-RPC over newline-delimited stdio.

use crate::error::{Error, Result};
use log::debug;
use std::path::PathBuf;
use std::process::Stdio;

/// Builder for launching a Codex app-server process.
///
/// Produces commands of the form: `codex app-server --listen stdio://`
/// unless a different command line is supplied.
///
/// All model, sandbox, and approval configuration is done via JSON-RPC
/// requests after connecting, not via CLI flags.
#[derive(Debug, Clone)]
pub struct AppServerBuilder {
    command: PathBuf,
    args: Vec<String>,
    working_directory: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl Default for AppServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppServerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            command: PathBuf::from("codex"),
            args: vec![
                "app-server".to_string(),
                "--listen".to_string(),
                "stdio://".to_string(),
            ],
            working_directory: None,
            env: Vec::new(),
        }
    }

    /// Build from a full argv, program first (e.g. `["codex", "app-server"]`).
    pub fn from_command_line<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::Transport("empty app-server command line".to_string()))?;
        Ok(Self {
            command: PathBuf::from(program),
            args: argv.collect(),
            ..Self::new()
        })
    }

    /// Set custom path to the codex binary.
    pub fn command<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.command = path.into();
        self
    }

    /// Replace the arguments passed to the binary.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory for the app-server process.
    pub fn working_directory<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Add an environment variable for the app-server process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Spawn the app-server process with piped stdio.
    ///
    /// The child is killed if its handle is dropped.
    pub fn spawn(&self) -> Result<tokio::process::Child> {
        debug!(
            "[CLI] Spawning app-server: {} {}",
            self.command.display(),
            self.args.join(" ")
        );

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_directory {
            cmd.current_dir(dir);
        }

        cmd.spawn().map_err(|e| {
            Error::Transport(format!(
                "failed to spawn {}: {}",
                self.command.display(),
                e
            ))
        })
    }
}
