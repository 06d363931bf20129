//! Process backends for the store tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use strum::{Display, IntoStaticStr};
use tokio::process::Command;

use crate::store::StoreError;

/// Default name of the store binary, resolved through `$PATH`.
pub const DEFAULT_RRDTOOL: &str = "rrdtool";

/// Subcommands understood by the store tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum StoreCommand {
    /// Create a database from schema directives.
    Create,
    /// Append one formatted sample.
    Update,
    /// Render an image from render directives.
    #[strum(serialize = "graph")]
    Render,
}

impl StoreCommand {
    /// Subcommand name passed on the command line.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Executes store subcommands.
///
/// The adapter owns admission control; implementations only run the command.
#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Run `command` against `path` with the given arguments.
    async fn invoke(
        &self,
        command: StoreCommand,
        path: &Path,
        args: &[String],
    ) -> Result<(), StoreError>;
}

/// Backend spawning the `rrdtool` binary as a non-blocking child process.
#[derive(Debug, Clone)]
pub struct RrdTool {
    program: PathBuf,
}

impl Default for RrdTool {
    fn default() -> Self {
        Self::new(DEFAULT_RRDTOOL)
    }
}

impl RrdTool {
    /// Create a backend for the given binary.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Binary this backend spawns.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait::async_trait]
impl StoreBackend for RrdTool {
    async fn invoke(
        &self,
        command: StoreCommand,
        path: &Path,
        args: &[String],
    ) -> Result<(), StoreError> {
        let output = Command::new(&self.program)
            .arg(command.as_str())
            .arg(path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| StoreError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        Err(StoreError::Exit {
            command: command.as_str(),
            path: path.to_path_buf(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        assert_eq!(StoreCommand::Create.as_str(), "create");
        assert_eq!(StoreCommand::Update.as_str(), "update");
        assert_eq!(StoreCommand::Render.as_str(), "graph");
        assert_eq!(StoreCommand::Render.to_string(), "graph");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let backend = RrdTool::new("/nonexistent/prickle-test-rrdtool");
        let err = backend
            .invoke(StoreCommand::Update, Path::new("x.rrd"), &["N:1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        // `false` ignores its arguments and exits with status 1.
        let backend = RrdTool::new("false");
        let err = backend
            .invoke(StoreCommand::Create, Path::new("x.rrd"), &[])
            .await
            .unwrap_err();
        match err {
            StoreError::Exit {
                command, status, ..
            } => {
                assert_eq!(command, "create");
                assert_eq!(status, Some(1));
            }
            other => panic!("expected exit error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_exit() {
        let backend = RrdTool::new("true");
        backend
            .invoke(StoreCommand::Render, Path::new("x.png"), &["--lazy".to_string()])
            .await
            .unwrap();
    }
}
