//! Invocation of the external three-way merge program.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::process::Command;

/// Merges `overwrite` on top of `base` into `output`.
///
/// Calls block until the merge is finished.
pub trait MergeTool: Send + Sync {
    fn merge(&self, base: &Utf8Path, overwrite: &Utf8Path, output: &Utf8Path) -> Result<()>;
}

/// KDiff3-compatible command line tool:
/// `<tool> "<base>" "<overwrite>" -o "<output>" --auto`.
///
/// The exit status is logged but not acted on.
#[derive(Debug, Clone)]
pub struct ExternalMergeTool {
    program: Utf8PathBuf,
}

impl ExternalMergeTool {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// The command that would be run for one merge.
    pub fn command(&self, base: &Utf8Path, overwrite: &Utf8Path, output: &Utf8Path) -> Command {
        let mut command = Command::new(self.program.as_std_path());
        command
            .arg(base.as_std_path())
            .arg(overwrite.as_std_path())
            .arg("-o")
            .arg(output.as_std_path())
            .arg("--auto");
        command
    }
}

impl MergeTool for ExternalMergeTool {
    fn merge(&self, base: &Utf8Path, overwrite: &Utf8Path, output: &Utf8Path) -> Result<()> {
        tracing::debug!(
            tool = %self.program,
            base = %base,
            overwrite = %overwrite,
            output = %output,
            "running merge tool"
        );

        let status = self
            .command(base, overwrite, output)
            .status()
            .map_err(|e| Error::MergeTool {
                tool: self.program.clone(),
                message: e.to_string(),
            })?;

        if !status.success() {
            tracing::warn!(tool = %self.program, %status, output = %output, "merge tool exited with failure");
        }
        Ok(())
    }
}
