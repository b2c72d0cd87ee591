use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;

use crate::error::MediaError;

/// Resolve a tool binary: an explicitly configured path wins, otherwise `PATH`.
pub fn locate(tool: &str, configured: Option<&Path>) -> Result<PathBuf, MediaError> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => which::which(path).map_err(|_| MediaError::ToolMissing {
            tool: path.display().to_string(),
        }),
        None => which::which(tool).map_err(|_| MediaError::ToolMissing {
            tool: tool.to_string(),
        }),
    }
}

/// Run `program` to completion and return its output if it exited successfully.
///
/// The child is killed if the returned future is dropped, so cancelling a job
/// never leaves a tool writing into its staging directory.
pub async fn run<I, S>(program: &Path, args: I, timeout: Duration) -> Result<Output, MediaError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let tool = tool_name(program);
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::trace!("Running {:?}", command.as_std());

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(output) => output?,
        Err(_) => {
            return Err(MediaError::CommandFailed {
                tool,
                status: format!("timed out after {}s", timeout.as_secs()),
                stderr: String::new(),
            });
        }
    };

    if output.status.success() {
        Ok(output)
    } else {
        Err(MediaError::CommandFailed {
            tool,
            status: output.status.to_string(),
            stderr: last_lines(&String::from_utf8_lossy(&output.stderr), 5),
        })
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// Tool stderr tends to be long; the useful part is at the end.
fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}
