//! Child process invocation for the external transforms

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use crate::error::TransformError;

/// Lines of stderr kept in failure messages
const STDERR_TAIL_LINES: usize = 12;

/// Captured output of a successful run
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Run `program` to completion, failing on spawn error, timeout or non-zero exit
///
/// The child is killed if the returned future is dropped (cancellation) or
/// the timeout elapses.
pub async fn run<I, S>(program: &Path, args: I, timeout: Duration) -> Result<ProcessOutput, TransformError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = program_name(program);
    let started = Instant::now();

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| spawn_error(&name, e))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(TransformError::ProcessFailed {
                program: name,
                status: format!("timeout after {}s", timeout.as_secs()),
                stderr: String::new(),
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(TransformError::ProcessFailed {
            program: name,
            status: output.status.to_string(),
            stderr: stderr_tail(&stderr),
        });
    }

    let elapsed = started.elapsed();
    debug!(program = %name, elapsed_ms = elapsed.as_millis() as u64, "Transform process finished");

    Ok(ProcessOutput {
        stdout,
        stderr,
        elapsed,
    })
}

/// Invoke `program <version_arg>` and return the first output line
pub async fn probe_version(program: &Path, version_arg: &str) -> Result<String, TransformError> {
    let output = run(program, [version_arg], Duration::from_secs(10)).await?;
    let text = if output.stdout.trim().is_empty() {
        &output.stderr
    } else {
        &output.stdout
    };
    Ok(text.lines().next().unwrap_or_default().trim().to_string())
}

fn spawn_error(program: &str, err: std::io::Error) -> TransformError {
    match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            TransformError::NotAvailable {
                program: program.to_string(),
                reason: err.to_string(),
            }
        }
        _ => TransformError::Io(err),
    }
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// Last few non-empty stderr lines
pub(crate) fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
