// Running external commands with captured output and a hard timeout

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::CommandError;

/// Lines of stderr kept in a failure message
const STDERR_TAIL_LINES: usize = 20;

/// Render a command for logs and error messages
pub(crate) fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    std::iter::once(std_cmd.get_program())
        .chain(std_cmd.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Run `cmd` to completion and return its stdout.
///
/// Output is captured rather than inherited so that concurrent builds never
/// interleave on the terminal; stderr is forwarded to the debug log line by
/// line. The child is killed if the timeout expires or the future is dropped.
pub(crate) async fn run(
    mut cmd: Command,
    timeout: Duration,
    stdin: Option<&[u8]>,
) -> Result<String, CommandError> {
    let command = describe(&cmd);
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    debug!("Executing command: {}", command);

    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|error| CommandError::Spawn {
        program: program.clone(),
        error,
    })?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input)
                .await
                .map_err(|error| CommandError::Spawn {
                    program: program.clone(),
                    error,
                })?;
            // Dropping the pipe closes stdin so the child sees EOF
        }
    }

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|error| CommandError::Spawn { program, error })?,
        Err(_) => {
            return Err(CommandError::TimedOut {
                command,
                after: timeout,
            })
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines() {
        debug!("{}", line);
    }

    if !output.status.success() {
        return Err(CommandError::Failed {
            command,
            status: output.status.to_string(),
            stderr: tail(&stderr),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
