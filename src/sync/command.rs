//! Local subprocess execution for hooks and the rsync invocation.
//!
//! Command strings from the configuration are split into argv with
//! shell-words and executed directly; nothing is ever interpolated into a
//! shell.

use crate::err::Result;
use crate::fsrsync_error_with_source;
use crate::utilities::AsyncLogger;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run a configured command string. The string is split shell-style into
/// argv; an empty string is an error.
pub async fn run_command(command_line: &str, logger: &AsyncLogger) -> Result<CommandOutput> {
    let argv = shell_words::split(command_line)
        .map_err(|e| fsrsync_error_with_source!(Transfer, e, "Unparsable command: {}", command_line))?;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| crate::fsrsync_error!(Transfer, "Empty command"))?;
    run_argv(program, args, logger).await
}

/// Run a program with an explicit argv.
pub async fn run_argv(program: &str, args: &[String], logger: &AsyncLogger) -> Result<CommandOutput> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| fsrsync_error_with_source!(Transfer, e, "Failed to spawn '{}'", program))?;

    let result = CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    logger.debug(format!(
        "Command '{}' exited with {:?}",
        program, result.exit_code
    ));
    Ok(result)
}
