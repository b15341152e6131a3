//! Remote hook execution over the ssh binary.
//!
//! The transfer path already rides ssh through rsync's `-e`; remote hooks
//! use the same binary with the same key and port settings. Commands run
//! under a hard timeout so a wedged remote cannot stall a sync worker
//! forever.

use crate::constants::SSH_COMMAND_TIMEOUT;
use crate::err::Result;
use crate::fsrsync_error;
use crate::sync::command::CommandOutput;
use crate::utilities::AsyncLogger;
use std::process::Stdio;
use tokio::process::Command;

/// Argv for an ssh invocation; split out for testability.
pub fn build_ssh_argv(
    command: &str,
    host: &str,
    user: &str,
    ssh_key: Option<&str>,
    ssh_port: u16,
) -> Vec<String> {
    let mut argv = Vec::new();
    if let Some(key) = ssh_key {
        argv.push("-i".to_string());
        argv.push(key.to_string());
    }
    argv.push("-p".to_string());
    argv.push(ssh_port.to_string());
    argv.push(format!("{}@{}", user, host));
    argv.push(command.to_string());
    argv
}

/// Run `command` on `host` as `user`. Returns the remote exit status and
/// captured output, or an error if ssh could not run or timed out.
pub async fn run_ssh_command(
    command: &str,
    host: &str,
    user: &str,
    ssh_key: Option<&str>,
    ssh_port: u16,
    logger: &AsyncLogger,
) -> Result<CommandOutput> {
    if host.is_empty() || command.is_empty() {
        return Err(fsrsync_error!(Hook, "Host and command are required").into());
    }

    let argv = build_ssh_argv(command, host, user, ssh_key, ssh_port);
    logger.debug(format!("Running remote command on {}: {}", host, command));

    let child = Command::new("ssh")
        .args(&argv)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(SSH_COMMAND_TIMEOUT, child).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(fsrsync_error!(
                Hook,
                "Remote command on {} timed out after {:?}",
                host,
                SSH_COMMAND_TIMEOUT
            )
            .into());
        }
    };

    let result = CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    logger.info(format!(
        "Remote command on {}: exit {:?}, stdout: {}, stderr: {}",
        host,
        result.exit_code,
        result.stdout.trim_end(),
        result.stderr.trim_end()
    ));
    Ok(result)
}
