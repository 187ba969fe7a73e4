use super::{CommandArgs, EngineCommand, EngineTransport};
use crate::error::{EngineError, TransportError};
use crate::extract::classify_failure;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Spawns the engine binary once per call
pub struct SubprocessTransport {
    pub binary: PathBuf,
}

#[async_trait]
impl EngineTransport for SubprocessTransport {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    async fn dispatch(
        &self,
        command: EngineCommand,
        args: &CommandArgs,
    ) -> Result<String, EngineError> {
        let argv = args.to_argv(command);

        // Plain command names are resolved through PATH
        let binary_str = self.binary.to_string_lossy();
        let mut cmd = if binary_str.contains('/') || binary_str.contains('\\') {
            Command::new(&self.binary)
        } else {
            Command::new(binary_str.as_ref())
        };

        cmd.args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // the gateway deadline drops this future; the child must not outlive it
            .kill_on_drop(true);

        debug!("Spawning {} {}", self.binary.display(), argv.join(" "));

        let output = cmd
            .output()
            .await
            .map_err(|e| TransportError::ProcessUnstartable {
                binary: self.binary.clone(),
                source: e,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            debug!("Engine exited with {}: {}", code, stderr.trim());
            let message = if stderr.trim().is_empty() {
                format!("Command failed with exit code {}", code)
            } else {
                stderr
            };
            return Err(classify_failure(&message));
        }

        if !stderr.trim().is_empty() {
            debug!("Engine stderr: {}", stderr.trim());
        }

        Ok(stdout)
    }
}
