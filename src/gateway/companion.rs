use super::{retry_with_backoff, CommandArgs, EngineCommand, EngineTransport};
use crate::config::RetryConfig;
use crate::error::{EngineError, TransportError};
use crate::extract::classify_failure;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

/// Talks to the long-lived engine daemon over its Unix socket
///
/// Each call sends one JSON line `{"command", "subcommand", "args"}` and reads
/// one JSON reply `{"success", "output", "error"}`.
pub struct CompanionTransport {
    pub socket_path: PathBuf,
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct CompanionReply {
    success: bool,

    #[serde(default)]
    output: Option<String>,

    #[serde(default)]
    error: Option<String>,
}

impl CompanionReply {
    fn into_result(self) -> Result<String, EngineError> {
        if self.success {
            Ok(self.output.unwrap_or_default())
        } else {
            let message = self
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "Engine daemon reported a failure".to_string());
            Err(classify_failure(&message))
        }
    }
}

impl CompanionTransport {
    fn unavailable(&self, reason: impl Into<String>) -> EngineError {
        TransportError::DaemonUnavailable {
            socket: self.socket_path.clone(),
            reason: reason.into(),
        }
        .into()
    }
}

#[cfg(unix)]
fn is_transient_connect_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::NotFound
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}

#[async_trait]
impl EngineTransport for CompanionTransport {
    fn name(&self) -> &'static str {
        "companion"
    }

    #[cfg(unix)]
    async fn dispatch(
        &self,
        command: EngineCommand,
        args: &CommandArgs,
    ) -> Result<String, EngineError> {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::UnixStream;
        use tracing::debug;

        if !self.socket_path.exists() {
            return Err(self.unavailable("socket not found; is the engine daemon running?"));
        }

        let stream = retry_with_backoff(
            &self.retry,
            "connect to engine daemon",
            is_transient_connect_error,
            || UnixStream::connect(&self.socket_path),
        )
        .await
        .map_err(|e| self.unavailable(e.to_string()))?;

        let request = args.to_structured(command);
        let mut line = serde_json::to_vec(&request)
            .map_err(|e| self.unavailable(format!("failed to encode request: {}", e)))?;
        line.push(b'\n');

        debug!("Sending '{}' to engine daemon", command);

        let (reader, mut writer) = stream.into_split();
        writer.write_all(&line).await?;
        writer.flush().await?;

        let mut reply = String::new();
        BufReader::new(reader).read_line(&mut reply).await?;

        if reply.trim().is_empty() {
            return Err(TransportError::MalformedReply(
                "daemon closed the connection without replying".to_string(),
            )
            .into());
        }

        let reply: CompanionReply = serde_json::from_str(reply.trim())
            .map_err(|e| TransportError::MalformedReply(e.to_string()))?;

        reply.into_result()
    }

    #[cfg(not(unix))]
    async fn dispatch(
        &self,
        _command: EngineCommand,
        _args: &CommandArgs,
    ) -> Result<String, EngineError> {
        Err(self.unavailable("Unix sockets are not supported on this platform"))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    fn transport(socket_path: PathBuf) -> CompanionTransport {
        CompanionTransport {
            socket_path,
            retry: RetryConfig {
                max_attempts: 2,
                backoff_base_ms: 5,
            },
        }
    }

    /// Serve a single request, returning the request line it received.
    fn serve_once(
        listener: UnixListener,
        reply: &'static str,
    ) -> tokio::task::JoinHandle<String> {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut request = String::new();
            BufReader::new(reader).read_line(&mut request).await.unwrap();
            writer.write_all(reply.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
            request
        })
    }

    #[tokio::test]
    async fn test_missing_socket_is_daemon_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = transport(dir.path().join("agrr.sock"))
            .dispatch(
                EngineCommand::Crop,
                &CommandArgs::new().set("query", "tomato"),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Transport(TransportError::DaemonUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_structured_request_and_reply() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agrr.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = serve_once(listener, r#"{"success": true, "output": "{\"ok\": 1}"}"#);

        let args = CommandArgs::new()
            .set("location", "35.6,139.7")
            .set("days", 7)
            .switch("json");
        let stdout = transport(socket)
            .dispatch(EngineCommand::Weather, &args)
            .await
            .unwrap();
        assert_eq!(stdout, "{\"ok\": 1}");

        let request: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(request["command"], "weather");
        assert!(request["subcommand"].is_null());
        assert_eq!(request["args"]["days"], 7);
        assert_eq!(request["args"]["json"], true);
    }

    #[tokio::test]
    async fn test_error_reply_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agrr.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let _server = serve_once(
            listener,
            r#"{"success": false, "error": "No valid allocation candidates could be generated"}"#,
        );

        let err = transport(socket)
            .dispatch(
                EngineCommand::Crop,
                &CommandArgs::new().set("query", "tomato"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoAllocationCandidates(_)));
    }

    #[tokio::test]
    async fn test_garbage_reply_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agrr.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let _server = serve_once(listener, "not json");

        let err = transport(socket)
            .dispatch(
                EngineCommand::Crop,
                &CommandArgs::new().set("query", "tomato"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Transport(TransportError::MalformedReply(_))
        ));
    }
}
