//! Unix socket status server
//!
//! Newline-delimited JSON envelopes, one response per request line. The
//! server only reads the published snapshot and swaps settings on reload;
//! it never waits on the control loop.
//!
//! # Limits
//! - **Message size**: 8 KiB per request line, enforced before buffering
//! - **Timeouts**: idle connections are closed, slow writers are dropped
//! - **Connections**: bounded number of concurrent clients
//! - **Audit**: peer uid/pid logged per connection and on every reload

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use llc_error::{LlcError, Result};
use llc_protocol::{Request, RequestEnvelope, Response, ResponseEnvelope, MAX_MESSAGE_SIZE};

use crate::state::SharedState;

/// Maximum concurrent connections
const MAX_CONNECTIONS: usize = 16;

/// Idle time allowed between request lines
const READ_TIMEOUT: Duration = Duration::from_secs(30);

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket file mode; the socket lives in the user's runtime directory
const SOCKET_MODE: u32 = 0o666;

// ============================================================================
// Socket setup
// ============================================================================

/// Bind the listening socket, replacing a stale socket file.
///
/// Refuses to touch a symlink at `socket_path`.
pub fn bind_socket(socket_path: &Path) -> Result<UnixListener> {
    if let Ok(metadata) = socket_path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            return Err(LlcError::config(format!(
                "Socket path {} is a symlink, refusing to replace it",
                socket_path.display()
            )));
        }
        std::fs::remove_file(socket_path)?;
        debug!(path = %socket_path.display(), "Removed stale socket file");
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    info!(path = %socket_path.display(), mode = format_args!("{:o}", SOCKET_MODE), "Listening");
    Ok(listener)
}

/// Remove the socket file if it is still ours to remove
pub fn remove_socket(socket_path: &Path) {
    match socket_path.symlink_metadata() {
        Ok(metadata) if !metadata.file_type().is_symlink() => {
            if let Err(e) = std::fs::remove_file(socket_path) {
                warn!(path = %socket_path.display(), error = %e, "Failed to remove socket");
            }
        }
        _ => {}
    }
}

// ============================================================================
// Server
// ============================================================================

/// Serve clients forever on an already bound listener
pub async fn serve(listener: UnixListener, state: Arc<SharedState>) -> Result<()> {
    info!(
        max_conn = MAX_CONNECTIONS,
        max_msg = MAX_MESSAGE_SIZE,
        "Status server accepting connections"
    );

    let slots = Arc::new(Semaphore::new(MAX_CONNECTIONS));

    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Accept error");
                continue;
            }
        };

        let Ok(permit) = Arc::clone(&slots).try_acquire_owned() else {
            warn!(limit = MAX_CONNECTIONS, "Connection limit reached, rejecting client");
            drop(stream);
            continue;
        };

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            handle_client(stream, state).await;
            drop(permit);
        });
    }
}

/// Peer identity for audit logging
#[derive(Debug, Clone, Copy)]
struct PeerCredentials {
    uid: u32,
    pid: Option<i32>,
}

fn peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    stream.peer_cred().ok().map(|cred| PeerCredentials {
        uid: cred.uid(),
        pid: cred.pid(),
    })
}

async fn handle_client(stream: UnixStream, state: Arc<SharedState>) {
    let Some(cred) = peer_credentials(&stream) else {
        error!("Failed to get peer credentials, rejecting connection");
        return;
    };
    debug!(uid = cred.uid, pid = ?cred.pid, "Client connected");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;
    let connected_at = Instant::now();

    loop {
        match timeout(READ_TIMEOUT, read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE)).await {
            Ok(Ok(0)) => {
                debug!(
                    uid = cred.uid,
                    requests = request_count,
                    duration = ?connected_at.elapsed(),
                    "Client disconnected"
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!(uid = cred.uid, bytes = n, "Request received");

                let response = match std::str::from_utf8(&line) {
                    Ok(text) => process_request(text, &cred, &state),
                    Err(_) => ResponseEnvelope::new(0, Response::error("Invalid request encoding")),
                };
                if send_response(&mut writer, &response).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if let Some(LlcError::MessageTooLarge { size, max_size }) = e
                    .get_ref()
                    .and_then(|inner| inner.downcast_ref::<LlcError>())
                {
                    warn!(uid = cred.uid, size, max_size, "Message too large");
                    let response = ResponseEnvelope::new(0, Response::error("Message too large"));
                    let _ = send_response(&mut writer, &response).await;
                } else {
                    debug!(uid = cred.uid, error = %e, "Read error");
                }
                break;
            }
            Err(_) => {
                debug!(uid = cred.uid, "Read timeout, closing connection");
                break;
            }
        }
    }
}

/// Read one `\n`-terminated line without buffering more than `max_len` bytes
async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(out.len());
        }

        let newline = available.iter().position(|b| *b == b'\n');
        let take_len = newline.map_or(available.len(), |pos| pos + 1);

        if out.len() + take_len > max_len {
            let consumed = available.len();
            reader.consume(consumed);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                LlcError::MessageTooLarge {
                    size: out.len() + consumed,
                    max_size: max_len,
                },
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if newline.is_some() {
            return Ok(out.len());
        }
    }
}

async fn send_response(writer: &mut OwnedWriteHalf, response: &ResponseEnvelope) -> std::io::Result<()> {
    let mut payload = serde_json::to_vec(response).map_err(std::io::Error::other)?;
    payload.push(b'\n');

    match timeout(WRITE_TIMEOUT, writer.write_all(&payload)).await {
        Ok(result) => result.inspect_err(|e| debug!(error = %e, "Write error")),
        Err(_) => {
            debug!("Write timeout");
            Err(std::io::ErrorKind::TimedOut.into())
        }
    }
}

fn process_request(line: &str, cred: &PeerCredentials, state: &SharedState) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(uid = cred.uid, error = %e, "Invalid request");
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    trace!(id = envelope.id, cmd = envelope.request.type_name(), "Processing request");

    let response = match envelope.request {
        Request::Ping => Response::running(),
        Request::Status => Response::ok_status(state.status().as_ref().clone()),
        Request::ReloadSettings => {
            info!(uid = cred.uid, pid = ?cred.pid, "AUDIT: settings reload requested");
            state.reload_settings();
            Response::ok_string("ok")
        }
    };

    ResponseEnvelope::new(envelope.id, response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::MemoryStore;
    use llc_core::{FanMode, Settings, SettingsStore};
    use llc_protocol::SystemStatus;
    use parking_lot::Mutex;
    use serde_json::Value;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        socket: std::path::PathBuf,
        state: Arc<SharedState>,
        store: Arc<MemoryStore>,
    }

    fn start() -> Harness {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("llc.sock");
        let store = Arc::new(MemoryStore(Mutex::new(Settings::default())));
        let state = Arc::new(SharedState::new(store.clone()));

        let listener = bind_socket(&socket).expect("bind");
        tokio::spawn(serve(listener, Arc::clone(&state)));

        Harness { _dir: dir, socket, state, store }
    }

    async fn exchange(socket: &Path, request: &str) -> Value {
        let stream = UnixStream::connect(socket).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        writer.write_all(request.as_bytes()).await.expect("write");
        writer.write_all(b"\n").await.expect("newline");

        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.expect("read");
        serde_json::from_str(&line).expect("response json")
    }

    #[tokio::test]
    async fn test_ping_reports_running() {
        let h = start();
        let response = exchange(&h.socket, r#"{"id":11,"cmd":"Ping"}"#).await;
        assert_eq!(response["id"], 11);
        assert_eq!(response["status"], "ok");
        assert_eq!(response["value"], "running");
        assert_eq!(response["service"], "ll-connect-wireless");
    }

    #[tokio::test]
    async fn test_status_before_first_tick_is_default() {
        let h = start();
        let response = exchange(&h.socket, r#"{"id":1,"cmd":"Status"}"#).await;
        assert_eq!(response["status"], "ok");
        assert_eq!(response["system"]["timestamp"], 0.0);
        assert_eq!(response["system"]["fans"], serde_json::json!([]));
        assert!(response["system"]["cpu_temp"].is_null());
    }

    #[tokio::test]
    async fn test_status_returns_published_snapshot() {
        let h = start();
        h.state.publish(SystemStatus::now(Some(47.5), Some(61.0), Vec::new()));

        let response = exchange(&h.socket, r#"{"id":2,"cmd":"Status"}"#).await;
        assert_eq!(response["system"]["cpu_temp"], 47.5);
        assert_eq!(response["system"]["gpu_temp"], 61.0);
    }

    #[tokio::test]
    async fn test_reload_swaps_settings() {
        let h = start();
        h.store
            .save(&Settings { mode: FanMode::Curve, ..Settings::default() })
            .expect("save");

        let response = exchange(&h.socket, r#"{"id":3,"cmd":"ReloadSettings"}"#).await;
        assert_eq!(response["status"], "ok");
        assert_eq!(response["value"], "ok");
        assert_eq!(h.state.settings().mode, FanMode::Curve);
    }

    #[tokio::test]
    async fn test_invalid_request_gets_error() {
        let h = start();
        let response = exchange(&h.socket, r#"{"id":4,"cmd":"SelfDestruct"}"#).await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["message"], "Invalid request format");
    }

    #[tokio::test]
    async fn test_oversized_request_rejected() {
        let h = start();
        let huge = "x".repeat(MAX_MESSAGE_SIZE + 10);
        let response = exchange(&h.socket, &huge).await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["message"], "Message too large");
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket_but_not_symlink() {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("stale.sock");
        std::fs::write(&socket, b"").expect("stale file");
        let listener = bind_socket(&socket).expect("replace stale");
        drop(listener);
        remove_socket(&socket);
        assert!(!socket.exists());

        let target = dir.path().join("target");
        std::fs::write(&target, b"keep").expect("target");
        let link = dir.path().join("link.sock");
        std::os::unix::fs::symlink(&target, &link).expect("symlink");
        assert!(bind_socket(&link).is_err());
        assert_eq!(std::fs::read(&target).expect("target intact"), b"keep");
    }

    #[tokio::test]
    async fn test_bounded_reader() {
        let mut reader = BufReader::new(&b"abc\ndef"[..]);
        let mut out = Vec::new();
        assert_eq!(read_line_bounded(&mut reader, &mut out, 16).await.expect("line"), 4);
        assert_eq!(out, b"abc\n");
        assert_eq!(read_line_bounded(&mut reader, &mut out, 16).await.expect("tail"), 3);
        assert_eq!(read_line_bounded(&mut reader, &mut out, 16).await.expect("eof"), 0);

        let mut reader = BufReader::new(&b"0123456789\n"[..]);
        assert!(read_line_bounded(&mut reader, &mut out, 4).await.is_err());
    }
}
