//! Control-plane client for one VMM instance
//!
//! TigerStyle: Stateless request helpers with explicit success codes.
//!
//! The VMM exposes its configuration API as HTTP/1.1 over a Unix socket.
//! Every method takes the channel socket path as its first argument; the
//! client itself carries nothing but the transport timeout. Requests are
//! framed by hand on a `UnixStream`, which keeps the dependency surface at
//! the level of the socket itself.

use crate::error::{VmmError, VmmResult};
use crate::{API_TIMEOUT_MS_DEFAULT, RESPONSE_BYTES_MAX};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

/// Instance state as reported by the VMM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// The instance has booted and is executing
    Running,
    /// The instance is paused
    Paused,
    /// The instance has not been started (or has powered off)
    NotStarted,
}

// The VMM answers 200 or 204 for every accepted request.
fn is_success(status: u16) -> bool {
    status == 200 || status == 204
}

/// Client for the local control-plane API of one VMM instance
///
/// Stateless: safe to share and reuse across guests, since the channel
/// address is a per-call argument.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// Per-request transport timeout (connect + write + read)
    timeout: Duration,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(API_TIMEOUT_MS_DEFAULT),
        }
    }
}

impl ApiClient {
    /// Create a client with the default transport timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-request transport timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set machine sizing; must be accepted before boot configuration
    pub async fn configure_machine(
        &self,
        socket: &Path,
        memory_bytes: u64,
        vcpu_count: u32,
        ht_enabled: bool,
    ) -> VmmResult<()> {
        let body = json!({
            "ht_enabled": ht_enabled,
            "mem_size_mib": memory_bytes / (1024 * 1024),
            "vcpu_count": vcpu_count,
        });

        self.put_config(socket, "/machine-config", body.to_string())
            .await
    }

    /// Set the kernel image and the full (pre-computed) command line
    pub async fn configure_boot(
        &self,
        socket: &Path,
        kernel_image_path: &str,
        boot_args: &str,
    ) -> VmmResult<()> {
        let body = json!({
            "kernel_image_path": kernel_image_path,
            "boot_args": boot_args,
        });

        self.put_config(socket, "/boot-source", body.to_string())
            .await
    }

    /// Register one block device; required disks must all be registered
    /// before the start action
    pub async fn configure_disk(
        &self,
        socket: &Path,
        drive_id: &str,
        path_on_host: &str,
        is_root_device: bool,
        is_read_only: bool,
    ) -> VmmResult<()> {
        let body = json!({
            "drive_id": drive_id,
            "path_on_host": path_on_host,
            "is_root_device": is_root_device,
            "is_read_only": is_read_only,
        });

        let endpoint = format!("/drives/{}", drive_id);
        self.put_config(socket, &endpoint, body.to_string()).await
    }

    /// Register one network interface
    pub async fn configure_network(
        &self,
        socket: &Path,
        iface_id: &str,
        guest_mac: Option<&str>,
        host_dev_name: &str,
        allow_mmds_requests: bool,
    ) -> VmmResult<()> {
        let mut body = json!({
            "iface_id": iface_id,
            "host_dev_name": host_dev_name,
            "allow_mmds_requests": allow_mmds_requests,
        });
        if let Some(mac) = guest_mac {
            body["guest_mac"] = json!(mac);
        }

        let endpoint = format!("/network-interfaces/{}", iface_id);
        self.put_config(socket, &endpoint, body.to_string()).await
    }

    /// Issue the boot action; must be the last configuration call.
    ///
    /// The VMM transitions toward running asynchronously once this is
    /// accepted; callers poll [`ApiClient::instance_state`] instead of
    /// assuming immediate readiness.
    pub async fn start_instance(&self, socket: &Path) -> VmmResult<()> {
        let body = json!({ "action_type": "InstanceStart" });
        let (status, _) = self
            .request(socket, "PUT", "/actions", Some(body.to_string()))
            .await?;

        if !is_success(status) {
            return Err(VmmError::StartRejected { status });
        }
        Ok(())
    }

    /// Issue the graceful power-button action.
    ///
    /// Does not block until shutdown completes; callers poll
    /// [`ApiClient::instance_state`].
    pub async fn request_shutdown(&self, socket: &Path) -> VmmResult<()> {
        let body = json!({ "action_type": "SendCtrlAltDel" });
        let (status, _) = self
            .request(socket, "PUT", "/actions", Some(body.to_string()))
            .await?;

        if !is_success(status) {
            return Err(VmmError::ShutdownRejected { status });
        }
        Ok(())
    }

    /// Request a run-state change.
    ///
    /// `target` must be exactly `"Paused"` or `"Resumed"` (case-sensitive);
    /// anything else fails locally before any I/O happens.
    pub async fn set_run_state(&self, socket: &Path, target: &str) -> VmmResult<()> {
        if target != "Paused" && target != "Resumed" {
            return Err(VmmError::InvalidStateRequest {
                requested: target.to_string(),
            });
        }

        let body = json!({ "state": target });
        let (status, _) = self
            .request(socket, "PATCH", "/vm", Some(body.to_string()))
            .await?;

        if !is_success(status) {
            return Err(VmmError::StateChangeRejected {
                target: target.to_string(),
                status,
            });
        }
        Ok(())
    }

    /// Query instance info and map the reported state string.
    ///
    /// Any error here means "unknown/unreachable": callers must not treat a
    /// failed query as a resting state.
    pub async fn instance_state(&self, socket: &Path) -> VmmResult<InstanceState> {
        let (status, body) = self.request(socket, "GET", "/", None).await?;

        if !is_success(status) {
            return Err(VmmError::Protocol {
                reason: format!("instance info returned status {}", status),
            });
        }

        let info: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| VmmError::Protocol {
                reason: format!("instance info is not valid JSON: {}", e),
            })?;

        let state = info
            .get("state")
            .and_then(|s| s.as_str())
            .ok_or_else(|| VmmError::Protocol {
                reason: "instance info has no 'state' string".to_string(),
            })?;

        match state {
            "Running" => Ok(InstanceState::Running),
            "Paused" => Ok(InstanceState::Paused),
            "Not started" => Ok(InstanceState::NotStarted),
            other => Err(VmmError::Protocol {
                reason: format!("unrecognized instance state '{}'", other),
            }),
        }
    }

    async fn put_config(&self, socket: &Path, endpoint: &str, body: String) -> VmmResult<()> {
        let (status, _) = self.request(socket, "PUT", endpoint, Some(body)).await?;

        if !is_success(status) {
            return Err(VmmError::ConfigRejected {
                endpoint: endpoint.to_string(),
                status,
            });
        }
        Ok(())
    }

    /// Issue one request and return `(status, body)`.
    ///
    /// Connection and read/write failures map to `Transport`; anything that
    /// parses wrong maps to `Protocol`. The whole exchange is bounded by the
    /// client timeout.
    async fn request(
        &self,
        socket: &Path,
        method: &str,
        path: &str,
        body: Option<String>,
    ) -> VmmResult<(u16, String)> {
        let transport = |reason: String| VmmError::Transport {
            path: socket.display().to_string(),
            reason,
        };

        debug!(
            channel = %socket.display(),
            method, path, "control-plane request"
        );

        tokio::time::timeout(self.timeout, self.exchange(socket, method, path, body))
            .await
            .map_err(|_| transport(format!("request timed out after {:?}", self.timeout)))?
    }

    async fn exchange(
        &self,
        socket: &Path,
        method: &str,
        path: &str,
        body: Option<String>,
    ) -> VmmResult<(u16, String)> {
        let transport = |reason: String| VmmError::Transport {
            path: socket.display().to_string(),
            reason,
        };

        let mut stream = UnixStream::connect(socket)
            .await
            .map_err(|e| transport(format!("connect failed: {}", e)))?;

        let request = match &body {
            Some(body) => format!(
                "{} {} HTTP/1.1\r\n\
                 Host: localhost\r\n\
                 Accept: application/json\r\n\
                 Content-Type: application/json\r\n\
                 Content-Length: {}\r\n\
                 \r\n\
                 {}",
                method,
                path,
                body.len(),
                body
            ),
            None => format!(
                "{} {} HTTP/1.1\r\n\
                 Host: localhost\r\n\
                 Accept: application/json\r\n\
                 \r\n",
                method, path
            ),
        };

        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| transport(format!("write failed: {}", e)))?;

        let mut reader = BufReader::new(stream);

        let mut status_line = String::new();
        reader
            .read_line(&mut status_line)
            .await
            .map_err(|e| transport(format!("read failed: {}", e)))?;

        let status: u16 = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| VmmError::Protocol {
                reason: format!("malformed status line '{}'", status_line.trim_end()),
            })?;

        // Headers end at the empty line; only content-length matters here.
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| transport(format!("read failed: {}", e)))?;
            if n == 0 || line == "\r\n" || line == "\n" {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length =
                        Some(value.trim().parse().map_err(|_| VmmError::Protocol {
                            reason: format!("malformed content-length '{}'", value.trim()),
                        })?);
                }
            }
        }

        let raw = match content_length {
            Some(len) if len as u64 > RESPONSE_BYTES_MAX => {
                return Err(VmmError::Protocol {
                    reason: format!("response body of {} bytes exceeds limit", len),
                });
            }
            Some(len) => {
                let mut buf = vec![0u8; len];
                reader
                    .read_exact(&mut buf)
                    .await
                    .map_err(|e| transport(format!("read failed: {}", e)))?;
                buf
            }
            None => {
                let mut buf = Vec::new();
                reader
                    .read_to_end(&mut buf)
                    .await
                    .map_err(|e| transport(format!("read failed: {}", e)))?;
                buf
            }
        };

        let body = String::from_utf8(raw).map_err(|_| VmmError::Protocol {
            reason: "response body is not valid UTF-8".to_string(),
        })?;

        debug!(status, body = %body, "control-plane response");

        Ok((status, body))
    }
}
