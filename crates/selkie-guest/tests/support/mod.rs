//! Test doubles for lifecycle tests
//!
//! TigerStyle: Deterministic fake collaborators, no real VMM required.
//!
//! Two pieces stand in for Firecracker:
//!
//! - [`FakeVmm`]: an in-process control-plane server. It waits for the
//!   guest workspace to appear, binds the control socket inside it, records
//!   every request, and answers with a small scripted state machine
//!   (InstanceStart → Running, pause/resume transitions, CtrlAltDel →
//!   socket removed).
//! - [`stub_vmm_binary`]: a shell stub spawned as the "VMM process". It
//!   lives exactly as long as the control socket exists, so graceful
//!   shutdown (socket removed by the fake) makes it exit and become
//!   reapable, while force-destroy kills it outright.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

/// One recorded control-plane request
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: serde_json::Value,
}

/// Scripted control-plane server for one guest workspace
pub struct FakeVmm {
    requests: Arc<Mutex<Vec<Recorded>>>,
    rejects: HashMap<String, u16>,
    workspace_dir: PathBuf,
}

impl FakeVmm {
    /// Create a fake VMM that will serve the given workspace directory
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            rejects: HashMap::new(),
            workspace_dir: workspace_dir.into(),
        }
    }

    /// Answer the given endpoint with a failure status instead of success
    pub fn reject(mut self, path: &str, status: u16) -> Self {
        self.rejects.insert(path.to_string(), status);
        self
    }

    /// Start serving in the background.
    ///
    /// The server waits for the workspace directory (recreated by the
    /// controller at the top of every start sequence), binds the control
    /// socket inside it, then serves until a CtrlAltDel arrives.
    pub fn spawn(self) -> FakeVmmHandle {
        let requests = Arc::clone(&self.requests);
        let handle = tokio::spawn(self.serve());
        FakeVmmHandle {
            requests,
            _task: handle,
        }
    }

    async fn serve(self) {
        // The workspace appears (or is wiped and reappears) when the
        // controller begins its start sequence.
        let socket_path = loop {
            if self.workspace_dir.is_dir() {
                break self.workspace_dir.join("firecracker.socket");
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        };

        let listener = UnixListener::bind(&socket_path).expect("bind fake control socket");
        let mut state = "Not started".to_string();

        while let Ok((stream, _)) = listener.accept().await {
            let Some(request) = read_request(stream).await else {
                continue;
            };
            let (mut stream, recorded) = request;

            self.requests.lock().await.push(recorded.clone());

            if let Some(&status) = self.rejects.get(&recorded.path) {
                respond(&mut stream, status, "{\"fault_message\": \"rejected\"}").await;
                continue;
            }

            match (recorded.method.as_str(), recorded.path.as_str()) {
                ("GET", "/") => {
                    let body = format!("{{\"state\": \"{}\"}}", state);
                    respond(&mut stream, 200, &body).await;
                }
                ("PUT", "/actions") => {
                    let action = recorded.body["action_type"].as_str().unwrap_or_default();
                    respond(&mut stream, 204, "").await;
                    match action {
                        "InstanceStart" => state = "Running".to_string(),
                        "SendCtrlAltDel" => {
                            // The real VMM tears its socket down as the
                            // guest powers off; the stub process keys its
                            // own exit off that.
                            drop(listener);
                            let _ = std::fs::remove_file(&socket_path);
                            return;
                        }
                        _ => {}
                    }
                }
                ("PATCH", "/vm") => {
                    match recorded.body["state"].as_str() {
                        Some("Paused") => state = "Paused".to_string(),
                        Some("Resumed") => state = "Running".to_string(),
                        _ => {}
                    }
                    respond(&mut stream, 204, "").await;
                }
                // Remaining configuration PUTs are accepted as-is.
                _ => respond(&mut stream, 204, "").await,
            }
        }
    }
}

/// Handle for inspecting a spawned [`FakeVmm`]
pub struct FakeVmmHandle {
    requests: Arc<Mutex<Vec<Recorded>>>,
    _task: tokio::task::JoinHandle<()>,
}

impl FakeVmmHandle {
    /// All requests recorded so far, in arrival order
    pub async fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().await.clone()
    }
}

async fn read_request(mut stream: UnixStream) -> Option<(UnixStream, Recorded)> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        let n = stream.read(&mut buf).await.ok()?;
        raw.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&raw);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if raw.len() >= header_end + 4 + content_length {
                break;
            }
        }
        if n == 0 {
            return None;
        }
    }

    let text = String::from_utf8_lossy(&raw).to_string();
    let mut request_line = text.lines().next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let body_text = text.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");
    let body = serde_json::from_str(body_text).unwrap_or(serde_json::Value::Null);

    Some((stream, Recorded { method, path, body }))
}

async fn respond(stream: &mut UnixStream, status: u16, body: &str) {
    let reason = match status {
        200 => "OK",
        204 => "No Content",
        _ => "Bad Request",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
}

/// Write the stub "VMM binary": a shell script that waits for its control
/// socket to exist, then runs until the socket disappears.
pub fn stub_vmm_binary(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("firecracker-stub.sh");
    let script = "#!/bin/sh\n\
                  # $1 = --api-sock, $2 = socket path\n\
                  sock=\"$2\"\n\
                  while [ ! -S \"$sock\" ]; do :; done\n\
                  while [ -S \"$sock\" ]; do sleep 0.05; done\n";
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
