//! Client for Edge Impulse `.eim` model runners.
//!
//! The model is an executable that listens on a Unix socket passed as its only
//! argument. Requests are JSON objects carrying an `id`; replies are JSON
//! terminated by a NUL byte and echo the `id`.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{ClassificationResult, Classifier};
use crate::error::InferenceError;

static SOCKET_SEQ: AtomicU32 = AtomicU32::new(0);

/// What the runner reports about itself on `hello`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub owner: String,
    pub input_features_count: usize,
    pub image_width: u32,
    pub image_height: u32,
}

#[derive(Deserialize)]
struct HelloReply {
    project: Project,
    model_parameters: ModelParameters,
}

#[derive(Deserialize)]
struct Project {
    name: String,
    #[serde(default)]
    owner: String,
}

#[derive(Deserialize)]
struct ModelParameters {
    input_features_count: usize,
    #[serde(default)]
    image_input_width: u32,
    #[serde(default)]
    image_input_height: u32,
}

#[derive(Deserialize)]
struct ClassifyReply {
    result: ClassifyBody,
}

#[derive(Deserialize)]
struct ClassifyBody {
    classification: BTreeMap<String, f32>,
}

pub struct EimRunner {
    child: Option<Child>,
    socket: UnixStream,
    socket_path: PathBuf,
    pending: Vec<u8>,
    next_id: u64,
    /// Budget for one whole request, however many messages it takes
    timeout: Duration,
    info: ModelInfo,
}

impl EimRunner {
    /// Launch the model and perform the `hello` handshake.
    ///
    /// `timeout` bounds startup and, separately, each later request.
    pub fn start(model: &Path, timeout: Duration) -> Result<Self, InferenceError> {
        let socket_path = std::env::temp_dir().join(format!(
            "shutter-eim-{}-{}.sock",
            std::process::id(),
            SOCKET_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_file(&socket_path);

        let mut child = Command::new(model)
            .arg(&socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| InferenceError::Init(format!("cannot run {}: {e}", model.display())))?;

        let socket = match wait_for_socket(&mut child, &socket_path, timeout) {
            Ok(socket) => socket,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_file(&socket_path);
                return Err(e);
            }
        };
        Self::handshake(Some(child), socket, socket_path, timeout)
    }

    /// Talk to a runner that is already listening on `socket`.
    pub fn connect(socket: UnixStream, timeout: Duration) -> Result<Self, InferenceError> {
        Self::handshake(None, socket, PathBuf::new(), timeout)
    }

    fn handshake(
        child: Option<Child>,
        socket: UnixStream,
        socket_path: PathBuf,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let mut runner = Self {
            child,
            socket,
            socket_path,
            pending: Vec::new(),
            next_id: 1,
            timeout,
            info: ModelInfo {
                name: String::new(),
                owner: String::new(),
                input_features_count: 0,
                image_width: 0,
                image_height: 0,
            },
        };

        let reply: HelloReply = serde_json::from_value(runner.request(json!({ "hello": 1 }))?)
            .map_err(|e| InferenceError::Init(format!("unexpected hello reply: {e}")))?;

        runner.info = ModelInfo {
            name: reply.project.name,
            owner: reply.project.owner,
            input_features_count: reply.model_parameters.input_features_count,
            image_width: reply.model_parameters.image_input_width,
            image_height: reply.model_parameters.image_input_height,
        };
        info!(
            "Model name: {}, owner: {}, {} input features",
            runner.info.name, runner.info.owner, runner.info.input_features_count
        );
        Ok(runner)
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn request(&mut self, mut msg: Value) -> Result<Value, InferenceError> {
        let id = self.next_id;
        self.next_id += 1;
        msg["id"] = json!(id);

        let deadline = Instant::now() + self.timeout;
        self.socket.write_all(&serde_json::to_vec(&msg)?)?;

        loop {
            let reply: Value = serde_json::from_slice(&self.read_message(deadline)?)?;
            // Replies to requests that timed out earlier are stale
            if reply.get("id").and_then(Value::as_u64).is_some_and(|r| r < id) {
                debug!("Discarding stale runner reply");
                continue;
            }
            if !reply.get("success").and_then(Value::as_bool).unwrap_or(false) {
                let error = reply
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(InferenceError::Remote(error.to_string()));
            }
            return Ok(reply);
        }
    }

    fn read_message(&mut self, deadline: Instant) -> Result<Vec<u8>, InferenceError> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == 0) {
                let message = self.pending[..end].to_vec();
                self.pending.drain(..=end);
                return Ok(message);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(InferenceError::Timeout);
            }
            self.socket.set_read_timeout(Some(remaining))?;
            match self.socket.read(&mut chunk) {
                Ok(0) => {
                    return Err(InferenceError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "runner closed the socket",
                    )))
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    return Err(InferenceError::Timeout)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = self.socket.shutdown(std::net::Shutdown::Both);
            if let Err(e) = child.kill() {
                warn!("Failed to stop model runner: {}", e);
            }
            let _ = child.wait();
            let _ = std::fs::remove_file(&self.socket_path);
            info!("Model runner stopped");
        }
    }
}

impl Classifier for EimRunner {
    fn input_len(&self) -> Option<usize> {
        Some(self.info.input_features_count)
    }

    fn classify(&mut self, features: &[f32]) -> Result<ClassificationResult, InferenceError> {
        let reply = self.request(json!({ "classify": features }))?;
        let reply: ClassifyReply = serde_json::from_value(reply)?;
        ClassificationResult::new(reply.result.classification)
    }
}

impl Drop for EimRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wait_for_socket(
    child: &mut Child,
    path: &Path,
    timeout: Duration,
) -> Result<UnixStream, InferenceError> {
    let started = Instant::now();
    loop {
        match UnixStream::connect(path) {
            Ok(socket) => return Ok(socket),
            Err(e) if started.elapsed() >= timeout => {
                return Err(InferenceError::Init(format!(
                    "runner socket {} not ready: {e}",
                    path.display()
                )))
            }
            Err(_) => {}
        }
        if let Ok(Some(status)) = child.try_wait() {
            return Err(InferenceError::Init(format!("runner exited early ({status})")));
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
