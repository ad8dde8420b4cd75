//! GStreamer pipeline running as a child process, raw frames on its stdout

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, instrument, warn};

use super::frame::{frame_len, PixelFormat};
use super::source::{FrameSource, Readiness};
use super::stream::RawStream;
use crate::error::{FrameReadError, SourceError};
use crate::CaptureConfig;

const STRATEGY: &str = "pipeline";

/// Stderr lines kept for failure reports
const STDERR_TAIL_LINES: usize = 8;

/// Timing knobs shared by every subprocess producer
#[derive(Debug, Clone, Copy)]
pub struct ProcessTimeouts {
    /// How long to wait for the producer to prove it is alive
    pub startup: Duration,
    /// Longest gap between partial reads inside one frame
    pub stall: Duration,
    /// Time between SIGTERM and SIGKILL on close
    pub terminate_grace: Duration,
}

impl ProcessTimeouts {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            startup: Duration::from_millis(config.startup_timeout_ms),
            stall: Duration::from_millis(config.stall_timeout_ms),
            terminate_grace: Duration::from_millis(config.terminate_grace_ms),
        }
    }
}

/// Frame source backed by a child process writing packed frames to stdout
pub struct PipelineSource {
    child: Option<Child>,
    stream: RawStream<ChildStdout>,
    dims: (u32, u32, u8),
    grace: Duration,
    sequence: u64,
    stderr: StderrTail,
}

impl PipelineSource {
    /// Launch the configured GStreamer pipeline.
    pub fn open(config: &CaptureConfig) -> Result<Self, SourceError> {
        let args = Self::build_pipeline_args(config);
        info!("Pipeline: {} {}", config.pipeline_program, args.join(" "));

        let mut command = Command::new(&config.pipeline_program);
        command.args(&args);

        Self::spawn(
            command,
            (config.width, config.height, config.format.channels()),
            ProcessTimeouts::from_config(config),
        )
    }

    /// Build the gst-launch argument list for raw frames on fd 1
    fn build_pipeline_args(config: &CaptureConfig) -> Vec<String> {
        if let Some(custom) = &config.custom_pipeline {
            let mut args = vec!["-q".to_string()];
            args.extend(custom.split_whitespace().map(str::to_string));
            return args;
        }

        let device = format!("device={}", config.device);
        let caps = format!(
            "video/x-raw,width={},height={},framerate={}/1",
            config.width, config.height, config.fps
        );
        let format = format!("video/x-raw,format={}", config.format.gst_format());

        // -q keeps gst-launch status lines off stdout, which carries pixels
        [
            "-q",
            "v4l2src",
            device.as_str(),
            "!",
            caps.as_str(),
            "!",
            "videoconvert",
            "!",
            format.as_str(),
            "!",
            "fdsink",
            "fd=1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Spawn an arbitrary producer command.
    ///
    /// The command's stdout must carry `width * height * channels` byte frames
    /// back to back. Fails with `Unavailable` if the process cannot be started
    /// or exits before producing anything within `timeouts.startup`.
    pub fn spawn(
        mut command: Command,
        dims: (u32, u32, u8),
        timeouts: ProcessTimeouts,
    ) -> Result<Self, SourceError> {
        // Own process group: a terminal Ctrl-C reaches only us, and close()
        // decides how the producer is stopped
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| SourceError::unavailable(STRATEGY, format!("spawn failed: {e}")))?;

        let stderr = StderrTail::capture(child.stderr.take());

        let Some(stdout) = child.stdout.take() else {
            reap(&mut child, timeouts.terminate_grace);
            return Err(SourceError::unavailable(STRATEGY, "producer has no stdout"));
        };

        let (width, height, channels) = dims;
        let stream = RawStream::new(stdout, frame_len(width, height, channels), timeouts.stall);

        // Give the producer a moment to either emit data or die
        match stream.poll(timeouts.startup) {
            Ok(Readiness::Closed) => {
                let status = reap(&mut child, timeouts.terminate_grace);
                return Err(SourceError::unavailable(
                    STRATEGY,
                    stderr.annotate(format!("producer exited during startup ({status})")),
                ));
            }
            Ok(Readiness::Timeout) => {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(SourceError::unavailable(
                        STRATEGY,
                        stderr.annotate(format!("producer exited during startup ({status})")),
                    ));
                }
                debug!("Producer alive but silent after {:?}", timeouts.startup);
            }
            Ok(Readiness::Ready) => {}
            Err(e) => {
                reap(&mut child, timeouts.terminate_grace);
                return Err(SourceError::unavailable(STRATEGY, stderr.annotate(e.to_string())));
            }
        }

        info!(pid = child.id(), "Producer started ({}x{}x{})", width, height, channels);

        Ok(Self {
            child: Some(child),
            stream,
            dims,
            grace: timeouts.terminate_grace,
            sequence: 0,
            stderr,
        })
    }

    /// Process id of the running producer, `None` once closed
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn frames_read(&self) -> u64 {
        self.sequence
    }
}

impl FrameSource for PipelineSource {
    fn dimensions(&self) -> (u32, u32, u8) {
        self.dims
    }

    fn poll(&mut self, timeout: Duration) -> Result<Readiness, SourceError> {
        if self.child.is_none() {
            return Ok(Readiness::Closed);
        }
        self.stream
            .poll(timeout)
            .map_err(|e| SourceError::FrameRead(FrameReadError::Io(e)))
    }

    #[instrument(level = "debug", skip(self), fields(seq = self.sequence + 1))]
    fn read_frame(&mut self) -> Result<Bytes, SourceError> {
        if self.child.is_none() {
            return Err(FrameReadError::Closed.into());
        }
        let (data, _) = self.stream.read_frame()?;
        self.sequence += 1;
        Ok(data)
    }

    fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            info!(pid = child.id(), frames = self.sequence, "Stopping producer");
            let status = reap(&mut child, self.grace);
            debug!("Producer stopped ({status})");
            for line in self.stderr.lines() {
                debug!(target: "shutter::producer", "{}", line);
            }
        }
    }
}

impl Drop for PipelineSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Ring of the producer's most recent stderr lines, filled by a reader thread
#[derive(Clone, Default)]
struct StderrTail(Arc<Mutex<VecDeque<String>>>);

impl StderrTail {
    fn capture(stderr: Option<ChildStderr>) -> Self {
        let tail = Self::default();
        if let Some(stderr) = stderr {
            let sink = tail.clone();
            let spawned = thread::Builder::new()
                .name("producer-stderr".into())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines() {
                        let Ok(line) = line else { break };
                        sink.push(line);
                    }
                });
            if let Err(e) = spawned {
                warn!("Producer stderr will not be collected: {}", e);
            }
        }
        tail
    }

    fn push(&self, line: String) {
        let line = line.trim_end().to_string();
        if line.is_empty() {
            return;
        }
        if let Ok(mut lines) = self.0.lock() {
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    fn lines(&self) -> Vec<String> {
        self.0
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Append the tail to a failure reason. The reader thread may lag the
    /// exit slightly, so give it a moment when nothing has arrived yet.
    fn annotate(&self, reason: String) -> String {
        let deadline = Instant::now() + Duration::from_millis(200);
        let mut lines = self.lines();
        while lines.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
            lines = self.lines();
        }
        if lines.is_empty() {
            reason
        } else {
            format!("{reason}: {}", lines.join(" | "))
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL. Always waits for the child.
fn reap(child: &mut Child, grace: Duration) -> String {
    if let Ok(Some(status)) = child.try_wait() {
        return status.to_string();
    }

    if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
        warn!("SIGTERM to producer failed: {}", e);
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(status)) => return status.to_string(),
            Ok(None) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => {
                warn!("Waiting for producer failed: {}", e);
                break;
            }
        }
    }

    warn!("Producer ignored SIGTERM, killing");
    let _ = child.kill();
    match child.wait() {
        Ok(status) => status.to_string(),
        Err(e) => format!("wait failed: {e}"),
    }
}
