use std::process::Command;
use std::time::{Duration, Instant};

use nix::unistd::{getpgid, getpgrp, Pid};
use shutter::capture::{self, FrameSource, PipelineSource, ProcessTimeouts, Readiness};
use shutter::error::{FrameReadError, SourceError};
use shutter::Config;

const POLL: Duration = Duration::from_millis(500);

fn timeouts() -> ProcessTimeouts {
    ProcessTimeouts {
        startup: Duration::from_millis(500),
        stall: Duration::from_millis(500),
        terminate_grace: Duration::from_millis(500),
    }
}

fn shell(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[test]
fn reads_back_to_back_frames_until_eof() {
    let mut source =
        PipelineSource::spawn(shell("head -c 1500 /dev/zero"), (10, 10, 3), timeouts()).unwrap();
    assert_eq!(source.dimensions(), (10, 10, 3));

    for _ in 0..5 {
        assert_eq!(source.poll(POLL).unwrap(), Readiness::Ready);
        let frame = source.read_frame().unwrap();
        assert_eq!(frame.len(), 300);
        assert!(frame.iter().all(|&b| b == 0));
    }
    assert_eq!(source.frames_read(), 5);

    // EOF shows up either as a hangup or as an empty read
    match source.poll(POLL).unwrap() {
        Readiness::Closed => {}
        Readiness::Ready => assert!(matches!(
            source.read_frame(),
            Err(SourceError::FrameRead(FrameReadError::Closed))
        )),
        Readiness::Timeout => panic!("producer exited but poll timed out"),
    }
    source.close();
}

#[test]
fn partial_last_frame_is_truncated() {
    let mut source =
        PipelineSource::spawn(shell("head -c 150 /dev/zero"), (10, 10, 3), timeouts()).unwrap();

    assert_eq!(source.poll(POLL).unwrap(), Readiness::Ready);
    match source.read_frame() {
        Err(SourceError::FrameRead(FrameReadError::Truncated { expected, received })) => {
            assert_eq!(expected, 300);
            assert_eq!(received, 150);
        }
        other => panic!("expected truncation, got {other:?}"),
    }
}

#[test]
fn missing_program_is_unavailable() {
    let result = PipelineSource::spawn(
        Command::new("/nonexistent/shutter-producer"),
        (10, 10, 3),
        timeouts(),
    );
    assert!(matches!(result, Err(SourceError::Unavailable { .. })));
}

#[test]
fn producer_exiting_at_startup_is_unavailable() {
    let result = PipelineSource::spawn(Command::new("false"), (10, 10, 3), timeouts());
    match result {
        Err(SourceError::Unavailable { strategy, .. }) => assert_eq!(strategy, "pipeline"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("a producer that exits immediately must not open"),
    }
}

#[test]
fn producer_stderr_explains_startup_failure() {
    let result = PipelineSource::spawn(
        shell("echo 'no element \"v4l2src\"' >&2; exit 1"),
        (10, 10, 3),
        timeouts(),
    );
    match result {
        Err(SourceError::Unavailable { reason, .. }) => {
            assert!(reason.contains("no element \"v4l2src\""), "{reason}");
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("a failing producer must not open"),
    }
}

#[test]
fn producer_runs_in_its_own_process_group() {
    let mut source =
        PipelineSource::spawn(shell("exec sleep 30"), (10, 10, 3), timeouts()).unwrap();
    let pid = Pid::from_raw(source.pid().unwrap() as i32);

    let group = getpgid(Some(pid)).unwrap();
    assert_eq!(group, pid);
    assert_ne!(group, getpgrp());

    source.close();
    assert_eq!(source.pid(), None);
}

#[test]
fn silent_producer_times_out_and_is_stopped_on_close() {
    let mut source = PipelineSource::spawn(
        shell("exec sleep 30"),
        (10, 10, 3),
        ProcessTimeouts {
            startup: Duration::from_millis(100),
            ..timeouts()
        },
    )
    .unwrap();

    assert_eq!(
        source.poll(Duration::from_millis(50)).unwrap(),
        Readiness::Timeout
    );

    let started = Instant::now();
    source.close();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(source.poll(POLL).unwrap(), Readiness::Closed);
    assert!(matches!(
        source.read_frame(),
        Err(SourceError::FrameRead(FrameReadError::Closed))
    ));
    // Closing twice is harmless
    source.close();
}

#[test]
fn both_strategies_failing_reports_both() {
    let mut config = Config::default().capture;
    config.device = "/nonexistent/video99".into();
    config.pipeline_program = "/nonexistent/gst-launch".into();
    config.fallback = true;

    match capture::open(&config) {
        Err(SourceError::Unavailable { strategy, reason }) => {
            assert_eq!(strategy, "pipeline+device");
            assert!(reason.contains(';'), "{reason}");
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("no strategy can open a nonexistent device"),
    }
}

#[test]
fn without_fallback_only_the_primary_is_tried() {
    let mut config = Config::default().capture;
    config.device = "/nonexistent/video99".into();
    config.pipeline_program = "/nonexistent/gst-launch".into();
    config.fallback = false;

    match capture::open(&config) {
        Err(SourceError::Unavailable { strategy, .. }) => assert_eq!(strategy, "pipeline"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("a missing program cannot open"),
    }
}
