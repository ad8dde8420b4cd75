// Kept in its own test binary: exec'ing a freshly written script races with
// sibling test threads forking while the write handle is open (ETXTBSY).

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use shutter::capture::{self, FrameSource, PixelFormat, Readiness, SourceStrategy};
use shutter::error::{FrameReadError, SourceError};
use shutter::Config;

#[test]
fn missing_device_falls_back_to_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("fake-gst-launch");
    // Ignores the pipeline description, emits ten 10x10 BGR frames
    fs::write(&program, "#!/bin/sh\nexec head -c 3000 /dev/zero\n").unwrap();
    fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = Config::default().capture;
    config.strategy = SourceStrategy::Device;
    config.device = "/nonexistent/video99".into();
    config.fallback = true;
    config.pipeline_program = program.to_string_lossy().into_owned();
    config.width = 10;
    config.height = 10;
    config.format = PixelFormat::Bgr24;

    let mut source = capture::open(&config).expect("fallback pipeline opens");
    assert_eq!(source.dimensions(), (10, 10, 3));

    for _ in 0..10 {
        assert_eq!(
            source.poll(Duration::from_secs(1)).unwrap(),
            Readiness::Ready
        );
        let frame = source.read_frame().unwrap();
        assert_eq!(frame.len(), 300);
    }

    match source.poll(Duration::from_secs(1)).unwrap() {
        Readiness::Closed => {}
        Readiness::Ready => assert!(matches!(
            source.read_frame(),
            Err(SourceError::FrameRead(FrameReadError::Closed))
        )),
        Readiness::Timeout => panic!("producer exited but poll timed out"),
    }
    source.close();
}
