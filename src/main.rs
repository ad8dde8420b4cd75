//! Shutter: countdown still capture with optional live classification

use std::path::PathBuf;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shutter::capture::{self, FrameSource};
use shutter::display::{ImageFileSink, LogOverlay, Overlay};
use shutter::inference::{EimRunner, InferenceAdapter};
use shutter::pipeline::{
    Cancellation, CaptureLoop, CaptureSession, LoopOptions, RunOutcome, SystemClock,
};
use shutter::{utils, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shutter=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Shutter launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let mut config = Config::load(config_path.as_deref())?;

    if config.capture.device.is_empty() {
        config.capture.device =
            utils::auto_detect_device().ok_or_else(|| eyre!("No suitable capture device found"))?;
    }

    info!(
        "Camera settings: {}x{} @ {}fps, rotation {}°, precountdown {}s, countdown {}s, saving to {}",
        config.capture.width,
        config.capture.height,
        config.capture.fps,
        config.session.rotation,
        config.session.precountdown_secs,
        config.session.countdown_secs,
        config.output.dir.display(),
    );

    // The model is validated once, before any frame is read
    let adapter = if config.inference.enabled {
        let model = config
            .inference
            .model
            .as_deref()
            .ok_or_else(|| eyre!("Inference enabled without a model"))?;
        let runner = EimRunner::start(model, Duration::from_millis(config.inference.timeout_ms))
            .map_err(|e| eyre!("Could not initialize model: {e}"))?;
        Some(InferenceAdapter::new(
            Box::new(runner),
            config.inference.input_width,
            config.inference.input_height,
            config.capture.format,
        )?)
    } else {
        None
    };

    let source = capture::open(&config.capture)?;

    let (cancel, cancellation) = Cancellation::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            cancel.cancel();
        }
    });

    info!("Streaming - press Ctrl-C to quit");
    let outcome =
        tokio::task::spawn_blocking(move || run_capture(config, source, adapter, cancellation))
            .await??;

    match outcome {
        RunOutcome::Completed { captures, .. } => {
            info!("Capture complete! {} image(s) saved", captures)
        }
        RunOutcome::Aborted {
            captures, reason, ..
        } => warn!("Session ended early after {} capture(s): {}", captures, reason),
    }

    info!("Shutter shutting down");
    Ok(())
}

fn run_capture(
    config: Config,
    source: Box<dyn FrameSource + Send>,
    adapter: Option<InferenceAdapter>,
    cancellation: Cancellation,
) -> Result<RunOutcome> {
    let rotation = config.session.rotation()?;
    let session = CaptureSession::new(
        config.session.timing()?,
        rotation,
        (config.capture.width, config.capture.height),
    );
    let sink = ImageFileSink::sequential(
        &config.output.dir,
        config.output.prefix.as_str(),
        config.output.suffix.to_lowercase(),
        config.capture.format,
    );
    let options = config.loop_options();

    if config.preview.enabled {
        #[cfg(feature = "preview")]
        {
            let (width, height) = rotation.output_dims(config.capture.width, config.capture.height);
            let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
            let display = shutter::display::Sdl2Display::new(
                &sdl_context,
                width,
                height,
                config.capture.format,
            )?;
            return Ok(run_loop(display, source, sink, session, options, adapter, cancellation));
        }
        #[cfg(not(feature = "preview"))]
        warn!("Preview requested but this build has no `preview` feature; running headless");
    }

    Ok(run_loop(
        LogOverlay::new(),
        source,
        sink,
        session,
        options,
        adapter,
        cancellation,
    ))
}

fn run_loop<O: Overlay>(
    overlay: O,
    source: Box<dyn FrameSource + Send>,
    sink: ImageFileSink,
    session: CaptureSession,
    options: LoopOptions,
    adapter: Option<InferenceAdapter>,
    cancellation: Cancellation,
) -> RunOutcome {
    let mut capture = CaptureLoop::new(source, SystemClock, overlay, sink, session, options)
        .with_cancellation(cancellation);
    if let Some(adapter) = adapter {
        capture = capture.with_inference(adapter);
    }
    capture.run()
}
