use std::path::{Path, PathBuf};

use tracing::{debug, info};
use v4l::capability::Flags;
use v4l::Device;

/// First `/dev/videoN` that advertises video capture
pub fn auto_detect_device() -> Option<String> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            debug!("Cannot open {}", path);
            continue;
        };
        if let Ok(caps) = dev.query_caps() {
            if caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                info!("Found capture device: {} - {}", path, caps.card);
                return Some(path);
            }
        }
    }

    None
}

/// `dir/{prefix}{n}{suffix}` for the smallest `n` not already taken
pub fn next_free_path(dir: &Path, prefix: &str, suffix: &str) -> PathBuf {
    (0u64..)
        .map(|n| dir.join(format!("{prefix}{n}{suffix}")))
        .find(|path| !path.exists())
        .unwrap_or_else(|| dir.join(format!("{prefix}{suffix}")))
}
