use std::time::{Duration, Instant};

use frame_grab::platform::synthetic::SyntheticBackend;
use frame_grab::{CaptureSession, SessionConfig, Subsystem};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Optional JSON config as the first argument.
    let mut config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::from_file(&path).expect("failed to load config"),
        None => SessionConfig::default(),
    };
    if config.snapshot_path.is_none() {
        config.snapshot_path = Some(std::env::temp_dir().join("frame-grab-first.bmp"));
    }

    let mut session = CaptureSession::new(SyntheticBackend::new(), Subsystem::noop(), config);
    session.initialize().expect("failed to initialize media subsystem");

    let devices = session.list_devices().expect("failed to enumerate devices");
    println!("Found {} camera(s):", devices.len());
    for dev in &devices {
        println!("  [{}] {} (id: {})", dev.index, dev.name, dev.id);
    }
    if devices.is_empty() {
        println!("No cameras found.");
        return;
    }

    let device = session.select_device(0).expect("failed to select device");
    println!("\nUsing: {} ({})", device.name, device.id);

    let formats = session.capabilities().expect("failed to get formats");
    println!("\nSupported formats ({} total):", formats.len());
    for (i, f) in formats.iter().enumerate() {
        println!("  [{}] {} {}", i, f.pixel_format, f.size);
        for rr in f.frame_rate_ranges() {
            println!("       {:.1}-{:.1} fps", rr.min.as_f64(), rr.max.as_f64());
        }
    }

    session.build_graph().expect("failed to build capture graph");
    session.start_capture().expect("failed to start capture");

    let target_frames: u64 = 90;
    let deadline = Instant::now() + Duration::from_secs(10);
    while session.frame_count() < target_frames && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }

    session.stop_capture().expect("failed to stop capture");

    let callback = session.callback().expect("session has a callback");
    let stats = callback.statistics();
    println!(
        "\nDone. Captured {} frames at {:.1} fps.",
        stats.frame_count, stats.average_fps
    );
    if let Some(last) = callback.last_stats() {
        println!(
            "Last frame: brightness {:.1}, contrast {:.1}, motion {}",
            last.avg_brightness, last.avg_contrast, last.motion_detected
        );
    }
    if let Some(image) = callback.snapshot() {
        println!(
            "First frame saved to {} ({}x{}, {} bytes)",
            image.path.display(),
            image.width,
            image.height,
            image.file_size
        );
    }

    session.teardown();
}
