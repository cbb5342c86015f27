// SPDX-License-Identifier: MPL-2.0

//! Headless CLI commands

use prism::camera::{CameraController, DisplayRotation, GstCameraBackend, OrientationQuirks};
use prism::record::{RecordListener, Recorder, RecorderSettings, probe_encoders};
use prism::{Config, Facing};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Print every known encoder element and whether it is available.
pub fn list_encoders() -> Result<(), Box<dyn std::error::Error>> {
    let probes = probe_encoders()?;
    println!("{:<16} {:<8} {:<10} available", "element", "kind", "hardware");
    for probe in probes {
        println!(
            "{:<16} {:<8} {:<10} {}",
            probe.element,
            probe.kind.to_string(),
            if probe.hardware { "hardware" } else { "software" },
            if probe.available { "yes" } else { "no" }
        );
    }
    Ok(())
}

struct CliListener;

impl RecordListener for CliListener {
    fn on_prepared(&self) {
        info!("recorder prepared");
    }

    fn on_started(&self) {
        info!("recorder started");
    }

    fn on_stopped(&self) {
        info!("recorder stopped");
    }

    fn on_released(&self) {
        info!("recorder released");
    }

    fn on_error(&self, code: i32) {
        eprintln!("recorder error, code {}", code);
    }
}

/// Record the default camera straight to a file, no preview window. The
/// composited-filter path needs a presentation surface; this feeds camera
/// frames to the encoder directly.
pub fn record(
    duration: u64,
    output: Option<PathBuf>,
    audio: bool,
    hd: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let output = output.unwrap_or_else(|| config.new_recording_path());
    let settings = RecorderSettings {
        output_path: output.clone(),
        width: config.record.width,
        height: config.record.height,
        enable_audio: audio,
        enable_hd: hd,
    };
    let aspect_ratio = settings.height as f32 / settings.width as f32;
    let frame_width = settings.width;
    let frame_height = settings.height;

    let recorder = Arc::new(Recorder::spawn());
    recorder.wait_until_ready();
    recorder.prepare(settings, Arc::new(CliListener));
    recorder.start_recording();

    let camera = CameraController::spawn(
        Arc::new(GstCameraBackend::default()),
        OrientationQuirks::new(),
    );
    camera.wait_until_ready();
    camera.open(Facing::Back);
    camera.configure(DisplayRotation::Rotation0, aspect_ratio);

    let frame_recorder = Arc::clone(&recorder);
    camera.set_frame_sink(Arc::new(move |frame| {
        if frame.width != frame_width || frame.height != frame_height {
            return;
        }
        // repack strided rows; the encoder expects tight RGBA
        let row_bytes = frame.width as usize * 4;
        let stride = frame.stride as usize;
        let data = if stride == row_bytes {
            frame.data.to_vec()
        } else {
            let mut packed = Vec::with_capacity(row_bytes * frame.height as usize);
            for y in 0..frame.height as usize {
                packed.extend_from_slice(&frame.data[y * stride..y * stride + row_bytes]);
            }
            packed
        };
        frame_recorder.submit_frame(data);
        frame_recorder.frame_available();
    }));
    camera.start_preview();

    println!("recording {} seconds to {}", duration, output.display());
    std::thread::sleep(Duration::from_secs(duration));

    camera.stop_preview();
    camera.release();
    recorder.stop_recording();
    drop(recorder);

    println!("saved {}", output.display());
    Ok(())
}
