// SPDX-License-Identifier: MPL-2.0

//! Camera worker ordering and session tests

use prism::camera::{
    CameraBackend, CameraController, CameraDevice, CameraFrame, DisplayRotation, Facing,
    FocusRegion, FrameSink, OrientationQuirks, Resolution, SessionSettings, ZoomDirection,
};
use prism::errors::CameraError;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Operations observed across every device the fake backend opened
#[derive(Clone, Default)]
struct OpLog {
    ops: Arc<Mutex<Vec<String>>>,
}

impl OpLog {
    fn push(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }

    fn snapshot(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    /// Wait until the log contains `op`, panicking after the deadline.
    fn wait_for(&self, op: &str) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if self.snapshot().iter().any(|o| o == op) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for op {:?}; log = {:?}", op, self.snapshot());
    }
}

struct FakeDevice {
    id: u32,
    facing: Facing,
    log: OpLog,
    sizes: Vec<Resolution>,
    max_zoom: u32,
    sink: Option<FrameSink>,
    released: bool,
}

impl FakeDevice {
    /// Push one frame through the preview sink, as a capture thread would.
    fn deliver_frame(&self) {
        if let Some(sink) = &self.sink {
            let data: Arc<[u8]> = Arc::from(vec![0u8; 16].into_boxed_slice());
            sink(CameraFrame::packed(data, 2, 2));
        }
    }
}

impl CameraDevice for FakeDevice {
    fn facing(&self) -> Facing {
        self.facing
    }

    fn model(&self) -> &str {
        "fake-module"
    }

    fn supported_sizes(&self) -> Vec<Resolution> {
        self.sizes.clone()
    }

    fn configure(&mut self, settings: &SessionSettings) -> Result<(), CameraError> {
        self.log.push(format!(
            "configure[{}] {} orient={}",
            self.id, settings.preview_size, settings.display_orientation
        ));
        Ok(())
    }

    fn start_preview(&mut self, sink: FrameSink) -> Result<(), CameraError> {
        self.log.push(format!("start_preview[{}]", self.id));
        self.sink = Some(sink);
        self.deliver_frame();
        Ok(())
    }

    fn stop_preview(&mut self) {
        self.log.push(format!("stop_preview[{}]", self.id));
        self.sink = None;
    }

    fn set_focus(&mut self, _region: FocusRegion) -> Result<(), CameraError> {
        self.log.push(format!("focus[{}]", self.id));
        Ok(())
    }

    fn set_zoom(&mut self, level: u32) -> Result<(), CameraError> {
        self.log.push(format!("zoom[{}]={}", self.id, level));
        Ok(())
    }

    fn max_zoom(&self) -> u32 {
        self.max_zoom
    }

    fn set_flash(&mut self, enabled: bool) -> Result<(), CameraError> {
        self.log.push(format!("flash[{}]={}", self.id, enabled));
        Ok(())
    }

    fn capture_still(&mut self) -> Result<CameraFrame, CameraError> {
        let data: Arc<[u8]> = Arc::from(vec![128u8; 2 * 2 * 4].into_boxed_slice());
        Ok(CameraFrame::packed(data, 2, 2))
    }

    fn release(&mut self) {
        if !self.released {
            self.log.push(format!("release[{}]", self.id));
            self.released = true;
            self.sink = None;
        }
    }
}

struct FakeBackend {
    log: OpLog,
    next_id: Arc<Mutex<u32>>,
}

impl FakeBackend {
    fn new(log: OpLog) -> Self {
        Self {
            log,
            next_id: Arc::new(Mutex::new(1)),
        }
    }
}

impl CameraBackend for FakeBackend {
    fn open(&self, facing: Facing) -> Result<Box<dyn CameraDevice>, CameraError> {
        let mut next = self.next_id.lock().unwrap();
        let id = *next;
        *next += 1;
        self.log.push(format!("open[{}] {}", id, facing));
        Ok(Box::new(FakeDevice {
            id,
            facing,
            log: self.log.clone(),
            sizes: vec![
                Resolution::new(320, 240),
                Resolution::new(640, 480),
                Resolution::new(800, 450),
            ],
            max_zoom: 3,
            sink: None,
            released: false,
        }))
    }
}

fn spawn_worker(log: &OpLog) -> CameraController {
    let controller = CameraController::spawn(
        Arc::new(FakeBackend::new(log.clone())),
        OrientationQuirks::new(),
    );
    controller.wait_until_ready();
    controller
}

#[test]
fn test_configure_selects_exact_ratio_size() {
    let log = OpLog::default();
    let controller = spawn_worker(&log);

    controller.open(Facing::Back);
    controller.configure(DisplayRotation::Rotation90, 0.5625);
    log.wait_for("configure[1] 800x450 orient=0");

    controller.release();
    // 640x480 is larger but has the wrong ratio
    assert!(log.snapshot().iter().all(|op| !op.contains("640x480")));
}

#[test]
fn test_switch_is_release_then_open_then_configure() {
    let log = OpLog::default();
    let controller = spawn_worker(&log);

    controller.open(Facing::Back);
    controller.configure(DisplayRotation::Rotation0, 0.75);
    controller.switch_to(Facing::Front, DisplayRotation::Rotation0, 0.75);
    log.wait_for("open[2] front");
    controller.release();

    let ops = log.snapshot();
    let release_old = ops.iter().position(|o| o == "release[1]").expect("old session released");
    let open_new = ops.iter().position(|o| o == "open[2] front").unwrap();
    let configure_new = ops
        .iter()
        .position(|o| o.starts_with("configure[2]"))
        .expect("new session configured");
    assert!(release_old < open_new, "release must precede reopen: {:?}", ops);
    assert!(open_new < configure_new, "open must precede configure: {:?}", ops);
}

#[test]
fn test_no_frames_from_old_session_after_switch() {
    let log = OpLog::default();
    let controller = spawn_worker(&log);

    let delivered: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let delivered_clone = Arc::clone(&delivered);

    controller.open(Facing::Back);
    controller.configure(DisplayRotation::Rotation0, 0.75);
    controller.set_frame_sink(Arc::new(move |_frame| {
        delivered_clone.lock().unwrap().push(Instant::now());
    }));
    controller.start_preview();
    log.wait_for("start_preview[1]");

    controller.switch_to(Facing::Front, DisplayRotation::Rotation0, 0.75);
    log.wait_for("release[1]");
    log.wait_for("start_preview[2]");
    controller.release();

    // the old device dropped its sink at release; only the new session's
    // frames may arrive afterwards
    let ops = log.snapshot();
    let release_old = ops.iter().position(|o| o == "release[1]").unwrap();
    let preview_new = ops.iter().position(|o| o == "start_preview[2]").unwrap();
    assert!(release_old < preview_new);
    assert_eq!(delivered.lock().unwrap().len(), 2, "one frame per session");
}

#[test]
fn test_zoom_steps_clamped_to_range() {
    let log = OpLog::default();
    let controller = spawn_worker(&log);

    controller.open(Facing::Back);
    for _ in 0..5 {
        controller.zoom(ZoomDirection::In);
    }
    controller.zoom(ZoomDirection::Out);
    controller.release();

    let ops = log.snapshot();
    let zooms: Vec<&String> = ops.iter().filter(|o| o.starts_with("zoom")).collect();
    // three steps in (clamped at max 3), one step out
    assert_eq!(zooms, ["zoom[1]=1", "zoom[1]=2", "zoom[1]=3", "zoom[1]=2"]);
}

#[test]
fn test_flash_ignored_on_front_camera() {
    let log = OpLog::default();
    let controller = spawn_worker(&log);

    controller.open(Facing::Front);
    controller.enable_flash(true);
    controller.release();

    assert!(log.snapshot().iter().all(|op| !op.starts_with("flash")));
}

#[test]
fn test_take_picture_delivers_jpeg() {
    let log = OpLog::default();
    let controller = spawn_worker(&log);

    let result: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let result_clone = Arc::clone(&result);

    controller.open(Facing::Back);
    controller.take_picture(
        0,
        Box::new(move |bytes| {
            *result_clone.lock().unwrap() = Some(bytes.expect("capture should succeed"));
        }),
    );
    controller.release();

    let bytes = result.lock().unwrap().take().expect("callback must run");
    // JPEG SOI marker
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
}

#[test]
fn test_release_is_idempotent() {
    let log = OpLog::default();
    let controller = spawn_worker(&log);

    controller.open(Facing::Back);
    controller.release();
    controller.release();

    let ops = log.snapshot();
    assert_eq!(ops.iter().filter(|o| o.starts_with("release")).count(), 1);
}
