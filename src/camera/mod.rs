// SPDX-License-Identifier: MPL-2.0

//! Camera session ownership and control.
//!
//! A single worker thread owns the open camera device; every operation is
//! an asynchronous command processed in send order. The device itself sits
//! behind [`CameraDevice`] so capture backends (and tests) can be swapped
//! without touching the worker.

mod device;
mod types;
mod worker;

pub use device::{
    CameraBackend, CameraDevice, FrameSink, GstCameraBackend, GstCameraDevice, OrientationQuirks,
    select_capture_size,
};
pub use types::{
    CameraFrame, DisplayRotation, Facing, FocusRegion, Resolution, SessionSettings, ZoomDirection,
};
pub use worker::{CameraCommand, CameraController, PhotoCallback};
