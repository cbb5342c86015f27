// SPDX-License-Identifier: MPL-2.0

//! Shared types for camera sessions

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Which way the camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Facing {
    /// World-facing camera
    #[default]
    Back,
    /// User-facing camera
    Front,
}

impl Facing {
    /// The opposite facing, used when switching cameras
    pub fn toggled(&self) -> Facing {
        match self {
            Facing::Back => Facing::Front,
            Facing::Front => Facing::Back,
        }
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::Back => write!(f, "back"),
            Facing::Front => write!(f, "front"),
        }
    }
}

/// A capture resolution supported by a camera device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Height over width, the ratio convention used for size selection
    pub fn ratio(&self) -> f32 {
        self.height as f32 / self.width as f32
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Display rotation of the presentation target, in degrees clockwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl DisplayRotation {
    /// Sensor orientation correction for this display rotation.
    ///
    /// Lookup table mapping display rotation to the clockwise correction
    /// the preview needs, for a sensor mounted at the common 90° offset.
    pub fn preview_correction(&self) -> u32 {
        match self {
            DisplayRotation::Rotation0 => 90,
            DisplayRotation::Rotation90 => 0,
            DisplayRotation::Rotation180 => 270,
            DisplayRotation::Rotation270 => 180,
        }
    }
}

/// One RGBA camera frame
#[derive(Clone)]
pub struct CameraFrame {
    /// Tightly packed or strided RGBA pixel data
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row (>= width * 4)
    pub stride: u32,
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Frame with tightly packed rows
    pub fn packed(data: Arc<[u8]>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            stride: width * 4,
            captured_at: Instant::now(),
        }
    }
}

impl std::fmt::Debug for CameraFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CameraFrame({}x{}, stride {}, {} bytes)",
            self.width,
            self.height,
            self.stride,
            self.data.len()
        )
    }
}

/// Normalized focus/metering region, computed by the UI layer from tap
/// coordinates. All fields are in [0, 1] relative to the preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One zoom step in or out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

/// Session parameters applied when a camera is configured
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Preview resolution, chosen under the target aspect ratio
    pub preview_size: Resolution,
    /// Still-picture resolution, chosen under the same ratio
    pub picture_size: Resolution,
    /// Clockwise display-orientation correction in degrees
    pub display_orientation: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_toggle() {
        assert_eq!(Facing::Back.toggled(), Facing::Front);
        assert_eq!(Facing::Front.toggled(), Facing::Back);
        assert_eq!(Facing::Back.toggled().toggled(), Facing::Back);
    }

    #[test]
    fn test_resolution_ratio() {
        assert!((Resolution::new(800, 450).ratio() - 0.5625).abs() < f32::EPSILON);
        assert!((Resolution::new(640, 480).ratio() - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rotation_lookup() {
        assert_eq!(DisplayRotation::Rotation0.preview_correction(), 90);
        assert_eq!(DisplayRotation::Rotation90.preview_correction(), 0);
        assert_eq!(DisplayRotation::Rotation180.preview_correction(), 270);
        assert_eq!(DisplayRotation::Rotation270.preview_correction(), 180);
    }
}
