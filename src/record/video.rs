// SPDX-License-Identifier: MPL-2.0

//! Video track: H.264 encoding of composited frames.
//!
//! The track's input is the recorder's GPU surface: the render thread
//! draws the composited texture onto the offscreen surface, whose swap
//! yields the RGBA frame submitted here.

use super::codec::CodecSession;
use super::encoder::{EncoderListener, TrackEncoder, TrackHandle};
use super::muxer::{Muxer, TrackKind};
use std::sync::Arc;
use tracing::warn;

/// Recording frame rate
pub const FRAME_RATE: u32 = 24;
/// Bits-per-pixel factor for the base bitrate
const BPP: f32 = 0.25;
/// High-definition bitrate multiplier
const HD_FACTOR: u32 = 2;
/// Keyframe interval in seconds
pub const KEYFRAME_INTERVAL: u32 = 1;

/// Bitrate from resolution and frame rate, doubled in HD mode.
pub fn calc_bitrate(width: u32, height: u32, high_definition: bool) -> u32 {
    let base = (BPP * FRAME_RATE as f32 * width as f32 * height as f32) as u32;
    if high_definition { base * HD_FACTOR } else { base }
}

/// The video encoder track.
pub struct VideoTrack {
    encoder: TrackEncoder,
    handle: TrackHandle,
}

impl VideoTrack {
    /// Wrap an existing codec session (used by tests and custom factories).
    pub fn new(
        session: Arc<dyn CodecSession>,
        muxer: Arc<Muxer>,
        listener: Arc<dyn EncoderListener>,
    ) -> Self {
        let encoder = TrackEncoder::spawn(TrackKind::Video, session, muxer, Arc::clone(&listener));
        let handle = encoder.handle();
        listener.on_prepared(TrackKind::Video);
        Self { encoder, handle }
    }

    /// Handle for signalling and input submission.
    pub fn handle(&self) -> TrackHandle {
        self.handle.clone()
    }

    /// Submit one RGBA frame read back from the encoder surface.
    pub fn submit_frame(&self, data: &[u8]) {
        if !self.handle.is_active() {
            return;
        }
        let pts = self.handle.pts_now_us();
        if let Err(err) = self.handle.session().queue_input(data, pts) {
            warn!(error = %err, "video frame rejected");
        }
    }

    /// Signal that a frame was just submitted.
    pub fn frame_available_soon(&self) -> bool {
        self.handle.frame_available_soon()
    }

    pub fn start_recording(&self) {
        self.encoder.start_recording();
    }

    pub fn stop_recording(&self) {
        self.encoder.stop_recording();
    }

    pub fn pause_recording(&self, paused: bool) {
        self.encoder.pause_recording(paused);
    }

    /// Wait for the drain thread to release the codec and the muxer slot.
    pub fn join(&mut self) {
        self.encoder.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate_scales_with_resolution() {
        let sd = calc_bitrate(640, 480, false);
        let hd = calc_bitrate(1920, 1080, false);
        assert!(hd > sd);
        // 0.25 bpp * 24 fps * pixels
        assert_eq!(sd, (0.25 * 24.0 * 640.0 * 480.0) as u32);
    }

    #[test]
    fn test_hd_doubles_bitrate() {
        assert_eq!(
            calc_bitrate(1920, 1080, true),
            calc_bitrate(1920, 1080, false) * 2
        );
    }
}
