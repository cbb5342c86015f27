// SPDX-License-Identifier: MPL-2.0

//! Error types for the capture and recording pipeline

use std::fmt;

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Top-level pipeline error type
#[derive(Debug, Clone)]
pub enum PipelineError {
    /// Camera-related errors
    Camera(CameraError),
    /// Rendering/GPU errors
    Render(RenderError),
    /// Recording-related errors
    Recording(RecordingError),
    /// Photo capture errors
    Photo(PhotoError),
    /// Configuration errors
    Config(String),
    /// Generic error with message
    Other(String),
}

/// Camera-specific errors
#[derive(Debug, Clone)]
pub enum CameraError {
    /// No camera devices found
    NoCameraFound,
    /// Camera initialization failed
    InitializationFailed(String),
    /// Camera disconnected during operation
    Disconnected,
    /// No supported capture size for the requested constraints
    NoMatchingSize,
    /// Backend error (e.g., PipeWire pipeline failure)
    BackendError(String),
}

/// GPU/rendering errors
#[derive(Debug, Clone)]
pub enum RenderError {
    /// No suitable GPU adapter found
    NoAdapter,
    /// Device creation failed
    DeviceCreationFailed(String),
    /// Surface creation or configuration failed
    SurfaceFailed(String),
    /// A draw was attempted against a released or unsized stage
    StageNotReady,
}

/// Recording-specific errors
#[derive(Debug, Clone)]
pub enum RecordingError {
    /// Failed to start recording
    StartFailed(String),
    /// Encoder not available for the requested codec
    EncoderNotAvailable(String),
    /// Recording already in progress
    AlreadyRecording,
    /// Muxer protocol violation (e.g., track added after start)
    MuxerProtocol(String),
    /// Pipeline error during recording
    PipelineError(String),
}

/// Photo capture errors
#[derive(Debug, Clone)]
pub enum PhotoError {
    /// No frame available for capture
    NoFrameAvailable,
    /// Capture failed
    CaptureFailed(String),
    /// Encoding failed
    EncodingFailed(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Camera(e) => write!(f, "Camera error: {}", e),
            PipelineError::Render(e) => write!(f, "Render error: {}", e),
            PipelineError::Recording(e) => write!(f, "Recording error: {}", e),
            PipelineError::Photo(e) => write!(f, "Photo error: {}", e),
            PipelineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PipelineError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::NoCameraFound => write!(f, "No camera devices found"),
            CameraError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            CameraError::Disconnected => write!(f, "Camera disconnected"),
            CameraError::NoMatchingSize => write!(f, "No supported capture size matches"),
            CameraError::BackendError(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::NoAdapter => write!(f, "No suitable GPU adapter found"),
            RenderError::DeviceCreationFailed(msg) => write!(f, "Device creation failed: {}", msg),
            RenderError::SurfaceFailed(msg) => write!(f, "Surface failed: {}", msg),
            RenderError::StageNotReady => write!(f, "Filter stage drawn before resize"),
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::StartFailed(msg) => write!(f, "Failed to start recording: {}", msg),
            RecordingError::EncoderNotAvailable(msg) => {
                write!(f, "Encoder not available: {}", msg)
            }
            RecordingError::AlreadyRecording => write!(f, "Recording already in progress"),
            RecordingError::MuxerProtocol(msg) => write!(f, "Muxer protocol violation: {}", msg),
            RecordingError::PipelineError(msg) => write!(f, "Pipeline error: {}", msg),
        }
    }
}

impl fmt::Display for PhotoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoError::NoFrameAvailable => write!(f, "No frame available for capture"),
            PhotoError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            PhotoError::EncodingFailed(msg) => write!(f, "Encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}
impl std::error::Error for CameraError {}
impl std::error::Error for RenderError {}
impl std::error::Error for RecordingError {}
impl std::error::Error for PhotoError {}

impl From<CameraError> for PipelineError {
    fn from(err: CameraError) -> Self {
        PipelineError::Camera(err)
    }
}

impl From<RenderError> for PipelineError {
    fn from(err: RenderError) -> Self {
        PipelineError::Render(err)
    }
}

impl From<RecordingError> for PipelineError {
    fn from(err: RecordingError) -> Self {
        PipelineError::Recording(err)
    }
}

impl From<PhotoError> for PipelineError {
    fn from(err: PhotoError) -> Self {
        PipelineError::Photo(err)
    }
}

impl From<String> for PipelineError {
    fn from(msg: String) -> Self {
        PipelineError::Other(msg)
    }
}

impl From<&str> for PipelineError {
    fn from(msg: &str) -> Self {
        PipelineError::Other(msg.to_string())
    }
}
