//! facegate-hw — Camera capture and frame quality.
//!
//! Provides V4L2-based camera access, the capture lifecycle manager that
//! keeps the stream alive, and the quality gate run before detection.

pub mod camera;
pub mod capture;
pub mod frame;
pub mod quality;

pub use camera::{Camera, DeviceInfo, PixelFormat, V4lDevice, V4lStream};
pub use capture::{
    CaptureConstraints, CaptureDevice, CaptureError, CaptureHealth, CaptureLifecycleManager,
    CaptureStall, HealthCheck, TrackState, VideoStream,
};
pub use frame::{Frame, LumaStats};
pub use quality::{FrameVerdict, QualityGate};
