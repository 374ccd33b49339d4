//! V4L2 camera capture via the `v4l` crate.
//!
//! `Camera` is the raw device handle. `V4lDevice` adapts it to the
//! [`CaptureDevice`] seam: each acquisition spawns a capture thread that
//! publishes the latest frame through a `watch` channel, which plays the role
//! of the video sink.
//!
//! Dequeues are bounded by [`DEQUEUE_TIMEOUT`], so the thread notices a stop
//! request or a dead feed within that window. A device is held by at most one
//! capture thread at a time; a new acquisition waits for the previous thread
//! to release it.

use crate::capture::{CaptureConstraints, CaptureDevice, CaptureError, TrackState, VideoStream};
use crate::frame::{self, Frame};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, OwnedMutexGuard};
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

const EBUSY: i32 = 16;
/// Longest wait for one buffer before the track is declared ended.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
/// Longest wait for a previous capture thread to release the device.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(PixelFormat::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            Some(PixelFormat::Y16)
        } else {
            None
        }
    }
}

/// Map an OS error from opening the device node.
fn open_error(path: &str, err: io::Error) -> CaptureError {
    if err.raw_os_error() == Some(EBUSY) {
        return CaptureError::DeviceBusy(path.to_string());
    }
    match err.kind() {
        io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied(path.to_string()),
        io::ErrorKind::NotFound => CaptureError::NoDevice(path.to_string()),
        _ => CaptureError::CaptureFailed(format!("{path}: {err}")),
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 device and negotiate the closest format to `constraints`.
    pub fn open(device_path: &str, constraints: &CaptureConstraints) -> Result<Self, CaptureError> {
        if !Path::new(device_path).exists() {
            return Err(CaptureError::NoDevice(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to query capabilities: {e}")))?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::StreamingNotSupported);
        }

        let mut fmt = device
            .format()
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.width;
        fmt.height = constraints.height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CaptureError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        // Frame rate is advisory; plenty of drivers ignore it.
        if let Err(e) = device.set_params(&Parameters::with_fps(constraints.frame_rate)) {
            tracing::warn!(fps = constraints.frame_rate, error = %e, "could not set frame rate");
        }

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Start a memory-mapped capture stream on this device.
    fn stream(&self) -> Result<MmapStream<'_>, CaptureError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    /// Convert a raw buffer to grayscale based on the negotiated format.
    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CaptureError> {
        let converted = match self.pixel_format {
            PixelFormat::Grey => {
                let pixels = (self.width * self.height) as usize;
                if buf.len() < pixels {
                    return Err(CaptureError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
        };
        converted.map_err(|e| CaptureError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format)))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// [`CaptureDevice`] backed by a V4L2 node.
pub struct V4lDevice {
    path: PathBuf,
    /// Held by the capture thread for as long as it has the node open.
    in_use: Arc<Mutex<()>>,
}

impl V4lDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), in_use: Arc::new(Mutex::new(())) }
    }
}

impl CaptureDevice for V4lDevice {
    type Stream = V4lStream;

    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<V4lStream, CaptureError> {
        let path = self.path.to_string_lossy().into_owned();
        let constraints = *constraints;
        let (opened_tx, opened_rx) = oneshot::channel();
        let (frames_tx, frames_rx) = watch::channel(None);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let in_use = tokio::time::timeout(RELEASE_TIMEOUT, self.in_use.clone().lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(device = %path, "previous capture thread still holds the device");
                CaptureError::DeviceBusy(path.clone())
            })?;

        std::thread::Builder::new()
            .name("facegate-capture".into())
            .spawn(move || {
                capture_loop(&path, &constraints, opened_tx, frames_tx, &stop_flag);
                release(in_use);
            })
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

        let dimensions = opened_rx
            .await
            .map_err(|_| CaptureError::CaptureFailed("capture thread exited during open".into()))??;

        Ok(V4lStream { frames: frames_rx, stop, dimensions })
    }
}

/// Runs after the camera and its stream have been dropped.
fn release(in_use: OwnedMutexGuard<()>) {
    drop(in_use);
    tracing::trace!("capture device released");
}

/// Body of the capture thread. Returns when stopped, on a capture error, or
/// when no buffer arrives within [`DEQUEUE_TIMEOUT`]; dropping `frames` is
/// what marks the track ended.
fn capture_loop(
    path: &str,
    constraints: &CaptureConstraints,
    opened: oneshot::Sender<Result<(u32, u32), CaptureError>>,
    frames: watch::Sender<Option<Arc<Frame>>>,
    stop: &AtomicBool,
) {
    let camera = match Camera::open(path, constraints) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = opened.send(Err(e));
            return;
        }
    };
    let mut stream = match camera.stream() {
        Ok(stream) => stream,
        Err(e) => {
            let _ = opened.send(Err(e));
            return;
        }
    };
    stream.set_timeout(DEQUEUE_TIMEOUT);
    if opened.send(Ok((camera.width, camera.height))).is_err() {
        return;
    }

    while !stop.load(Ordering::Relaxed) && !frames.is_closed() {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            // A timed-out dequeue leaves the buffer queue inconsistent for
            // `next`, so the track ends here and the watchdog re-acquires.
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                if !stop.load(Ordering::Relaxed) {
                    tracing::warn!(
                        device = path,
                        timeout_ms = DEQUEUE_TIMEOUT.as_millis() as u64,
                        "no frame from camera; ending track"
                    );
                }
                break;
            }
            Err(e) => {
                tracing::warn!(device = path, error = %e, "failed to dequeue buffer; ending track");
                return;
            }
        };
        let sequence = meta.sequence;
        match camera.buf_to_grayscale(buf) {
            Ok(data) => {
                frames.send_replace(Some(Arc::new(Frame {
                    data,
                    width: camera.width,
                    height: camera.height,
                    timestamp: std::time::Instant::now(),
                    sequence,
                })));
            }
            Err(e) => tracing::debug!(seq = sequence, error = %e, "dropping malformed frame"),
        }
    }
    tracing::debug!(device = path, "capture thread exiting");
}

/// Running V4L2 stream; the receiving half of the frame sink.
pub struct V4lStream {
    frames: watch::Receiver<Option<Arc<Frame>>>,
    stop: Arc<AtomicBool>,
    dimensions: (u32, u32),
}

impl VideoStream for V4lStream {
    fn track_state(&self) -> TrackState {
        if self.stop.load(Ordering::Relaxed) || self.frames.has_changed().is_err() {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frames.borrow().clone()
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    /// Signals the capture thread and returns immediately. The thread exits
    /// within [`DEQUEUE_TIMEOUT`]; the next `acquire` waits for it.
    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for V4lStream {
    fn drop(&mut self) {
        self.stop();
    }
}
