//! facereg-hw: Hardware abstraction for camera capture and frame preview.
//!
//! Provides V4L2-based camera access, the grayscale `Frame` type, and a
//! desktop preview window that draws detection overlays.

pub mod camera;
pub mod display;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat, VideoSource};
pub use display::{Display, DisplayError, FrameSink, Overlay};
pub use frame::{Frame, FrameError};
