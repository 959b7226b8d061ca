//! facegreet-hw: camera capture for the recognition loop.
//!
//! Opens a V4L2 device, negotiates a pixel format and hands out RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
