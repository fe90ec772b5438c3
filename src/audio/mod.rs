//! Audio subsystem module

pub mod capture;
pub mod device;
pub mod file;
pub mod frame;

pub use capture::{CaptureSource, CaptureStopper, DeviceCapture, FrameRead};
pub use device::{list_input_devices, InputDevice, InputDeviceInfo};
pub use file::{RawPcmFileSource, RawPcmSource};
pub use frame::{AudioFrame, CaptureFormat};
