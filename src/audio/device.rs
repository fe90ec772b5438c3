//! Input device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;

/// Wrapper around a cpal input device
pub struct InputDevice {
    inner: cpal::Device,
    pub name: String,
}

impl InputDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Native input configuration; its sample rate is adopted as-is
    pub fn default_input_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        Ok(self.inner.default_input_config()?)
    }
}

/// Summary of an input device for listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// List all available input devices
pub fn list_input_devices() -> Vec<InputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            let Ok(name) = device.name() else {
                continue;
            };
            let config = device.default_input_config().ok();
            devices.push(InputDeviceInfo {
                is_default: default_name.as_ref() == Some(&name),
                sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                channels: config.as_ref().map(|c| c.channels()),
                name,
            });
        }
    }
    devices
}

/// Find an input device by exact name
pub fn find_input_device(name: &str) -> Result<InputDevice, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(InputDevice::from_cpal(device));
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Get the system default input device
pub fn default_input_device() -> Result<InputDevice, AudioError> {
    cpal::default_host()
        .default_input_device()
        .map(InputDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
}

/// Resolve the preferred device, falling back to the system default
pub fn select_input_device(preferred: Option<&str>) -> Result<InputDevice, AudioError> {
    match preferred {
        Some(name) if !name.trim().is_empty() => find_input_device(name),
        _ => default_input_device(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_device_not_found() {
        // Holds on machines with and without audio hardware.
        let err = find_input_device("no-such-device-7f3a").err().unwrap();
        assert!(matches!(err, AudioError::DeviceNotFound(_)));
    }

    #[test]
    fn test_listing_marks_at_most_one_default() {
        let devices = list_input_devices();
        assert!(devices.iter().filter(|d| d.is_default).count() <= 1);
    }
}
