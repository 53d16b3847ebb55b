use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use tonedial_foundation::AudioError;

/// Resolves which output device playback opens. Selection happens on every
/// device (re)open so an unplugged device surfaces as an open failure rather
/// than a stale handle.
pub struct OutputDeviceSelector {
    host: Host,
    preferred: Option<String>,
}

impl OutputDeviceSelector {
    pub fn new(preferred: Option<String>) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let selector = Self { host, preferred };
        // Surface a bad --device name at startup, not on first playback.
        if selector.preferred.is_some() {
            selector.select()?;
        }
        Ok(selector)
    }

    pub fn select(&self) -> Result<Device, AudioError> {
        if let Some(preferred) = self.preferred.as_deref() {
            if let Some(device) = self.find_device_by_name(preferred) {
                return Ok(device);
            }
            // Fallback to a case-insensitive substring match across names
            if let Some(device) = self
                .find_device_by_predicate(|n| n.to_lowercase().contains(&preferred.to_lowercase()))
            {
                tracing::warn!(
                    "Preferred output device '{}' not found exactly; using closest match '{}'",
                    preferred,
                    device.name().unwrap_or_default()
                );
                return Ok(device);
            }
            // Do not silently fall back when a specific name was given
            return Err(AudioError::DeviceNotFound {
                name: Some(preferred.to_string()),
            });
        }

        self.host
            .default_output_device()
            .ok_or(AudioError::DeviceNotFound { name: None })
    }

    pub fn enumerate_devices(&self) -> Vec<OutputDeviceInfo> {
        let mut devices = Vec::new();

        if let Ok(outputs) = self.host.output_devices() {
            for device in outputs {
                if let Ok(name) = device.name() {
                    devices.push(OutputDeviceInfo {
                        name,
                        is_default: false,
                    });
                }
            }
        }

        if let Some(default) = self.host.default_output_device() {
            if let Ok(default_name) = default.name() {
                for device in &mut devices {
                    if device.name == default_name {
                        device.is_default = true;
                    }
                }
            }
        }

        devices
    }

    fn find_device_by_name(&self, name: &str) -> Option<Device> {
        if let Ok(devices) = self.host.output_devices() {
            for device in devices {
                if let Ok(device_name) = device.name() {
                    if device_name == name {
                        return Some(device);
                    }
                }
            }
        }
        None
    }

    fn find_device_by_predicate<F>(&self, pred: F) -> Option<Device>
    where
        F: Fn(&str) -> bool,
    {
        if let Ok(devices) = self.host.output_devices() {
            for device in devices {
                if let Ok(name) = device.name() {
                    if pred(&name) {
                        return Some(device);
                    }
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
}
