//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};

use crate::config::AudioConfig;
use crate::error::AudioError;

/// Device direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

/// Device description for listings
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub kind: DeviceKind,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, kind: DeviceKind) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            kind,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }
}

/// Stream parameters for capture and playback: interleaved f32 at the
/// configured rate, channel count and callback period
pub fn stream_config(audio: &AudioConfig) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: audio.channels,
        sample_rate: cpal::SampleRate(audio.sample_rate),
        buffer_size: match audio.period_frames() {
            0 => cpal::BufferSize::Default,
            frames => cpal::BufferSize::Fixed(frames),
        },
    }
}

/// Case-insensitive substring match of a device name
pub fn name_matches(device_name: &str, snippet: &str) -> bool {
    device_name
        .trim_end_matches('\0')
        .to_lowercase()
        .contains(&snippet.to_lowercase())
}

/// Find a device of the given kind.
///
/// With no snippet (or an empty one) the host default is returned; otherwise
/// the first device whose name contains the snippet, ignoring case.
pub fn find_device(kind: DeviceKind, snippet: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let snippet = match snippet.filter(|s| !s.is_empty()) {
        Some(snippet) => snippet,
        None => {
            let device = match kind {
                DeviceKind::Input => host.default_input_device(),
                DeviceKind::Output => host.default_output_device(),
            };
            return device
                .map(|d| AudioDevice::from_cpal(d, kind))
                .ok_or_else(|| AudioError::DeviceNotFound(format!("No default {:?} device", kind)));
        }
    };

    let devices = match kind {
        DeviceKind::Input => host.input_devices(),
        DeviceKind::Output => host.output_devices(),
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if let Ok(name) = device.name() {
            if name_matches(&name, snippet) {
                tracing::debug!("Device {:?} matched {:?}", name, snippet);
                return Ok(AudioDevice::from_cpal(device, kind));
            }
        }
    }

    Err(AudioError::DeviceNotFound(snippet.to_string()))
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = device_capabilities(&device, DeviceKind::Input);
                devices.push(AudioDeviceInfo {
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);

                // Duplex devices show up once
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                    continue;
                }

                let (sample_rates, channels) = device_capabilities(&device, DeviceKind::Output);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

fn device_capabilities(device: &cpal::Device, kind: DeviceKind) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = match kind {
        DeviceKind::Input => device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default(),
        DeviceKind::Output => device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default(),
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate in [44100u32, 48000, 88200, 96000] {
            let sample_rate = cpal::SampleRate(rate);
            if sample_rate >= config.min_sample_rate()
                && sample_rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate)
            {
                sample_rates.push(rate);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Print the device list to stdout
pub fn print_devices(kind: Option<DeviceKind>) {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let wanted = match kind {
            Some(DeviceKind::Input) => device.is_input,
            Some(DeviceKind::Output) => device.is_output,
            None => true,
        };
        if !wanted {
            continue;
        }

        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_matches_ignores_case() {
        assert!(name_matches("USB Audio CODEC", "usb audio"));
        assert!(name_matches("Built-in Microphone\0\0", "microphone"));
        assert!(!name_matches("HDMI Output", "usb"));
    }

    #[test]
    fn test_stream_config_from_audio_config() {
        let config = stream_config(&AudioConfig::default());
        assert_eq!(config.channels, 2);
        assert_eq!(config.sample_rate, cpal::SampleRate(48000));
        assert_eq!(config.buffer_size, cpal::BufferSize::Fixed(480));
    }

    #[test]
    fn test_list_devices_does_not_panic() {
        // May be empty on machines without audio hardware
        let devices = list_devices();
        for device in devices {
            assert!(device.is_input || device.is_output);
        }
    }
}
