//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod mixer;
pub mod pcm;
pub mod playback;

pub use buffer::{create_shared_buffer, RingBuffer, SharedRingBuffer};
pub use capture::AudioCapture;
pub use device::{find_device, list_devices, AudioDevice, AudioDeviceInfo, DeviceKind};
pub use mixer::{Mixer, MixerStats};
pub use playback::AudioPlayback;
