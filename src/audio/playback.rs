//! Mixed output to a playback device

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{find_device, stream_config, DeviceKind};
use crate::audio::mixer::{Mixer, MixerStats};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Plays the mixer's output on an output device
pub struct AudioPlayback {
    device: Option<String>,
    running: Arc<AtomicBool>,
    /// Moved into the device callback on start
    mixer: Option<Mixer>,
    stats: Arc<MixerStats>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    config: StreamConfig,
}

impl AudioPlayback {
    pub fn new(device: Option<String>, audio: &AudioConfig, mixer: Mixer) -> Self {
        Self {
            device,
            running: Arc::new(AtomicBool::new(false)),
            stats: mixer.stats(),
            mixer: Some(mixer),
            thread_handle: None,
            error_rx: None,
            config: stream_config(audio),
        }
    }

    /// Open the device and start pulling from the mixer.
    ///
    /// Blocks until the stream is playing or has failed to open.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut mixer = self
            .mixer
            .take()
            .ok_or_else(|| AudioError::StreamError("Playback cannot be restarted".to_string()))?;

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<String, AudioError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let config = self.config.clone();
        let device = self.device.clone();

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("playback-device".to_string())
            .spawn(move || {
                let device = match find_device(DeviceKind::Output, device.as_deref()) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let name = device.name.clone();

                let stream = device.into_inner().build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        mixer.fill(data);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(name));

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("Playback thread exited".to_string())));
        match ready {
            Ok(name) => {
                tracing::info!(
                    "Playing to {} ({} Hz, {} channels)",
                    name,
                    self.config.sample_rate.0,
                    self.config.channels
                );
                Ok(())
            }
            Err(e) => {
                self.stop();
                Err(e)
            }
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Arc<MixerStats> {
        self.stats.clone()
    }

    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
