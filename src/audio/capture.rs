//! Audio capture from an input device
//!
//! The cpal stream lives on its own thread for its whole life. Every device
//! callback hands the captured interleaved samples straight to a sink closure.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{find_device, stream_config, DeviceKind};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Receives each captured period
pub type CaptureSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Audio capture for a single input device
pub struct AudioCapture {
    /// Name snippet, default device when `None`
    device: Option<String>,

    running: Arc<AtomicBool>,

    /// Taken by the capture thread on start
    sink: Option<CaptureSink>,

    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Option<Receiver<AudioError>>,

    /// Total samples captured
    samples_captured: Arc<AtomicU64>,

    config: StreamConfig,
}

impl AudioCapture {
    pub fn new<F>(device: Option<String>, audio: &AudioConfig, sink: F) -> Self
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        Self {
            device,
            running: Arc::new(AtomicBool::new(false)),
            sink: Some(Box::new(sink)),
            thread_handle: None,
            error_rx: None,
            samples_captured: Arc::new(AtomicU64::new(0)),
            config: stream_config(audio),
        }
    }

    /// Open the device and start capturing.
    ///
    /// Blocks until the stream is playing or has failed to open.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| AudioError::StreamError("Capture cannot be restarted".to_string()))?;

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<String, AudioError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let samples_captured = self.samples_captured.clone();
        let config = self.config.clone();
        let device = self.device.clone();

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("capture-device".to_string())
            .spawn(move || {
                let device = match find_device(DeviceKind::Input, device.as_deref()) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let name = device.name.clone();

                let callback_running = running.clone();
                let stream = device.into_inner().build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !callback_running.load(Ordering::Relaxed) {
                            return;
                        }
                        samples_captured.fetch_add(data.len() as u64, Ordering::Relaxed);
                        sink(data);
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
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("Capture thread exited".to_string())));
        match ready {
            Ok(name) => {
                tracing::info!(
                    "Capturing from {} ({} Hz, {} channels)",
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

    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
