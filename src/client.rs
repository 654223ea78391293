//! Capture client
//!
//! Finds a server, identifies, then streams every captured buffer to it.

use std::sync::Arc;

use crate::audio::capture::AudioCapture;
use crate::config::AppConfig;
use crate::error::Result;
use crate::network::{discover_server, AudioSender, SenderStats, ServerSession};

pub struct MediaClient {
    config: AppConfig,
    session: Option<ServerSession>,
    capture: Option<AudioCapture>,
    sender_stats: Option<Arc<SenderStats>>,
}

impl MediaClient {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            session: None,
            capture: None,
            sender_stats: None,
        }
    }

    /// Run discovery and identification, once
    pub fn connect(&mut self) -> Result<&ServerSession> {
        let session = match self.session.take() {
            Some(session) => session,
            None => discover_server(
                &self.config.network,
                &self.config.client.name,
                &self.config.client.capabilities,
            )?,
        };
        Ok(&*self.session.insert(session))
    }

    /// Create the sender for the current session, connecting first if needed
    pub fn sender(&mut self) -> Result<AudioSender> {
        let packet_size = self.config.network.packet_size;
        let frame_bytes = self.config.audio.frame_bytes();
        let session = self.connect()?;

        let sender = AudioSender::connect(session, packet_size, frame_bytes)?;
        self.sender_stats = Some(sender.stats());
        Ok(sender)
    }

    /// Connect and start streaming from the input device
    pub fn start(&mut self) -> Result<()> {
        if self.capture.is_some() {
            return Ok(());
        }

        let mut sender = self.sender()?;
        let mut capture = AudioCapture::new(
            self.config.audio.input_device.clone(),
            &self.config.audio,
            move |samples: &[f32]| {
                sender.send_samples(samples);
            },
        );
        capture.start()?;
        self.capture = Some(capture);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
            tracing::info!("Capture stopped");
        }
    }

    pub fn session(&self) -> Option<&ServerSession> {
        self.session.as_ref()
    }

    pub fn sender_stats(&self) -> Option<Arc<SenderStats>> {
        self.sender_stats.clone()
    }

    pub fn samples_captured(&self) -> u64 {
        self.capture
            .as_ref()
            .map(AudioCapture::samples_captured)
            .unwrap_or(0)
    }

    /// Log and clear any capture stream error
    pub fn check_errors(&self) {
        if let Some(e) = self.capture.as_ref().and_then(AudioCapture::check_errors) {
            tracing::error!("Capture error: {}", e);
        }
    }
}

impl Drop for MediaClient {
    fn drop(&mut self) {
        self.stop();
    }
}
