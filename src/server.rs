//! Mixing server
//!
//! Owns the client registry and wires the services around it:
//!
//! - `AudioReceiver` credits incoming audio to each client's buffer
//! - `DiscoveryService` answers probes and registers clients
//! - `RegistryCleaner` times out silent clients
//! - `AudioPlayback` drives the `Mixer` from the output device
//!
//! All background threads share one cancellation flag and are joined on
//! [`MediaServer::stop`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::mixer::{Mixer, MixerStats};
use crate::audio::playback::AudioPlayback;
use crate::config::AppConfig;
use crate::error::Result;
use crate::network::{AudioReceiver, DiscoveryService, DiscoveryStats, ReceiverStats};
use crate::registry::{ClientRegistry, RegistryCleaner};

pub struct MediaServer {
    config: AppConfig,
    registry: Arc<ClientRegistry>,
    running: Arc<AtomicBool>,
    receiver: AudioReceiver,
    discovery: DiscoveryService,
    cleaner: RegistryCleaner,
    playback: Option<AudioPlayback>,
}

impl MediaServer {
    /// Bind the audio and discovery sockets.
    ///
    /// The audio socket is bound first so discovery advertises the port
    /// actually in use, which matters when the configured port is 0.
    pub fn bind(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(ClientRegistry::new(&config.registry, &config.audio));
        let running = Arc::new(AtomicBool::new(false));

        let receiver = AudioReceiver::bind(&config.network, registry.clone(), running.clone())?;
        let audio_port = receiver.local_addr().port();
        let discovery =
            DiscoveryService::bind(&config.network, registry.clone(), audio_port, running.clone())?;
        let cleaner = RegistryCleaner::new(
            registry.clone(),
            config.registry.cleanup_interval(),
            config.registry.status_log_interval,
            running.clone(),
        );

        Ok(Self {
            config,
            registry,
            running,
            receiver,
            discovery,
            cleaner,
            playback: None,
        })
    }

    /// Start the network services and the playback device
    pub fn start(&mut self) -> Result<()> {
        self.start_network()?;
        if let Err(e) = self.start_playback() {
            self.stop();
            return Err(e);
        }
        Ok(())
    }

    /// Start ingest, discovery and the cleaner without touching audio hardware
    pub fn start_network(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        self.cleaner.start()?;
        self.receiver.start()?;
        self.discovery.start()?;

        tracing::info!(
            "Media server up: audio on {}, discovery on {}",
            self.audio_addr(),
            self.discovery_addr()
        );
        Ok(())
    }

    pub fn start_playback(&mut self) -> Result<()> {
        if self.playback.is_some() {
            return Ok(());
        }

        let mixer = Mixer::new(
            self.registry.clone(),
            self.config.network.packet_size,
            self.config.audio.ready_packets,
        );
        tracing::info!(
            "Mixing clients once {} bytes are buffered",
            mixer.ready_threshold()
        );

        let mut playback =
            AudioPlayback::new(self.config.audio.output_device.clone(), &self.config.audio, mixer);
        playback.start()?;
        self.playback = Some(playback);
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) && self.playback.is_none() {
            return;
        }

        self.discovery.stop();
        self.receiver.stop();
        self.cleaner.stop();
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
        tracing::info!("Media server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    pub fn audio_addr(&self) -> SocketAddr {
        self.receiver.local_addr()
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        self.discovery.local_addr()
    }

    pub fn receiver_stats(&self) -> Arc<ReceiverStats> {
        self.receiver.stats()
    }

    pub fn discovery_stats(&self) -> Arc<DiscoveryStats> {
        self.discovery.stats()
    }

    /// `None` until playback has started
    pub fn mixer_stats(&self) -> Option<Arc<MixerStats>> {
        self.playback.as_ref().map(AudioPlayback::stats)
    }

    /// Log and clear any playback stream error
    pub fn check_errors(&self) {
        if let Some(e) = self.playback.as_ref().and_then(AudioPlayback::check_errors) {
            tracing::error!("Playback error: {}", e);
        }
    }
}

impl Drop for MediaServer {
    fn drop(&mut self) {
        self.stop();
    }
}
