//! Server-side mixing engine
//!
//! Runs inside the playback device callback. Each call:
//!
//! 1. collects the buffers of every connected client,
//! 2. keeps only clients holding at least `ready_packets` network packets
//!    (one to play now, one standing, one in flight),
//! 3. drains exactly one output period from each of them (zero-padded on
//!    underrun),
//! 4. sums sample by sample, clamping to [-1.0, 1.0] after every addition.
//!
//! With nobody connected or nobody ready the output is silence. After the
//! first call at a given output length no memory is allocated.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::buffer::SharedRingBuffer;
use crate::audio::pcm::{decode_f32_le, SAMPLE_BYTES};
use crate::registry::ClientRegistry;

/// Mixer counters, readable from other threads
#[derive(Debug, Default)]
pub struct MixerStats {
    callbacks: AtomicU64,
    silent_callbacks: AtomicU64,
    last_sources: AtomicUsize,
}

impl MixerStats {
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    /// Callbacks that produced silence because nobody was ready
    pub fn silent_callbacks(&self) -> u64 {
        self.silent_callbacks.load(Ordering::Relaxed)
    }

    /// Clients mixed in the most recent callback
    pub fn last_sources(&self) -> usize {
        self.last_sources.load(Ordering::Relaxed)
    }
}

/// Mixes every ready client into the playback buffer
pub struct Mixer {
    registry: Arc<ClientRegistry>,
    /// Bytes a client must hold before it is mixed
    ready_threshold: usize,
    /// Reused across callbacks
    sources: Vec<SharedRingBuffer>,
    scratch: Vec<u8>,
    stats: Arc<MixerStats>,
}

impl Mixer {
    pub fn new(registry: Arc<ClientRegistry>, packet_size: usize, ready_packets: usize) -> Self {
        let sources = Vec::with_capacity(registry.max_connections());
        Self {
            registry,
            ready_threshold: packet_size * ready_packets,
            sources,
            scratch: Vec::new(),
            stats: Arc::new(MixerStats::default()),
        }
    }

    pub fn ready_threshold(&self) -> usize {
        self.ready_threshold
    }

    pub fn stats(&self) -> Arc<MixerStats> {
        self.stats.clone()
    }

    /// Fill one playback period. Returns how many clients were mixed.
    pub fn fill(&mut self, output: &mut [f32]) -> usize {
        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);

        self.registry.connected_buffers_into(&mut self.sources);
        let threshold = self.ready_threshold;
        self.sources.retain(|buffer| buffer.len() >= threshold);

        output.fill(0.0);
        self.stats
            .last_sources
            .store(self.sources.len(), Ordering::Relaxed);
        if self.sources.is_empty() {
            self.stats.silent_callbacks.fetch_add(1, Ordering::Relaxed);
            return 0;
        }

        let byte_len = output.len() * SAMPLE_BYTES;
        if self.scratch.len() < byte_len {
            self.scratch.resize(byte_len, 0);
        }
        let scratch = &mut self.scratch[..byte_len];

        for buffer in &self.sources {
            buffer.read_into(scratch);
            mix_into(output, scratch);
        }

        let mixed = self.sources.len();
        // Drop our references until the next callback
        self.sources.clear();
        mixed
    }
}

/// Add the little-endian f32 samples in `source` onto `output`, clamping the
/// running sum after every addition.
///
/// Non-finite samples count as silence; `clamp` would pass a NaN through.
pub fn mix_into(output: &mut [f32], source: &[u8]) {
    for (out, sample) in output.iter_mut().zip(decode_f32_le(source)) {
        let sample = if sample.is_finite() { sample } else { 0.0 };
        *out = (*out + sample).clamp(-1.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::encode_f32_le;
    use crate::protocol::SessionToken;
    use crate::registry::{Capabilities, Client};
    use std::net::SocketAddr;
    use std::time::Duration;

    const PACKET: usize = 1400;

    fn registry() -> Arc<ClientRegistry> {
        Arc::new(ClientRegistry::with_limits(
            8,
            Duration::from_secs(30),
            48000,
            8,
        ))
    }

    fn add_client(registry: &ClientRegistry, port: u16) -> Client {
        registry
            .add_client(
                "client",
                SocketAddr::from(([127, 0, 0, 1], port)),
                Capabilities::RECORD,
                SessionToken::generate(),
            )
            .unwrap()
    }

    fn fill_constant(client: &Client, value: f32, samples: usize) {
        let mut bytes = Vec::new();
        encode_f32_le(&vec![value; samples], &mut bytes);
        client.buffer.push(&bytes);
    }

    #[test]
    fn test_silence_without_clients() {
        let mut mixer = Mixer::new(registry(), PACKET, 3);
        let mut output = vec![0.3f32; 480];

        assert_eq!(mixer.fill(&mut output), 0);
        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(mixer.stats().silent_callbacks(), 1);
    }

    #[test]
    fn test_two_clients_clamp_to_unity() {
        let registry = registry();
        let a = add_client(&registry, 4000);
        let b = add_client(&registry, 4001);
        fill_constant(&a, 0.6, 1200);
        fill_constant(&b, 0.6, 1200);

        let mut mixer = Mixer::new(registry, PACKET, 3);
        let mut output = vec![0.0f32; 480];
        assert_eq!(mixer.fill(&mut output), 2);
        assert!(output.iter().all(|&s| s == 1.0));

        // Exactly one period drained from each
        assert_eq!(a.buffer.len(), (1200 - 480) * 4);
        assert_eq!(b.buffer.len(), (1200 - 480) * 4);
    }

    #[test]
    fn test_clamp_applies_to_running_sum() {
        let registry = registry();
        let values = [0.8, 0.8, -0.8];
        for (i, value) in values.iter().enumerate() {
            let client = add_client(&registry, 4000 + i as u16);
            fill_constant(&client, *value, 1200);
        }

        let mut mixer = Mixer::new(registry, PACKET, 3);
        let mut output = vec![0.0f32; 4];
        mixer.fill(&mut output);

        // Order of clients is arbitrary; either way each step is clamped
        for sample in output {
            assert!((-1.0..=1.0).contains(&sample));
            assert!(sample < 0.81);
        }
    }

    #[test]
    fn test_unready_client_is_not_mixed() {
        let registry = registry();
        let client = add_client(&registry, 4000);
        fill_constant(&client, 0.5, PACKET / 4);

        let mut mixer = Mixer::new(registry, PACKET, 3);
        let mut output = vec![0.1f32; 480];
        assert_eq!(mixer.fill(&mut output), 0);
        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(client.buffer.len(), PACKET);
    }

    #[test]
    fn test_ready_client_underrun_zero_pads() {
        let registry = registry();
        let client = add_client(&registry, 4000);
        // 3 packets worth, but less than one period
        fill_constant(&client, 0.25, 3 * PACKET / 4);

        let mut mixer = Mixer::new(registry, PACKET, 3);
        let mut output = vec![0.0f32; 3 * PACKET / 4 + 100];
        assert_eq!(mixer.fill(&mut output), 1);
        assert!(output[..3 * PACKET / 4].iter().all(|&s| s == 0.25));
        assert!(output[3 * PACKET / 4..].iter().all(|&s| s == 0.0));
        assert!(client.buffer.is_empty());
    }

    #[test]
    fn test_disconnected_client_is_not_mixed() {
        let registry = registry();
        let mut client = add_client(&registry, 4000);
        fill_constant(&client, 0.5, 2000);
        client.status = crate::registry::ClientStatus::Disconnected;
        registry.set_client(client).unwrap();

        let mut mixer = Mixer::new(registry, PACKET, 3);
        let mut output = vec![0.0f32; 480];
        assert_eq!(mixer.fill(&mut output), 0);
    }

    #[test]
    fn test_mix_into_clamps_each_step() {
        let mut bytes = Vec::new();
        let mut output = vec![0.9f32, -0.9];
        encode_f32_le(&[0.5, -0.5], &mut bytes);
        mix_into(&mut output, &bytes);
        assert_eq!(output, vec![1.0, -1.0]);

        encode_f32_le(&[-0.5, 0.5], &mut bytes);
        mix_into(&mut output, &bytes);
        assert_eq!(output, vec![0.5, -0.5]);
    }

    #[test]
    fn test_mix_into_treats_non_finite_as_silence() {
        let mut bytes = Vec::new();
        let mut output = vec![0.5f32, 0.5, -0.5];
        encode_f32_le(&[f32::NAN, f32::INFINITY, f32::NEG_INFINITY], &mut bytes);
        mix_into(&mut output, &bytes);
        assert_eq!(output, vec![0.5, 0.5, -0.5]);

        encode_f32_le(&[0.25, 0.25, 0.25], &mut bytes);
        mix_into(&mut output, &bytes);
        assert_eq!(output, vec![0.75, 0.75, -0.25]);
        assert!(output.iter().all(|s| s.is_finite() && (-1.0..=1.0).contains(s)));
    }
}
