//! Capacity-bounded client registry and its background cleaner
//!
//! Clients are keyed by session token; the display name is metadata only, so
//! a client that re-handshakes under the same name gets a second entry and
//! the stale one ages out through the cleaner.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::SharedRingBuffer;
use crate::config::{AudioConfig, RegistryConfig};
use crate::error::RegistryError;
use crate::protocol::SessionToken;
use crate::registry::client::{Capabilities, Client, ClientReport, ClientStatus};

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Connected -> Disconnected transitions
    pub disconnected: usize,
    /// Entries removed (forced passes only)
    pub removed: usize,
}

/// Concurrent map from session token to [`Client`]
pub struct ClientRegistry {
    clients: RwLock<HashMap<SessionToken, Client>>,
    max_connections: usize,
    connection_timeout: Duration,
    /// Ring buffer size for new clients, in bytes
    buffer_capacity: usize,
    /// Bytes per interleaved frame
    frame_len: usize,
}

impl ClientRegistry {
    pub fn new(registry: &RegistryConfig, audio: &AudioConfig) -> Self {
        Self::with_limits(
            registry.max_connections,
            registry.connection_timeout(),
            audio.client_buffer_bytes,
            audio.frame_bytes(),
        )
    }

    pub fn with_limits(
        max_connections: usize,
        connection_timeout: Duration,
        buffer_capacity: usize,
        frame_len: usize,
    ) -> Self {
        Self {
            clients: RwLock::new(HashMap::with_capacity(max_connections)),
            max_connections,
            connection_timeout,
            buffer_capacity,
            frame_len,
        }
    }

    /// Register a brand-new client.
    ///
    /// Never merges with an existing entry. When full, a forced cleanup runs
    /// and the insert is retried once.
    pub fn add_client(
        &self,
        name: &str,
        addr: SocketAddr,
        capabilities: Capabilities,
        session_token: SessionToken,
    ) -> Result<Client, RegistryError> {
        if self.clients.read().contains_key(&session_token) {
            return Err(RegistryError::DuplicateToken);
        }

        let client = Client::new(
            name,
            addr,
            capabilities,
            session_token,
            self.buffer_capacity,
            self.frame_len,
        );

        match self.set_client(client.clone()) {
            Err(RegistryError::MaxConnections(_)) => {
                let stats = self.clean_connections(true);
                tracing::info!(
                    "Registry full, forced cleanup removed {} clients",
                    stats.removed
                );
                self.set_client(client.clone())?;
            }
            other => other?,
        }

        tracing::info!(
            "Registered client {} ({}) with session {}",
            client.name,
            client.addr,
            client.session_token
        );
        Ok(client)
    }

    /// Upsert a full snapshot, last writer wins.
    ///
    /// Only inserting a new key can fail, and only on capacity. A stored
    /// entry that is already Disconnected stays Disconnected.
    pub fn set_client(&self, mut client: Client) -> Result<(), RegistryError> {
        let mut clients = self.clients.write();
        match clients.get(&client.session_token) {
            Some(stored) if !stored.is_connected() => {
                client.status = stored.status;
                client.disconnected_at = stored.disconnected_at;
            }
            Some(_) => {}
            None if clients.len() >= self.max_connections => {
                return Err(RegistryError::MaxConnections(self.max_connections));
            }
            None => {}
        }
        clients.insert(client.session_token.clone(), client);
        Ok(())
    }

    pub fn get_client_by_session_token(&self, session_token: &str) -> Option<Client> {
        self.clients.read().get(session_token).cloned()
    }

    /// Prefers a connected entry, then the newest handshake
    pub fn get_client_by_addr(&self, addr: &SocketAddr) -> Option<Client> {
        self.clients
            .read()
            .values()
            .filter(|client| client.addr == *addr)
            .max_by_key(|client| (client.is_connected(), client.connected_at))
            .cloned()
    }

    /// Inbound buffer of a session that is still connected
    pub fn connected_buffer(&self, session_token: &str) -> Option<SharedRingBuffer> {
        self.clients
            .read()
            .get(session_token)
            .filter(|client| client.is_connected())
            .map(|client| client.buffer.clone())
    }

    /// Refresh last-seen for a session. Returns false if it is not registered.
    pub fn touch(&self, session_token: &str) -> bool {
        self.touch_at(session_token, Instant::now())
    }

    pub fn touch_at(&self, session_token: &str, now: Instant) -> bool {
        match self.clients.write().get_mut(session_token) {
            Some(client) => {
                client.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn connected_clients(&self) -> Vec<Client> {
        self.clients
            .read()
            .values()
            .filter(|client| client.is_connected())
            .cloned()
            .collect()
    }

    /// Replace `out` with the buffers of every connected client.
    ///
    /// Used from the playback callback; reusing `out` avoids allocating there.
    pub fn connected_buffers_into(&self, out: &mut Vec<SharedRingBuffer>) {
        out.clear();
        out.extend(
            self.clients
                .read()
                .values()
                .filter(|client| client.is_connected())
                .map(|client| client.buffer.clone()),
        );
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    pub fn statuses(&self) -> Vec<ClientReport> {
        let now = Instant::now();
        let mut reports: Vec<ClientReport> =
            self.clients.read().values().map(|c| c.report(now)).collect();
        reports.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        reports
    }

    pub fn print_statuses(&self) {
        let reports = self.statuses();
        tracing::info!(
            "{} of {} client slots in use",
            reports.len(),
            self.max_connections
        );
        for report in reports {
            tracing::info!(
                "  {} [{}] {} - {} - idle {:.1}s - {} bytes buffered - capabilities {:?}",
                report.name,
                report.session_token,
                report.addr,
                report.status,
                report.idle.as_secs_f32(),
                report.buffered_bytes,
                report.capabilities
            );
        }
    }

    pub fn clean_connections(&self, force: bool) -> CleanupStats {
        self.clean_connections_at(Instant::now(), force)
    }

    /// Time out idle clients; a forced pass also removes every disconnected
    /// entry. This is the only path that frees capacity.
    pub fn clean_connections_at(&self, now: Instant, force: bool) -> CleanupStats {
        let mut stats = CleanupStats::default();
        let mut clients = self.clients.write();

        for client in clients.values_mut() {
            if client.is_connected() && client.idle_for(now) > self.connection_timeout {
                client.status = ClientStatus::Disconnected;
                client.disconnected_at = Some(now);
                stats.disconnected += 1;
                tracing::info!(
                    "Client {} ({}) timed out",
                    client.name,
                    client.session_token
                );
            }
        }

        if force {
            let before = clients.len();
            clients.retain(|_, client| client.is_connected());
            stats.removed = before - clients.len();
        }

        stats
    }
}

/// Background thread running [`ClientRegistry::clean_connections`] once per tick
pub struct RegistryCleaner {
    registry: Arc<ClientRegistry>,
    interval: Duration,
    /// Log client statuses every this many ticks; 0 disables
    status_log_interval: u32,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl RegistryCleaner {
    pub fn new(
        registry: Arc<ClientRegistry>,
        interval: Duration,
        status_log_interval: u32,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            interval,
            status_log_interval,
            running,
            thread_handle: None,
        }
    }

    pub fn start(&mut self) -> std::io::Result<()> {
        if self.thread_handle.is_some() {
            return Ok(());
        }

        let registry = self.registry.clone();
        let running = self.running.clone();
        let interval = self.interval;
        let status_log_interval = self.status_log_interval;
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("registry-cleaner".to_string())
            .spawn(move || {
                let mut ticks = 0u32;
                while sleep_while_running(&running, interval) {
                    registry.clean_connections(false);

                    ticks += 1;
                    if status_log_interval > 0 && ticks >= status_log_interval {
                        registry.print_statuses();
                        ticks = 0;
                    }
                }
                tracing::debug!("Registry cleaner stopped");
            })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some() && self.running.load(Ordering::SeqCst)
    }
}

impl Drop for RegistryCleaner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep for `duration` in short steps; returns false as soon as `running` clears
fn sleep_while_running(running: &AtomicBool, duration: Duration) -> bool {
    const STEP: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + duration;

    loop {
        if !running.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(STEP.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn registry(max: usize) -> ClientRegistry {
        ClientRegistry::with_limits(max, Duration::from_secs(30), 64, 8)
    }

    fn add(registry: &ClientRegistry, name: &str, port: u16) -> Result<Client, RegistryError> {
        registry.add_client(name, addr(port), Capabilities::RECORD, SessionToken::generate())
    }

    #[test]
    fn test_add_and_lookup() {
        let registry = registry(4);
        let client = add(&registry, "studio-1", 4000).unwrap();

        let by_token = registry
            .get_client_by_session_token(client.session_token.as_str())
            .unwrap();
        assert_eq!(by_token.name, "studio-1");

        let by_addr = registry.get_client_by_addr(&addr(4000)).unwrap();
        assert_eq!(by_addr.session_token, client.session_token);

        assert!(registry.get_client_by_addr(&addr(4001)).is_none());
        assert!(registry.get_client_by_session_token("missing").is_none());
    }

    #[test]
    fn test_same_name_coexists() {
        let registry = registry(4);
        let first = add(&registry, "studio-1", 4000).unwrap();
        let second = add(&registry, "studio-1", 4001).unwrap();

        assert_ne!(first.session_token, second.session_token);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let registry = registry(4);
        let token = SessionToken::generate();
        registry
            .add_client("a", addr(1), Capabilities::NONE, token.clone())
            .unwrap();
        assert_eq!(
            registry
                .add_client("b", addr(2), Capabilities::NONE, token)
                .unwrap_err(),
            RegistryError::DuplicateToken
        );
    }

    #[test]
    fn test_capacity_limit() {
        let registry = registry(3);
        for i in 0..3 {
            add(&registry, &format!("client-{}", i), 4000 + i).unwrap();
        }

        assert_eq!(
            add(&registry, "overflow", 5000).unwrap_err(),
            RegistryError::MaxConnections(3)
        );
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_forced_cleanup_frees_capacity() {
        let registry = registry(3);
        let mut clients: Vec<Client> = (0..3)
            .map(|i| add(&registry, &format!("client-{}", i), 4000 + i).unwrap())
            .collect();

        // All but one go quiet
        for client in clients.iter_mut().skip(1) {
            client.status = ClientStatus::Disconnected;
            client.disconnected_at = Some(Instant::now());
            registry.set_client(client.clone()).unwrap();
        }

        let newcomer = add(&registry, "newcomer", 5000).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry
            .get_client_by_session_token(clients[0].session_token.as_str())
            .is_some());
        assert!(registry
            .get_client_by_session_token(newcomer.session_token.as_str())
            .is_some());
        for client in clients.iter().skip(1) {
            assert!(registry
                .get_client_by_session_token(client.session_token.as_str())
                .is_none());
        }
    }

    #[test]
    fn test_cleaner_times_out_idle_clients() {
        let registry = registry(4);
        let client = add(&registry, "quiet", 4000).unwrap();

        let later = Instant::now() + Duration::from_secs(31);
        let stats = registry.clean_connections_at(later, false);
        assert_eq!(stats, CleanupStats { disconnected: 1, removed: 0 });

        let client = registry
            .get_client_by_session_token(client.session_token.as_str())
            .unwrap();
        assert_eq!(client.status, ClientStatus::Disconnected);
        assert_eq!(client.disconnected_at, Some(later));
        assert!(registry.connected_clients().is_empty());

        let stats = registry.clean_connections_at(later, true);
        assert_eq!(stats, CleanupStats { disconnected: 0, removed: 1 });
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_snapshot_does_not_reconnect() {
        let registry = registry(4);
        let snapshot = add(&registry, "studio-1", 4000).unwrap();

        let later = Instant::now() + Duration::from_secs(31);
        registry.clean_connections_at(later, false);
        registry.set_client(snapshot.clone()).unwrap();

        let stored = registry
            .get_client_by_session_token(snapshot.session_token.as_str())
            .unwrap();
        assert_eq!(stored.status, ClientStatus::Disconnected);
        assert_eq!(stored.disconnected_at, Some(later));
        assert!(registry.connected_clients().is_empty());
    }

    #[test]
    fn test_touch_keeps_client_alive() {
        let registry = registry(4);
        let client = add(&registry, "chatty", 4000).unwrap();

        let later = Instant::now() + Duration::from_secs(20);
        assert!(registry.touch_at(client.session_token.as_str(), later));
        assert!(!registry.touch_at("missing", later));

        let stats = registry.clean_connections_at(later + Duration::from_secs(20), false);
        assert_eq!(stats.disconnected, 0);
        assert_eq!(registry.connected_clients().len(), 1);
    }

    #[test]
    fn test_connected_buffers_share_storage() {
        let registry = registry(4);
        let client = add(&registry, "a", 4000).unwrap();

        let mut buffers = Vec::new();
        registry.connected_buffers_into(&mut buffers);
        assert_eq!(buffers.len(), 1);

        client.buffer.push(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buffers[0].len(), 8);
    }

    #[test]
    fn test_connected_buffer_skips_disconnected() {
        let registry = registry(4);
        let mut client = add(&registry, "a", 4000).unwrap();
        let token = client.session_token.clone();
        assert!(registry.connected_buffer(token.as_str()).is_some());

        client.status = ClientStatus::Disconnected;
        registry.set_client(client).unwrap();
        assert!(registry.connected_buffer(token.as_str()).is_none());
        assert!(registry.connected_buffer("missing").is_none());
    }

    #[test]
    fn test_background_cleaner_marks_disconnected() {
        let registry = Arc::new(ClientRegistry::with_limits(
            4,
            Duration::from_millis(50),
            64,
            8,
        ));
        let client = add(&registry, "quiet", 4000).unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let mut cleaner =
            RegistryCleaner::new(registry.clone(), Duration::from_millis(20), 0, running);
        cleaner.start().unwrap();
        thread::sleep(Duration::from_millis(300));
        cleaner.stop();

        let client = registry
            .get_client_by_session_token(client.session_token.as_str())
            .unwrap();
        assert_eq!(client.status, ClientStatus::Disconnected);
        assert!(client.disconnected_at.is_some());
    }
}
