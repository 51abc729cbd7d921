//! # Connection Supervisor Module
//!
//! Owns the connection lifecycle: scan → connect → stream → backoff → scan.
//! This is the only component that talks to the transport.
//!
//! ## Key Components
//! - `ConnectionState`: the single state value, changed only by `transition`
//! - `BackoffPolicy`: retry delays and the liveness poll cadence
//! - `ConnectionSupervisor`: the supervisory loop
//! - `SupervisorHandle`: stop flag shared with the UI thread
//!
//! ## Behaviour
//! The loop never gives up: an empty scan, a failed connect and a dropped
//! link all lead to `Backoff` and then a fresh scan. Within one failure streak
//! the backoff delay never shrinks, and it is never zero. The only way out is
//! an explicit stop request.
//!
//! While streaming, every notification is handed to the session before the
//! next one is awaited, and liveness is polled at a fixed cadence because not
//! every transport reports disconnects on its own.

use crate::config::Config;
use crate::session::{lock_session, save_shared, SharedSession};
use crate::transport::Transport;
use crossbeam_channel::Sender;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

/// Why the supervisor is waiting before the next scan
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffReason {
    DeviceNotFound,
    ScanFailed(String),
    ConnectFailed(String),
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting(String),
    Streaming(String),
    Backoff(BackoffReason, Instant),
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Scanning => "Scanning",
            ConnectionState::Connecting(_) => "Connecting",
            ConnectionState::Streaming(_) => "Streaming",
            ConnectionState::Backoff(..) => "Backoff",
        }
    }

    /// Human-readable status line for the display
    pub fn status_message(&self) -> String {
        match self {
            ConnectionState::Idle => "Stopped".to_string(),
            ConnectionState::Scanning => "Scanning...".to_string(),
            ConnectionState::Connecting(address) => format!("Connecting to {}...", address),
            ConnectionState::Streaming(_) => "Connected".to_string(),
            ConnectionState::Backoff(reason, _) => match reason {
                BackoffReason::DeviceNotFound => "Device not found, retrying...".to_string(),
                BackoffReason::ScanFailed(e) => format!("Scan failed ({}), retrying...", e),
                BackoffReason::ConnectFailed(e) => format!("Connection failed ({}), retrying...", e),
                BackoffReason::Disconnected => "Disconnected, retrying...".to_string(),
            },
        }
    }
}

/// Updates pushed to the rendering sink
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    State(ConnectionState),
    Status(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub scan_retry: Duration,
    pub connect_retry: Duration,
    pub liveness_poll: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scan_retry: config.scan_retry_delay(),
            connect_retry: config.connect_retry_delay(),
            liveness_poll: config.liveness_poll(),
        }
    }

    fn base_delay(&self, reason: &BackoffReason) -> Duration {
        match reason {
            BackoffReason::DeviceNotFound | BackoffReason::ScanFailed(_) => self.scan_retry,
            BackoffReason::ConnectFailed(_) | BackoffReason::Disconnected => self.connect_retry,
        }
    }
}

/// Cloneable stop control for a running supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    stop: Arc<AtomicBool>,
}

impl SupervisorHandle {
    pub fn stop(&self) {
        log::info!("Supervisor: stop requested");
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

enum StreamEnd {
    Disconnected,
    Stopped,
}

pub struct ConnectionSupervisor<T: Transport> {
    transport: T,
    session: SharedSession,
    updates: Sender<SessionUpdate>,
    policy: BackoffPolicy,
    characteristics: Vec<Uuid>,
    state: ConnectionState,
    /// Delay of the previous backoff in the current failure streak
    last_delay: Duration,
    stop: Arc<AtomicBool>,
    export_on_stop: bool,
}

impl<T: Transport> ConnectionSupervisor<T> {
    pub fn new(
        transport: T,
        session: SharedSession,
        updates: Sender<SessionUpdate>,
        config: &Config,
    ) -> (Self, SupervisorHandle) {
        let stop = Arc::new(AtomicBool::new(false));
        let supervisor = Self {
            transport,
            session,
            updates,
            policy: BackoffPolicy::from_config(config),
            characteristics: config.frame_layout.characteristics(),
            state: ConnectionState::Idle,
            last_delay: Duration::ZERO,
            stop: stop.clone(),
            export_on_stop: config.export_on_stop,
        };
        (supervisor, SupervisorHandle { stop })
    }

    #[allow(dead_code)]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// The only place `state` changes. Logs and publishes every transition.
    fn transition(&mut self, next: ConnectionState) {
        log::info!("Supervisor: {} -> {}", self.state.label(), next.label());
        let status = next.status_message();
        self.state = next;

        lock_session(&self.session).set_status(status.clone());
        let _ = self.updates.send(SessionUpdate::State(self.state.clone()));
        let _ = self.updates.send(SessionUpdate::Status(status));
    }

    fn enter_backoff(&mut self, reason: BackoffReason) {
        let delay = self.policy.base_delay(&reason).max(self.last_delay);
        self.last_delay = delay;
        log::debug!("Supervisor: backing off for {:?}", delay);
        self.transition(ConnectionState::Backoff(reason, Instant::now() + delay));
    }

    /// Runs until a stop is requested through the `SupervisorHandle`.
    pub async fn run(&mut self, name_filter: &str) {
        log::info!("Supervisor: looking for devices matching '{}'", name_filter);

        while !self.stop_requested() {
            match self.state.clone() {
                ConnectionState::Idle | ConnectionState::Streaming(_) => {
                    self.transition(ConnectionState::Scanning);
                }
                ConnectionState::Scanning => self.scan(name_filter).await,
                ConnectionState::Connecting(address) => self.connect_and_stream(&address).await,
                ConnectionState::Backoff(_, until) => {
                    if self.sleep_until(until).await {
                        self.transition(ConnectionState::Scanning);
                    }
                }
            }
        }

        self.transition(ConnectionState::Idle);

        if self.export_on_stop {
            let has_samples = !lock_session(&self.session).log().is_empty();
            if has_samples {
                // Errors already land in the session status.
                let _ = save_shared(&self.session);
            } else {
                log::info!("Supervisor: nothing recorded, skipping export");
            }
        }
        log::info!("Supervisor: stopped");
    }

    async fn scan(&mut self, name_filter: &str) {
        match self.transport.discover(name_filter).await {
            Ok(Some(device)) => {
                log::info!("Supervisor: found {} ({})", device.name, device.address);
                self.transition(ConnectionState::Connecting(device.address));
            }
            Ok(None) => self.enter_backoff(BackoffReason::DeviceNotFound),
            Err(e) => {
                log::error!("{}", e);
                self.enter_backoff(BackoffReason::ScanFailed(e.to_string()));
            }
        }
    }

    async fn connect_and_stream(&mut self, address: &str) {
        let handle = match self.transport.connect(address).await {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("{}", e);
                self.enter_backoff(BackoffReason::ConnectFailed(e.to_string()));
                return;
            }
        };

        let mut frames = match self.transport.subscribe(&handle, &self.characteristics).await {
            Ok(frames) => frames,
            Err(e) => {
                log::error!("{}", e);
                self.transport.disconnect(&handle, &self.characteristics).await;
                self.enter_backoff(BackoffReason::ConnectFailed(e.to_string()));
                return;
            }
        };

        lock_session(&self.session).on_stream_start();
        self.last_delay = Duration::ZERO;
        self.transition(ConnectionState::Streaming(address.to_string()));

        let mut liveness = tokio::time::interval(self.policy.liveness_poll);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(raw) => {
                        lock_session(&self.session).ingest(&raw);
                    }
                    None => {
                        log::warn!("Supervisor: notification stream ended");
                        break StreamEnd::Disconnected;
                    }
                },
                _ = liveness.tick() => {
                    if self.stop_requested() {
                        break StreamEnd::Stopped;
                    }
                    if !self.transport.is_connected(&handle).await {
                        log::warn!("Supervisor: liveness check failed");
                        break StreamEnd::Disconnected;
                    }
                }
            }
        };

        drop(frames);
        self.transport.disconnect(&handle, &self.characteristics).await;

        match end {
            StreamEnd::Disconnected => self.enter_backoff(BackoffReason::Disconnected),
            // run() sees the flag and moves to Idle
            StreamEnd::Stopped => {}
        }
    }

    /// Sleeps until `until`, waking every liveness poll interval to honour a
    /// stop request. Returns false if stopped early.
    async fn sleep_until(&self, until: Instant) -> bool {
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= until {
                return true;
            }
            let step = (until - now).min(self.policy.liveness_poll);
            tokio::time::sleep(step).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_deriver::{RawFrame, UART_TX_CHARACTERISTIC_UUID};
    use crate::error::{ConnectError, ScanError};
    use crate::session::AcquisitionSession;
    use crate::transport::{DiscoveredDevice, FrameStream};
    use async_trait::async_trait;
    use crossbeam_channel::{unbounded, Receiver};
    use futures_util::stream;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// In-memory transport driven by a script of discovery and connect results
    #[derive(Default)]
    struct ScriptedTransport {
        discoveries: Mutex<VecDeque<Result<Option<DiscoveredDevice>, ScanError>>>,
        connects: Mutex<VecDeque<Result<(), ConnectError>>>,
        frames: Mutex<Vec<RawFrame>>,
        /// Keep the stream open after the scripted frames
        hold_open: bool,
        link_up: Arc<AtomicBool>,
        disconnects: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        fn new(discoveries: Vec<Option<&str>>) -> Self {
            let discoveries = discoveries
                .into_iter()
                .map(|d| Ok(d.map(|addr| DiscoveredDevice::new(addr, "ADC-BLE"))))
                .collect();
            Self {
                discoveries: Mutex::new(discoveries),
                hold_open: true,
                link_up: Arc::new(AtomicBool::new(true)),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        type Handle = ();

        async fn discover(&self, _name_filter: &str) -> Result<Option<DiscoveredDevice>, ScanError> {
            self.discoveries.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }

        async fn connect(&self, _address: &str) -> Result<(), ConnectError> {
            self.connects.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn subscribe(&self, _handle: &(), _characteristics: &[Uuid]) -> Result<FrameStream, ConnectError> {
            let frames = std::mem::take(&mut *self.frames.lock().unwrap());
            let scripted = stream::iter(frames);
            if self.hold_open {
                Ok(scripted.chain(stream::pending()).boxed())
            } else {
                Ok(scripted.boxed())
            }
        }

        async fn is_connected(&self, _handle: &()) -> bool {
            self.link_up.load(Ordering::Relaxed)
        }

        async fn disconnect(&self, _handle: &(), _characteristics: &[Uuid]) {
            self.disconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn test_config() -> Config {
        Config {
            sample_rate_hz: 4,
            window_seconds: 2,
            ..Config::default()
        }
    }

    fn drain_states(rx: &Receiver<SessionUpdate>) -> Vec<ConnectionState> {
        rx.try_iter()
            .filter_map(|u| match u {
                SessionUpdate::State(s) => Some(s),
                SessionUpdate::Status(_) => None,
            })
            .collect()
    }

    /// Polls the update channel until `label` shows up, then requests a stop.
    async fn stop_after(
        label: &'static str,
        rx: Receiver<SessionUpdate>,
        seen: &Mutex<Vec<ConnectionState>>,
        handle: SupervisorHandle,
    ) {
        loop {
            let batch = drain_states(&rx);
            let hit = batch.iter().any(|s| s.label() == label);
            seen.lock().unwrap().extend(batch);
            if hit {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.stop();
        // collect the remaining transitions once the supervisor exits
        tokio::time::sleep(Duration::from_millis(500)).await;
        seen.lock().unwrap().extend(drain_states(&rx));
    }

    fn labels(states: &[ConnectionState]) -> Vec<&'static str> {
        states.iter().map(|s| s.label()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescans_until_device_appears() {
        let transport = ScriptedTransport::new(vec![None, None, Some("AA:BB")]);
        let session = AcquisitionSession::shared(&test_config());
        let (tx, rx) = unbounded();
        let (mut supervisor, handle) =
            ConnectionSupervisor::new(transport, session.clone(), tx, &test_config());

        let seen = Mutex::new(Vec::new());
        tokio::join!(supervisor.run("ADC"), stop_after("Streaming", rx, &seen, handle));

        let seen = seen.into_inner().unwrap();
        assert_eq!(
            &labels(&seen)[..7],
            &["Scanning", "Backoff", "Scanning", "Backoff", "Scanning", "Connecting", "Streaming"]
        );
        assert!(matches!(&seen[1], ConnectionState::Backoff(BackoffReason::DeviceNotFound, _)));
        assert_eq!(seen[5], ConnectionState::Connecting("AA:BB".to_string()));
        assert_eq!(seen.last(), Some(&ConnectionState::Idle));
        assert_eq!(supervisor.state(), &ConnectionState::Idle);
        assert_eq!(lock_session(&session).status(), "Stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_never_shrink_within_a_streak() {
        let transport = ScriptedTransport::new(vec![Some("AA:BB"), None, Some("AA:BB")]);
        transport.connects.lock().unwrap().push_back(Err(ConnectError::Timeout("AA:BB".into())));
        let session = AcquisitionSession::shared(&test_config());
        let (tx, rx) = unbounded();
        let (mut supervisor, handle) =
            ConnectionSupervisor::new(transport, session, tx, &test_config());

        let seen = Mutex::new(Vec::new());
        tokio::join!(supervisor.run("ADC"), stop_after("Streaming", rx, &seen, handle));

        let seen = seen.into_inner().unwrap();
        let backoffs: Vec<&ConnectionState> =
            seen.iter().filter(|s| s.label() == "Backoff").collect();
        assert_eq!(backoffs.len(), 2);
        assert!(matches!(backoffs[0], ConnectionState::Backoff(BackoffReason::ConnectFailed(_), _)));
        assert!(matches!(backoffs[1], ConnectionState::Backoff(BackoffReason::DeviceNotFound, _)));

        // scripted scans take no time, so the second backoff starts as the
        // first expires; the scan-miss delay is held at 3s rather than 1s
        if let (ConnectionState::Backoff(_, first), ConnectionState::Backoff(_, second)) =
            (backoffs[0], backoffs[1])
        {
            let gap = *second - *first;
            assert!(gap >= Duration::from_secs(3));
            assert!(gap < Duration::from_millis(3100));
        } else {
            panic!("expected two backoff states");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_reach_session_and_stream_end_backs_off() {
        let mut transport = ScriptedTransport::new(vec![Some("AA:BB")]);
        transport.hold_open = false;
        *transport.frames.lock().unwrap() = (0..10)
            .map(|i| RawFrame::from_floats(UART_TX_CHARACTERISTIC_UUID, &[i as f32, 1.0]))
            .collect();
        let disconnects = transport.disconnects.clone();

        let session = AcquisitionSession::shared(&test_config());
        let (tx, rx) = unbounded();
        let (mut supervisor, handle) =
            ConnectionSupervisor::new(transport, session.clone(), tx, &test_config());

        let seen = Mutex::new(Vec::new());
        tokio::join!(supervisor.run("ADC"), stop_after("Backoff", rx, &seen, handle));

        let seen = seen.into_inner().unwrap();
        assert!(seen.iter().any(|s| matches!(
            s,
            ConnectionState::Backoff(BackoffReason::Disconnected, _)
        )));
        assert_eq!(disconnects.load(Ordering::Relaxed), 1);
        assert_eq!(lock_session(&session).log().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_failure_ends_streaming() {
        let transport = ScriptedTransport::new(vec![Some("AA:BB")]);
        transport.link_up.store(false, Ordering::Relaxed);
        let session = AcquisitionSession::shared(&test_config());
        let (tx, rx) = unbounded();
        let (mut supervisor, handle) =
            ConnectionSupervisor::new(transport, session, tx, &test_config());

        let seen = Mutex::new(Vec::new());
        tokio::join!(supervisor.run("ADC"), stop_after("Backoff", rx, &seen, handle));

        let seen = seen.into_inner().unwrap();
        assert_eq!(&labels(&seen)[..4], &["Scanning", "Connecting", "Streaming", "Backoff"]);
        assert!(matches!(&seen[3], ConnectionState::Backoff(BackoffReason::Disconnected, _)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_error_is_retried() {
        let transport = ScriptedTransport::new(vec![]);
        transport.discoveries.lock().unwrap().push_back(Err(ScanError::NoAdapters));
        let session = AcquisitionSession::shared(&test_config());
        let (tx, rx) = unbounded();
        let (mut supervisor, handle) =
            ConnectionSupervisor::new(transport, session, tx, &test_config());

        let seen = Mutex::new(Vec::new());
        tokio::join!(supervisor.run("ADC"), stop_after("Backoff", rx, &seen, handle));

        let seen = seen.into_inner().unwrap();
        assert!(matches!(&seen[1], ConnectionState::Backoff(BackoffReason::ScanFailed(_), _)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_streaming_disconnects_and_exports() {
        let temp_dir = tempdir().unwrap();
        let config = Config {
            export_on_stop: true,
            export_dir: Some(temp_dir.path().to_path_buf()),
            ..test_config()
        };
        let transport = ScriptedTransport::new(vec![Some("AA:BB")]);
        *transport.frames.lock().unwrap() =
            vec![RawFrame::from_floats(UART_TX_CHARACTERISTIC_UUID, &[0.7, 0.8])];
        let disconnects = transport.disconnects.clone();

        let session = AcquisitionSession::shared(&config);
        let (tx, rx) = unbounded();
        let (mut supervisor, handle) =
            ConnectionSupervisor::new(transport, session.clone(), tx, &config);

        let seen = Mutex::new(Vec::new());
        tokio::join!(supervisor.run("ADC"), stop_after("Streaming", rx, &seen, handle));

        assert_eq!(disconnects.load(Ordering::Relaxed), 1);
        let exported: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(exported.len(), 1);
        assert!(lock_session(&session).status().starts_with("Saved 1 samples"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff_is_seen_within_one_poll() {
        let config = Config {
            scan_retry_delay_ms: 60_000,
            ..test_config()
        };
        let transport = ScriptedTransport::new(vec![]);
        let session = AcquisitionSession::shared(&config);
        let (tx, rx) = unbounded();
        let (mut supervisor, handle) = ConnectionSupervisor::new(transport, session, tx, &config);

        let run = async {
            supervisor.run("ADC").await;
            Instant::now()
        };
        let stop = async {
            while !drain_states(&rx).iter().any(|s| s.label() == "Backoff") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(Duration::from_millis(3)).await;
            handle.stop();
            Instant::now()
        };
        let (finished_at, stopped_at) = tokio::join!(run, stop);

        assert!(finished_at >= stopped_at);
        assert!(finished_at - stopped_at <= config.liveness_poll());
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(ConnectionState::Scanning.status_message(), "Scanning...");
        assert_eq!(ConnectionState::Streaming("x".into()).status_message(), "Connected");
        let backoff = ConnectionState::Backoff(BackoffReason::Disconnected, Instant::now());
        assert_eq!(backoff.status_message(), "Disconnected, retrying...");
    }

    #[test]
    fn test_policy_from_config() {
        let policy = BackoffPolicy::from_config(&Config::default());
        assert_eq!(policy.base_delay(&BackoffReason::DeviceNotFound), Duration::from_secs(1));
        assert_eq!(policy.base_delay(&BackoffReason::Disconnected), Duration::from_secs(3));
    }
}
