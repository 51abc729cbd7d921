//! # Acquisition Session Module
//!
//! Owns every per-session structure and wires them together:
//! `ChannelDeriver` → display windows → `SampleLog` → `BeatDetector`.
//!
//! ## Concurrency
//! The supervisor's streaming loop is the only writer. The rendering sink
//! only calls `snapshot_for_display()`, which copies the windows out. Both
//! sides go through the one `Mutex` in `SharedSession`, so a snapshot can never
//! observe a half-applied sample.
//!
//! Exports copy the log out under the lock and write the file after
//! releasing it, so a long write never stalls ingestion or rendering.

use crate::beat_detector::{BeatDetector, ChannelId};
use crate::channel_deriver::{ChannelDeriver, RawFrame, Sample};
use crate::config::Config;
use crate::error::ExportError;
use crate::ring_buffer::RingBuffer;
use crate::sample_log::SampleLog;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

pub type SharedSession = Arc<Mutex<AcquisitionSession>>;

/// Lock the session, recovering the guard if a previous holder panicked.
pub fn lock_session(session: &SharedSession) -> MutexGuard<'_, AcquisitionSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the rendering sink needs for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySnapshot {
    pub primary_window: Vec<f64>,
    pub derived_window: Vec<f64>,
    pub primary_range: (f64, f64),
    pub derived_range: (f64, f64),
    pub bpm_primary: f64,
    pub bpm_derived: f64,
    pub status: String,
    pub skin_temperature: Option<f64>,
    /// Seconds between window slots, for labelling the time axis
    pub sample_interval: f64,
    pub samples_logged: usize,
    pub dropped_frames: u64,
    pub last_seq: Option<u64>,
}

pub struct AcquisitionSession {
    deriver: ChannelDeriver,
    primary: RingBuffer<f64>,
    derived: RingBuffer<f64>,
    log: SampleLog,
    detector: BeatDetector,
    status: String,
    started: Instant,
    sample_interval: f64,
    dropped_frames: u64,
    export_dir: Option<PathBuf>,
}

impl AcquisitionSession {
    pub fn new(config: &Config) -> Self {
        let capacity = config.window_capacity();
        let max_beats = config.max_beats();
        let session = Self {
            deriver: ChannelDeriver::new(config.frame_layout.clone()),
            primary: RingBuffer::new(capacity),
            derived: RingBuffer::new(capacity),
            log: SampleLog::new(),
            detector: BeatDetector::new(
                config.primary_threshold,
                config.derived_threshold,
                max_beats,
            ),
            status: "Idle".to_string(),
            started: Instant::now(),
            sample_interval: config.sample_interval(),
            dropped_frames: 0,
            export_dir: config.resolved_export_dir(),
        };
        log::info!(
            "Session: {}-sample display windows, tracking {} beats per channel",
            session.primary.capacity(),
            max_beats
        );
        session
    }

    pub fn shared(config: &Config) -> SharedSession {
        Arc::new(Mutex::new(Self::new(config)))
    }

    /// Seconds since the session started, on a monotonic clock
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Ingests a frame stamped with the current session time.
    pub fn ingest(&mut self, raw: &RawFrame) -> Option<Sample> {
        let now = self.elapsed();
        self.ingest_at(raw, now)
    }

    /// Ingests a frame observed at `t` seconds.
    ///
    /// Parse failures are logged and counted, never returned.
    pub fn ingest_at(&mut self, raw: &RawFrame, t: f64) -> Option<Sample> {
        let sample = match self.deriver.ingest(raw, t) {
            Ok(Some(sample)) => sample,
            Ok(None) => return None,
            Err(e) => {
                self.dropped_frames += 1;
                log::warn!("Dropping frame: {}", e);
                return None;
            }
        };

        self.primary.push(sample.primary);
        self.derived.push(sample.derived);
        self.log.append(sample);
        self.detector.observe(ChannelId::Primary, sample.primary, sample.received_at);
        self.detector.observe(ChannelId::Derived, sample.derived, sample.received_at);

        log::debug!(
            "Sample {}: primary={:.3} derived={:.3}",
            sample.seq,
            sample.primary,
            sample.derived
        );
        Some(sample)
    }

    pub fn snapshot_for_display(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            primary_window: self.primary.snapshot(),
            derived_window: self.derived.snapshot(),
            primary_range: self.primary.min_max(),
            derived_range: self.derived.min_max(),
            bpm_primary: self.detector.bpm(ChannelId::Primary),
            bpm_derived: self.detector.bpm(ChannelId::Derived),
            status: self.status.clone(),
            skin_temperature: self.deriver.last_temperature(),
            sample_interval: self.sample_interval,
            samples_logged: self.log.len(),
            dropped_frames: self.dropped_frames,
            last_seq: self.deriver.next_seq().checked_sub(1),
        }
    }

    #[allow(dead_code)]
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    #[allow(dead_code)]
    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    pub fn log(&self) -> &SampleLog {
        &self.log
    }

    /// Called when a new connection starts streaming.
    ///
    /// The log and windows carry over between reconnects; only a
    /// half-received dual-layout pair is discarded.
    pub fn on_stream_start(&mut self) {
        self.deriver.clear_pending();
    }

    /// Starts a fresh session: clears windows, log, beats and sequence numbers.
    pub fn restart(&mut self) {
        log::info!("Restarting session, discarding {} samples", self.log.len());
        self.deriver.reset();
        self.primary.clear();
        self.derived.clear();
        self.log.clear();
        self.detector.reset();
        self.dropped_frames = 0;
        self.started = Instant::now();
    }

    fn report_export(&mut self, result: &Result<PathBuf, ExportError>, samples: usize) {
        match result {
            Ok(path) => self.set_status(format!("Saved {} samples to {}", samples, path.display())),
            Err(e) => {
                log::warn!("Export failed: {}", e);
                self.set_status(format!("Export failed: {}", e));
            }
        }
    }
}

/// Writes the shared session's log as CSV to `dest`.
///
/// Only the copy of the log happens under the lock.
#[allow(dead_code)]
pub fn export_shared<W: Write>(session: &SharedSession, dest: W) -> Result<(), ExportError> {
    let log = lock_session(session).log.clone();
    log.export(dest)
}

/// Exports to a timestamped file in `dir` and reports the outcome via status.
pub fn export_shared_to_dir(session: &SharedSession, dir: &Path) -> Result<PathBuf, ExportError> {
    let log = lock_session(session).log.clone();
    let result = log.export_to_dir(dir);
    lock_session(session).report_export(&result, log.len());
    result
}

/// Exports to the configured directory.
pub fn save_shared(session: &SharedSession) -> Result<PathBuf, ExportError> {
    let export_dir = lock_session(session).export_dir.clone();
    match export_dir {
        Some(dir) => export_shared_to_dir(session, &dir),
        None => {
            let result = Err(ExportError::NoDestination);
            lock_session(session).report_export(&result, 0);
            result
        }
    }
}
