//! # Channel Derivation Module
//!
//! Turns raw notification payloads into time-stamped `Sample`s carrying the
//! primary (maternal) value and the derived (fetal) value `combined - primary`.
//!
//! ## Firmware Layouts
//! - `Combined`: one characteristic notifies little-endian `f32`s packed as
//!   `[primary, combined, skin_temperature?]`. Eight bytes minimum; the
//!   temperature is optional.
//! - `DualCharacteristic`: primary and combined-sum values arrive as single
//!   `f32` notifications on two characteristics. The latest primary is held
//!   until a combined-sum frame arrives, and only then is a sample emitted.
//!
//! The layout is chosen once from configuration, so a single pipeline serves
//! every firmware variant.

use crate::error::FrameParseError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Nordic UART TX characteristic carrying packed combined frames
pub const UART_TX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

const F32_LEN: usize = 4;
const COMBINED_MIN_LEN: usize = 2 * F32_LEN;
const COMBINED_WITH_TEMPERATURE_LEN: usize = 3 * F32_LEN;

/// Which notification layout the connected firmware uses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameLayout {
    Combined { characteristic: Uuid },
    DualCharacteristic { primary: Uuid, combined: Uuid },
}

impl Default for FrameLayout {
    fn default() -> Self {
        FrameLayout::Combined {
            characteristic: UART_TX_CHARACTERISTIC_UUID,
        }
    }
}

impl FrameLayout {
    /// Characteristics that must be subscribed for this layout
    pub fn characteristics(&self) -> Vec<Uuid> {
        match self {
            FrameLayout::Combined { characteristic } => vec![*characteristic],
            FrameLayout::DualCharacteristic { primary, combined } => vec![*primary, *combined],
        }
    }
}

/// One notification as delivered by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn new(characteristic: Uuid, payload: Vec<u8>) -> Self {
        Self {
            characteristic,
            payload,
        }
    }

    /// Packs little-endian `f32`s the way the firmware does.
    #[allow(dead_code)]
    pub fn from_floats(characteristic: Uuid, values: &[f32]) -> Self {
        let payload = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(characteristic, payload)
    }
}

/// Accepted sample, immutable once created
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub primary: f64,
    pub derived: f64,
    /// Assigned once per accepted sample, never reused
    pub seq: u64,
    /// Arrival time in seconds on the session's monotonic clock
    pub received_at: f64,
}

pub struct ChannelDeriver {
    layout: FrameLayout,
    next_seq: u64,
    /// Primary value awaiting its combined-sum partner (dual layout only)
    pending_primary: Option<f64>,
    last_temperature: Option<f64>,
}

impl ChannelDeriver {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            next_seq: 0,
            pending_primary: None,
            last_temperature: None,
        }
    }

    /// Sequence number the next accepted sample will receive
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    #[allow(dead_code)]
    pub fn pending_primary(&self) -> Option<f64> {
        self.pending_primary
    }

    /// Skin temperature from the most recent frame that carried one
    pub fn last_temperature(&self) -> Option<f64> {
        self.last_temperature
    }

    /// Decodes one frame.
    ///
    /// Returns `Ok(None)` when the frame was valid but no sample is ready yet
    /// (a dual-layout primary waiting for its combined-sum value).
    pub fn ingest(
        &mut self,
        raw: &RawFrame,
        received_at: f64,
    ) -> Result<Option<Sample>, FrameParseError> {
        match self.layout {
            FrameLayout::Combined { characteristic } => {
                if raw.characteristic != characteristic {
                    return Err(FrameParseError::UnknownCharacteristic(
                        raw.characteristic.to_string(),
                    ));
                }
                let (primary, combined, temperature) = parse_combined(&raw.payload)?;
                if temperature.is_some() {
                    self.last_temperature = temperature;
                }
                Ok(Some(self.emit(primary, combined, received_at)))
            }
            FrameLayout::DualCharacteristic { primary, combined } => {
                if raw.characteristic == primary {
                    let value = read_f32(&raw.payload, 0)?;
                    self.pending_primary = Some(value);
                    Ok(None)
                } else if raw.characteristic == combined {
                    let sum = read_f32(&raw.payload, 0)?;
                    match self.pending_primary.take() {
                        Some(value) => Ok(Some(self.emit(value, sum, received_at))),
                        None => {
                            log::debug!("Combined-sum frame with no pending primary, dropping");
                            Ok(None)
                        }
                    }
                } else {
                    Err(FrameParseError::UnknownCharacteristic(
                        raw.characteristic.to_string(),
                    ))
                }
            }
        }
    }

    fn emit(&mut self, primary: f64, combined: f64, received_at: f64) -> Sample {
        let sample = Sample {
            primary,
            derived: combined - primary,
            seq: self.next_seq,
            received_at,
        };
        self.next_seq += 1;
        sample
    }

    /// Forgets a half-received dual-layout pair, e.g. after a reconnect.
    pub fn clear_pending(&mut self) {
        self.pending_primary = None;
    }

    pub fn reset(&mut self) {
        self.next_seq = 0;
        self.pending_primary = None;
        self.last_temperature = None;
    }
}

fn read_f32(payload: &[u8], offset: usize) -> Result<f64, FrameParseError> {
    let end = offset + F32_LEN;
    let bytes: [u8; F32_LEN] = payload
        .get(offset..end)
        .and_then(|b| b.try_into().ok())
        .ok_or(FrameParseError::TooShort {
            expected: end,
            actual: payload.len(),
        })?;
    Ok(f32::from_le_bytes(bytes) as f64)
}

fn parse_combined(payload: &[u8]) -> Result<(f64, f64, Option<f64>), FrameParseError> {
    if payload.len() < COMBINED_MIN_LEN {
        return Err(FrameParseError::TooShort {
            expected: COMBINED_MIN_LEN,
            actual: payload.len(),
        });
    }
    let primary = read_f32(payload, 0)?;
    let combined = read_f32(payload, F32_LEN)?;
    let temperature = if payload.len() >= COMBINED_WITH_TEMPERATURE_LEN {
        Some(read_f32(payload, 2 * F32_LEN)?)
    } else {
        None
    };
    Ok((primary, combined, temperature))
}
