//! # Transport Boundary Module
//!
//! The wireless primitives the supervisor consumes: discover, connect,
//! subscribe, liveness and disconnect. `ble::BleTransport` implements them
//! with btleplug; tests use a scripted in-memory implementation.
//!
//! Every call may be slow and may fail, so all of them are async.

use crate::channel_deriver::RawFrame;
use crate::error::{ConnectError, ScanError};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use uuid::Uuid;

/// Stream of notifications from a subscribed device. Ends when the link drops.
pub type FrameStream = BoxStream<'static, RawFrame>;

/// A device found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: String,
}

impl DiscoveredDevice {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opaque handle to an open connection
    type Handle: Send + Sync;

    /// Runs one discovery pass and returns the first device whose advertised
    /// name contains `name_filter`. The scan duration is the transport's call.
    async fn discover(&self, name_filter: &str) -> Result<Option<DiscoveredDevice>, ScanError>;

    async fn connect(&self, address: &str) -> Result<Self::Handle, ConnectError>;

    /// Enables notifications on `characteristics` and returns the merged stream.
    async fn subscribe(
        &self,
        handle: &Self::Handle,
        characteristics: &[Uuid],
    ) -> Result<FrameStream, ConnectError>;

    /// Explicit liveness check, polled at a fixed cadence while streaming.
    async fn is_connected(&self, handle: &Self::Handle) -> bool;

    /// Unsubscribes and closes the link. Failures are logged, not returned.
    async fn disconnect(&self, handle: &Self::Handle, characteristics: &[Uuid]);
}
