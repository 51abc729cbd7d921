//! # Bluetooth LE Transport
//!
//! btleplug implementation of `Transport`. The adapter is acquired lazily so
//! a missing or powered-off radio becomes a retryable scan failure instead of
//! a startup error.

use crate::channel_deriver::RawFrame;
use crate::error::{ConnectError, ScanError};
use crate::transport::{DiscoveredDevice, FrameStream, Transport};
use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::{future, StreamExt};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct BleTransport {
    adapter: Mutex<Option<Adapter>>,
    scan_duration: Duration,
    connect_timeout: Duration,
}

impl BleTransport {
    pub fn new(scan_duration: Duration, connect_timeout: Duration) -> Self {
        Self {
            adapter: Mutex::new(None),
            scan_duration,
            connect_timeout,
        }
    }

    async fn adapter(&self) -> Result<Adapter, ScanError> {
        let mut slot = self.adapter.lock().await;
        if let Some(adapter) = slot.as_ref() {
            return Ok(adapter.clone());
        }

        let manager = Manager::new()
            .await
            .map_err(|e| ScanError::ManagerInit(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| ScanError::ManagerInit(e.to_string()))?;

        let central = adapters.into_iter().next().ok_or(ScanError::NoAdapters)?;
        *slot = Some(central.clone());
        Ok(central)
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, ConnectError> {
        let central = self
            .adapter()
            .await
            .map_err(|e| ConnectError::DeviceConnection {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let peripherals = central
            .peripherals()
            .await
            .map_err(|e| ConnectError::DeviceConnection {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        peripherals
            .into_iter()
            .find(|p| p.address().to_string() == address)
            .ok_or_else(|| ConnectError::NotFound(address.to_string()))
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Handle = Peripheral;

    async fn discover(&self, name_filter: &str) -> Result<Option<DiscoveredDevice>, ScanError> {
        let central = self.adapter().await?;

        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ScanError::ScanFailed(format!("Failed to start scan: {}", e)))?;

        tokio::time::sleep(self.scan_duration).await;

        central
            .stop_scan()
            .await
            .map_err(|e| ScanError::ScanFailed(format!("Failed to stop scan: {}", e)))?;

        let peripherals = central
            .peripherals()
            .await
            .map_err(|e| ScanError::ScanFailed(format!("Failed to get peripherals: {}", e)))?;

        for peripheral in peripherals {
            if let Ok(Some(props)) = peripheral.properties().await {
                if let Some(local_name) = props.local_name {
                    if local_name.contains(name_filter) {
                        let address = peripheral.address().to_string();
                        log::debug!("Matched {} at {}", local_name, address);
                        return Ok(Some(DiscoveredDevice::new(address, local_name)));
                    }
                }
            }
        }

        Ok(None)
    }

    async fn connect(&self, address: &str) -> Result<Peripheral, ConnectError> {
        let peripheral = self.find_peripheral(address).await?;

        match tokio::time::timeout(self.connect_timeout, peripheral.connect()).await {
            Err(_) => return Err(ConnectError::Timeout(address.to_string())),
            Ok(Err(e)) => {
                return Err(ConnectError::DeviceConnection {
                    address: address.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(())) => {}
        }

        peripheral
            .discover_services()
            .await
            .map_err(|e| ConnectError::DeviceConnection {
                address: address.to_string(),
                reason: format!("service discovery failed: {}", e),
            })?;

        Ok(peripheral)
    }

    async fn subscribe(
        &self,
        handle: &Peripheral,
        characteristics: &[Uuid],
    ) -> Result<FrameStream, ConnectError> {
        let available = handle.characteristics();

        for uuid in characteristics {
            let characteristic = available
                .iter()
                .find(|c| c.uuid == *uuid)
                .ok_or_else(|| ConnectError::Subscribe {
                    characteristic: uuid.to_string(),
                    reason: "not offered by device".to_string(),
                })?;

            handle
                .subscribe(characteristic)
                .await
                .map_err(|e| ConnectError::Subscribe {
                    characteristic: uuid.to_string(),
                    reason: e.to_string(),
                })?;
        }

        let notifications = handle
            .notifications()
            .await
            .map_err(|e| ConnectError::Subscribe {
                characteristic: "notifications".to_string(),
                reason: e.to_string(),
            })?;

        let wanted = characteristics.to_vec();
        let frames = notifications
            .filter(move |n| future::ready(wanted.contains(&n.uuid)))
            .map(|n| RawFrame::new(n.uuid, n.value));

        Ok(frames.boxed())
    }

    async fn is_connected(&self, handle: &Peripheral) -> bool {
        handle.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self, handle: &Peripheral, characteristics: &[Uuid]) {
        let available = handle.characteristics();
        for characteristic in available.iter().filter(|c| characteristics.contains(&c.uuid)) {
            if let Err(e) = handle.unsubscribe(characteristic).await {
                log::debug!("Unsubscribe from {} failed: {}", characteristic.uuid, e);
            }
        }
        if let Err(e) = handle.disconnect().await {
            log::warn!("Disconnect failed: {}", e);
        }
    }
}
