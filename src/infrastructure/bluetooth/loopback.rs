//! Loopback peripheral
//!
//! In-process stand-in for the platform peripheral role. It keeps an
//! in-memory GATT database and lets a local driver (tests, or the host on
//! platforms without a native peripheral role) play the remote side through
//! a [`LoopbackHandle`].

use crate::domain::models::{AuthorizationStatus, ConnectionState, PeripheralEvent};
use crate::infrastructure::bluetooth::backend::{
    BluetoothError, PeripheralBackend, ServiceAddOutcome,
};
use crate::infrastructure::bluetooth::protocol::{self, ServiceDefinition};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug)]
struct LoopbackState {
    powered: bool,
    authorization: AuthorizationStatus,
    services: Vec<ServiceDefinition>,
    add_service_calls: usize,
    fail_next_add: bool,
    fail_next_advertising: bool,
    advertising: Option<String>,
    connected: Vec<String>,
}

impl Default for LoopbackState {
    fn default() -> Self {
        Self {
            powered: true,
            authorization: AuthorizationStatus::Authorized,
            services: Vec::new(),
            add_service_calls: 0,
            fail_next_add: false,
            fail_next_advertising: false,
            advertising: None,
            connected: Vec::new(),
        }
    }
}

fn lock(state: &Mutex<LoopbackState>) -> MutexGuard<'_, LoopbackState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct LoopbackPeripheral {
    state: Arc<Mutex<LoopbackState>>,
    event_sender: mpsc::UnboundedSender<PeripheralEvent>,
}

impl LoopbackPeripheral {
    pub fn new(event_sender: mpsc::UnboundedSender<PeripheralEvent>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopbackState::default())),
            event_sender,
        }
    }

    /// Handle for driving the remote side of the loopback
    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            state: self.state.clone(),
            event_sender: self.event_sender.clone(),
        }
    }
}

impl PeripheralBackend for LoopbackPeripheral {
    async fn is_powered(&mut self) -> bool {
        lock(&self.state).powered
    }

    async fn add_service(
        &mut self,
        service: &ServiceDefinition,
    ) -> Result<ServiceAddOutcome, BluetoothError> {
        let outcome = {
            let mut state = lock(&self.state);
            state.add_service_calls += 1;

            if !state.powered {
                return Err(BluetoothError::Unavailable("radio is off".to_string()));
            }
            if state.fail_next_add {
                state.fail_next_add = false;
                return Err(BluetoothError::ServiceRejected(service.uuid.clone()));
            }

            if state
                .services
                .iter()
                .any(|s| protocol::uuid_eq(&s.uuid, &service.uuid))
            {
                ServiceAddOutcome::AlreadyProvided
            } else {
                state.services.push(service.clone());
                ServiceAddOutcome::Added
            }
        };

        info!("Loopback service {} -> {:?}", service.uuid, outcome);
        let _ = self.event_sender.send(PeripheralEvent::ServiceAdded {
            service: service.uuid.clone(),
            error: None,
        });
        Ok(outcome)
    }

    async fn start_advertising(
        &mut self,
        local_name: &str,
        service_uuids: &[String],
    ) -> Result<(), BluetoothError> {
        {
            let mut state = lock(&self.state);
            if !state.powered {
                return Err(BluetoothError::Advertising("radio is off".to_string()));
            }
            if state.fail_next_advertising {
                state.fail_next_advertising = false;
                return Err(BluetoothError::Advertising(
                    "advertisement rejected".to_string(),
                ));
            }
            state.advertising = Some(local_name.to_string());
        }

        debug!(
            "Loopback advertising '{}' with services {:?}",
            local_name, service_uuids
        );
        let _ = self
            .event_sender
            .send(PeripheralEvent::AdvertisingStarted { error: None });
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), BluetoothError> {
        lock(&self.state).advertising = None;
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        lock(&self.state).advertising.is_some()
    }

    async fn authorization_status(&self) -> AuthorizationStatus {
        lock(&self.state).authorization
    }
}

/// Remote side of a [`LoopbackPeripheral`]
#[derive(Clone)]
pub struct LoopbackHandle {
    state: Arc<Mutex<LoopbackState>>,
    event_sender: mpsc::UnboundedSender<PeripheralEvent>,
}

impl LoopbackHandle {
    pub fn set_powered(&self, powered: bool) {
        lock(&self.state).powered = powered;
        let _ = self
            .event_sender
            .send(PeripheralEvent::StateChanged { powered });
    }

    pub fn set_authorization(&self, authorization: AuthorizationStatus) {
        lock(&self.state).authorization = authorization;
    }

    /// Make the next `add_service` call fail
    pub fn fail_next_add_service(&self) {
        lock(&self.state).fail_next_add = true;
    }

    /// Make the next `start_advertising` call fail
    pub fn fail_next_advertising(&self) {
        lock(&self.state).fail_next_advertising = true;
    }

    pub fn add_service_calls(&self) -> usize {
        lock(&self.state).add_service_calls
    }

    pub fn hosted_services(&self) -> Vec<String> {
        lock(&self.state)
            .services
            .iter()
            .map(|s| s.uuid.clone())
            .collect()
    }

    pub fn advertised_name(&self) -> Option<String> {
        lock(&self.state).advertising.clone()
    }

    pub fn connect(&self, device: &str) {
        {
            let mut state = lock(&self.state);
            if !state.connected.iter().any(|d| d == device) {
                state.connected.push(device.to_string());
            }
        }
        let _ = self
            .event_sender
            .send(PeripheralEvent::ConnectionStateChanged {
                device: device.to_string(),
                state: ConnectionState::Connected,
                status: 0,
            });
    }

    pub fn disconnect(&self, device: &str, status: u8) {
        lock(&self.state).connected.retain(|d| d != device);
        let _ = self
            .event_sender
            .send(PeripheralEvent::ConnectionStateChanged {
                device: device.to_string(),
                state: ConnectionState::Disconnected,
                status,
            });
    }

    /// Write `value` to a hosted characteristic as `device`.
    ///
    /// Fails when no hosted service exposes the characteristic.
    pub fn write(&self, device: &str, characteristic: &str, value: &[u8]) -> anyhow::Result<()> {
        let hosted = lock(&self.state).services.iter().any(|s| {
            s.characteristics
                .iter()
                .any(|c| protocol::uuid_eq(&c.uuid, characteristic))
        });
        if !hosted {
            anyhow::bail!("Characteristic {} is not hosted", characteristic);
        }

        self.event_sender
            .send(PeripheralEvent::WriteRequest {
                device: device.to_string(),
                characteristic: characteristic.to_lowercase(),
                value: value.to_vec(),
            })
            .map_err(|_| anyhow::anyhow!("Peripheral event channel closed"))
    }
}
