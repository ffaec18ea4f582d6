//! Windows peripheral backend
//!
//! Hosts GATT services through `GattServiceProvider` and reports remote
//! writes from the `WriteRequested` event handler. Radio power changes are
//! reported from the adapter radio's `StateChanged` event.

use crate::domain::models::{AuthorizationStatus, PeripheralEvent};
use crate::infrastructure::bluetooth::backend::{
    BluetoothError, PeripheralBackend, ServiceAddOutcome,
};
use crate::infrastructure::bluetooth::protocol::{self, ServiceDefinition};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use windows::core::{IInspectable, Ref, GUID};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristicProperties, GattLocalCharacteristic, GattLocalCharacteristicParameters,
    GattProtectionLevel, GattServiceProvider, GattServiceProviderAdvertisingParameters,
    GattWriteOption, GattWriteRequestedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothAdapter, BluetoothError as WinBluetoothError};
use windows::Devices::Radios::{Radio, RadioState};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::DataReader;

struct HostedService {
    uuid: String,
    provider: GattServiceProvider,
    // Dropping the characteristics would detach the write handlers
    _characteristics: Vec<GattLocalCharacteristic>,
}

pub struct WinRtPeripheral {
    services: Vec<HostedService>,
    advertising: bool,
    // Held so the StateChanged subscription stays alive
    radio: Option<Radio>,
    event_sender: mpsc::UnboundedSender<PeripheralEvent>,
}

impl WinRtPeripheral {
    pub fn new(event_sender: mpsc::UnboundedSender<PeripheralEvent>) -> Self {
        Self {
            services: Vec::new(),
            advertising: false,
            radio: None,
            event_sender,
        }
    }

    fn to_guid(uuid: &str) -> Result<GUID, BluetoothError> {
        protocol::parse_uuid(uuid)
            .map(GUID::from)
            .map_err(|e| BluetoothError::ServiceRejected(e.to_string()))
    }

    async fn default_adapter() -> Result<BluetoothAdapter, BluetoothError> {
        let adapter = BluetoothAdapter::GetDefaultAsync()?.await?;
        Ok(adapter)
    }

    /// Fetch the adapter radio and forward its power changes as events
    async fn watch_radio(&mut self) -> Result<Radio, BluetoothError> {
        if let Some(radio) = &self.radio {
            return Ok(radio.clone());
        }

        let adapter = Self::default_adapter().await?;
        let radio = adapter.GetRadioAsync()?.await?;

        let sender = self.event_sender.clone();
        radio.StateChanged(&TypedEventHandler::new(
            move |radio: Ref<Radio>, _: Ref<IInspectable>| {
                if let Some(radio) = radio.as_ref() {
                    let powered = radio.State()? == RadioState::On;
                    debug!("Bluetooth radio state changed, powered: {}", powered);
                    let _ = sender.send(PeripheralEvent::StateChanged { powered });
                }
                Ok(())
            },
        ))?;

        self.radio = Some(radio.clone());
        Ok(radio)
    }

    fn write_handler(
        sender: mpsc::UnboundedSender<PeripheralEvent>,
        characteristic_uuid: String,
    ) -> TypedEventHandler<GattLocalCharacteristic, GattWriteRequestedEventArgs> {
        TypedEventHandler::new(
            move |_: Ref<GattLocalCharacteristic>, args: Ref<GattWriteRequestedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let deferral = args.GetDeferral()?;
                    let device = args.Session()?.DeviceId()?.Id()?.to_string();
                    let request = args.GetRequestAsync()?.get()?;

                    let reader = DataReader::FromBuffer(&request.Value()?)?;
                    let mut value = vec![0u8; reader.UnconsumedBufferLength()? as usize];
                    reader.ReadBytes(&mut value)?;

                    if request.Option()? == GattWriteOption::WriteWithResponse {
                        request.Respond()?;
                    }

                    debug!("Write request from {}: {:02x?}", device, value);
                    let _ = sender.send(PeripheralEvent::WriteRequest {
                        device,
                        characteristic: characteristic_uuid.clone(),
                        value,
                    });
                    deferral.Complete()?;
                }
                Ok(())
            },
        )
    }
}

impl PeripheralBackend for WinRtPeripheral {
    async fn is_powered(&mut self) -> bool {
        let state = self
            .watch_radio()
            .await
            .and_then(|radio| radio.State().map_err(BluetoothError::from));
        match state {
            Ok(state) => state == RadioState::On,
            Err(e) => {
                warn!("Could not query Bluetooth radio: {}", e);
                false
            }
        }
    }

    async fn add_service(
        &mut self,
        service: &ServiceDefinition,
    ) -> Result<ServiceAddOutcome, BluetoothError> {
        if self
            .services
            .iter()
            .any(|s| protocol::uuid_eq(&s.uuid, &service.uuid))
        {
            return Ok(ServiceAddOutcome::AlreadyProvided);
        }

        let result = GattServiceProvider::CreateAsync(Self::to_guid(&service.uuid)?)?.await?;
        let status = result.Error()?;
        if status != WinBluetoothError::Success {
            let _ = self.event_sender.send(PeripheralEvent::ServiceAdded {
                service: service.uuid.clone(),
                error: Some(format!("{:?}", status)),
            });
            return Err(BluetoothError::ServiceRejected(format!("{:?}", status)));
        }
        let provider = result.ServiceProvider()?;

        let mut characteristics = Vec::new();
        for definition in &service.characteristics {
            let params = GattLocalCharacteristicParameters::new()?;
            let mut properties = GattCharacteristicProperties::None;
            if definition.properties.read {
                properties |= GattCharacteristicProperties::Read;
            }
            if definition.properties.write {
                properties |= GattCharacteristicProperties::Write;
            }
            if definition.properties.write_without_response {
                properties |= GattCharacteristicProperties::WriteWithoutResponse;
            }
            params.SetCharacteristicProperties(properties)?;
            params.SetWriteProtectionLevel(GattProtectionLevel::Plain)?;

            let created = provider
                .Service()?
                .CreateCharacteristicAsync(Self::to_guid(&definition.uuid)?, &params)?
                .await?;
            if created.Error()? != WinBluetoothError::Success {
                return Err(BluetoothError::ServiceRejected(format!(
                    "characteristic {}: {:?}",
                    definition.uuid,
                    created.Error()?
                )));
            }

            let characteristic = created.Characteristic()?;
            characteristic.WriteRequested(&Self::write_handler(
                self.event_sender.clone(),
                definition.uuid.clone(),
            ))?;
            characteristics.push(characteristic);
        }

        info!("GATT service {} hosted", service.uuid);
        self.services.push(HostedService {
            uuid: service.uuid.clone(),
            provider,
            _characteristics: characteristics,
        });
        let _ = self.event_sender.send(PeripheralEvent::ServiceAdded {
            service: service.uuid.clone(),
            error: None,
        });
        Ok(ServiceAddOutcome::Added)
    }

    async fn start_advertising(
        &mut self,
        local_name: &str,
        service_uuids: &[String],
    ) -> Result<(), BluetoothError> {
        // The adapter name is advertised; GattServiceProvider cannot override it
        debug!(
            "Advertising {:?} (requested local name '{}')",
            service_uuids, local_name
        );

        let params = GattServiceProviderAdvertisingParameters::new()?;
        params.SetIsConnectable(true)?;
        params.SetIsDiscoverable(true)?;

        for hosted in self
            .services
            .iter()
            .filter(|s| service_uuids.iter().any(|u| protocol::uuid_eq(u, &s.uuid)))
        {
            hosted
                .provider
                .StartAdvertisingWithParameters(&params)
                .map_err(|e| BluetoothError::Advertising(e.message().to_string()))?;
        }

        self.advertising = true;
        let _ = self
            .event_sender
            .send(PeripheralEvent::AdvertisingStarted { error: None });
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), BluetoothError> {
        for hosted in &self.services {
            hosted.provider.StopAdvertising()?;
        }
        self.advertising = false;
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.advertising
    }

    async fn authorization_status(&self) -> AuthorizationStatus {
        match Self::default_adapter().await {
            Ok(adapter) => match adapter.IsPeripheralRoleSupported() {
                Ok(true) => AuthorizationStatus::Authorized,
                Ok(false) => AuthorizationStatus::Restricted,
                Err(_) => AuthorizationStatus::NotDetermined,
            },
            Err(e) => {
                warn!("No default Bluetooth adapter: {}", e);
                AuthorizationStatus::NotDetermined
            }
        }
    }
}
