//! GATT server plugin
//!
//! Translates bridge commands into peripheral and alarm operations, and
//! peripheral events back into results for the bridge.
//!
//! Long-lived notifications (service added, remote write requests,
//! connection state) go to the callback saved by `startServer`, with
//! `keepCallback` set.
//!
//! While the server runs, an ongoing status notification tells the user
//! whether a device is connected.

use crate::bridge::command::{action, BridgeCommand, PluginResult};
use crate::domain::alarm::AlarmDebouncer;
use crate::domain::error::PluginError;
use crate::domain::models::{
    AlarmNotification, AlertLevel, ConnectionState, NotificationId, PeripheralEvent,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::alert::AlertPresenter;
use crate::infrastructure::bluetooth::protocol::{self, ServiceDefinition};
use crate::infrastructure::bluetooth::{PeripheralBackend, ServiceAddOutcome};
use crate::infrastructure::logging::ALARM_LOG_TARGET;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// Status Types
const STATUS_SERVICE_ADDED: &str = "serviceAdded";
const STATUS_SERVICE_EXISTS: &str = "serviceAlreadyProvided";
const STATUS_WAITING_FOR_BLUETOOTH: &str = "waitingForBluetooth";
const STATUS_ADVERTISING_STARTED: &str = "advertisingStarted";
const STATUS_WRITE_REQUEST: &str = "serviceRemoteWriteRequest";
const STATUS_CONNECTION_STATE: &str = "serverConnectionState";
const STATUS_ALARM_TRIGGERED: &str = "alarmTriggered";
const STATUS_ALARM_SUPPRESSED: &str = "alarmSuppressed";
const STATUS_ALARM_RESET: &str = "alarmReset";
const STATUS_ALARM_STOPPED: &str = "alarmStopped";
const STATUS_NOTIFICATIONS_REGISTERED: &str = "notificationsRegistered";
const STATUS_ALARM_SETTINGS: &str = "alarmSettings";
const STATUS_AUTHORIZATION: &str = "authorizationStatus";
const STATUS_BADGE_SET: &str = "badgeSet";

// Ongoing status texts
const STATUS_TEXT_CONNECTING: &str = "Connecting to alarm clip.";
const STATUS_TEXT_CONNECTED: &str = "Connected with alarm clip.";

// Error Types
const ERROR_CONNECTION_STATE: &str = "serverConnectionState";
const LOG_CONNECTION_STATE: &str = "Connection state changed with error";

/// Outcome of an alarm request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmOutcome {
    Triggered,
    Suppressed,
    Reset,
}

pub struct GattServerPlugin<B, P> {
    backend: B,
    presenter: P,
    settings: SettingsService,
    result_sender: mpsc::UnboundedSender<PluginResult>,

    server_running_callback: Option<String>,
    /// Name to advertise. A `localName` start option overrides it for this run only.
    local_name: String,
    powered: bool,
    immediate_alert_service: Option<ServiceDefinition>,
    ias_added: bool,

    debouncer: AlarmDebouncer,
    active_notification: Option<NotificationId>,
}

impl<B: PeripheralBackend, P: AlertPresenter> GattServerPlugin<B, P> {
    pub fn new(
        backend: B,
        presenter: P,
        settings: SettingsService,
        result_sender: mpsc::UnboundedSender<PluginResult>,
    ) -> Self {
        let local_name = settings.get().server.local_name.clone();
        Self {
            backend,
            presenter,
            settings,
            result_sender,
            server_running_callback: None,
            local_name,
            powered: false,
            immediate_alert_service: None,
            ias_added: false,
            debouncer: AlarmDebouncer::default(),
            active_notification: None,
        }
    }

    pub fn is_server_running(&self) -> bool {
        self.server_running_callback.is_some()
    }

    pub fn is_service_added(&self) -> bool {
        self.ias_added
    }

    pub fn settings(&self) -> &SettingsService {
        &self.settings
    }

    /// Run until `shutdown` completes or both the command and event channels
    /// are closed, then tear the server down.
    ///
    /// Commands and events that are already queued are handled before
    /// `shutdown` is looked at.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<BridgeCommand>,
        mut events: mpsc::UnboundedReceiver<PeripheralEvent>,
        shutdown: impl Future<Output = ()>,
    ) {
        info!("GATT server plugin running");
        let mut commands_open = true;
        let mut events_open = true;
        tokio::pin!(shutdown);

        while commands_open || events_open {
            tokio::select! {
                biased;
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.execute(command).await,
                    None => {
                        debug!("Command channel closed");
                        commands_open = false;
                    }
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_peripheral_event(event).await,
                    None => {
                        debug!("Peripheral event channel closed");
                        events_open = false;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    /// Stop advertising, silence the alarm and remove the status notification
    pub async fn shutdown(&mut self) {
        if self.backend.is_advertising() {
            if let Err(e) = self.backend.stop_advertising().await {
                warn!("Could not stop advertising: {}", e);
            }
        }
        self.presenter.stop_sound();
        if let Some(id) = self.active_notification.take() {
            self.presenter.clear_notification(id);
        }
        self.presenter.update_status(None);
        self.server_running_callback = None;
        info!("GATT server plugin stopped");
    }

    /// Execute one bridge command. Every outcome is sent as a result.
    pub async fn execute(&mut self, command: BridgeCommand) {
        let callback_id = command.callback_id.clone();
        let outcome = match command.action.as_str() {
            action::START_SERVER => self.start_server(&command).await,
            action::ALARM => self.alarm_command(&command),
            action::STOP_ALARM => Ok(self.stop_alarm(&callback_id)),
            action::REGISTER_NOTIFICATIONS => Ok(self.register_notifications(&callback_id)),
            action::GET_ALARM_SETTINGS => Ok(self.get_alarm_settings(&callback_id)),
            action::SET_ALARM_SETTINGS => self.set_alarm_settings(&command),
            action::IS_BLUETOOTH_SHARING_AUTHORIZED => {
                Ok(self.bluetooth_sharing_authorization(&callback_id).await)
            }
            action::SET_APPLICATION_BADGE_NUMBER => self.set_application_badge_number(&command),
            other => Err(PluginError::InvalidAction(other.to_string())),
        };

        match outcome {
            Ok(Some(result)) => self.send(result),
            Ok(None) => {}
            Err(e) => {
                warn!("Action '{}' failed: {}", command.action, e);
                self.send(PluginResult::from_error(&callback_id, &e));
            }
        }
    }

    fn send(&self, result: PluginResult) {
        if self.result_sender.send(result).is_err() {
            error!("Bridge result channel closed");
        }
    }

    /// Send to the saved server-running callback, if any
    fn notify_server_callback(&self, status: &str, fields: Value) {
        match &self.server_running_callback {
            Some(callback_id) => self.send(PluginResult::ok(callback_id, status, fields).keep()),
            None => debug!("No server callback for '{}'", status),
        }
    }

    // ---- startServer ----

    /// Whether the service still has to be added or advertising started
    fn needs_setup(&self) -> bool {
        !self.ias_added || !self.backend.is_advertising()
    }

    async fn start_server(
        &mut self,
        command: &BridgeCommand,
    ) -> Result<Option<PluginResult>, PluginError> {
        let callback_id = &command.callback_id;

        if let Some(local_name) = command
            .first_arg()
            .and_then(|options| options.get("localName"))
        {
            let local_name = local_name
                .as_str()
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    PluginError::InvalidArguments("localName must be a non-empty string".into())
                })?;
            self.local_name = local_name.to_string();
        }

        if self.server_running_callback.is_some() && !self.needs_setup() {
            info!("GATT server is already running");
            return Ok(Some(
                PluginResult::ok(callback_id, STATUS_SERVICE_EXISTS, Value::Null).keep(),
            ));
        }

        // An unfinished setup is resumed for the new caller
        if let Some(previous) = self.server_running_callback.replace(callback_id.clone()) {
            info!("Resuming GATT server setup started by '{}'", previous);
        }
        self.powered = self.backend.is_powered().await;

        if !self.powered {
            info!("Bluetooth is off, server setup deferred");
            return Ok(Some(
                PluginResult::ok(callback_id, STATUS_WAITING_FOR_BLUETOOTH, Value::Null).keep(),
            ));
        }

        self.setup_server().await;
        Ok(None)
    }

    /// Add the Immediate Alert Service (once) and start advertising.
    /// Results go to the server callback.
    async fn setup_server(&mut self) {
        if let Err(e) = self.add_immediate_alert_service().await {
            error!("Could not start GATT server: {}", e);
            if let Some(callback_id) = self.server_running_callback.take() {
                self.send(PluginResult::from_error(&callback_id, &e).keep());
            }
            return;
        }

        let local_name = self.local_name.clone();
        let uuids = [protocol::IMMEDIATE_ALERT_SERVICE_UUID.to_string()];
        match self.backend.start_advertising(&local_name, &uuids).await {
            Ok(()) => {
                info!("Advertising Immediate Alert Service as '{}'", local_name);
                self.notify_server_callback(
                    STATUS_ADVERTISING_STARTED,
                    json!({ "localName": local_name }),
                );
                self.presenter.update_status(Some(STATUS_TEXT_CONNECTING));
            }
            Err(e) => {
                let e = PluginError::Advertising(e);
                error!("{}", e);
                if let Some(callback_id) = &self.server_running_callback {
                    self.send(PluginResult::from_error(callback_id, &e).keep());
                }
            }
        }
    }

    async fn add_immediate_alert_service(&mut self) -> Result<(), PluginError> {
        if self.ias_added {
            self.notify_server_callback(STATUS_SERVICE_EXISTS, Value::Null);
            return Ok(());
        }

        let service = self
            .immediate_alert_service
            .get_or_insert_with(ServiceDefinition::immediate_alert)
            .clone();

        match self.backend.add_service(&service).await {
            Ok(outcome) => {
                self.ias_added = true;
                let status = match outcome {
                    ServiceAddOutcome::Added => STATUS_SERVICE_ADDED,
                    ServiceAddOutcome::AlreadyProvided => STATUS_SERVICE_EXISTS,
                };
                info!("Immediate Alert Service: {}", status);
                self.notify_server_callback(status, json!({ "service": service.uuid }));
                Ok(())
            }
            Err(e) => Err(PluginError::ServiceNotAdded(e)),
        }
    }

    // ---- alarm ----

    fn alarm_command(&mut self, command: &BridgeCommand) -> Result<Option<PluginResult>, PluginError> {
        let params = command
            .first_arg()
            .ok_or_else(|| PluginError::InvalidArguments("missing alarm parameters".into()))?;

        let level = params
            .get("alertLevel")
            .and_then(Value::as_u64)
            .and_then(|level| u8::try_from(level).ok())
            .and_then(|level| AlertLevel::try_from(level).ok())
            .ok_or_else(|| PluginError::InvalidArguments("alertLevel must be 0, 1 or 2".into()))?;
        let device = params
            .get("deviceUUID")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        let outcome = self.alarm(level, device, Instant::now());
        Ok(Some(self.alarm_result(&command.callback_id, outcome, level, device)))
    }

    fn alarm_result(
        &self,
        callback_id: &str,
        outcome: AlarmOutcome,
        level: AlertLevel,
        device: &str,
    ) -> PluginResult {
        let status = match outcome {
            AlarmOutcome::Triggered => STATUS_ALARM_TRIGGERED,
            AlarmOutcome::Suppressed => STATUS_ALARM_SUPPRESSED,
            AlarmOutcome::Reset => STATUS_ALARM_RESET,
        };
        PluginResult::ok(
            callback_id,
            status,
            json!({ "alertLevel": level.as_byte(), "device": device }),
        )
    }

    /// Trigger or reset the alarm for `device` at time `now`
    pub fn alarm(&mut self, level: AlertLevel, device: &str, now: Instant) -> AlarmOutcome {
        if !level.is_alarm() {
            self.reset_alarm();
            return AlarmOutcome::Reset;
        }

        if !self.debouncer.trigger(now) {
            debug!("Alarm from {} suppressed", device);
            return AlarmOutcome::Suppressed;
        }

        let alarm_settings = self.settings.get().alarm.clone();

        if alarm_settings.alert_enabled() {
            if let Some(previous) = self.active_notification.take() {
                self.presenter.clear_notification(previous);
            }
            let notification = AlarmNotification::for_alarm(device, level);
            self.active_notification = Some(self.presenter.show_notification(&notification));
        }

        if let Some(sound) = alarm_settings.sound_name() {
            self.presenter.play_sound(sound, level == AlertLevel::High);
        }

        if alarm_settings.vibration_enabled() {
            self.presenter.vibrate();
        }

        if alarm_settings.log_enabled() {
            info!(target: ALARM_LOG_TARGET, device, level = ?level, "Alarm triggered");
        }

        info!("Alarm {:?} triggered by {}", level, device);
        AlarmOutcome::Triggered
    }

    fn reset_alarm(&mut self) {
        if self.presenter.is_playing() {
            self.presenter.stop_sound();
        }
        if let Some(id) = self.active_notification.take() {
            self.presenter.clear_notification(id);
        }
        info!("Alarm reset");
    }

    fn stop_alarm(&mut self, callback_id: &str) -> Option<PluginResult> {
        self.presenter.stop_sound();
        Some(PluginResult::ok(callback_id, STATUS_ALARM_STOPPED, Value::Null))
    }

    // ---- notifications, settings, authorization, badge ----

    fn register_notifications(&mut self, callback_id: &str) -> Option<PluginResult> {
        let granted = self.presenter.request_permission();
        Some(PluginResult::ok(
            callback_id,
            STATUS_NOTIFICATIONS_REGISTERED,
            json!({ "granted": granted }),
        ))
    }

    fn alarm_settings_json(&self) -> Value {
        serde_json::to_value(&self.settings.get().alarm).unwrap_or(Value::Null)
    }

    fn get_alarm_settings(&self, callback_id: &str) -> Option<PluginResult> {
        Some(PluginResult::ok(
            callback_id,
            STATUS_ALARM_SETTINGS,
            json!({ "settings": self.alarm_settings_json() }),
        ))
    }

    fn set_alarm_settings(
        &mut self,
        command: &BridgeCommand,
    ) -> Result<Option<PluginResult>, PluginError> {
        let update = command
            .first_arg()
            .ok_or_else(|| PluginError::InvalidArguments("missing alarm settings".into()))?;

        let mut alarm = self.settings.get().alarm.clone();
        alarm
            .apply_update(update)
            .map_err(PluginError::InvalidArguments)?;
        self.settings.update_alarm_settings(alarm)?;
        info!("Alarm settings updated: {:?}", self.settings.get().alarm);

        Ok(self.get_alarm_settings(&command.callback_id))
    }

    async fn bluetooth_sharing_authorization(&self, callback_id: &str) -> Option<PluginResult> {
        let authorization = self.backend.authorization_status().await;
        Some(PluginResult::ok(
            callback_id,
            STATUS_AUTHORIZATION,
            json!({ "authorization": authorization }),
        ))
    }

    fn set_application_badge_number(
        &mut self,
        command: &BridgeCommand,
    ) -> Result<Option<PluginResult>, PluginError> {
        let badge = command
            .first_arg()
            .and_then(|arg| arg.get("badge").or(Some(arg)))
            .and_then(Value::as_u64)
            .and_then(|badge| u32::try_from(badge).ok())
            .ok_or_else(|| {
                PluginError::InvalidArguments("badge must be a non-negative integer".into())
            })?;

        self.presenter.set_badge(badge);
        Ok(Some(PluginResult::ok(
            &command.callback_id,
            STATUS_BADGE_SET,
            json!({ "badge": badge }),
        )))
    }

    // ---- peripheral delegate ----

    pub async fn handle_peripheral_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::StateChanged { powered } => {
                info!("Bluetooth powered: {}", powered);
                let was_powered = std::mem::replace(&mut self.powered, powered);
                if !powered && was_powered && self.backend.is_advertising() {
                    // Advertising does not survive the radio going down
                    if let Err(e) = self.backend.stop_advertising().await {
                        warn!("Could not stop advertising: {}", e);
                    }
                }
                if powered
                    && !was_powered
                    && self.server_running_callback.is_some()
                    && self.needs_setup()
                {
                    self.setup_server().await;
                }
            }
            PeripheralEvent::ServiceAdded { service, error } => match error {
                Some(error) => warn!("Service {} reported error: {}", service, error),
                None => debug!("Service {} confirmed by backend", service),
            },
            PeripheralEvent::AdvertisingStarted { error } => {
                if let Some(error) = error {
                    warn!("Advertising reported error: {}", error);
                }
            }
            PeripheralEvent::WriteRequest {
                device,
                characteristic,
                value,
            } => self.handle_write_request(&device, &characteristic, &value),
            PeripheralEvent::ConnectionStateChanged {
                device,
                state,
                status,
            } => {
                if status != 0 {
                    warn!("Connection state of {} changed with error {}", device, status);
                    if let Some(callback_id) = &self.server_running_callback {
                        self.send(
                            PluginResult::error(
                                callback_id,
                                ERROR_CONNECTION_STATE,
                                format!("{} {}", LOG_CONNECTION_STATE, status),
                            )
                            .keep(),
                        );
                    }
                    return;
                }
                info!("Device {} {:?}", device, state);
                self.presenter.update_status(Some(match state {
                    ConnectionState::Connected => STATUS_TEXT_CONNECTED,
                    ConnectionState::Disconnected => STATUS_TEXT_CONNECTING,
                }));
                self.notify_server_callback(
                    STATUS_CONNECTION_STATE,
                    json!({ "device": device, "state": state }),
                );
            }
        }
    }

    fn handle_write_request(&mut self, device: &str, characteristic: &str, value: &[u8]) {
        self.notify_server_callback(
            STATUS_WRITE_REQUEST,
            json!({
                "device": device,
                "characteristic": characteristic,
                "value": value,
            }),
        );

        if !protocol::uuid_eq(characteristic, protocol::ALERT_LEVEL_CHAR_UUID) {
            debug!("Ignoring write to {}", characteristic);
            return;
        }

        let level = match protocol::parse_alert_level(value) {
            Ok(level) => level,
            Err(e) => {
                warn!("Invalid alert level from {}: {}", device, e);
                return;
            }
        };

        let outcome = self.alarm(level, device, Instant::now());
        if let Some(callback_id) = &self.server_running_callback {
            self.send(self.alarm_result(callback_id, outcome, level, device).keep());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::command::ResultStatus;
    use crate::domain::models::{AuthorizationStatus, ConnectionState};
    use crate::domain::settings::temp_settings_path;
    use crate::infrastructure::alert::recording::{PresenterCall, RecordingPresenter};
    use crate::infrastructure::bluetooth::protocol::ALERT_LEVEL_CHAR_UUID;
    use crate::infrastructure::bluetooth::{LoopbackHandle, LoopbackPeripheral};
    use std::time::Duration;

    struct Harness {
        plugin: GattServerPlugin<LoopbackPeripheral, RecordingPresenter>,
        remote: LoopbackHandle,
        presenter: RecordingPresenter,
        results: mpsc::UnboundedReceiver<PluginResult>,
        events: mpsc::UnboundedReceiver<PeripheralEvent>,
    }

    impl Harness {
        fn new(tag: &str) -> Self {
            let (event_tx, events) = mpsc::unbounded_channel();
            let (result_tx, results) = mpsc::unbounded_channel();
            let backend = LoopbackPeripheral::new(event_tx);
            let remote = backend.handle();
            let presenter = RecordingPresenter::default();
            let settings = SettingsService::with_path(temp_settings_path(tag));
            let plugin = GattServerPlugin::new(backend, presenter.clone(), settings, result_tx);
            Self {
                plugin,
                remote,
                presenter,
                results,
                events,
            }
        }

        async fn call(&mut self, action: &str, args: Vec<Value>) -> Vec<PluginResult> {
            self.plugin
                .execute(BridgeCommand::new("cb", action, args))
                .await;
            self.drain_results()
        }

        /// Feed pending peripheral events to the plugin
        async fn pump_events(&mut self) -> Vec<PluginResult> {
            while let Ok(event) = self.events.try_recv() {
                self.plugin.handle_peripheral_event(event).await;
            }
            self.drain_results()
        }

        fn drain_results(&mut self) -> Vec<PluginResult> {
            let mut results = Vec::new();
            while let Ok(result) = self.results.try_recv() {
                results.push(result);
            }
            results
        }
    }

    fn statuses(results: &[PluginResult]) -> Vec<&str> {
        results.iter().filter_map(PluginResult::status_text).collect()
    }

    #[tokio::test]
    async fn test_start_server_adds_service_and_advertises() {
        let mut h = Harness::new("start");
        let results = h.call(action::START_SERVER, vec![]).await;

        assert_eq!(statuses(&results), vec!["serviceAdded", "advertisingStarted"]);
        assert!(results.iter().all(|r| r.keep_callback));
        assert!(h.plugin.is_server_running());
        assert!(h.plugin.is_service_added());
        assert_eq!(h.remote.advertised_name().as_deref(), Some("GattAlertServer"));
    }

    #[tokio::test]
    async fn test_service_added_at_most_once() {
        let mut h = Harness::new("once");
        h.call(action::START_SERVER, vec![]).await;
        let results = h.call(action::START_SERVER, vec![]).await;

        assert_eq!(statuses(&results), vec!["serviceAlreadyProvided"]);
        assert_eq!(h.remote.add_service_calls(), 1);
        assert_eq!(h.remote.hosted_services().len(), 1);
    }

    #[tokio::test]
    async fn test_start_server_with_local_name() {
        let mut h = Harness::new("name");
        h.call(action::START_SERVER, vec![json!({ "localName": "Tag" })])
            .await;
        assert_eq!(h.remote.advertised_name().as_deref(), Some("Tag"));

        // Saving alarm settings must not persist the per-run name
        h.call(action::SET_ALARM_SETTINGS, vec![json!({ "sound": "chime" })])
            .await;
        let reloaded = SettingsService::with_path(h.plugin.settings().path().to_path_buf());
        assert_eq!(reloaded.get().alarm.sound, "chime");
        assert_eq!(reloaded.get().server.local_name, "GattAlertServer");

        let _ = std::fs::remove_dir_all(h.plugin.settings().path().parent().unwrap());
    }

    #[tokio::test]
    async fn test_start_server_rejects_empty_local_name() {
        let mut h = Harness::new("emptyname");
        let results = h
            .call(action::START_SERVER, vec![json!({ "localName": "" })])
            .await;
        assert_eq!(results[0].error_text(), Some("invalidArguments"));
        assert!(!h.plugin.is_server_running());
    }

    #[tokio::test]
    async fn test_service_failure_allows_retry() {
        let mut h = Harness::new("retry");
        h.remote.fail_next_add_service();

        let results = h.call(action::START_SERVER, vec![]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ResultStatus::Error);
        assert_eq!(results[0].error_text(), Some("startServer"));
        assert_eq!(
            results[0].message["message"],
            "Immediate Alert service could not be added"
        );
        assert!(!h.plugin.is_server_running());

        let results = h.call(action::START_SERVER, vec![]).await;
        assert_eq!(statuses(&results), vec!["serviceAdded", "advertisingStarted"]);
    }

    #[tokio::test]
    async fn test_start_waits_for_bluetooth() {
        let mut h = Harness::new("powered");
        h.remote.set_powered(false);
        h.pump_events().await;

        let results = h.call(action::START_SERVER, vec![]).await;
        assert_eq!(statuses(&results), vec!["waitingForBluetooth"]);
        assert_eq!(h.remote.add_service_calls(), 0);

        h.remote.set_powered(true);
        let results = h.pump_events().await;
        assert_eq!(statuses(&results), vec!["serviceAdded", "advertisingStarted"]);
        assert!(results.iter().all(|r| r.callback_id == "cb"));
    }

    #[tokio::test]
    async fn test_start_server_resumes_when_power_event_is_missed() {
        let mut h = Harness::new("missedpower");
        h.remote.set_powered(false);
        let results = h.call(action::START_SERVER, vec![]).await;
        assert_eq!(statuses(&results), vec!["waitingForBluetooth"]);

        // The radio comes back but its event never reaches the plugin
        h.remote.set_powered(true);
        while h.events.try_recv().is_ok() {}

        h.plugin
            .execute(BridgeCommand::new("cb2", action::START_SERVER, vec![]))
            .await;
        let results = h.drain_results();
        assert_eq!(statuses(&results), vec!["serviceAdded", "advertisingStarted"]);
        assert!(results.iter().all(|r| r.callback_id == "cb2"));
        assert_eq!(h.remote.add_service_calls(), 1);
        assert!(h.remote.advertised_name().is_some());

        let results = h.call(action::START_SERVER, vec![]).await;
        assert_eq!(statuses(&results), vec!["serviceAlreadyProvided"]);
    }

    #[tokio::test]
    async fn test_advertising_failure_allows_retry() {
        let mut h = Harness::new("advretry");
        h.remote.fail_next_advertising();

        let results = h.call(action::START_SERVER, vec![]).await;
        assert_eq!(results[0].status_text(), Some("serviceAdded"));
        assert_eq!(results[1].status, ResultStatus::Error);
        assert_eq!(results[1].error_text(), Some("startAdvertising"));
        assert!(h.plugin.is_server_running());
        assert!(h.remote.advertised_name().is_none());

        let results = h.call(action::START_SERVER, vec![]).await;
        assert_eq!(
            statuses(&results),
            vec!["serviceAlreadyProvided", "advertisingStarted"]
        );
        assert_eq!(h.remote.add_service_calls(), 1);
        assert!(h.remote.advertised_name().is_some());
    }

    #[tokio::test]
    async fn test_advertising_restarts_after_power_cycle() {
        let mut h = Harness::new("powercycle");
        h.call(action::START_SERVER, vec![]).await;
        h.pump_events().await;

        h.remote.set_powered(false);
        h.pump_events().await;
        assert!(h.remote.advertised_name().is_none());

        h.remote.set_powered(true);
        let results = h.pump_events().await;
        assert_eq!(
            statuses(&results),
            vec!["serviceAlreadyProvided", "advertisingStarted"]
        );
        assert_eq!(h.remote.add_service_calls(), 1);
    }

    #[tokio::test]
    async fn test_remote_write_triggers_alarm_then_suppresses() {
        let mut h = Harness::new("write");
        h.call(action::START_SERVER, vec![]).await;
        h.pump_events().await;
        h.presenter.take_calls();

        h.remote.write("AA:BB", ALERT_LEVEL_CHAR_UUID, &[0x02]).unwrap();
        let results = h.pump_events().await;
        assert_eq!(
            statuses(&results),
            vec!["serviceRemoteWriteRequest", "alarmTriggered"]
        );
        assert_eq!(results[0].message["device"], "AA:BB");
        assert_eq!(results[0].message["value"], json!([2]));

        let calls = h.presenter.take_calls();
        assert!(matches!(calls[0], PresenterCall::ShowNotification(_)));
        assert!(calls.contains(&PresenterCall::PlaySound {
            sound: "default".to_string(),
            repeat: true,
        }));
        assert!(calls.contains(&PresenterCall::Vibrate));

        h.remote.write("AA:BB", ALERT_LEVEL_CHAR_UUID, &[0x02]).unwrap();
        let results = h.pump_events().await;
        assert_eq!(
            statuses(&results),
            vec!["serviceRemoteWriteRequest", "alarmSuppressed"]
        );
        assert!(h.presenter.take_calls().is_empty());
    }

    #[tokio::test]
    async fn test_alarm_debounce_uses_minimum_interval() {
        let mut h = Harness::new("debounce");
        let t0 = Instant::now();
        assert_eq!(h.plugin.alarm(AlertLevel::Mild, "d", t0), AlarmOutcome::Triggered);
        assert_eq!(
            h.plugin
                .alarm(AlertLevel::High, "d", t0 + Duration::from_millis(2500)),
            AlarmOutcome::Suppressed
        );
        assert_eq!(
            h.plugin
                .alarm(AlertLevel::High, "d", t0 + Duration::from_millis(5500)),
            AlarmOutcome::Triggered
        );
    }

    #[tokio::test]
    async fn test_alarm_interval_ignores_settings_file() {
        let path = temp_settings_path("fixedinterval");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{ "server": { "alarm_min_interval_ms": 0 } }"#).unwrap();

        let mut h = Harness::new("fixedinterval");
        let t0 = Instant::now();
        assert_eq!(h.plugin.alarm(AlertLevel::High, "d", t0), AlarmOutcome::Triggered);
        assert_eq!(
            h.plugin
                .alarm(AlertLevel::High, "d", t0 + Duration::from_millis(1)),
            AlarmOutcome::Suppressed
        );

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_reset_stops_sound_and_clears_notification() {
        let mut h = Harness::new("reset");
        let results = h
            .call(action::ALARM, vec![json!({ "alertLevel": 2, "deviceUUID": "X" })])
            .await;
        assert_eq!(statuses(&results), vec!["alarmTriggered"]);
        h.presenter.take_calls();

        let results = h
            .call(action::ALARM, vec![json!({ "alertLevel": 0, "deviceUUID": "X" })])
            .await;
        assert_eq!(statuses(&results), vec!["alarmReset"]);
        assert_eq!(
            h.presenter.take_calls(),
            vec![
                PresenterCall::StopSound,
                PresenterCall::ClearNotification(NotificationId(1)),
            ]
        );
    }

    #[tokio::test]
    async fn test_alarm_respects_settings() {
        let mut h = Harness::new("muted");
        h.call(
            action::SET_ALARM_SETTINGS,
            vec![json!({ "alert": "off", "sound": "off", "vibration": "off" })],
        )
        .await;
        h.presenter.take_calls();

        let results = h
            .call(action::ALARM, vec![json!({ "alertLevel": 1, "deviceUUID": "X" })])
            .await;
        assert_eq!(statuses(&results), vec!["alarmTriggered"]);
        assert!(h.presenter.take_calls().is_empty());

        let _ = std::fs::remove_dir_all(h.plugin.settings().path().parent().unwrap());
    }

    #[tokio::test]
    async fn test_mild_alarm_plays_once() {
        let mut h = Harness::new("mild");
        h.call(action::ALARM, vec![json!({ "alertLevel": 1, "deviceUUID": "X" })])
            .await;
        assert!(h.presenter.take_calls().contains(&PresenterCall::PlaySound {
            sound: "default".to_string(),
            repeat: false,
        }));
    }

    #[tokio::test]
    async fn test_alarm_rejects_bad_level() {
        let mut h = Harness::new("badlevel");
        let results = h
            .call(action::ALARM, vec![json!({ "alertLevel": 5 })])
            .await;
        assert_eq!(results[0].status, ResultStatus::Error);
        assert_eq!(results[0].error_text(), Some("invalidArguments"));
    }

    #[tokio::test]
    async fn test_stop_alarm() {
        let mut h = Harness::new("stop");
        let results = h.call(action::STOP_ALARM, vec![]).await;
        assert_eq!(statuses(&results), vec!["alarmStopped"]);
        assert_eq!(h.presenter.take_calls(), vec![PresenterCall::StopSound]);
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let mut h = Harness::new("settings");
        let results = h
            .call(action::SET_ALARM_SETTINGS, vec![json!({ "sound": "chime", "log": "on" })])
            .await;
        assert_eq!(statuses(&results), vec!["alarmSettings"]);

        let results = h.call(action::GET_ALARM_SETTINGS, vec![]).await;
        assert_eq!(
            results[0].message["settings"],
            json!({ "alert": "on", "sound": "chime", "vibration": "on", "log": "on" })
        );

        let results = h
            .call(action::SET_ALARM_SETTINGS, vec![json!({ "alert": "loud" })])
            .await;
        assert_eq!(results[0].error_text(), Some("invalidArguments"));

        let _ = std::fs::remove_dir_all(h.plugin.settings().path().parent().unwrap());
    }

    #[tokio::test]
    async fn test_authorization_status() {
        let mut h = Harness::new("auth");
        h.remote.set_authorization(AuthorizationStatus::Denied);
        let results = h.call(action::IS_BLUETOOTH_SHARING_AUTHORIZED, vec![]).await;
        assert_eq!(results[0].message["authorization"], "denied");
    }

    #[tokio::test]
    async fn test_badge_number() {
        let mut h = Harness::new("badge");
        let results = h
            .call(action::SET_APPLICATION_BADGE_NUMBER, vec![json!({ "badge": 3 })])
            .await;
        assert_eq!(results[0].message["badge"], 3);

        h.call(action::SET_APPLICATION_BADGE_NUMBER, vec![json!(0)])
            .await;
        assert_eq!(
            h.presenter.take_calls(),
            vec![PresenterCall::SetBadge(3), PresenterCall::SetBadge(0)]
        );

        let results = h
            .call(action::SET_APPLICATION_BADGE_NUMBER, vec![json!(-1)])
            .await;
        assert_eq!(results[0].status, ResultStatus::Error);
    }

    #[tokio::test]
    async fn test_register_notifications() {
        let mut h = Harness::new("notify");
        let results = h.call(action::REGISTER_NOTIFICATIONS, vec![]).await;
        assert_eq!(results[0].message["granted"], true);
        assert_eq!(h.presenter.take_calls(), vec![PresenterCall::RequestPermission]);
    }

    #[tokio::test]
    async fn test_connection_state_forwarded() {
        let mut h = Harness::new("conn");
        h.call(action::START_SERVER, vec![]).await;
        h.pump_events().await;

        h.remote.connect("AA");
        h.remote.disconnect("AA", 0);
        h.remote.disconnect("AA", 8);
        let results = h.pump_events().await;

        assert_eq!(results[0].status_text(), Some("serverConnectionState"));
        assert_eq!(
            results[0].message["state"],
            json!(ConnectionState::Connected)
        );
        assert_eq!(results[1].status_text(), Some("serverConnectionState"));
        assert_eq!(results[1].message["device"], "AA");
        assert_eq!(results[1].message["state"], "disconnected");
        assert_eq!(results[2].error_text(), Some("serverConnectionState"));
        assert_eq!(
            results[2].message["message"],
            "Connection state changed with error 8"
        );
    }

    #[tokio::test]
    async fn test_status_notification_follows_connection() {
        let mut h = Harness::new("status");
        h.call(action::START_SERVER, vec![]).await;
        h.pump_events().await;
        assert!(h
            .presenter
            .take_calls()
            .contains(&PresenterCall::UpdateStatus(Some(
                "Connecting to alarm clip.".to_string()
            ))));

        h.remote.connect("AA");
        h.pump_events().await;
        assert_eq!(
            h.presenter.take_calls(),
            vec![PresenterCall::UpdateStatus(Some(
                "Connected with alarm clip.".to_string()
            ))]
        );

        h.remote.disconnect("AA", 0);
        h.pump_events().await;
        assert_eq!(
            h.presenter.take_calls(),
            vec![PresenterCall::UpdateStatus(Some(
                "Connecting to alarm clip.".to_string()
            ))]
        );
    }

    #[tokio::test]
    async fn test_run_tears_down_on_shutdown() {
        let Harness {
            plugin,
            remote,
            presenter,
            mut results,
            events,
        } = Harness::new("shutdown");
        let (command_tx, commands) = mpsc::unbounded_channel();
        command_tx
            .send(BridgeCommand::new("cb", action::START_SERVER, vec![]))
            .unwrap();
        command_tx
            .send(BridgeCommand::new(
                "alarm",
                action::ALARM,
                vec![json!({ "alertLevel": 2, "deviceUUID": "X" })],
            ))
            .unwrap();

        plugin
            .run(commands, events, std::future::ready(()))
            .await;

        let mut seen = Vec::new();
        while let Ok(result) = results.try_recv() {
            seen.push(result);
        }
        assert!(statuses(&seen).contains(&"alarmTriggered"));
        assert!(remote.advertised_name().is_none());

        let calls = presenter.take_calls();
        assert!(calls.ends_with(&[
            PresenterCall::StopSound,
            PresenterCall::ClearNotification(NotificationId(1)),
            PresenterCall::UpdateStatus(None),
        ]));
        drop(command_tx);
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let mut h = Harness::new("unknown");
        let results = h.call("scan", vec![]).await;
        assert_eq!(results[0].error_text(), Some("invalidAction"));
        assert!(!results[0].keep_callback);
    }
}
