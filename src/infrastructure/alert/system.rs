use crate::domain::models::{AlarmNotification, NotificationId};
use crate::infrastructure::alert::AlertPresenter;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Delay between two beeps of a repeating alarm sound
const SOUND_REPEAT_INTERVAL_MS: u64 = 1000;

const STATUS_TITLE: &str = "GATT Alert Server";

/// Presents alarms with what the host offers: beeps for sound and tracing
/// for notifications. Desktop hosts have no vibration motor or badge, so
/// those are traced as well.
pub struct SystemPresenter {
    next_notification: u64,
    active_notifications: Vec<NotificationId>,
    sound_task: Option<JoinHandle<()>>,
    badge: u32,
    status: Option<String>,
    permission_granted: bool,
}

impl SystemPresenter {
    pub fn new() -> Self {
        Self {
            next_notification: 1,
            active_notifications: Vec::new(),
            sound_task: None,
            badge: 0,
            status: None,
            permission_granted: false,
        }
    }

    pub fn badge(&self) -> u32 {
        self.badge
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}

impl Default for SystemPresenter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
fn beep() {
    use windows::Win32::UI::WindowsAndMessaging::{MessageBeep, MB_ICONEXCLAMATION};

    // SAFETY: MessageBeep has no pointer arguments
    if let Err(e) = unsafe { MessageBeep(MB_ICONEXCLAMATION) } {
        warn!("MessageBeep failed: {}", e);
    }
}

#[cfg(not(windows))]
fn beep() {
    use std::io::Write;

    let mut stdout = std::io::stdout();
    if let Err(e) = stdout.write_all(b"\x07").and_then(|_| stdout.flush()) {
        warn!("Could not ring terminal bell: {}", e);
    }
}

impl AlertPresenter for SystemPresenter {
    fn request_permission(&mut self) -> bool {
        self.permission_granted = true;
        info!("Notification permission granted");
        self.permission_granted
    }

    fn show_notification(&mut self, notification: &AlarmNotification) -> NotificationId {
        let id = NotificationId(self.next_notification);
        self.next_notification += 1;
        if !self.permission_granted {
            debug!("Showing notification without registered permission");
        }
        info!(
            "Notification #{}: {} - {}",
            id.0, notification.title, notification.body
        );
        self.active_notifications.push(id);
        id
    }

    fn clear_notification(&mut self, id: NotificationId) {
        self.active_notifications.retain(|n| *n != id);
        debug!("Notification #{} cleared", id.0);
    }

    fn play_sound(&mut self, sound: &str, repeat: bool) {
        self.stop_sound();
        info!("Playing alarm sound '{}' (repeat: {})", sound, repeat);

        if !repeat {
            beep();
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.sound_task = Some(handle.spawn(async {
                    loop {
                        beep();
                        tokio::time::sleep(Duration::from_millis(SOUND_REPEAT_INTERVAL_MS)).await;
                    }
                }));
            }
            Err(_) => {
                warn!("No async runtime, alarm sound played once");
                beep();
            }
        }
    }

    fn stop_sound(&mut self) {
        if let Some(task) = self.sound_task.take() {
            task.abort();
            info!("Alarm sound stopped");
        }
    }

    fn is_playing(&self) -> bool {
        self.sound_task
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    fn vibrate(&mut self) {
        info!("Vibration requested (not supported on this host)");
    }

    fn set_badge(&mut self, count: u32) {
        self.badge = count;
        info!("Application badge set to {}", count);
    }

    fn update_status(&mut self, text: Option<&str>) {
        match text {
            Some(text) if self.status.as_deref() != Some(text) => {
                info!("{}: {}", STATUS_TITLE, text);
            }
            Some(_) => {}
            None if self.status.is_some() => debug!("{} status removed", STATUS_TITLE),
            None => {}
        }
        self.status = text.map(str::to_string);
    }
}

impl Drop for SystemPresenter {
    fn drop(&mut self) {
        self.stop_sound();
    }
}
