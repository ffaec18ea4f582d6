//! Alarm presentation: notifications, sound, vibration and badge count.

pub mod system;

#[cfg(test)]
pub mod recording;

use crate::domain::models::{AlarmNotification, NotificationId};

pub use system::SystemPresenter;

pub trait AlertPresenter {
    /// Ask for permission to post notifications. Returns whether it was granted.
    fn request_permission(&mut self) -> bool;

    fn show_notification(&mut self, notification: &AlarmNotification) -> NotificationId;

    fn clear_notification(&mut self, id: NotificationId);

    /// Start playing `sound`. A repeating sound plays until [`stop_sound`](Self::stop_sound).
    fn play_sound(&mut self, sound: &str, repeat: bool);

    fn stop_sound(&mut self);

    fn is_playing(&self) -> bool;

    fn vibrate(&mut self);

    fn set_badge(&mut self, count: u32);

    /// Show or replace the ongoing server status notification. `None` removes it.
    fn update_status(&mut self, text: Option<&str>);
}
