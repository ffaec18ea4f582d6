use crate::domain::models::{AlarmNotification, NotificationId};
use crate::infrastructure::alert::AlertPresenter;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenterCall {
    RequestPermission,
    ShowNotification(AlarmNotification),
    ClearNotification(NotificationId),
    PlaySound { sound: String, repeat: bool },
    StopSound,
    Vibrate,
    SetBadge(u32),
    UpdateStatus(Option<String>),
}

/// Presenter that records every call, shared with the test through `calls`
#[derive(Default, Clone)]
pub struct RecordingPresenter {
    pub calls: Arc<Mutex<Vec<PresenterCall>>>,
    playing: bool,
    next_id: u64,
}

impl RecordingPresenter {
    pub fn take_calls(&self) -> Vec<PresenterCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn record(&self, call: PresenterCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl AlertPresenter for RecordingPresenter {
    fn request_permission(&mut self) -> bool {
        self.record(PresenterCall::RequestPermission);
        true
    }

    fn show_notification(&mut self, notification: &AlarmNotification) -> NotificationId {
        self.next_id += 1;
        self.record(PresenterCall::ShowNotification(notification.clone()));
        NotificationId(self.next_id)
    }

    fn clear_notification(&mut self, id: NotificationId) {
        self.record(PresenterCall::ClearNotification(id));
    }

    fn play_sound(&mut self, sound: &str, repeat: bool) {
        self.playing = repeat;
        self.record(PresenterCall::PlaySound {
            sound: sound.to_string(),
            repeat,
        });
    }

    fn stop_sound(&mut self) {
        self.playing = false;
        self.record(PresenterCall::StopSound);
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn vibrate(&mut self) {
        self.record(PresenterCall::Vibrate);
    }

    fn set_badge(&mut self, count: u32) {
        self.record(PresenterCall::SetBadge(count));
    }

    fn update_status(&mut self, text: Option<&str>) {
        self.record(PresenterCall::UpdateStatus(text.map(str::to_string)));
    }
}
