//! Timer notifications.
//!
//! Each timer event may raise up to three signals: a desktop notification
//! (only when the sink reports permission), a short tone, and an in-app
//! toast. Every channel is toggled separately by `NotificationPreferences`.

mod preferences;

pub use preferences::{
    FilePreferenceStore, MemoryPreferenceStore, NotificationPreferences, PreferenceStore,
    PREFERENCES_KEY,
};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::timer::TimerState;

/// Tone length for every alert.
pub const TONE_DURATION_MS: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Started,
    Paused,
    Resumed,
    Stopped,
    TimeWarning,
    TimeExceeded,
}

impl NotificationKind {
    /// Tone frequency in Hz.
    pub fn tone_hz(self) -> u32 {
        match self {
            NotificationKind::Started => 800,
            NotificationKind::Paused => 600,
            NotificationKind::Resumed => 700,
            NotificationKind::Stopped => 400,
            NotificationKind::TimeWarning => 1000,
            NotificationKind::TimeExceeded => 1200,
        }
    }

    pub fn heading(self) -> &'static str {
        match self {
            NotificationKind::Started => "Timer started",
            NotificationKind::Paused => "Timer paused",
            NotificationKind::Resumed => "Timer resumed",
            NotificationKind::Stopped => "Timer stopped",
            NotificationKind::TimeWarning => "Time running out",
            NotificationKind::TimeExceeded => "Time exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

/// Platform side of notifications.
pub trait NotificationSink: Send + Sync {
    /// Whether the platform allows desktop notifications.
    fn permission_granted(&self) -> bool;
    fn show_desktop(&self, notification: &Notification);
    fn play_tone(&self, frequency_hz: u32, duration_ms: u32);
    fn show_toast(&self, notification: &Notification);
}

/// Sink that only logs, for headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn permission_granted(&self) -> bool {
        true
    }

    fn show_desktop(&self, notification: &Notification) {
        info!(kind = ?notification.kind, title = %notification.title, body = %notification.body, "desktop notification");
    }

    fn play_tone(&self, frequency_hz: u32, duration_ms: u32) {
        info!(frequency_hz, duration_ms, "tone");
    }

    fn show_toast(&self, notification: &Notification) {
        info!(kind = ?notification.kind, body = %notification.body, "toast");
    }
}

/// Which channels fired for one notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub desktop: bool,
    pub tone_hz: Option<u32>,
    pub toast: bool,
}

impl Delivery {
    pub fn is_silent(&self) -> bool {
        !self.desktop && self.tone_hz.is_none() && !self.toast
    }
}

pub struct TimerNotifier<S: NotificationSink> {
    sink: S,
    store: Box<dyn PreferenceStore>,
    prefs: NotificationPreferences,
    /// (timer id, kind) threshold alerts already raised.
    fired: HashSet<(String, NotificationKind)>,
}

impl<S: NotificationSink> TimerNotifier<S> {
    pub fn new(sink: S, store: Box<dyn PreferenceStore>) -> Self {
        let prefs = store.load();
        Self {
            sink,
            store,
            prefs,
            fired: HashSet::new(),
        }
    }

    pub fn preferences(&self) -> NotificationPreferences {
        self.prefs
    }

    /// Replace and persist the preferences.
    ///
    /// # Errors
    /// Storage failure; the new preferences still apply in memory.
    pub fn set_preferences(&mut self, prefs: NotificationPreferences) -> Result<()> {
        self.prefs = prefs;
        self.store.save(&prefs)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn notify_timer_started(&self, title: &str) -> Delivery {
        self.send(NotificationKind::Started, title, format!("Started working on {title}"))
    }

    pub fn notify_timer_paused(&self, title: &str) -> Delivery {
        self.send(NotificationKind::Paused, title, format!("Paused {title}"))
    }

    pub fn notify_timer_resumed(&self, title: &str) -> Delivery {
        self.send(NotificationKind::Resumed, title, format!("Resumed {title}"))
    }

    pub fn notify_timer_stopped(&self, title: &str) -> Delivery {
        self.send(NotificationKind::Stopped, title, format!("Stopped {title}"))
    }

    pub fn notify_time_warning(&self, title: &str, minutes_remaining: i64) -> Delivery {
        self.send(
            NotificationKind::TimeWarning,
            title,
            format!("{minutes_remaining} minutes remaining on {title}"),
        )
    }

    pub fn notify_time_exceeded(&self, title: &str, minutes_over: i64) -> Delivery {
        self.send(
            NotificationKind::TimeExceeded,
            title,
            format!("{title} is {minutes_over} minutes over its allocation"),
        )
    }

    /// Raise the warning and exceeded alerts for a timer, each at most once.
    pub fn observe(&mut self, state: &TimerState, warning_minutes: u32) -> Option<Delivery> {
        let title = if state.job_card_title.is_empty() {
            state.job_card_id.as_str()
        } else {
            state.job_card_title.as_str()
        };

        if state.is_exceeded() {
            let key = (state.id.clone(), NotificationKind::TimeExceeded);
            if self.fired.insert(key) {
                let minutes_over = (-state.time_remaining + 59) / 60;
                return Some(self.notify_time_exceeded(title, minutes_over));
            }
            return None;
        }

        let warning_secs = i64::from(warning_minutes) * 60;
        if state.time_remaining <= warning_secs {
            let key = (state.id.clone(), NotificationKind::TimeWarning);
            if self.fired.insert(key) {
                let minutes_remaining = (state.time_remaining + 59) / 60;
                return Some(self.notify_time_warning(title, minutes_remaining));
            }
        }
        None
    }

    /// Forget threshold alerts raised for a timer.
    pub fn reset(&mut self, timer_id: &str) {
        self.fired.retain(|(id, _)| id != timer_id);
    }

    fn send(&self, kind: NotificationKind, title: &str, body: String) -> Delivery {
        let notification = Notification {
            kind,
            title: format!("{}: {title}", kind.heading()),
            body,
        };
        let mut delivery = Delivery::default();

        if self.prefs.browser_notifications && self.sink.permission_granted() {
            self.sink.show_desktop(&notification);
            delivery.desktop = true;
        }
        if self.prefs.audio_alerts {
            self.sink.play_tone(kind.tone_hz(), TONE_DURATION_MS);
            delivery.tone_hz = Some(kind.tone_hz());
        }
        if self.prefs.visual_indicators {
            self.sink.show_toast(&notification);
            delivery.toast = true;
        }
        delivery
    }
}
