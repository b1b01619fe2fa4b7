//! Transient user notifications ("toasts").

use std::time::{Duration, Instant};

use log::{error, info, warn};
use serde::Serialize;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Info,
    Warning,
    Error,
}

impl ToastKind {
    pub fn icon(self) -> &'static str {
        match self {
            Self::Success => "utility:success",
            Self::Info => "utility:info",
            Self::Warning => "utility:warning",
            Self::Error => "utility:error",
        }
    }

    pub fn css_class(self) -> String {
        let name = match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        format!("toast toast-{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
    /// `None` for sticky toasts.
    pub expires_at: Option<Instant>,
}

/// Shows at most one toast at a time. A new toast replaces the current one
/// along with its timer.
#[derive(Debug, Clone)]
pub struct Notifier {
    info_ttl: Duration,
    warning_ttl: Duration,
    current: Option<Toast>,
}

impl Notifier {
    pub fn new(config: &Config) -> Self {
        Self {
            info_ttl: Duration::from_millis(config.toast_info_ms),
            warning_ttl: Duration::from_millis(config.toast_warning_ms),
            current: None,
        }
    }

    pub fn success<S: Into<String>>(&mut self, message: S, now: Instant) {
        self.show(ToastKind::Success, message, now)
    }

    pub fn info<S: Into<String>>(&mut self, message: S, now: Instant) {
        self.show(ToastKind::Info, message, now)
    }

    pub fn warning<S: Into<String>>(&mut self, message: S, now: Instant) {
        self.show(ToastKind::Warning, message, now)
    }

    pub fn error<S: Into<String>>(&mut self, message: S, now: Instant) {
        self.show(ToastKind::Error, message, now)
    }

    pub fn show<S: Into<String>>(&mut self, kind: ToastKind, message: S, now: Instant) {
        let message = message.into();
        match kind {
            ToastKind::Error => error!("{}", message),
            ToastKind::Warning => warn!("{}", message),
            ToastKind::Success | ToastKind::Info => info!("{}", message),
        }
        let expires_at = match kind {
            ToastKind::Success | ToastKind::Info => Some(now + self.info_ttl),
            ToastKind::Warning => Some(now + self.warning_ttl),
            ToastKind::Error => None,
        };
        self.current = Some(Toast {
            kind,
            message,
            expires_at,
        });
    }

    pub fn current(&self) -> Option<&Toast> {
        self.current.as_ref()
    }

    pub fn dismiss(&mut self) {
        self.current = None;
    }

    /// Hide the current toast if it has expired. Returns whether a toast was
    /// hidden.
    pub fn tick(&mut self, now: Instant) -> bool {
        let expired = matches!(
            &self.current,
            Some(Toast { expires_at: Some(at), .. }) if *at <= now
        );
        if expired {
            self.current = None;
        }
        expired
    }
}
