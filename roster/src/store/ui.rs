use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::notify::{Notifier, Severity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    /// Newest last.
    pub notifications: VecDeque<Notification>,
    /// Operations in flight across the console.
    pub loading: usize,
    pub modal: Option<String>,
    pub sidebar_open: bool,
}

impl UiState {
    pub fn is_loading(&self) -> bool {
        self.loading > 0
    }
}

/// Console-wide flags and the notification list.
#[derive(Debug)]
pub struct UiStore {
    state: watch::Sender<UiState>,
    max_notifications: usize,
    next_id: AtomicU64,
}

impl UiStore {
    pub fn new(max_notifications: usize) -> Self {
        let (state, _) = watch::channel(UiState {
            sidebar_open: true,
            ..UiState::default()
        });
        Self {
            state,
            max_notifications: max_notifications.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> UiState {
        self.state.borrow().clone()
    }

    /// Append a notification, dropping the oldest past the limit.
    pub fn push(&self, message: impl Into<String>, severity: Severity) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let notification = Notification {
            id,
            message: message.into(),
            severity,
            created_at: Utc::now(),
        };
        let max = self.max_notifications;
        self.state.send_modify(|s| {
            s.notifications.push_back(notification);
            while s.notifications.len() > max {
                s.notifications.pop_front();
            }
        });
        id
    }

    /// Returns false when `id` was already gone.
    pub fn dismiss(&self, id: u64) -> bool {
        self.state.send_if_modified(|s| {
            let before = s.notifications.len();
            s.notifications.retain(|n| n.id != id);
            s.notifications.len() != before
        })
    }

    pub fn clear_notifications(&self) {
        self.state.send_if_modified(|s| {
            let changed = !s.notifications.is_empty();
            s.notifications.clear();
            changed
        });
    }

    pub fn begin_loading(&self) -> UiLoadingGuard<'_> {
        self.state.send_modify(|s| s.loading += 1);
        UiLoadingGuard { store: self }
    }

    fn end_loading(&self) {
        self.state
            .send_modify(|s| s.loading = s.loading.saturating_sub(1));
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    pub fn open_modal(&self, name: impl Into<String>) {
        let name = name.into();
        self.state.send_modify(|s| s.modal = Some(name));
    }

    pub fn close_modal(&self) {
        self.state.send_if_modified(|s| s.modal.take().is_some());
    }

    pub fn toggle_sidebar(&self) -> bool {
        let mut open = false;
        self.state.send_modify(|s| {
            s.sidebar_open = !s.sidebar_open;
            open = s.sidebar_open;
        });
        open
    }
}

impl Notifier for UiStore {
    fn notify(&self, message: &str, severity: Severity) {
        self.push(message, severity);
    }
}

/// Decrements the loading counter when dropped.
#[derive(Debug)]
pub struct UiLoadingGuard<'a> {
    store: &'a UiStore,
}

impl Drop for UiLoadingGuard<'_> {
    fn drop(&mut self) {
        self.store.end_loading();
    }
}
