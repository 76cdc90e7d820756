//! Dismissable user notifications raised by failed mutations and feeds.

use chrono::{DateTime, Utc};
use rtgrefit_protocol::defaults::NOTICE_CAPACITY;
use rtgrefit_protocol::SyncError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub id: Uuid,
    pub raised_at: DateTime<Utc>,
    pub message: String,
    pub error: SyncError,
}

/// Bounded queue of active notices; the oldest is dropped when full.
#[derive(Debug, Clone, Default)]
pub struct NoticeBoard {
    inner: Arc<Mutex<VecDeque<Notice>>>,
}

impl NoticeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Notice>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, error: &SyncError) -> Uuid {
        let notice = Notice {
            id: Uuid::new_v4(),
            raised_at: Utc::now(),
            message: error.to_string(),
            error: error.clone(),
        };
        let id = notice.id;
        let mut queue = self.lock();
        if queue.len() >= NOTICE_CAPACITY {
            queue.pop_front();
        }
        queue.push_back(notice);
        id
    }

    pub fn dismiss(&self, id: Uuid) -> bool {
        let mut queue = self.lock();
        let before = queue.len();
        queue.retain(|n| n.id != id);
        queue.len() != before
    }

    pub fn active(&self) -> Vec<Notice> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
