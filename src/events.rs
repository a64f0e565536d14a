//! Event bus for broadcasting recorded analytics events to live dashboards

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::store::{Applied, ButtonClickRecord};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AnalyticsEvent {
    #[serde(rename_all = "camelCase")]
    PageView {
        date: NaiveDate,
        is_unique_visit: bool,
        referrer: String,
    },
    ButtonClick(ButtonClickRecord),
}

impl AnalyticsEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            AnalyticsEvent::PageView { .. } => "pageView",
            AnalyticsEvent::ButtonClick(_) => "buttonClick",
        }
    }

    /// Only recorded events are broadcast; admin operations are not
    pub fn from_applied(applied: &Applied) -> Option<Self> {
        match applied {
            Applied::PageView {
                date,
                is_unique,
                referrer,
            } => Some(AnalyticsEvent::PageView {
                date: *date,
                is_unique_visit: *is_unique,
                referrer: referrer.clone(),
            }),
            Applied::ButtonClick(record) => Some(AnalyticsEvent::ButtonClick(record.clone())),
            Applied::Cleared | Applied::Pruned(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<AnalyticsEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: AnalyticsEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AnalyticsEvent>> {
        self.sender.subscribe()
    }
}
