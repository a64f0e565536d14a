//! Event recorder
//!
//! Client side of the analytics pipeline. Keeps a persisted visitor identity,
//! decides whether a page view is the visitor's first in the configured
//! window, and sends events without making the caller wait for them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use crate::referrer;
use crate::web::{AnalyticsRequest, AnalyticsResponse, ButtonClickPayload, PageViewPayload};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("event rejected with status {status}: {message}")]
    Rejected { status: reqwest::StatusCode, message: String },

    #[error("visitor state io error: {0}")]
    State(#[from] std::io::Error),

    #[error("visitor state json error: {0}")]
    StateJson(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full URL of the `POST /analytics` endpoint
    pub endpoint: Url,
    /// Where the visitor identity is kept; `None` keeps it in memory
    pub state_file: Option<PathBuf>,
    pub unique_visitor_timeout: Duration,
    /// Identity older than this is discarded on startup
    pub state_retention: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            state_file: None,
            unique_visitor_timeout: Duration::from_secs(24 * 60 * 60),
            state_retention: Duration::from_secs(90 * 24 * 60 * 60),
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorState {
    pub user_id: String,
    /// Epoch milliseconds of the last recorded page view
    pub last_visit_ms: Option<i64>,
}

impl VisitorState {
    pub fn fresh() -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            last_visit_ms: None,
        }
    }

    /// Whether a page view at `now_ms` counts as unique. Always refreshes the last visit.
    pub fn register_visit(&mut self, now_ms: i64, timeout: Duration) -> bool {
        let unique = match self.last_visit_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) > duration_ms(timeout),
        };
        self.last_visit_ms = Some(now_ms);
        unique
    }

    /// Replace an identity whose last visit is older than `retention`
    pub fn purge_if_stale(&mut self, now_ms: i64, retention: Duration) -> bool {
        match self.last_visit_ms {
            Some(last) if now_ms.saturating_sub(last) > duration_ms(retention) => {
                *self = Self::fresh();
                true
            }
            _ => false,
        }
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct AnalyticsClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    state: Arc<Mutex<VisitorState>>,
    referrer: String,
}

impl AnalyticsClient {
    /// Create a client for one page load; `referring_url` is the URL the visitor came from
    pub async fn new(config: ClientConfig, referring_url: Option<&str>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let mut state = match &config.state_file {
            Some(path) => load_state(path).await?,
            None => VisitorState::fresh(),
        };
        if state.purge_if_stale(Utc::now().timestamp_millis(), config.state_retention) {
            tracing::debug!("visitor state expired, issued a new identity");
        }
        if let Some(path) = &config.state_file {
            save_state(path, &state).await?;
        }

        Ok(Self {
            http,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            referrer: referrer::classify(referring_url),
        })
    }

    pub async fn user_id(&self) -> String {
        self.state.lock().await.user_id.clone()
    }

    pub fn referrer(&self) -> &str {
        &self.referrer
    }

    async fn register_visit(&self) -> Result<(String, bool), ClientError> {
        let mut state = self.state.lock().await;
        let unique = state.register_visit(Utc::now().timestamp_millis(), self.config.unique_visitor_timeout);
        if let Some(path) = &self.config.state_file {
            save_state(path, &state).await?;
        }
        Ok((state.user_id.clone(), unique))
    }

    async fn send(&self, request: &AnalyticsRequest) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.config.endpoint.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response
            .json::<AnalyticsResponse>()
            .await
            .ok()
            .and_then(|r| r.message)
            .unwrap_or_default();
        Err(ClientError::Rejected { status, message })
    }

    /// Send a page view and wait for the server to accept it
    pub async fn send_page_view(&self) -> Result<(), ClientError> {
        let (user_id, is_unique_visit) = self.register_visit().await?;
        let payload = PageViewPayload {
            user_id: Some(user_id),
            is_unique_visit,
            referrer: Some(self.referrer.clone()),
        };
        self.send(&AnalyticsRequest {
            action: Some("pageView".to_string()),
            data: Some(serde_json::to_value(payload)?),
        })
        .await
    }

    /// Send a button click and wait for the server to accept it
    pub async fn send_button_click(&self, button_id: &str, button_name: &str) -> Result<(), ClientError> {
        let payload = ButtonClickPayload {
            user_id: Some(self.user_id().await),
            button_id: button_id.to_string(),
            button_name: Some(button_name.to_string()),
            referrer: Some(self.referrer.clone()),
            section_id: None,
        };
        self.send(&AnalyticsRequest {
            action: Some("buttonClick".to_string()),
            data: Some(serde_json::to_value(payload)?),
        })
        .await
    }

    /// Record a page view in the background. Failures are logged and dropped.
    pub fn record_page_view(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.send_page_view().await {
                tracing::warn!(error = %e, "failed to record page view");
            }
        });
    }

    /// Record a button click in the background. Failures are logged and dropped.
    pub fn record_button_click(&self, button_id: &str, button_name: &str) {
        let client = self.clone();
        let button_id = button_id.to_string();
        let button_name = button_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = client.send_button_click(&button_id, &button_name).await {
                tracing::warn!(error = %e, button_id = %button_id, "failed to record button click");
            }
        });
    }
}

async fn load_state(path: &std::path::Path) -> Result<VisitorState, ClientError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable visitor state, starting over");
                Ok(VisitorState::fresh())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VisitorState::fresh()),
        Err(e) => Err(e.into()),
    }
}

async fn save_state(path: &std::path::Path, state: &VisitorState) -> Result<(), ClientError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, serde_json::to_vec(state)?).await?;
    Ok(())
}
