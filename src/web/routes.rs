//! HTTP routes

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::AppState;
use crate::aggregator::{self, DashboardSummary, DateRange};
use crate::dates;
use crate::error::{AnalyticsJson, AnalyticsQuery, AppError, AppResult};
use crate::events::AnalyticsEvent;
use crate::referrer;
use crate::store::{StatsReport, WriteCommand};

const MAX_FIELD_LEN: usize = 256;

/// Body of `POST /analytics`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsRequest {
    pub action: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageViewPayload {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub is_unique_visit: bool,
    #[serde(default)]
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonClickPayload {
    #[serde(default)]
    pub user_id: Option<String>,
    pub button_id: String,
    #[serde(default)]
    pub button_name: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    /// Sent by older page versions, ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AnalyticsResponse {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(action: &str, data: serde_json::Value) -> AppResult<T> {
    serde_json::from_value(data).map_err(|e| AppError::Validation(format!("invalid {action} payload: {e}")))
}

fn check_len(field: &str, value: &str) -> AppResult<()> {
    if value.chars().count() > MAX_FIELD_LEN {
        return Err(AppError::Validation(format!("{field} is longer than {MAX_FIELD_LEN} characters")));
    }
    Ok(())
}

fn page_view_command(payload: PageViewPayload) -> AppResult<WriteCommand> {
    let referrer = referrer::sanitize_label(payload.referrer.as_deref());
    check_len("referrer", &referrer)?;
    Ok(WriteCommand::PageView {
        is_unique: payload.is_unique_visit,
        referrer,
    })
}

fn button_click_command(payload: ButtonClickPayload) -> AppResult<WriteCommand> {
    let button_id = payload.button_id.trim().to_string();
    if button_id.is_empty() {
        return Err(AppError::Validation("buttonId is required".to_string()));
    }
    let button_name = payload
        .button_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| button_id.clone());
    let referrer = referrer::sanitize_label(payload.referrer.as_deref());

    check_len("buttonId", &button_id)?;
    check_len("buttonName", &button_name)?;
    check_len("referrer", &referrer)?;

    Ok(WriteCommand::ButtonClick {
        button_id,
        button_name,
        referrer,
    })
}

/// POST /analytics
pub async fn record_event(
    State(state): State<Arc<AppState>>,
    AnalyticsJson(request): AnalyticsJson<AnalyticsRequest>,
) -> AppResult<Json<AnalyticsResponse>> {
    let (Some(action), Some(data)) = (request.action, request.data) else {
        return Err(AppError::Validation(
            "invalid request: action and data are required".to_string(),
        ));
    };

    let command = match action.as_str() {
        "pageView" => page_view_command(parse_payload(&action, data)?)?,
        "buttonClick" | "contactClick" => button_click_command(parse_payload(&action, data)?)?,
        other => return Err(AppError::Validation(format!("unrecognized action: {other}"))),
    };

    let applied = state.store.submit(command).await?;
    debug!(?applied, "analytics event recorded");

    if let Some(event) = AnalyticsEvent::from_applied(&applied) {
        state.event_bus.publish(event);
    }

    Ok(Json(AnalyticsResponse::ok()))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<u32>,
}

/// GET /analytics?days=N
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    AnalyticsQuery(query): AnalyticsQuery<StatsQuery>,
) -> AppResult<Json<StatsReport>> {
    let days = query.days.unwrap_or(state.analytics.default_window_days);
    if days > state.analytics.max_window_days {
        return Err(AppError::Validation(format!(
            "days must not exceed {}",
            state.analytics.max_window_days
        )));
    }

    Ok(Json(state.store.report(dates::today(), days).await))
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub range: Option<String>,
}

/// GET /analytics/dashboard?range=7days|30days|90days
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    AnalyticsQuery(query): AnalyticsQuery<DashboardQuery>,
) -> Json<DashboardSummary> {
    let range = query.range.as_deref().map_or(DateRange::SevenDays, DateRange::parse);
    let today = dates::today();
    let days = range.days();
    let limits = state.store.limits();

    let summary = state
        .store
        .read(|store| {
            // Two windows: the current period and the one before it
            let daily = store.get_stats(today, days * 2, limits.click_detail_limit);
            let referrers = store.get_referrer_stats(today, days);
            let buttons = store.get_button_stats(today, days, limits.recent_clicks_limit);
            aggregator::summarize(range, today, &daily, referrers, buttons)
        })
        .await;

    Json(summary)
}

/// DELETE /analytics
pub async fn clear_data(State(state): State<Arc<AppState>>) -> AppResult<Json<AnalyticsResponse>> {
    state.store.submit(WriteCommand::Clear).await?;
    info!("analytics data cleared");
    Ok(Json(AnalyticsResponse::ok()))
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_name_defaults_to_id() {
        let command = button_click_command(ButtonClickPayload {
            button_id: " whatsapp ".to_string(),
            button_name: Some("  ".to_string()),
            ..Default::default()
        })
        .unwrap();

        match command {
            WriteCommand::ButtonClick {
                button_id,
                button_name,
                referrer,
            } => {
                assert_eq!(button_id, "whatsapp");
                assert_eq!(button_name, "whatsapp");
                assert_eq!(referrer, "direct");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn empty_button_id_is_rejected() {
        let result = button_click_command(ButtonClickPayload::default());
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn oversized_referrer_is_rejected() {
        let result = page_view_command(PageViewPayload {
            referrer: Some("a".repeat(MAX_FIELD_LEN + 1)),
            ..Default::default()
        });
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
