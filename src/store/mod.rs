//! Analytics store
//!
//! Page views and button clicks are bucketed by calendar date. The whole
//! store lives in memory and is persisted as a single JSON document by the
//! write buffer after every batch of mutations.

pub mod schema;
mod write_buffer;

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::dates;

pub use write_buffer::{start_write_buffer, Applied, StoreHandle, WriteCommand};

/// Referrer label used when the origin of a visit is unknown
pub const DIRECT_REFERRER: &str = "direct";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u64),

    #[error("malformed analytics document: {0}")]
    Malformed(String),

    #[error("write buffer is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitStats {
    pub page_views: u64,
    pub unique_visitors: u64,
}

/// A single button click. Never modified after it is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonClickRecord {
    pub id: String,
    pub button_id: String,
    pub button_name: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub date: NaiveDate,
    /// `HH:MM:SS`
    pub time: String,
    #[serde(default = "direct_referrer")]
    pub referrer: String,
}

impl ButtonClickRecord {
    pub fn new(button_id: String, button_name: String, referrer: String, at: DateTime<Local>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            button_id,
            button_name,
            timestamp: at.timestamp_millis(),
            date: at.date_naive(),
            time: dates::time_of_day(&at),
            referrer,
        }
    }
}

fn direct_referrer() -> String {
    DIRECT_REFERRER.to_string()
}

/// Counters for one calendar day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyBucket {
    #[serde(default)]
    pub visits: VisitStats,
    #[serde(default)]
    pub referrers: BTreeMap<String, u64>,
    /// Click count per button id
    #[serde(default)]
    pub buttons: BTreeMap<String, u64>,
    #[serde(default)]
    pub button_clicks: Vec<ButtonClickRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalCounters {
    pub total_visits: u64,
    pub unique_visitors: u64,
}

/// All-time click total for one button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonTotal {
    pub count: u64,
    /// Display name seen on the first click
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsStore {
    #[serde(default)]
    pub global: GlobalCounters,
    #[serde(default)]
    pub global_buttons: BTreeMap<String, ButtonTotal>,
    #[serde(default)]
    pub by_date: BTreeMap<NaiveDate, DailyBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferrerStat {
    pub referrer: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonStat {
    pub button_id: String,
    pub button_name: String,
    pub total_clicks: u64,
    pub recent_clicks: Vec<ButtonClickRecord>,
}

/// Read-side caps applied when buckets leave the store
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub click_detail_limit: usize,
    pub recent_clicks_limit: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            click_detail_limit: 100,
            recent_clicks_limit: 10,
        }
    }
}

/// Response body of `GET /analytics`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub global: GlobalCounters,
    pub all_time: GlobalCounters,
    pub daily: BTreeMap<NaiveDate, DailyBucket>,
    pub referrers: Vec<ReferrerStat>,
    pub buttons: Vec<ButtonStat>,
    pub global_buttons: BTreeMap<String, ButtonTotal>,
}

impl AnalyticsStore {
    fn bucket_mut(&mut self, date: NaiveDate) -> &mut DailyBucket {
        self.by_date.entry(date).or_default()
    }

    pub fn record_page_view(&mut self, date: NaiveDate, is_unique: bool, referrer: &str) {
        self.global.total_visits += 1;
        if is_unique {
            self.global.unique_visitors += 1;
        }

        let bucket = self.bucket_mut(date);
        bucket.visits.page_views += 1;
        if is_unique {
            bucket.visits.unique_visitors += 1;
        }
        *bucket.referrers.entry(referrer.to_string()).or_insert(0) += 1;
    }

    pub fn record_button_click(&mut self, record: ButtonClickRecord) {
        self.global_buttons
            .entry(record.button_id.clone())
            .or_insert_with(|| ButtonTotal {
                count: 0,
                name: record.button_name.clone(),
            })
            .count += 1;

        let bucket = self.bucket_mut(record.date);
        *bucket.buttons.entry(record.button_id.clone()).or_insert(0) += 1;
        bucket.button_clicks.push(record);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Drop every bucket dated before `cutoff`, returning how many were removed
    pub fn prune_before(&mut self, cutoff: NaiveDate) -> usize {
        let kept = self.by_date.split_off(&cutoff);
        let removed = self.by_date.len();
        self.by_date = kept;
        removed
    }

    /// Buckets inside the trailing window, oldest first
    pub fn window(&self, today: NaiveDate, days: u32) -> impl Iterator<Item = (&NaiveDate, &DailyBucket)> {
        let range = dates::window_start(today, days).map(|start| self.by_date.range(start..=today));
        range.into_iter().flatten()
    }

    /// Windowed buckets with each day's click list capped to its most recent records
    pub fn get_stats(&self, today: NaiveDate, days: u32, click_detail_limit: usize) -> BTreeMap<NaiveDate, DailyBucket> {
        self.window(today, days)
            .map(|(date, bucket)| {
                let mut bucket = bucket.clone();
                let len = bucket.button_clicks.len();
                if len > click_detail_limit {
                    bucket.button_clicks.drain(..len - click_detail_limit);
                }
                (*date, bucket)
            })
            .collect()
    }

    pub fn get_referrer_stats(&self, today: NaiveDate, days: u32) -> Vec<ReferrerStat> {
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        let mut total = 0u64;
        for (_, bucket) in self.window(today, days) {
            for (referrer, count) in &bucket.referrers {
                *counts.entry(referrer.as_str()).or_insert(0) += count;
                total += count;
            }
        }

        let mut stats: Vec<ReferrerStat> = counts
            .into_iter()
            .map(|(referrer, count)| ReferrerStat {
                referrer: referrer.to_string(),
                count,
                percentage: if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 },
            })
            .collect();
        // Stable sort keeps ties in key order
        stats.sort_by(|a, b| b.count.cmp(&a.count));
        stats
    }

    pub fn get_button_stats(&self, today: NaiveDate, days: u32, recent_clicks_limit: usize) -> Vec<ButtonStat> {
        let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
        let mut recent: BTreeMap<&str, Vec<&ButtonClickRecord>> = BTreeMap::new();
        for (_, bucket) in self.window(today, days) {
            for (button_id, count) in &bucket.buttons {
                *totals.entry(button_id.as_str()).or_insert(0) += count;
            }
            for click in &bucket.button_clicks {
                recent.entry(click.button_id.as_str()).or_default().push(click);
            }
        }

        let mut stats: Vec<ButtonStat> = totals
            .into_iter()
            .map(|(button_id, total_clicks)| {
                let clicks = recent.remove(button_id).unwrap_or_default();
                let button_name = self
                    .global_buttons
                    .get(button_id)
                    .map(|b| b.name.clone())
                    .or_else(|| clicks.first().map(|c| c.button_name.clone()))
                    .unwrap_or_else(|| button_id.to_string());
                let skip = clicks.len().saturating_sub(recent_clicks_limit);
                ButtonStat {
                    button_id: button_id.to_string(),
                    button_name,
                    total_clicks,
                    recent_clicks: clicks.into_iter().skip(skip).cloned().collect(),
                }
            })
            .collect();
        stats.sort_by(|a, b| b.total_clicks.cmp(&a.total_clicks));
        stats
    }

    /// Visit totals summed over the window
    pub fn calculate_global_stats(&self, today: NaiveDate, days: u32) -> GlobalCounters {
        self.window(today, days)
            .fold(GlobalCounters::default(), |mut acc, (_, bucket)| {
                acc.total_visits += bucket.visits.page_views;
                acc.unique_visitors += bucket.visits.unique_visitors;
                acc
            })
    }

    pub fn report(&self, today: NaiveDate, days: u32, limits: StoreLimits) -> StatsReport {
        StatsReport {
            global: self.calculate_global_stats(today, days),
            all_time: self.global,
            daily: self.get_stats(today, days, limits.click_detail_limit),
            referrers: self.get_referrer_stats(today, days),
            buttons: self.get_button_stats(today, days, limits.recent_clicks_limit),
            global_buttons: self.global_buttons.clone(),
        }
    }
}

/// Load the store from disk.
///
/// A missing file yields an empty store. A file that cannot be parsed is
/// moved aside so the next write does not destroy it.
pub async fn load(path: &Path) -> Result<AnalyticsStore, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no analytics file yet, starting empty");
            return Ok(AnalyticsStore::default());
        }
        Err(e) => return Err(e.into()),
    };

    match schema::decode(&bytes) {
        Ok(store) => {
            tracing::info!(
                path = %path.display(),
                days = store.by_date.len(),
                "analytics data loaded"
            );
            Ok(store)
        }
        Err(e) => {
            let backup = corrupt_backup_path(path);
            tracing::error!(
                path = %path.display(),
                backup = %backup.display(),
                error = %e,
                "analytics file unreadable, moving it aside"
            );
            tokio::fs::rename(path, &backup).await?;
            Ok(AnalyticsStore::default())
        }
    }
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".corrupt-{}", chrono::Utc::now().timestamp()));
    path.with_file_name(name)
}

/// Write the whole document, creating the parent directory if needed
pub async fn persist(path: &Path, store: &AnalyticsStore) -> Result<(), StoreError> {
    let bytes = schema::encode(store)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
