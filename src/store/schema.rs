//! Persisted document layout and upgrades from older layouts
//!
//! Version 2 (current):
//!
//! ```json
//! {
//!   "version": 2,
//!   "global": { "totalVisits": 0, "uniqueVisitors": 0 },
//!   "globalButtons": { "<buttonId>": { "count": 0, "name": "..." } },
//!   "byDate": {
//!     "YYYY-MM-DD": {
//!       "visits": { "pageViews": 0, "uniqueVisitors": 0 },
//!       "referrers": { "<origin>": 0 },
//!       "buttons": { "<buttonId>": 0 },
//!       "buttonClicks": [ ... ]
//!     }
//!   }
//! }
//! ```
//!
//! Older files carry no version tag. Version 1 has the `global` /
//! `globalButtons` / `byDate` envelope with per-day `buttons` counts only.
//! Version 0 is a bare map of date to bucket with click records only, and
//! some of its buckets keep `pageViews` / `uniqueVisitors` at the top level
//! instead of under `visits`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{AnalyticsStore, ButtonClickRecord, ButtonTotal, DailyBucket, GlobalCounters, StoreError, VisitStats};

pub const CURRENT_VERSION: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// Bare date map, click records only
    V0,
    /// Envelope with per-day button counts
    V1,
    /// Envelope with counts and click records, version tagged
    V2,
}

#[derive(Serialize)]
struct Versioned<'a> {
    version: u64,
    #[serde(flatten)]
    store: &'a AnalyticsStore,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyBucket {
    visits: Option<VisitStats>,
    page_views: Option<u64>,
    unique_visitors: Option<u64>,
    #[serde(default)]
    referrers: BTreeMap<String, u64>,
    #[serde(default)]
    buttons: BTreeMap<String, u64>,
    #[serde(default)]
    button_clicks: Vec<ButtonClickRecord>,
}

impl LegacyBucket {
    fn normalize(self) -> DailyBucket {
        let visits = self.visits.unwrap_or(VisitStats {
            page_views: self.page_views.unwrap_or(0),
            unique_visitors: self.unique_visitors.unwrap_or(0),
        });

        let mut buttons = self.buttons;
        if buttons.is_empty() {
            for click in &self.button_clicks {
                *buttons.entry(click.button_id.clone()).or_insert(0) += 1;
            }
        }

        DailyBucket {
            visits,
            referrers: self.referrers,
            buttons,
            button_clicks: self.button_clicks,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentV1 {
    #[serde(default)]
    global: GlobalCounters,
    #[serde(default)]
    global_buttons: BTreeMap<String, ButtonTotal>,
    #[serde(default)]
    by_date: BTreeMap<NaiveDate, LegacyBucket>,
}

/// Identify the layout of a raw document
pub fn detect_version(doc: &Value) -> Result<SchemaVersion, StoreError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| StoreError::Malformed("top level is not an object".to_string()))?;

    match obj.get("version") {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(2) => Ok(SchemaVersion::V2),
            Some(1) => Ok(SchemaVersion::V1),
            Some(0) => Ok(SchemaVersion::V0),
            Some(other) => Err(StoreError::UnsupportedVersion(other)),
            None => Err(StoreError::Malformed(format!("invalid version {n}"))),
        },
        Some(other) => Err(StoreError::Malformed(format!("invalid version {other}"))),
        None if obj.contains_key("byDate") || obj.contains_key("global") => Ok(SchemaVersion::V1),
        None => Ok(SchemaVersion::V0),
    }
}

/// Convert a raw document of any known version to the current in-memory store
pub fn upgrade(doc: Value) -> Result<AnalyticsStore, StoreError> {
    match detect_version(&doc)? {
        SchemaVersion::V2 => Ok(serde_json::from_value(doc)?),
        SchemaVersion::V1 => {
            let v1: DocumentV1 = serde_json::from_value(doc)?;
            Ok(upgrade_v1(v1))
        }
        SchemaVersion::V0 => {
            let mut doc = doc;
            if let Some(obj) = doc.as_object_mut() {
                obj.remove("version");
            }
            let days: BTreeMap<NaiveDate, LegacyBucket> = serde_json::from_value(doc)?;
            Ok(upgrade_v0(days))
        }
    }
}

fn upgrade_v1(doc: DocumentV1) -> AnalyticsStore {
    let by_date = doc
        .by_date
        .into_iter()
        .map(|(date, bucket)| (date, bucket.normalize()))
        .collect();

    AnalyticsStore {
        global: doc.global,
        global_buttons: doc.global_buttons,
        by_date,
    }
}

fn upgrade_v0(days: BTreeMap<NaiveDate, LegacyBucket>) -> AnalyticsStore {
    let mut store = AnalyticsStore::default();

    for (date, bucket) in days {
        let bucket = bucket.normalize();
        store.global.total_visits += bucket.visits.page_views;
        store.global.unique_visitors += bucket.visits.unique_visitors;
        for click in &bucket.button_clicks {
            store
                .global_buttons
                .entry(click.button_id.clone())
                .or_insert_with(|| ButtonTotal {
                    count: 0,
                    name: click.button_name.clone(),
                })
                .count += 1;
        }
        store.by_date.insert(date, bucket);
    }

    store
}

pub fn decode(bytes: &[u8]) -> Result<AnalyticsStore, StoreError> {
    let doc: Value = serde_json::from_slice(bytes)?;
    upgrade(doc)
}

pub fn encode(store: &AnalyticsStore) -> Result<Vec<u8>, StoreError> {
    let doc = Versioned {
        version: CURRENT_VERSION,
        store,
    };
    Ok(serde_json::to_vec_pretty(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn detects_versions() {
        assert_eq!(detect_version(&json!({"version": 2, "byDate": {}})).unwrap(), SchemaVersion::V2);
        assert_eq!(detect_version(&json!({"global": {}, "byDate": {}})).unwrap(), SchemaVersion::V1);
        assert_eq!(detect_version(&json!({"2025-01-01": {}})).unwrap(), SchemaVersion::V0);
        assert_eq!(detect_version(&json!({})).unwrap(), SchemaVersion::V0);
        assert!(matches!(
            detect_version(&json!({"version": 9})),
            Err(StoreError::UnsupportedVersion(9))
        ));
        assert!(detect_version(&json!([1, 2])).is_err());
    }

    #[test]
    fn flat_v0_buckets_are_normalized() {
        let doc = json!({
            "2025-01-01": { "pageViews": 4, "uniqueVisitors": 3, "referrers": { "google.com": 4 } },
            "2025-01-02": {
                "visits": { "pageViews": 2, "uniqueVisitors": 1 },
                "referrers": { "direct": 2 },
                "buttonClicks": [{
                    "id": "a",
                    "buttonId": "whatsapp",
                    "buttonName": "WhatsApp",
                    "timestamp": 1735819200000i64,
                    "date": "2025-01-02",
                    "time": "12:00:00",
                    "referrer": "direct"
                }]
            }
        });

        let store = upgrade(doc).unwrap();
        assert_eq!(store.by_date[&d("2025-01-01")].visits, VisitStats { page_views: 4, unique_visitors: 3 });
        assert_eq!(store.by_date[&d("2025-01-02")].buttons["whatsapp"], 1);
        assert_eq!(store.global, GlobalCounters { total_visits: 6, unique_visitors: 4 });
        assert_eq!(store.global_buttons["whatsapp"].name, "WhatsApp");
        assert_eq!(store.global_buttons["whatsapp"].count, 1);
    }

    #[test]
    fn v1_envelope_keeps_global_counters() {
        let doc = json!({
            "global": { "totalVisits": 10, "uniqueVisitors": 7 },
            "globalButtons": { "email": { "count": 3, "name": "E-mail" } },
            "byDate": {
                "2025-02-01": { "visits": { "pageViews": 5, "uniqueVisitors": 4 }, "buttons": { "email": 3 } }
            }
        });

        let store = upgrade(doc).unwrap();
        assert_eq!(store.global.total_visits, 10);
        assert_eq!(store.global_buttons["email"].count, 3);
        let bucket = &store.by_date[&d("2025-02-01")];
        assert_eq!(bucket.buttons["email"], 3);
        assert!(bucket.button_clicks.is_empty());
        assert!(bucket.referrers.is_empty());
    }

    #[test]
    fn encoded_document_is_tagged_and_round_trips() {
        let mut store = AnalyticsStore::default();
        store.record_page_view(d("2025-03-03"), true, "instagram.com");

        let bytes = encode(&store).unwrap();
        let raw: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw["version"], json!(2));
        assert_eq!(raw["byDate"]["2025-03-03"]["visits"]["pageViews"], json!(1));

        assert_eq!(decode(&bytes).unwrap(), store);
    }
}
