//! Dashboard aggregation
//!
//! Pure functions turning the per-date buckets into the numbers shown on the
//! admin dashboard. Missing buckets count as zero.

use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::dates;
use crate::store::{ButtonStat, DailyBucket, GlobalCounters, ReferrerStat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DateRange {
    #[serde(rename = "7days")]
    SevenDays,
    #[serde(rename = "30days")]
    ThirtyDays,
    #[serde(rename = "90days")]
    NinetyDays,
}

impl DateRange {
    /// Unknown names fall back to seven days
    pub fn parse(name: &str) -> Self {
        match name {
            "30days" => DateRange::ThirtyDays,
            "90days" => DateRange::NinetyDays,
            _ => DateRange::SevenDays,
        }
    }

    pub fn days(self) -> u32 {
        match self {
            DateRange::SevenDays => 7,
            DateRange::ThirtyDays => 30,
            DateRange::NinetyDays => 90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitField {
    PageViews,
    UniqueVisitors,
}

impl VisitField {
    fn of(self, bucket: Option<&DailyBucket>) -> u64 {
        bucket.map_or(0, |b| match self {
            VisitField::PageViews => b.visits.page_views,
            VisitField::UniqueVisitors => b.visits.unique_visitors,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub value: u64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopDay {
    pub date: NaiveDate,
    pub formatted_date: String,
    pub weekday: &'static str,
    pub visits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateStatRow {
    pub date: NaiveDate,
    pub formatted_date: String,
    pub weekday: &'static str,
    pub visits: u64,
    pub unique: u64,
    /// Percent, one decimal place
    pub conversion_rate: f64,
    pub is_top_day: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub range: DateRange,
    pub global: GlobalCounters,
    pub dates: Vec<NaiveDate>,
    pub visit_chart_data: Vec<ChartPoint>,
    pub unique_visitors_chart_data: Vec<ChartPoint>,
    pub total_button_clicks: u64,
    pub current_period_total: u64,
    pub previous_period_total: u64,
    pub visits_growth_rate: f64,
    pub daily_average: f64,
    pub conversion_rate: f64,
    pub top_day: Option<TopDay>,
    pub date_stats: Vec<DateStatRow>,
    pub referrers: Vec<ReferrerStat>,
    pub buttons: Vec<ButtonStat>,
}

/// Trailing dates of the range ending today, oldest first
pub fn date_range(range: DateRange, today: NaiveDate) -> Vec<NaiveDate> {
    dates::trailing_dates(today, range.days())
}

/// The same number of dates immediately before the current range
pub fn previous_period(range: DateRange, today: NaiveDate) -> Vec<NaiveDate> {
    match today.checked_sub_days(Days::new(u64::from(range.days()))) {
        Some(end) => dates::trailing_dates(end, range.days()),
        None => Vec::new(),
    }
}

pub fn period_total(dates: &[NaiveDate], daily: &BTreeMap<NaiveDate, DailyBucket>, field: VisitField) -> u64 {
    dates.iter().map(|date| field.of(daily.get(date))).sum()
}

/// Percent change from `previous` to `current`.
///
/// With no previous activity any current activity reads as 100% growth.
pub fn growth_rate(current: u64, previous: u64) -> f64 {
    if previous == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }
    (current as f64 - previous as f64) / previous as f64 * 100.0
}

pub fn daily_average(total: u64, days: usize) -> f64 {
    if days == 0 {
        return 0.0;
    }
    total as f64 / days as f64
}

pub fn conversion_rate(unique_visitors: u64, total_visits: u64) -> f64 {
    if total_visits == 0 {
        return 0.0;
    }
    unique_visitors as f64 / total_visits as f64 * 100.0
}

/// Date with the strictly greatest page views; the earliest date wins ties
pub fn find_top_day(dates: &[NaiveDate], daily: &BTreeMap<NaiveDate, DailyBucket>) -> Option<TopDay> {
    let mut top: Option<(NaiveDate, u64)> = None;
    for date in dates {
        let visits = VisitField::PageViews.of(daily.get(date));
        let best = top.map_or(0, |(_, v)| v);
        if visits > best {
            top = Some((*date, visits));
        }
    }

    top.map(|(date, visits)| TopDay {
        date,
        formatted_date: dates::format_display(date),
        weekday: dates::weekday_name(date),
        visits,
    })
}

pub fn date_stats(
    dates: &[NaiveDate],
    daily: &BTreeMap<NaiveDate, DailyBucket>,
    top_day: Option<&TopDay>,
) -> Vec<DateStatRow> {
    dates
        .iter()
        .map(|date| {
            let bucket = daily.get(date);
            let visits = VisitField::PageViews.of(bucket);
            let unique = VisitField::UniqueVisitors.of(bucket);
            DateStatRow {
                date: *date,
                formatted_date: dates::format_display(*date),
                weekday: dates::weekday_name(*date),
                visits,
                unique,
                conversion_rate: round1(conversion_rate(unique, visits)),
                is_top_day: top_day.is_some_and(|t| t.date == *date),
            }
        })
        .collect()
}

/// Chart label for a date. Long ranges only label the 1st and every tenth day
/// with day/month and fall back to the bare day number.
pub fn chart_label(date: NaiveDate, range: DateRange) -> String {
    match range {
        DateRange::SevenDays | DateRange::ThirtyDays => dates::format_day_month(date),
        DateRange::NinetyDays => {
            let day = date.day();
            if day == 1 || day % 10 == 0 {
                dates::format_day_month(date)
            } else {
                day.to_string()
            }
        }
    }
}

pub fn chart_data(
    dates: &[NaiveDate],
    daily: &BTreeMap<NaiveDate, DailyBucket>,
    field: VisitField,
    range: DateRange,
) -> Vec<ChartPoint> {
    dates
        .iter()
        .map(|date| ChartPoint {
            value: field.of(daily.get(date)),
            label: chart_label(*date, range),
        })
        .collect()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Build the full dashboard view.
///
/// `daily` must cover both the current and the previous period.
pub fn summarize(
    range: DateRange,
    today: NaiveDate,
    daily: &BTreeMap<NaiveDate, DailyBucket>,
    referrers: Vec<ReferrerStat>,
    buttons: Vec<ButtonStat>,
) -> DashboardSummary {
    let dates = date_range(range, today);
    let previous = previous_period(range, today);

    let current_period_total = period_total(&dates, daily, VisitField::PageViews);
    let current_uniques = period_total(&dates, daily, VisitField::UniqueVisitors);
    let previous_period_total = period_total(&previous, daily, VisitField::PageViews);

    let top_day = find_top_day(&dates, daily);
    let date_stats = date_stats(&dates, daily, top_day.as_ref());
    let total_button_clicks = buttons.iter().map(|b| b.total_clicks).sum();

    DashboardSummary {
        range,
        global: GlobalCounters {
            total_visits: current_period_total,
            unique_visitors: current_uniques,
        },
        visit_chart_data: chart_data(&dates, daily, VisitField::PageViews, range),
        unique_visitors_chart_data: chart_data(&dates, daily, VisitField::UniqueVisitors, range),
        total_button_clicks,
        current_period_total,
        previous_period_total,
        visits_growth_rate: growth_rate(current_period_total, previous_period_total),
        daily_average: daily_average(current_period_total, dates.len()),
        conversion_rate: conversion_rate(current_uniques, current_period_total),
        top_day,
        date_stats,
        referrers,
        buttons,
        dates,
    }
}
