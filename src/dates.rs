//! Calendar helpers shared by the store and the dashboard aggregator

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, TimeZone, Weekday};

/// Today's calendar date on the server's local clock
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Bucket key for a date (`YYYY-MM-DD`)
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Time of day as `HH:MM:SS`
pub fn time_of_day<Tz: TimeZone>(instant: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    instant.format("%H:%M:%S").to_string()
}

/// First date of a trailing window of `days` ending at `today` (inclusive).
/// Returns `None` for an empty window.
pub fn window_start(today: NaiveDate, days: u32) -> Option<NaiveDate> {
    if days == 0 {
        return None;
    }
    today.checked_sub_days(Days::new(u64::from(days) - 1))
}

/// Ordered list of the trailing `days` calendar dates ending at `end`, oldest first
pub fn trailing_dates(end: NaiveDate, days: u32) -> Vec<NaiveDate> {
    let Some(start) = window_start(end, days) else {
        return Vec::new();
    };
    start.iter_days().take(days as usize).collect()
}

/// Brazilian display format, `DD/MM/YYYY`
pub fn format_display(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Short chart label, `DD/MM`
pub fn format_day_month(date: NaiveDate) -> String {
    date.format("%d/%m").to_string()
}

/// Capitalized pt-BR weekday name
pub fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "Segunda-feira",
        Weekday::Tue => "Terça-feira",
        Weekday::Wed => "Quarta-feira",
        Weekday::Thu => "Quinta-feira",
        Weekday::Fri => "Sexta-feira",
        Weekday::Sat => "Sábado",
        Weekday::Sun => "Domingo",
    }
}
