//! Site analytics - page-view and button-click tracking for a marketing site
//!
//! Events are posted by the [`client`] recorder, counted per calendar day by
//! the [`store`], and turned into dashboard numbers by the [`aggregator`].

pub mod aggregator;
pub mod client;
pub mod config;
pub mod dates;
pub mod error;
pub mod events;
pub mod referrer;
pub mod store;
pub mod web;
