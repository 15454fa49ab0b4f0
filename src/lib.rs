//! Incremental mirror for date-partitioned weather-model archives such as the
//! DWD ICON open-data tree (`{base_url}/{run}/{variable}/{file}`).
//!
//! A pass expands a dataset into runs x variables x forecast steps, drops
//! files already recorded in the dataset's incremental state and files not
//! (yet) listed in the remote directory index, then streams the rest into a
//! [`store::Storage`] backend with a SHA-256 sidecar per file.

pub mod app;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod listing;
pub mod mirror;
pub mod output;
pub mod s3;
pub mod state;
pub mod store;
pub mod transfer;
