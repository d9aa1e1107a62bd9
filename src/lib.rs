//! Artifact loading for the intensive farming monitoring dashboard.
//!
//! Pages read pre-computed geometry layers and CSV tables through
//! [`data::load_geometry`] and [`data::load_table`], which enforce a declared
//! schema and fail early instead of handing malformed data to the widgets.
//! [`dashboard::Dashboard`] adds caching, the artifact catalog and chart/map
//! models on top.

pub mod cache;
pub mod catalog;
pub mod check;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod error;
pub mod index;
pub mod render;
pub mod server;
pub mod types;
