//! Progressive data loading for dashboard-style front ends.
//!
//! Containers get an immediate skeleton, data streams in from JSON endpoints
//! through a persistent TTL cache, failures back off and retry, and paged
//! containers get page controls.

pub mod cache;
pub mod clock;
pub mod config;
pub mod fetch;
pub mod loader;
pub mod logging;
pub mod pagination;
pub mod render;
