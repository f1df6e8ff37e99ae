pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod format;
pub mod live;
pub mod models;
pub mod performance;
pub mod realtime;
pub mod reporter;
pub mod runner;
pub mod tables;
pub mod types;

/// Dashboard backend REST base URL (local development server)
pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

