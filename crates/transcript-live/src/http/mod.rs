//! Run service adapters over HTTP: paged log fetch, the SSE log stream and
//! the run record.
mod client;
mod config;
mod transport;

pub use client::HttpRunService;
pub use config::ServerConfig;
