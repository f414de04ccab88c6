//! Council document pipeline: retrieves Paper records from an OParl-style
//! API, extracts PDF text, resolves mentioned locations to coordinates,
//! and writes a partitioned columnar dataset, a semantic graph, and a
//! GeoJSON location layer.

pub mod api_client;
pub mod config;
pub mod error;
pub mod gazetteer;
pub mod geocoder;
pub mod location_extractor;
pub mod models;
pub mod orchestrator;
pub mod pdf_extractor;
pub mod retry;
pub mod state_store;
pub mod writers;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use orchestrator::Orchestrator;
