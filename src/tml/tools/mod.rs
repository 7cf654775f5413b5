pub mod client;
pub mod config;
pub mod deploy;
pub mod error;
pub mod graph;
pub mod io;
pub mod migrate;
pub mod model;
pub mod plan;
pub mod remap;
pub mod report;
pub mod retry;

pub use error::{Result, ToolError};
