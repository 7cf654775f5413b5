//! Core library for the tml-tools command line application.
//!
//! The library migrates TML content objects between platform environments.
//! Content is read by the adapters under [`tml::tools::io`] into the object
//! model in [`tml::tools::model`]. [`tml::tools::graph`] and
//! [`tml::tools::plan`] turn the input set into ordered deployment batches,
//! [`tml::tools::deploy`] replays them through a [`tml::tools::client`]
//! target while [`tml::tools::remap`] tracks identifiers across
//! environments, and [`tml::tools::migrate`] ties the steps together for the
//! CLI.

pub mod tml;

pub use tml::tools::{
    Result, ToolError, client, config, deploy, error, graph, io, migrate, model, plan, remap,
    report, retry,
};
