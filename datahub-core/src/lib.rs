#![doc = "datahub-core: core logic library for the datahub CLI."]

//! Everything needed to push a data package to DataHub: loading the package,
//! authorising and uploading its resources to the rawstore, deriving
//! processing steps, assembling the processing spec and submitting it.
//!
//! # Usage
//! Build an [`client::HttpDataHub`] from a [`config::Config`], wrap it in a
//! [`push::DataHub`] and call [`push::DataHub::push`] with a loaded
//! [`package::Dataset`].

pub mod agent;
pub mod authz;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod flow;
pub mod options;
pub mod package;
pub mod processing;
pub mod push;
pub mod schema;
pub mod steps;

pub use error::PushError;
