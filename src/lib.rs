pub mod benchmark;
pub mod catalog;
pub mod command_builder;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod readiness;
pub mod report;
pub mod timer;
pub mod utils;
