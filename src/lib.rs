pub mod classifier;
pub mod config;
pub mod contracts;
pub mod discovery;
pub mod error;
pub mod oracle;
pub mod orchestrator;
pub mod output;
pub mod report;
pub mod rpc;
pub mod store;
pub mod verified;
