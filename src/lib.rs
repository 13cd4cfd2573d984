pub mod agent;
pub mod artifact;
pub mod config;
pub mod error;
pub mod lock;
pub mod logging;
pub mod notify;
pub mod parse;
pub mod platform;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod workflow;
pub mod workspace;
