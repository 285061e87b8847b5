pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod output;
pub mod refresh;
pub mod registry;
pub mod select;
pub mod sheets;
pub mod snapshot;
