pub mod config;
pub mod constants;
pub mod error;
pub mod infra;
pub mod logging;
pub mod matching;
pub mod providers;
pub mod types;
