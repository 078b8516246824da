pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod filter;
pub mod keywords;
pub mod model;
pub mod publish;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod store;
