pub mod app;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod shared;
pub mod status;
pub mod store;
