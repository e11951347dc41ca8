pub mod app;
pub mod audio;
pub mod catalog;
pub mod config;
pub mod core;
pub mod library;
pub mod model;
pub mod queue;
pub mod recap;
pub mod session;
pub mod sleep_timer;
pub mod stats;
