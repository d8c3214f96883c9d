pub mod config;
pub mod logging;
pub mod models;
pub mod providers;
pub mod services;
