pub mod api;
pub mod auth;
pub mod config;
pub mod duration;
pub mod errors;
pub mod logging;
pub mod models;
pub mod server;
pub mod store;
pub mod timer;
pub mod whatsapp;
