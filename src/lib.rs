pub mod auth;
pub mod booking;
pub mod config;
pub mod http;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod roster;
pub mod store;
pub mod wal;
