//! Room time-slot reservations served over the Postgres wire protocol.

pub mod auth;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod service;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
