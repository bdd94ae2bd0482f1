//! Command handlers

pub mod assist;
pub mod auth;
pub mod backup;
pub mod config;
pub mod language;
pub mod note;
pub mod status;
pub mod watch;
