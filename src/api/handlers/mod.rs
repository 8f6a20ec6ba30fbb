//! HTTP request handlers

pub mod alerts;
pub mod billing;
pub mod credentials;
pub mod health;
pub mod usage;
