//! Rollcall - Event check-in admission control
//!
//! This library provides check-in admission against session capacity, the
//! cache layer in front of the durable store, and the session lifecycle
//! scheduler.

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod tasks;
