//! club-push - push notification dispatch for a sports club member portal.
//!
//! This crate provides:
//! - Audience resolution over stored push subscriptions (everyone, or by sport)
//! - Concurrent delivery through a push gateway with one-shot renewal of
//!   subscriptions whose delivery key went stale
//! - Dispatch history and per-sender quotas

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod push;
pub mod repository;
pub mod service;
