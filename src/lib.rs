//! Windowguard - Sliding-Window Rate Limiting
//!
//! This crate implements an exact sliding-window rate limiter keyed by
//! client identifier, and the axum middleware that enforces it in front of
//! write endpoints. Callers supply the current time, which keeps the core
//! deterministic and testable.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
