//! Botthrottle - crawler-aware request throttling
//!
//! This crate classifies inbound HTTP requests by their declared user agent
//! and enforces a fixed-window quota per (crawler, source address) pair.
//! Requests from unrecognized clients pass through untouched.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
