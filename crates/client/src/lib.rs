//! Campus Market client library.
//!
//! Everything in this crate talks to the outside world: the backend's REST,
//! auth and realtime endpoints, the lockdown file, environment configuration
//! and telemetry. The rules it enforces live in `campus-market-core`.
//!
//! # Modules
//!
//! - [`backend`] - Backend traits plus REST, realtime and in-memory adapters
//! - [`editor`] - Product editor session (load, edit, save, realtime merge)
//! - [`auth`] - Sign-up, sign-in and session guard
//! - [`lockdown`] - Persisted lockdown guard
//! - [`search`] - Debounced search input
//! - [`config`] - Environment configuration
//! - [`error`] - Application error type with Sentry reporting
//! - [`telemetry`] - Tracing subscriber and Sentry setup

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod backend;
pub mod config;
pub mod editor;
pub mod error;
pub mod lockdown;
pub mod search;
pub mod telemetry;
