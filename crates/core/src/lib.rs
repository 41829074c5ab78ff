//! Campus Market Core - Shared types and pure logic.
//!
//! This crate provides the domain types and the side-effect-free rules used by
//! every Campus Market component:
//! - `client` - Backend adapters, editor and auth orchestration, sync daemon
//! - `integration-tests` - Cross-crate flow tests
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no async,
//! no HTTP clients. Every function that depends on time takes `now` as an
//! argument so the rules can be tested without a clock.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, prices, emails, credentials, statuses and products
//! - [`guard`] - Injection detection and per-field validation
//! - [`lockdown`] - Temporary lockdown state machine
//! - [`draft`] - Draft editing model and the draft/confirmed diff
//! - [`realtime`] - Change events and the confirmed product collection
//! - [`page`] - Client-side pagination

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod draft;
pub mod guard;
pub mod lockdown;
pub mod page;
pub mod realtime;
pub mod types;

pub use types::*;
