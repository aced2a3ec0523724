//! Platform-agnostic time subsystem for beacon-node firmware
//!
//! Keeps the node's wall clock synchronized over SNTP and persists its
//! timezone across restarts. It has NO hardware dependencies: boards supply
//! the transport, storage and clock through the `hal-abstractions` traits.
//!
//! - [`timer`]: edge-triggered countdown driven by a millisecond tick
//! - [`sync`]: non-blocking SNTP state machine with a staleness watchdog
//! - [`store`]: fixed-size timezone record with corruption recovery
//! - [`zone`]: active timezone and local time
//! - [`nor_store`]: blob storage on a NOR flash erase block
//! - [`posix_tz`]: POSIX `TZ` rule parser and evaluator
//! - [`service`]: the single context object the host loop drives

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

#[macro_use]
mod fmt;

pub mod calendar;
pub mod config;
pub mod error;
pub mod nor_store;
pub mod persistence;
pub mod posix_tz;
pub mod service;
pub mod store;
pub mod sync;
pub mod timer;
pub mod zone;

pub use config::{SyncConfig, TimeServiceConfig, ZoneConfig};
pub use error::{StoreError, SyncError};
pub use nor_store::{NorBlobStore, NorStoreError};
pub use posix_tz::PosixTzRules;
pub use service::TimeService;
pub use store::{TimeZoneConfig, TimeZoneStore};
pub use sync::{SyncEngine, SyncEvent, SyncPhase, SyncStatus};
pub use timer::ElapsedTimer;
pub use zone::ZoneClock;
