//! Hardware abstraction traits for IoT firmware
//!
//! This crate defines the narrow interfaces the time subsystem consumes.
//! BSPs implement these traits; host tests implement them with in-memory fakes.
//!
//! - **`network`**: connectionless, non-blocking datagram transport
//! - **`rtc`**: process wall clock (set/read) and timezone hook
//! - **`storage`**: named-blob storage with `embedded-io` file handles
//! - **`tz`**: POSIX timezone rule canonicalizer/describer

#![no_std]
#![deny(unsafe_code)]
#![deny(warnings)]

pub mod network;
pub mod rtc;
pub mod storage;
pub mod tz;

pub use network::DatagramTransport;
pub use rtc::SystemClock;
pub use storage::{BlobFile, BlobStorage};
pub use tz::{TzRules, ZoneDescription, ZoneDescriptor};
