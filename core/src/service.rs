//! Time service
//!
//! Single owner of the time subsystem. The host loop constructs it with its
//! platform collaborators, calls [`TimeService::initialize`] once, then calls
//! [`TimeService::process`] and [`TimeService::save_if_needed`] on every pass.

use core::fmt::Write;

use hal_abstractions::network::DatagramTransport;
use hal_abstractions::rtc::SystemClock;
use hal_abstractions::storage::BlobStorage;
use hal_abstractions::tz::{TzRules, ZoneDescription};

use crate::calendar::CivilDateTime;
use crate::config::TimeServiceConfig;
use crate::posix_tz::PosixTzRules;
use crate::store::{TimeZoneConfig, TimeZoneStore};
use crate::sync::{SyncEngine, SyncEvent, SyncStatus};
use crate::zone::ZoneClock;

/// `HH:MM`
pub type ClockText = heapless::String<5>;
/// `HH:MM:SS`
pub type PreciseClockText = heapless::String<8>;

/// Time synchronization and timezone persistence for one node
pub struct TimeService<T, S, C, R = PosixTzRules> {
    config: TimeServiceConfig,
    engine: SyncEngine,
    store: TimeZoneStore,
    zone: ZoneClock,
    transport: T,
    storage: S,
    clock: C,
    rules: R,
    initialized: bool,
}

impl<T, S, C, R> TimeService<T, S, C, R>
where
    T: DatagramTransport,
    S: BlobStorage,
    C: SystemClock,
    R: TzRules,
{
    pub fn new(config: TimeServiceConfig, transport: T, storage: S, clock: C, rules: R) -> Self {
        Self {
            engine: SyncEngine::new(config.sync.clone()),
            store: TimeZoneStore::new(config.zone.clone()),
            zone: ZoneClock::new(),
            config,
            transport,
            storage,
            clock,
            rules,
            initialized: false,
        }
    }

    /// Load the persisted zone, seed the clock and start the time client.
    ///
    /// Never fails: storage problems fall back to the default zone and a
    /// transport that will not start leaves the clock unsynchronized.
    /// Only the first call has any effect.
    pub fn initialize(&mut self, now_ms: u64) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        let record = self
            .store
            .load(&mut self.storage, &self.clock, &self.rules)
            .clone();
        if self.clock.now() < record.baseline_epoch {
            debug!("Seeding clock from baseline {}", record.baseline_epoch);
            self.clock.set_clock(record.baseline_epoch, 0);
        }
        self.zone
            .apply(&record.zone_descriptor, &mut self.clock, &self.rules);

        if let Err(e) = self.engine.start(&mut self.transport, now_ms) {
            error!("Time client not started: {}", e);
        }
    }

    /// Advance the time client. Call from the host loop; never blocks.
    pub fn process(&mut self, now_ms: u64) -> Option<SyncEvent> {
        let event = self
            .engine
            .tick(&mut self.transport, &mut self.clock, now_ms);
        if let Some(SyncEvent::Synced { epoch }) = event {
            self.store.record_sync_checkpoint(epoch);
        }
        event
    }

    /// Write the zone record if it changed since the last save.
    ///
    /// Returns `true` if the record was written.
    pub fn save_if_needed(&mut self) -> bool {
        self.store.flush_if_dirty(&mut self.storage, &self.clock)
    }

    /// Request a time update on the next `process` call
    pub fn force_update(&mut self, now_ms: u64) -> bool {
        self.engine.force_update(now_ms)
    }

    pub fn is_stale(&self, now_ms: u64) -> bool {
        self.engine.is_stale(now_ms)
    }

    /// Apply a new zone now; it is persisted by the next `save_if_needed`.
    pub fn set_zone(&mut self, descriptor: &str) {
        self.store
            .set_zone(descriptor, &mut self.zone, &mut self.clock, &self.rules);
    }

    /// Restore the configured default zone and save it immediately.
    ///
    /// Returns `true` if the record was written.
    pub fn reset_default_zone(&mut self) -> bool {
        info!("Restoring default timezone");
        let default = self.config.zone.default_zone_descriptor;
        self.set_zone(default);
        self.save_if_needed()
    }

    /// Descriptor held in the persisted record
    pub fn zone_descriptor(&self) -> &str {
        &self.store.record().zone_descriptor
    }

    /// Descriptor applied to local time; empty means UTC
    pub fn current_zone(&self) -> &str {
        self.zone.active()
    }

    pub fn zone_description(&self) -> ZoneDescription {
        self.zone.describe(&self.rules)
    }

    /// Hard-set the clock, e.g. from a manual entry
    pub fn set_time(&mut self, epoch_secs: i64, micros: u32) {
        info!("Clock set manually to {}", epoch_secs);
        self.clock.set_clock(epoch_secs, micros);
    }

    pub fn utc_now(&self) -> i64 {
        self.clock.now()
    }

    pub fn local_now(&self) -> CivilDateTime {
        self.zone.local_time(&self.rules, self.clock.now())
    }

    /// Local wall time as `HH:MM`
    pub fn local_time_hhmm(&self) -> ClockText {
        let local = self.local_now();
        let mut text = ClockText::new();
        let _ = write!(text, "{:02}:{:02}", local.hour, local.minute);
        text
    }

    /// UTC wall time as `HH:MM:SS`
    pub fn utc_time_hhmmss(&self) -> PreciseClockText {
        let utc = CivilDateTime::from_unix(self.clock.now());
        let mut text = PreciseClockText::new();
        let _ = write!(text, "{:02}:{:02}:{:02}", utc.hour, utc.minute, utc.second);
        text
    }

    /// Seconds since local midnight
    pub fn local_seconds_of_day(&self) -> u32 {
        self.local_now().seconds_of_day()
    }

    pub fn sync_status(&self, now_ms: u64) -> SyncStatus {
        self.engine.status(now_ms)
    }

    pub fn record(&self) -> &TimeZoneConfig {
        self.store.record()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<T, S, C> TimeService<T, S, C, PosixTzRules>
where
    T: DatagramTransport,
    S: BlobStorage,
    C: SystemClock,
{
    /// Service using the built-in POSIX timezone rules
    pub fn with_posix_rules(config: TimeServiceConfig, transport: T, storage: S, clock: C) -> Self {
        Self::new(config, transport, storage, clock, PosixTzRules)
    }
}
