//! Persisted timezone record
//!
//! One fixed-size binary record in blob storage holds the zone descriptor and
//! a baseline epoch. The baseline is the clock reading at the last save and
//! seeds the clock on a cold start until the network answers.
//!
//! Record layout (little-endian, 56 bytes):
//!
//! | offset | size | field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 4    | baseline epoch, signed seconds         |
//! | 4      | 50   | zone descriptor, ASCII, NUL padded     |
//! | 54     | 2    | padding, zero                          |

use embedded_io::{Read, Write};
use hal_abstractions::rtc::SystemClock;
use hal_abstractions::storage::{BlobFile, BlobStorage};
use hal_abstractions::tz::{TzRules, ZoneDescriptor, ZONE_DESCRIPTOR_CAPACITY};

use crate::config::ZoneConfig;
use crate::error::StoreError;
use crate::persistence::PersistencePolicy;
use crate::zone::ZoneClock;

/// Size of the serialized record
pub const RECORD_LEN: usize = 56;

const BASELINE_OFFSET: usize = 0;
const DESCRIPTOR_OFFSET: usize = 4;
/// Descriptor field width including its NUL terminator
const DESCRIPTOR_FIELD_LEN: usize = ZONE_DESCRIPTOR_CAPACITY + 1;

/// In-memory form of the persisted record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeZoneConfig {
    /// Clock reading at the last save, Unix seconds
    pub baseline_epoch: i64,
    /// POSIX zone rule; empty means UTC
    pub zone_descriptor: ZoneDescriptor,
}

impl TimeZoneConfig {
    /// Serialize to the on-storage layout.
    ///
    /// The baseline field is 32 bits wide; later times saturate.
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        let baseline = i32::try_from(self.baseline_epoch).unwrap_or(if self.baseline_epoch < 0 {
            i32::MIN
        } else {
            i32::MAX
        });
        bytes[BASELINE_OFFSET..BASELINE_OFFSET + 4].copy_from_slice(&baseline.to_le_bytes());
        let descriptor = self.zone_descriptor.as_bytes();
        let len = descriptor.len().min(DESCRIPTOR_FIELD_LEN - 1);
        bytes[DESCRIPTOR_OFFSET..DESCRIPTOR_OFFSET + len].copy_from_slice(&descriptor[..len]);
        bytes
    }

    /// Deserialize from the on-storage layout.
    ///
    /// The descriptor is taken verbatim up to the first NUL; callers
    /// canonicalize it before use. Non-ASCII content yields an empty descriptor.
    pub fn from_bytes(bytes: &[u8; RECORD_LEN]) -> Self {
        let mut baseline = [0u8; 4];
        baseline.copy_from_slice(&bytes[BASELINE_OFFSET..BASELINE_OFFSET + 4]);

        let field = &bytes[DESCRIPTOR_OFFSET..DESCRIPTOR_OFFSET + DESCRIPTOR_FIELD_LEN];
        let text_len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let mut zone_descriptor = ZoneDescriptor::new();
        if let Ok(text) = core::str::from_utf8(&field[..text_len]) {
            for ch in text.chars().filter(char::is_ascii) {
                if zone_descriptor.push(ch).is_err() {
                    break;
                }
            }
        }

        Self {
            baseline_epoch: i64::from(i32::from_le_bytes(baseline)),
            zone_descriptor,
        }
    }
}

/// Owner of the persisted timezone record
pub struct TimeZoneStore {
    config: ZoneConfig,
    record: TimeZoneConfig,
    policy: PersistencePolicy,
}

impl TimeZoneStore {
    pub fn new(config: ZoneConfig) -> Self {
        let mut zone_descriptor = ZoneDescriptor::new();
        // Oversized defaults are caught by canonicalize on load
        let _ = zone_descriptor.push_str(config.default_zone_descriptor);
        Self {
            config,
            record: TimeZoneConfig {
                baseline_epoch: 0,
                zone_descriptor,
            },
            policy: PersistencePolicy::new(),
        }
    }

    /// Current in-memory record
    pub fn record(&self) -> &TimeZoneConfig {
        &self.record
    }

    pub fn is_dirty(&self) -> bool {
        self.policy.is_dirty()
    }

    /// Record used at first boot and after corruption
    pub fn default_record<R: TzRules>(&self, rules: &R) -> TimeZoneConfig {
        TimeZoneConfig {
            baseline_epoch: 0,
            zone_descriptor: rules
                .canonicalize(self.config.default_zone_descriptor, ZONE_DESCRIPTOR_CAPACITY),
        }
    }

    /// Read the record, repairing storage with the default record when the
    /// stored one is missing or damaged.
    ///
    /// Always produces a usable record; when storage cannot mount the default
    /// is used in memory only.
    pub fn load<S, C, R>(&mut self, storage: &mut S, clock: &C, rules: &R) -> &TimeZoneConfig
    where
        S: BlobStorage,
        C: SystemClock,
        R: TzRules,
    {
        self.record = self.default_record(rules);
        match read_record(storage, self.config.record_name) {
            Ok(stored) => {
                self.record = TimeZoneConfig {
                    baseline_epoch: stored.baseline_epoch,
                    zone_descriptor: rules
                        .canonicalize(&stored.zone_descriptor, ZONE_DESCRIPTOR_CAPACITY),
                };
                info!(
                    "Loaded timezone '{}', baseline {}",
                    self.record.zone_descriptor.as_str(),
                    self.record.baseline_epoch
                );
            }
            Err(StoreError::Unavailable) => {
                error!("Storage unavailable, using default timezone");
            }
            Err(e) => {
                warn!("{}: {}, writing default", self.config.record_name, e);
                if e == StoreError::OpenRead && storage.remove(self.config.record_name).is_err() {
                    warn!("Could not remove unreadable record");
                }
                if let Err(e) = self.save(storage, clock) {
                    error!("Default record not saved: {}", e);
                }
            }
        }
        &self.record
    }

    /// Write the record now, stamping the baseline with the clock.
    pub fn save<S: BlobStorage, C: SystemClock>(
        &mut self,
        storage: &mut S,
        clock: &C,
    ) -> Result<(), StoreError> {
        write_record(storage, self.config.record_name, &mut self.record, clock)
    }

    /// Change the zone, apply it immediately and mark the record for saving.
    pub fn set_zone<C: SystemClock, R: TzRules>(
        &mut self,
        descriptor: &str,
        zone: &mut ZoneClock,
        clock: &mut C,
        rules: &R,
    ) {
        let canonical = rules.canonicalize(descriptor, ZONE_DESCRIPTOR_CAPACITY);
        zone.apply(&canonical, clock, rules);
        self.record.zone_descriptor = canonical;
        self.record.baseline_epoch = clock.now();
        self.policy.mark_dirty();
    }

    /// Remember a synchronized time as the in-memory baseline.
    ///
    /// Not marked dirty: the baseline reaches storage with the next save.
    pub fn record_sync_checkpoint(&mut self, epoch: i64) {
        self.record.baseline_epoch = epoch;
    }

    /// Save if a change is pending. The change stays pending if the save fails.
    ///
    /// Returns `true` if the record was written.
    pub fn flush_if_dirty<S: BlobStorage, C: SystemClock>(
        &mut self,
        storage: &mut S,
        clock: &C,
    ) -> bool {
        let name = self.config.record_name;
        let record = &mut self.record;
        self.policy.flush_if_dirty(|| {
            write_record(storage, name, record, clock).inspect_err(|e| {
                warn!("Timezone record not saved: {}", e);
            })
        })
    }
}

fn read_record<S: BlobStorage>(storage: &mut S, name: &str) -> Result<TimeZoneConfig, StoreError> {
    storage.mount().map_err(|_| StoreError::Unavailable)?;
    if !storage.exists(name) {
        return Err(StoreError::Missing);
    }
    let mut file = storage.open_read(name).map_err(|_| StoreError::OpenRead)?;
    if file.size() != RECORD_LEN {
        return Err(StoreError::WrongSize);
    }

    let mut bytes = [0u8; RECORD_LEN];
    let mut filled = 0;
    while filled < RECORD_LEN {
        match file.read(&mut bytes[filled..]) {
            Ok(0) => return Err(StoreError::ShortRead),
            Ok(n) => filled += n,
            Err(_) => return Err(StoreError::Io),
        }
    }
    Ok(TimeZoneConfig::from_bytes(&bytes))
}

fn write_record<S: BlobStorage, C: SystemClock>(
    storage: &mut S,
    name: &str,
    record: &mut TimeZoneConfig,
    clock: &C,
) -> Result<(), StoreError> {
    storage.mount().map_err(|_| StoreError::Unavailable)?;
    let mut file = storage.open_write(name).map_err(|_| StoreError::OpenWrite)?;

    record.baseline_epoch = clock.now();
    let bytes = record.to_bytes();
    let mut written = 0;
    while written < RECORD_LEN {
        match file.write(&bytes[written..]) {
            Ok(0) => return Err(StoreError::ShortWrite),
            Ok(n) => written += n,
            Err(_) => return Err(StoreError::Io),
        }
    }
    file.flush().map_err(|_| StoreError::Io)?;
    info!(
        "Saved timezone '{}', baseline {}",
        record.zone_descriptor.as_str(),
        record.baseline_epoch
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posix_tz::PosixTzRules;
    use std::collections::BTreeMap;

    const SYDNEY: &str = "AEST-10AEDT-11,M10.1.0/2,M4.1.0/3";

    #[derive(Debug)]
    struct FakeIoError;

    impl core::fmt::Display for FakeIoError {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.write_str("fake i/o error")
        }
    }

    impl core::error::Error for FakeIoError {}

    impl embedded_io::Error for FakeIoError {
        fn kind(&self) -> embedded_io::ErrorKind {
            embedded_io::ErrorKind::Other
        }
    }

    #[derive(Default)]
    struct MemStorage {
        files: BTreeMap<String, Vec<u8>>,
        unmountable: bool,
        unreadable: bool,
        writes: usize,
        removes: usize,
    }

    struct MemReader<'a> {
        data: &'a [u8],
    }

    impl embedded_io::ErrorType for MemReader<'_> {
        type Error = FakeIoError;
    }

    impl Read for MemReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    impl BlobFile for MemReader<'_> {
        fn size(&self) -> usize {
            self.data.len()
        }
    }

    struct MemWriter<'a> {
        target: &'a mut Vec<u8>,
        pending: Vec<u8>,
    }

    impl embedded_io::ErrorType for MemWriter<'_> {
        type Error = FakeIoError;
    }

    impl Write for MemWriter<'_> {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.pending.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            *self.target = core::mem::take(&mut self.pending);
            Ok(())
        }
    }

    impl BlobStorage for MemStorage {
        type Error = ();
        type Reader<'a> = MemReader<'a>;
        type Writer<'a> = MemWriter<'a>;

        fn mount(&mut self) -> Result<(), ()> {
            if self.unmountable {
                Err(())
            } else {
                Ok(())
            }
        }

        fn exists(&mut self, name: &str) -> bool {
            self.files.contains_key(name)
        }

        fn open_read(&mut self, name: &str) -> Result<MemReader<'_>, ()> {
            if self.unreadable {
                return Err(());
            }
            self.files
                .get(name)
                .map(|data| MemReader { data })
                .ok_or(())
        }

        fn open_write(&mut self, name: &str) -> Result<MemWriter<'_>, ()> {
            self.writes += 1;
            self.unreadable = false;
            let target = self.files.entry(name.to_string()).or_default();
            Ok(MemWriter {
                target,
                pending: Vec::new(),
            })
        }

        fn remove(&mut self, name: &str) -> Result<(), ()> {
            self.removes += 1;
            self.files.remove(name);
            Ok(())
        }
    }

    struct FixedClock(i64);

    impl SystemClock for FixedClock {
        fn set_clock(&mut self, epoch_secs: i64, _micros: u32) {
            self.0 = epoch_secs;
        }

        fn now(&self) -> i64 {
            self.0
        }
    }

    fn record_name() -> String {
        ZoneConfig::default().record_name.to_string()
    }

    fn stored(storage: &MemStorage) -> TimeZoneConfig {
        let data = &storage.files[&record_name()];
        let bytes: [u8; RECORD_LEN] = data.as_slice().try_into().unwrap();
        TimeZoneConfig::from_bytes(&bytes)
    }

    #[test]
    fn test_record_layout() {
        let record = TimeZoneConfig {
            baseline_epoch: 0x0102_0304,
            zone_descriptor: ZoneDescriptor::try_from("EST5").unwrap(),
        };
        let bytes = record.to_bytes();
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], b"EST5");
        assert!(bytes[8..].iter().all(|&b| b == 0));
        assert_eq!(TimeZoneConfig::from_bytes(&bytes), record);
    }

    #[test]
    fn test_negative_baseline_sign_extends() {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[0..4].copy_from_slice(&(-5i32).to_le_bytes());
        assert_eq!(TimeZoneConfig::from_bytes(&bytes).baseline_epoch, -5);
    }

    #[test]
    fn test_unterminated_descriptor_is_truncated() {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[4..54].fill(b'A');
        let record = TimeZoneConfig::from_bytes(&bytes);
        assert_eq!(record.zone_descriptor.len(), ZONE_DESCRIPTOR_CAPACITY);
    }

    #[test]
    fn test_first_boot_writes_default() {
        let mut storage = MemStorage::default();
        let mut store = TimeZoneStore::new(ZoneConfig::default());
        let record = store.load(&mut storage, &FixedClock(1_000), &PosixTzRules).clone();
        assert_eq!(record.zone_descriptor.as_str(), SYDNEY);
        assert_eq!(storage.writes, 1);
        let on_disk = stored(&storage);
        assert_eq!(on_disk.zone_descriptor.as_str(), SYDNEY);
        assert_eq!(on_disk.baseline_epoch, 1_000);
    }

    #[test]
    fn test_load_existing_record() {
        let mut storage = MemStorage::default();
        let record = TimeZoneConfig {
            baseline_epoch: 1_700_000_000,
            zone_descriptor: ZoneDescriptor::try_from("EST5EDT").unwrap(),
        };
        storage.files.insert(record_name(), record.to_bytes().to_vec());

        let mut store = TimeZoneStore::new(ZoneConfig::default());
        let loaded = store.load(&mut storage, &FixedClock(0), &PosixTzRules);
        assert_eq!(*loaded, record);
        assert_eq!(storage.writes, 0);
    }

    #[test]
    fn test_load_canonicalizes_stored_descriptor() {
        let mut storage = MemStorage::default();
        let mut bytes = [0u8; RECORD_LEN];
        bytes[4..13].copy_from_slice(b" EST5EDT ");
        storage.files.insert(record_name(), bytes.to_vec());

        let mut store = TimeZoneStore::new(ZoneConfig::default());
        let loaded = store.load(&mut storage, &FixedClock(0), &PosixTzRules);
        assert_eq!(loaded.zone_descriptor.as_str(), "EST5EDT");
    }

    #[test]
    fn test_truncated_record_is_replaced() {
        let mut storage = MemStorage::default();
        storage.files.insert(record_name(), vec![0u8; 10]);

        let mut store = TimeZoneStore::new(ZoneConfig::default());
        let loaded = store.load(&mut storage, &FixedClock(42), &PosixTzRules).clone();
        assert_eq!(loaded.zone_descriptor.as_str(), SYDNEY);
        assert_eq!(storage.files[&record_name()].len(), RECORD_LEN);
        assert_eq!(stored(&storage).baseline_epoch, 42);
    }

    #[test]
    fn test_unreadable_record_is_removed_and_replaced() {
        let mut storage = MemStorage {
            unreadable: true,
            ..Default::default()
        };
        storage.files.insert(record_name(), vec![0xFF; RECORD_LEN]);

        let mut store = TimeZoneStore::new(ZoneConfig::default());
        store.load(&mut storage, &FixedClock(7), &PosixTzRules);
        assert_eq!(storage.removes, 1);
        assert_eq!(storage.writes, 1);
        assert_eq!(stored(&storage).zone_descriptor.as_str(), SYDNEY);
    }

    #[test]
    fn test_unmountable_storage_uses_default_in_memory() {
        let mut storage = MemStorage {
            unmountable: true,
            ..Default::default()
        };
        let mut store = TimeZoneStore::new(ZoneConfig::default());
        let loaded = store.load(&mut storage, &FixedClock(99), &PosixTzRules);
        assert_eq!(loaded.zone_descriptor.as_str(), SYDNEY);
        assert_eq!(loaded.baseline_epoch, 0);
        assert_eq!(storage.writes, 0);
    }

    #[test]
    fn test_set_zone_batches_until_flush() {
        let mut storage = MemStorage::default();
        let mut clock = FixedClock(5_000);
        let mut zone = ZoneClock::new();
        let mut store = TimeZoneStore::new(ZoneConfig::default());
        store.load(&mut storage, &clock, &PosixTzRules);
        let writes_after_load = storage.writes;

        store.set_zone("EST5EDT", &mut zone, &mut clock, &PosixTzRules);
        store.set_zone("CET-1CEST,M3.5.0,M10.5.0/3", &mut zone, &mut clock, &PosixTzRules);
        assert!(store.is_dirty());
        assert_eq!(zone.active(), "CET-1CEST,M3.5.0,M10.5.0/3");
        assert_eq!(storage.writes, writes_after_load);

        assert!(store.flush_if_dirty(&mut storage, &clock));
        assert!(!store.flush_if_dirty(&mut storage, &clock));
        assert_eq!(storage.writes, writes_after_load + 1);
        assert_eq!(
            stored(&storage).zone_descriptor.as_str(),
            "CET-1CEST,M3.5.0,M10.5.0/3"
        );
    }

    #[test]
    fn test_failed_flush_stays_dirty() {
        let mut storage = MemStorage::default();
        let mut clock = FixedClock(0);
        let mut zone = ZoneClock::new();
        let mut store = TimeZoneStore::new(ZoneConfig::default());
        store.set_zone("EST5", &mut zone, &mut clock, &PosixTzRules);

        storage.unmountable = true;
        assert!(!store.flush_if_dirty(&mut storage, &clock));
        assert!(store.is_dirty());

        storage.unmountable = false;
        assert!(store.flush_if_dirty(&mut storage, &clock));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_sync_checkpoint_is_not_dirty() {
        let mut store = TimeZoneStore::new(ZoneConfig::default());
        store.record_sync_checkpoint(1_800_000_000);
        assert_eq!(store.record().baseline_epoch, 1_800_000_000);
        assert!(!store.is_dirty());
    }
}
