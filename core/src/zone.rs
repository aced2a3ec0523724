//! Active timezone
//!
//! Owns the descriptor currently applied to the system clock. Local time is
//! computed from that descriptor through [`TzRules`], so formatting does not
//! depend on a libc `TZ` environment.

use hal_abstractions::rtc::SystemClock;
use hal_abstractions::tz::{TzRules, ZoneDescription, ZoneDescriptor, ZONE_DESCRIPTOR_CAPACITY};

use crate::calendar::CivilDateTime;

/// Descriptor handed to the clock when no rule is active
pub const UTC_DESCRIPTOR: &str = "UTC0";

/// The timezone in effect for local time
#[derive(Debug, Clone, Default)]
pub struct ZoneClock {
    active: ZoneDescriptor,
}

impl ZoneClock {
    pub const fn new() -> Self {
        Self {
            active: ZoneDescriptor::new(),
        }
    }

    /// Make `descriptor` the active zone.
    ///
    /// Malformed descriptors degrade to UTC. Never fails.
    pub fn apply<C: SystemClock, R: TzRules>(&mut self, descriptor: &str, clock: &mut C, rules: &R) {
        let canonical = rules.canonicalize(descriptor, ZONE_DESCRIPTOR_CAPACITY);
        if canonical.is_empty() {
            if !descriptor.trim().is_empty() {
                warn!("Unusable timezone rule, falling back to UTC");
            }
            clock.set_timezone(UTC_DESCRIPTOR);
        } else {
            clock.set_timezone(&canonical);
        }
        info!("Timezone set to '{}'", canonical.as_str());
        self.active = canonical;
    }

    /// Descriptor currently applied; empty means UTC
    pub fn active(&self) -> &str {
        &self.active
    }

    /// Human-readable expansion of the active zone
    pub fn describe<R: TzRules>(&self, rules: &R) -> ZoneDescription {
        rules.describe(&self.active)
    }

    /// Seconds east of UTC at `utc_secs`
    pub fn utc_offset<R: TzRules>(&self, rules: &R, utc_secs: i64) -> i32 {
        if self.active.is_empty() {
            return 0;
        }
        rules.utc_offset(&self.active, utc_secs)
    }

    /// Broken-down local time at `utc_secs`
    pub fn local_time<R: TzRules>(&self, rules: &R, utc_secs: i64) -> CivilDateTime {
        let offset = i64::from(self.utc_offset(rules, utc_secs));
        CivilDateTime::from_unix(utc_secs.saturating_add(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posix_tz::PosixTzRules;

    #[derive(Default)]
    struct TzRecorder {
        last: Option<String>,
    }

    impl SystemClock for TzRecorder {
        fn set_clock(&mut self, _epoch_secs: i64, _micros: u32) {}

        fn now(&self) -> i64 {
            0
        }

        fn set_timezone(&mut self, descriptor: &str) {
            self.last = Some(descriptor.to_string());
        }
    }

    #[test]
    fn test_apply_valid_zone() {
        let mut zone = ZoneClock::new();
        let mut clock = TzRecorder::default();
        zone.apply("EST5EDT,M3.2.0,M11.1.0", &mut clock, &PosixTzRules);
        assert_eq!(zone.active(), "EST5EDT,M3.2.0,M11.1.0");
        assert_eq!(clock.last.as_deref(), Some("EST5EDT,M3.2.0,M11.1.0"));
    }

    #[test]
    fn test_malformed_zone_degrades_to_utc() {
        let mut zone = ZoneClock::new();
        let mut clock = TzRecorder::default();
        zone.apply("EST5EDT,M3.2.0,M11.1.0", &mut clock, &PosixTzRules);
        zone.apply("not a zone!", &mut clock, &PosixTzRules);
        assert_eq!(zone.active(), "");
        assert_eq!(clock.last.as_deref(), Some(UTC_DESCRIPTOR));
        assert_eq!(zone.utc_offset(&PosixTzRules, 1_700_000_000), 0);
    }

    #[test]
    fn test_local_time_uses_dst() {
        let mut zone = ZoneClock::new();
        let mut clock = TzRecorder::default();
        zone.apply("AEST-10AEDT,M10.1.0,M4.1.0/3", &mut clock, &PosixTzRules);
        // 2024-01-15 00:00:00 UTC is 11:00 AEDT
        let local = zone.local_time(&PosixTzRules, 1_705_276_800);
        assert_eq!((local.day, local.hour, local.minute), (15, 11, 0));
        // 2024-07-01 00:00:00 UTC is 10:00 AEST
        let local = zone.local_time(&PosixTzRules, 1_719_792_000);
        assert_eq!((local.month, local.hour), (7, 10));
    }

    #[test]
    fn test_local_time_saturates_at_time_limits() {
        let mut zone = ZoneClock::new();
        let mut clock = TzRecorder::default();
        zone.apply("AEST-10AEDT,M10.1.0,M4.1.0/3", &mut clock, &PosixTzRules);
        assert_eq!(
            zone.local_time(&PosixTzRules, i64::MAX - 10),
            CivilDateTime::from_unix(i64::MAX)
        );
        zone.apply("EST5", &mut clock, &PosixTzRules);
        assert_eq!(
            zone.local_time(&PosixTzRules, i64::MIN + 10),
            CivilDateTime::from_unix(i64::MIN)
        );
    }

    #[test]
    fn test_describe_active_zone() {
        let mut zone = ZoneClock::new();
        let mut clock = TzRecorder::default();
        zone.apply("EST5", &mut clock, &PosixTzRules);
        assert_eq!(zone.describe(&PosixTzRules).as_str(), "EST UTC-05:00");
    }
}
