//! Time subsystem configuration structures

/// Network time client configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time server host name or address literal
    pub server: &'static str,
    /// Time server port
    pub server_port: u16,
    /// Local port bound by the transport
    pub local_port: u16,
    /// Delay between response polls while a request is outstanding
    pub poll_interval_ms: u64,
    /// Response polls before a request is abandoned
    pub max_poll_attempts: u16,
    /// Interval after a success until a second success confirms the clock
    pub fast_interval_ms: u64,
    /// Interval after the clock has been confirmed
    pub steady_interval_ms: u64,
    /// Interval after an abandoned request
    pub retry_interval_ms: u64,
    /// Added to the steady interval to form the staleness threshold
    pub staleness_grace_ms: u64,
}

impl SyncConfig {
    /// Longest wait for one response
    pub fn response_window_ms(&self) -> u64 {
        self.poll_interval_ms * u64::from(self.max_poll_attempts)
    }

    /// Time without an accepted response after which the clock is stale
    pub fn staleness_threshold_ms(&self) -> u64 {
        self.steady_interval_ms + self.staleness_grace_ms
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server: "pool.ntp.org",
            server_port: 123,
            local_port: 8888,
            poll_interval_ms: 500,
            max_poll_attempts: 20,
            fast_interval_ms: 20 * 1000,
            steady_interval_ms: 60 * 60 * 1000,
            retry_interval_ms: 20 * 1000,
            staleness_grace_ms: 10 * 60 * 1000,
        }
    }
}

/// Timezone record configuration
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    /// Name of the persisted record in blob storage
    pub record_name: &'static str,
    /// Zone used at first boot, after corruption and on reset
    pub default_zone_descriptor: &'static str,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            record_name: "/timeZoneCfg.bin",
            default_zone_descriptor: "AEST-10AEDT-11,M10.1.0/2,M4.1.0/3",
        }
    }
}

/// Complete time service configuration
#[derive(Debug, Clone, Default)]
pub struct TimeServiceConfig {
    pub sync: SyncConfig,
    pub zone: ZoneConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_response_window_is_ten_seconds() {
        assert_eq!(SyncConfig::default().response_window_ms(), 10_000);
    }

    #[test]
    fn test_default_staleness_threshold_is_seventy_minutes() {
        assert_eq!(
            SyncConfig::default().staleness_threshold_ms(),
            70 * 60 * 1000
        );
    }

    #[test]
    fn test_default_zone_is_sydney_and_canonical() {
        use crate::posix_tz::PosixTzRules;
        use hal_abstractions::tz::{TzRules, ZONE_DESCRIPTOR_CAPACITY};

        let zone = ZoneConfig::default().default_zone_descriptor;
        assert_eq!(zone, "AEST-10AEDT-11,M10.1.0/2,M4.1.0/3");
        assert_eq!(
            PosixTzRules.canonicalize(zone, ZONE_DESCRIPTOR_CAPACITY).as_str(),
            zone
        );
        // 2024-01-15 00:00:00 UTC is daylight saving time in Sydney
        assert_eq!(PosixTzRules.utc_offset(zone, 1_705_276_800), 11 * 3600);
        assert_eq!(PosixTzRules.utc_offset(zone, 1_719_792_000), 10 * 3600);
    }
}
