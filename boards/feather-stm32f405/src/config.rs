#![deny(unsafe_code)]
#![deny(warnings)]
//! Board configuration

use node_core::{SyncConfig, TimeServiceConfig, ZoneConfig};

/// Host loop period driving the time service
pub const SERVICE_TICK_MS: u64 = 50;

/// Flash offset of the timezone record block: sector 11, the last 128 KB sector
pub const ZONE_STORE_OFFSET: u32 = 0x000E_0000;

/// Network stack configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// MAC address for Ethernet
    pub mac_addr: [u8; 6],
    /// Random seed for network stack
    pub seed: u64,
    /// W5500 SPI clock
    pub spi_hz: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mac_addr: [0x02, 0x00, 0x00, 0x12, 0x34, 0x56],
            seed: 0x1234_5678_u64,
            spi_hz: 10_000_000,
        }
    }
}

/// Time service settings for this node
pub fn time_service_config() -> TimeServiceConfig {
    TimeServiceConfig {
        sync: SyncConfig {
            server: "pool.ntp.org",
            ..SyncConfig::default()
        },
        zone: ZoneConfig::default(),
    }
}
