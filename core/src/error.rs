//! Error types for the time subsystem
//!
//! None of these reach the host loop: the driver entry points log them and
//! fall back to defaults or retries.

/// Configuration record storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Storage backend failed to mount
    Unavailable,
    /// No record has been written yet
    Missing,
    /// Record exists but could not be opened for reading
    OpenRead,
    /// Record could not be created for writing
    OpenWrite,
    /// Stored size differs from the record layout
    WrongSize,
    /// Fewer bytes read than the record layout
    ShortRead,
    /// Fewer bytes written than the record layout
    ShortWrite,
    /// Backend reported an I/O error mid-transfer
    Io,
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "storage unavailable"),
            Self::Missing => write!(f, "record missing"),
            Self::OpenRead => write!(f, "record did not open for read"),
            Self::OpenWrite => write!(f, "record did not open for write"),
            Self::WrongSize => write!(f, "record has wrong size"),
            Self::ShortRead => write!(f, "record short read"),
            Self::ShortWrite => write!(f, "record short write"),
            Self::Io => write!(f, "storage I/O error"),
        }
    }
}

impl core::error::Error for StoreError {}

/// Time sync protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncError {
    /// Local port could not be bound
    TransportUnavailable,
    /// Request datagram could not be queued
    Send,
    /// Response too short to carry a transmit timestamp
    ShortPacket,
}

impl core::fmt::Display for SyncError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TransportUnavailable => write!(f, "transport unavailable"),
            Self::Send => write!(f, "request send failed"),
            Self::ShortPacket => write!(f, "short response packet"),
        }
    }
}

impl core::error::Error for SyncError {}
