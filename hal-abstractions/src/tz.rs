//! Timezone rule canonicalizer and describer

/// Usable characters in a timezone descriptor (the persisted field holds one more for NUL)
pub const ZONE_DESCRIPTOR_CAPACITY: usize = 49;

/// Capacity of a human-readable zone description
pub const DESCRIPTION_CAPACITY: usize = 192;

/// Bounded POSIX `TZ` style rule, e.g. `AEST-10AEDT,M10.1.0,M4.1.0/3`
pub type ZoneDescriptor = heapless::String<ZONE_DESCRIPTOR_CAPACITY>;

/// Display-only expansion of a descriptor
pub type ZoneDescription = heapless::String<DESCRIPTION_CAPACITY>;

/// Pure functions over POSIX timezone rules
///
/// An empty descriptor means UTC with no daylight saving rule.
pub trait TzRules {
    /// Clean up `descriptor` to at most `max_len` characters.
    ///
    /// Must be idempotent: `canonicalize(canonicalize(d)) == canonicalize(d)`.
    /// Unusable input canonicalizes to the empty descriptor.
    fn canonicalize(&self, descriptor: &str, max_len: usize) -> ZoneDescriptor;

    /// Human-readable expansion. Never fails; malformed input yields fallback text.
    fn describe(&self, descriptor: &str) -> ZoneDescription;

    /// Seconds east of UTC in effect at `utc_secs`; 0 for empty or malformed rules.
    fn utc_offset(&self, descriptor: &str, utc_secs: i64) -> i32;
}
