//! Process wall clock

/// Wall clock shared by everything that formats or stamps time
///
/// Seconds are Unix epoch seconds (1970-01-01 00:00:00 UTC).
pub trait SystemClock {
    /// Hard-set the clock. No slewing is expected.
    fn set_clock(&mut self, epoch_secs: i64, micros: u32);

    /// Current Unix time in whole seconds
    fn now(&self) -> i64;

    /// Platform hook for environment-style timezone settings (`TZ=` + `tzset`).
    ///
    /// Local time conversion inside the time subsystem does not rely on it,
    /// so platforms without a libc timezone can keep the default.
    fn set_timezone(&mut self, _descriptor: &str) {}
}
