//! Calendar date/time conversions using O(1) algorithms
//!
//! Implements Howard Hinnant's civil_from_days and days_from_civil algorithms.
//! Reference: http://howardhinnant.github.io/date_algorithms.html
//!
//! Used for timezone rule evaluation and clock formatting. Works on signed
//! 64-bit Unix seconds, so dates before 1970 convert correctly too.

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Days from 0000-03-01 to 1970-01-01
const EPOCH_SHIFT_DAYS: i64 = 719_468;
const DAYS_PER_ERA: i64 = 146_097;

/// Broken-down UTC or local time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CivilDateTime {
    pub year: i32,
    /// 1-12
    pub month: u8,
    /// 1-31
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// 0 = Sunday
    pub weekday: u8,
}

impl CivilDateTime {
    /// Break down Unix seconds. Apply a UTC offset first for local time.
    pub fn from_unix(secs: i64) -> Self {
        let days = secs.div_euclid(SECONDS_PER_DAY);
        let secs_today = secs.rem_euclid(SECONDS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        Self {
            year,
            month,
            day,
            hour: (secs_today / 3600) as u8,
            minute: ((secs_today % 3600) / 60) as u8,
            second: (secs_today % 60) as u8,
            weekday: weekday_from_days(days),
        }
    }

    pub fn to_unix(&self) -> i64 {
        days_from_civil(self.year, self.month, self.day) * SECONDS_PER_DAY
            + self.seconds_of_day() as i64
    }

    pub fn seconds_of_day(&self) -> u32 {
        u32::from(self.hour) * 3600 + u32::from(self.minute) * 60 + u32::from(self.second)
    }
}

/// Gregorian leap year rule
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Day of week for a day count since 1970-01-01 (a Thursday), 0 = Sunday
pub fn weekday_from_days(days_since_epoch: i64) -> u8 {
    (days_since_epoch + 4).rem_euclid(7) as u8
}

/// Convert days since Unix epoch to civil date (year, month, day)
pub fn civil_from_days(days_since_epoch: i64) -> (i32, u8, u8) {
    // Shift epoch to 0000-03-01 so the leap day ends the year
    let z = days_since_epoch + EPOCH_SHIFT_DAYS;
    let era = if z >= 0 { z } else { z - (DAYS_PER_ERA - 1) } / DAYS_PER_ERA;
    let doe = z - era * DAYS_PER_ERA; // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365; // [0, 399]
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11], 0 = March
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m <= 2 { y + 1 } else { y };
    (year as i32, m as u8, d as u8)
}

/// Convert civil date (year, month, day) to days since Unix epoch
pub fn days_from_civil(year: i32, month: u8, day: u8) -> i64 {
    let m = i64::from(month);
    let d = i64::from(day);
    let y = if m <= 2 {
        i64::from(year) - 1
    } else {
        i64::from(year)
    };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400; // [0, 399]
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + d - 1; // [0, 365]
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy; // [0, 146096]
    era * DAYS_PER_ERA + doe - EPOCH_SHIFT_DAYS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leap_year() {
        assert!(is_leap_year(2000)); // Divisible by 400
        assert!(is_leap_year(2024)); // Divisible by 4
        assert!(!is_leap_year(1900)); // Divisible by 100, not 400
        assert!(!is_leap_year(2023));
        assert!(!is_leap_year(2100));
    }

    #[test]
    fn test_unix_epoch() {
        let dt = CivilDateTime::from_unix(0);
        assert_eq!((dt.year, dt.month, dt.day), (1970, 1, 1));
        assert_eq!((dt.hour, dt.minute, dt.second), (0, 0, 0));
        assert_eq!(dt.weekday, 4); // Thursday
    }

    #[test]
    fn test_round_trip_conversion() {
        let test_dates = [
            0i64,       // 1970-01-01 00:00:00
            -1,         // 1969-12-31 23:59:59
            946684800,  // 2000-01-01 00:00:00
            1704067200, // 2024-01-01 00:00:00
            2147483647, // 2038-01-19 03:14:07
            4102444800, // 2100-01-01 00:00:00
        ];
        for &unix_secs in &test_dates {
            let dt = CivilDateTime::from_unix(unix_secs);
            assert_eq!(dt.to_unix(), unix_secs, "round trip failed for {}", unix_secs);
        }
    }

    #[test]
    fn test_before_epoch() {
        let dt = CivilDateTime::from_unix(-1);
        assert_eq!((dt.year, dt.month, dt.day), (1969, 12, 31));
        assert_eq!((dt.hour, dt.minute, dt.second), (23, 59, 59));
        assert_eq!(dt.weekday, 3); // Wednesday
    }

    #[test]
    fn test_leap_day_2024() {
        let days = days_from_civil(2024, 2, 29);
        assert_eq!(civil_from_days(days), (2024, 2, 29));
        assert_eq!(civil_from_days(days + 1), (2024, 3, 1));
        assert_eq!(weekday_from_days(days), 4); // Thursday
    }

    #[test]
    fn test_known_weekday() {
        // 2024-01-01 was a Monday
        assert_eq!(CivilDateTime::from_unix(1704067200).weekday, 1);
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2024, 4), 30);
        assert_eq!(days_in_month(2024, 12), 31);
    }
}
