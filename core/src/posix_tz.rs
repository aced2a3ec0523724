//! POSIX `TZ` rule support
//!
//! Parses rules of the form `std offset [dst [offset] [,start[/time],end[/time]]]`
//! as used by newlib/glibc `TZ` variables, e.g. `AEST-10AEDT,M10.1.0,M4.1.0/3`.
//! Offsets follow POSIX sign convention (positive is west of UTC) and are
//! stored internally as seconds east of UTC.
//!
//! `PosixTzRules` is the node's `TzRules` implementation; the rest of the
//! subsystem only sees the trait.

use core::fmt::Write;

use hal_abstractions::tz::{TzRules, ZoneDescription, ZoneDescriptor, ZONE_DESCRIPTOR_CAPACITY};

use crate::calendar::{
    days_from_civil, days_in_month, is_leap_year, weekday_from_days, CivilDateTime,
    SECONDS_PER_DAY,
};

const NAME_CAPACITY: usize = 16;

/// Zone abbreviation, e.g. `AEST` or `+10` from `<+10>`
pub type ZoneName = heapless::String<NAME_CAPACITY>;

/// Transition time when a rule omits `/time`
const DEFAULT_TRANSITION_SECS: i32 = 2 * 3600;

/// Offset hours limit (POSIX allows 0-24)
const MAX_OFFSET_HOURS: u32 = 24;

/// Transition time hours limit (extended POSIX allows up to 167)
const MAX_TRANSITION_HOURS: u32 = 167;

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Rule parse failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TzParseError {
    Empty,
    BadName,
    BadOffset,
    BadRule,
    TrailingCharacters,
}

/// Day a daylight saving transition falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDate {
    /// `Mm.w.d`: weekday `d` (0 = Sunday) of week `w` (5 = last) in month `m`
    MonthWeekDay { month: u8, week: u8, weekday: u8 },
    /// `Jn`: day 1-365, February 29 is never counted
    Julian { day: u16 },
    /// `n`: zero-based day 0-365, counting February 29
    ZeroBased { day: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub date: TransitionDate,
    /// Seconds after local midnight; may be negative or exceed one day
    pub time: i32,
}

impl Transition {
    const fn month_week_day(month: u8, week: u8, weekday: u8) -> Self {
        Self {
            date: TransitionDate::MonthWeekDay {
                month,
                week,
                weekday,
            },
            time: DEFAULT_TRANSITION_SECS,
        }
    }

    /// Local seconds since the Unix epoch at which this transition happens in `year`
    fn local_secs(&self, year: i32) -> i64 {
        let days = match self.date {
            TransitionDate::MonthWeekDay {
                month,
                week,
                weekday,
            } => {
                let first = days_from_civil(year, month, 1);
                let shift = (i64::from(weekday) - i64::from(weekday_from_days(first))).rem_euclid(7);
                let mut day = 1 + shift + i64::from(week - 1) * 7;
                let last = i64::from(days_in_month(year, month));
                while day > last {
                    day -= 7;
                }
                first + day - 1
            }
            TransitionDate::Julian { day } => {
                let leap_shift = if is_leap_year(year) && day >= 60 { 1 } else { 0 };
                days_from_civil(year, 1, 1) + i64::from(day) - 1 + leap_shift
            }
            TransitionDate::ZeroBased { day } => days_from_civil(year, 1, 1) + i64::from(day),
        };
        days * SECONDS_PER_DAY + i64::from(self.time)
    }
}

/// Daylight saving part of a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DstRule {
    pub name: ZoneName,
    /// Seconds east of UTC while daylight saving is in effect
    pub offset: i32,
    /// Given in local standard time
    pub start: Transition,
    /// Given in local daylight time
    pub end: Transition,
}

/// A parsed POSIX timezone rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixTz {
    pub std_name: ZoneName,
    /// Seconds east of UTC
    pub std_offset: i32,
    pub dst: Option<DstRule>,
}

impl PosixTz {
    pub fn parse(rule: &str) -> Result<Self, TzParseError> {
        let mut cursor = Cursor::new(rule);
        if cursor.is_done() {
            return Err(TzParseError::Empty);
        }

        let std_name = parse_name(&mut cursor)?;
        let std_offset = -parse_hms(&mut cursor, MAX_OFFSET_HOURS).ok_or(TzParseError::BadOffset)?;
        if cursor.is_done() {
            return Ok(Self {
                std_name,
                std_offset,
                dst: None,
            });
        }

        let dst_name = parse_name(&mut cursor)?;
        let dst_offset = match cursor.peek() {
            Some(b'+' | b'-' | b'0'..=b'9') => {
                -parse_hms(&mut cursor, MAX_OFFSET_HOURS).ok_or(TzParseError::BadOffset)?
            }
            _ => std_offset + 3600,
        };

        // No explicit rule: US rules, as glibc does
        let (start, end) = if cursor.eat(b',') {
            let start = parse_transition(&mut cursor).ok_or(TzParseError::BadRule)?;
            if !cursor.eat(b',') {
                return Err(TzParseError::BadRule);
            }
            let end = parse_transition(&mut cursor).ok_or(TzParseError::BadRule)?;
            (start, end)
        } else {
            (
                Transition::month_week_day(3, 2, 0),
                Transition::month_week_day(11, 1, 0),
            )
        };

        if !cursor.is_done() {
            return Err(TzParseError::TrailingCharacters);
        }

        Ok(Self {
            std_name,
            std_offset,
            dst: Some(DstRule {
                name: dst_name,
                offset: dst_offset,
                start,
                end,
            }),
        })
    }

    /// True if daylight saving is in effect at `utc_secs`
    pub fn is_dst_at(&self, utc_secs: i64) -> bool {
        let Some(dst) = &self.dst else {
            return false;
        };
        let local_std = utc_secs.saturating_add(i64::from(self.std_offset));
        let year = CivilDateTime::from_unix(local_std).year;
        let start_utc = dst.start.local_secs(year) - i64::from(self.std_offset);
        let end_utc = dst.end.local_secs(year) - i64::from(dst.offset);
        if start_utc < end_utc {
            utc_secs >= start_utc && utc_secs < end_utc
        } else {
            // Southern hemisphere: daylight saving spans the new year
            !(utc_secs >= end_utc && utc_secs < start_utc)
        }
    }

    /// Seconds east of UTC in effect at `utc_secs`
    pub fn offset_at(&self, utc_secs: i64) -> i32 {
        match &self.dst {
            Some(dst) if self.is_dst_at(utc_secs) => dst.offset,
            _ => self.std_offset,
        }
    }

    /// Abbreviation in effect at `utc_secs`
    pub fn name_at(&self, utc_secs: i64) -> &str {
        match &self.dst {
            Some(dst) if self.is_dst_at(utc_secs) => dst.name.as_str(),
            _ => self.std_name.as_str(),
        }
    }

    fn describe_into(&self, out: &mut impl Write) -> core::fmt::Result {
        write!(out, "{} ", self.std_name)?;
        write_utc_offset(out, self.std_offset)?;
        if let Some(dst) = &self.dst {
            write!(out, ", daylight saving {} ", dst.name)?;
            write_utc_offset(out, dst.offset)?;
            out.write_str(" from ")?;
            write_transition(out, &dst.start)?;
            out.write_str(" to ")?;
            write_transition(out, &dst.end)?;
        }
        Ok(())
    }
}

/// The node's timezone rule collaborator
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixTzRules;

impl TzRules for PosixTzRules {
    fn canonicalize(&self, descriptor: &str, max_len: usize) -> ZoneDescriptor {
        let limit = max_len.min(ZONE_DESCRIPTOR_CAPACITY);
        let mut cleaned = ZoneDescriptor::new();
        for ch in descriptor.chars().filter(char::is_ascii_graphic) {
            if cleaned.len() >= limit || cleaned.push(ch).is_err() {
                break;
            }
        }
        if cleaned.is_empty() || PosixTz::parse(&cleaned).is_err() {
            cleaned.clear();
        }
        cleaned
    }

    fn describe(&self, descriptor: &str) -> ZoneDescription {
        let mut text = ZoneDescription::new();
        // Overflowing the description only truncates it
        let _ = match PosixTz::parse(descriptor) {
            Ok(tz) => tz.describe_into(&mut text),
            Err(TzParseError::Empty) => text.write_str("UTC (no timezone rule)"),
            Err(_) => write!(text, "Unrecognised timezone '{}', using UTC", descriptor),
        };
        text
    }

    fn utc_offset(&self, descriptor: &str, utc_secs: i64) -> i32 {
        PosixTz::parse(descriptor)
            .map(|tz| tz.offset_at(utc_secs))
            .unwrap_or(0)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Unsigned decimal of 1 to `max_digits` digits
    fn number(&mut self, max_digits: usize) -> Option<u32> {
        let start = self.pos;
        let mut value = 0u32;
        while self.pos - start < max_digits {
            match self.peek() {
                Some(digit @ b'0'..=b'9') => {
                    value = value * 10 + u32::from(digit - b'0');
                    self.pos += 1;
                }
                _ => break,
            }
        }
        (self.pos > start).then_some(value)
    }
}

fn parse_name(cursor: &mut Cursor<'_>) -> Result<ZoneName, TzParseError> {
    let mut name = ZoneName::new();
    if cursor.eat(b'<') {
        loop {
            match cursor.bump() {
                Some(b'>') => break,
                Some(byte) if byte.is_ascii_alphanumeric() || byte == b'+' || byte == b'-' => {
                    name.push(char::from(byte))
                        .map_err(|_| TzParseError::BadName)?;
                }
                _ => return Err(TzParseError::BadName),
            }
        }
    } else {
        while let Some(byte) = cursor.peek().filter(u8::is_ascii_alphabetic) {
            name.push(char::from(byte))
                .map_err(|_| TzParseError::BadName)?;
            cursor.pos += 1;
        }
    }
    if name.len() < 3 {
        return Err(TzParseError::BadName);
    }
    Ok(name)
}

/// `[+-]hh[:mm[:ss]]` as signed seconds, sign as written
fn parse_hms(cursor: &mut Cursor<'_>, max_hours: u32) -> Option<i32> {
    let negative = if cursor.eat(b'-') {
        true
    } else {
        cursor.eat(b'+');
        false
    };
    let hours = cursor.number(3).filter(|h| *h <= max_hours)?;
    let mut secs = hours * 3600;
    if cursor.eat(b':') {
        secs += cursor.number(2).filter(|m| *m < 60)? * 60;
        if cursor.eat(b':') {
            secs += cursor.number(2).filter(|s| *s < 60)?;
        }
    }
    let secs = secs as i32;
    Some(if negative { -secs } else { secs })
}

fn parse_transition(cursor: &mut Cursor<'_>) -> Option<Transition> {
    let date = match cursor.peek()? {
        b'M' => {
            cursor.pos += 1;
            let month = cursor.number(2).filter(|m| (1..=12).contains(m))?;
            cursor.eat(b'.').then_some(())?;
            let week = cursor.number(1).filter(|w| (1..=5).contains(w))?;
            cursor.eat(b'.').then_some(())?;
            let weekday = cursor.number(1).filter(|d| *d <= 6)?;
            TransitionDate::MonthWeekDay {
                month: month as u8,
                week: week as u8,
                weekday: weekday as u8,
            }
        }
        b'J' => {
            cursor.pos += 1;
            let day = cursor.number(3).filter(|d| (1..=365).contains(d))?;
            TransitionDate::Julian { day: day as u16 }
        }
        b'0'..=b'9' => {
            let day = cursor.number(3).filter(|d| *d <= 365)?;
            TransitionDate::ZeroBased { day: day as u16 }
        }
        _ => return None,
    };
    let time = if cursor.eat(b'/') {
        parse_hms(cursor, MAX_TRANSITION_HOURS)?
    } else {
        DEFAULT_TRANSITION_SECS
    };
    Some(Transition { date, time })
}

fn write_utc_offset(out: &mut impl Write, east_secs: i32) -> core::fmt::Result {
    let sign = if east_secs < 0 { '-' } else { '+' };
    let magnitude = east_secs.unsigned_abs();
    write!(out, "UTC{}{:02}:{:02}", sign, magnitude / 3600, (magnitude % 3600) / 60)?;
    if magnitude % 60 != 0 {
        write!(out, ":{:02}", magnitude % 60)?;
    }
    Ok(())
}

fn write_transition(out: &mut impl Write, transition: &Transition) -> core::fmt::Result {
    match transition.date {
        TransitionDate::MonthWeekDay {
            month,
            week,
            weekday,
        } => {
            let ordinal = match week {
                1 => "1st",
                2 => "2nd",
                3 => "3rd",
                4 => "4th",
                _ => "last",
            };
            write!(
                out,
                "{} {} of {}",
                ordinal,
                WEEKDAYS[usize::from(weekday) % 7],
                MONTHS[usize::from(month - 1) % 12]
            )?;
        }
        TransitionDate::Julian { day } => write!(out, "day {} (ignoring Feb 29)", day)?,
        TransitionDate::ZeroBased { day } => write!(out, "day {} (from 0)", day)?,
    }
    let sign = if transition.time < 0 { "-" } else { "" };
    let magnitude = transition.time.unsigned_abs();
    write!(
        out,
        " {}{:02}:{:02}",
        sign,
        magnitude / 3600,
        (magnitude % 3600) / 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYDNEY: &str = "AEST-10AEDT,M10.1.0,M4.1.0/3";

    #[test]
    fn test_parse_fixed_offset() {
        let tz = PosixTz::parse("EST5").unwrap();
        assert_eq!(tz.std_name.as_str(), "EST");
        assert_eq!(tz.std_offset, -5 * 3600);
        assert!(tz.dst.is_none());
    }

    #[test]
    fn test_parse_quoted_names() {
        let tz = PosixTz::parse("<+0530>-5:30").unwrap();
        assert_eq!(tz.std_name.as_str(), "+0530");
        assert_eq!(tz.std_offset, 5 * 3600 + 30 * 60);
    }

    #[test]
    fn test_parse_sydney_rule() {
        let tz = PosixTz::parse(SYDNEY).unwrap();
        assert_eq!(tz.std_offset, 10 * 3600);
        let dst = tz.dst.unwrap();
        assert_eq!(dst.name.as_str(), "AEDT");
        assert_eq!(dst.offset, 11 * 3600);
        assert_eq!(dst.start, Transition::month_week_day(10, 1, 0));
        assert_eq!(
            dst.end,
            Transition {
                date: TransitionDate::MonthWeekDay {
                    month: 4,
                    week: 1,
                    weekday: 0
                },
                time: 3 * 3600,
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(PosixTz::parse(""), Err(TzParseError::Empty));
        assert_eq!(PosixTz::parse("AB5"), Err(TzParseError::BadName));
        assert_eq!(PosixTz::parse("EST"), Err(TzParseError::BadOffset));
        assert_eq!(PosixTz::parse("EST5EDT,M13.1.0,M4.1.0"), Err(TzParseError::BadRule));
        assert_eq!(PosixTz::parse("EST5EDT,M3.2.0"), Err(TzParseError::BadRule));
        assert_eq!(
            PosixTz::parse("EST5EDT,M3.2.0,M11.1.0x"),
            Err(TzParseError::TrailingCharacters)
        );
    }

    #[test]
    fn test_sydney_offsets_across_the_year() {
        let tz = PosixTz::parse(SYDNEY).unwrap();
        // 2024-01-15 00:00 UTC: summer, daylight saving
        assert_eq!(tz.offset_at(1_705_276_800), 11 * 3600);
        // 2024-07-01 00:00 UTC: winter, standard time
        assert_eq!(tz.offset_at(1_719_792_000), 10 * 3600);
        // DST ends 2024-04-07 03:00 AEDT = 2024-04-06 16:00 UTC
        assert_eq!(tz.offset_at(1_712_419_200 - 1), 11 * 3600);
        assert_eq!(tz.offset_at(1_712_419_200), 10 * 3600);
        // DST starts 2024-10-06 02:00 AEST = 2024-10-05 16:00 UTC
        assert_eq!(tz.offset_at(1_728_144_000 - 1), 10 * 3600);
        assert_eq!(tz.offset_at(1_728_144_000), 11 * 3600);
        assert_eq!(tz.name_at(1_728_144_000), "AEDT");
    }

    #[test]
    fn test_northern_default_rules() {
        let tz = PosixTz::parse("EST5EDT").unwrap();
        // 2024-03-10 02:00 EST = 07:00 UTC
        assert_eq!(tz.offset_at(1_710_054_000 - 1), -5 * 3600);
        assert_eq!(tz.offset_at(1_710_054_000), -4 * 3600);
        // 2024-11-03 02:00 EDT = 06:00 UTC
        assert_eq!(tz.offset_at(1_730_613_600 - 1), -4 * 3600);
        assert_eq!(tz.offset_at(1_730_613_600), -5 * 3600);
    }

    #[test]
    fn test_offset_at_extreme_times() {
        let tz = PosixTz::parse(SYDNEY).unwrap();
        for utc in [i64::MAX, i64::MAX - 10, i64::MIN, i64::MIN + 10] {
            let offset = tz.offset_at(utc);
            assert!(offset == 10 * 3600 || offset == 11 * 3600);
        }
        let tz = PosixTz::parse("EST5EDT").unwrap();
        let offset = tz.offset_at(i64::MIN);
        assert!(offset == -5 * 3600 || offset == -4 * 3600);
    }

    #[test]
    fn test_last_week_rule() {
        // Central Europe: last Sunday of March 01:00 UTC
        let tz = PosixTz::parse("CET-1CEST,M3.5.0,M10.5.0/3").unwrap();
        // 2024-03-31 02:00 CET = 01:00 UTC
        assert_eq!(tz.offset_at(1_711_846_800 - 1), 3600);
        assert_eq!(tz.offset_at(1_711_846_800), 7200);
    }

    #[test]
    fn test_julian_rule_skips_leap_day() {
        let transition = Transition {
            date: TransitionDate::Julian { day: 60 },
            time: 0,
        };
        // J60 is March 1 in both leap and common years
        assert_eq!(
            transition.local_secs(2024),
            days_from_civil(2024, 3, 1) * SECONDS_PER_DAY
        );
        assert_eq!(
            transition.local_secs(2023),
            days_from_civil(2023, 3, 1) * SECONDS_PER_DAY
        );
    }

    #[test]
    fn test_canonicalize_strips_whitespace() {
        let rules = PosixTzRules;
        let clean = rules.canonicalize("  AEST-10 AEDT,M10.1.0,M4.1.0/3\n", ZONE_DESCRIPTOR_CAPACITY);
        assert_eq!(clean.as_str(), SYDNEY);
    }

    #[test]
    fn test_canonicalize_rejects_malformed_to_empty() {
        let rules = PosixTzRules;
        assert_eq!(rules.canonicalize("not a zone", ZONE_DESCRIPTOR_CAPACITY).as_str(), "");
        assert_eq!(rules.canonicalize("", ZONE_DESCRIPTOR_CAPACITY).as_str(), "");
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let rules = PosixTzRules;
        let inputs = [
            SYDNEY,
            " EST5EDT ",
            "<+10>-10",
            "garbage!",
            "",
            "CET-1CEST,M3.5.0,M10.5.0/3",
            "NZST-12NZDT,M9.5.0,M4.1.0/3 trailing words that overflow the field",
        ];
        for input in inputs {
            let once = rules.canonicalize(input, ZONE_DESCRIPTOR_CAPACITY);
            let twice = rules.canonicalize(&once, ZONE_DESCRIPTOR_CAPACITY);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_canonicalize_truncates_to_max_len() {
        let rules = PosixTzRules;
        // Truncating a valid fixed-offset rule keeps it valid
        assert_eq!(rules.canonicalize("EST5", 4).as_str(), "EST5");
        // Truncation that breaks the rule yields UTC
        assert_eq!(rules.canonicalize(SYDNEY, 20).as_str(), "");
    }

    #[test]
    fn test_describe() {
        let rules = PosixTzRules;
        assert_eq!(
            rules.describe(SYDNEY).as_str(),
            "AEST UTC+10:00, daylight saving AEDT UTC+11:00 from 1st Sunday of October 02:00 to 1st Sunday of April 03:00"
        );
        assert_eq!(rules.describe("").as_str(), "UTC (no timezone rule)");
        assert_eq!(rules.describe("EST5").as_str(), "EST UTC-05:00");
        assert!(rules.describe("???").starts_with("Unrecognised timezone"));
    }

    #[test]
    fn test_utc_offset_degrades_to_zero() {
        let rules = PosixTzRules;
        assert_eq!(rules.utc_offset("", 0), 0);
        assert_eq!(rules.utc_offset("bogus", 0), 0);
        assert_eq!(rules.utc_offset("EST5", 0), -5 * 3600);
    }
}
