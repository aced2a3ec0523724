#![deny(unsafe_code)]
#![deny(warnings)]
//! Internal RTC as the process wall clock
//!
//! The RTC runs from the 32.768 kHz LSE and keeps counting between time
//! updates. It has one-second resolution, so sub-second parts are dropped.

use core::cell::RefCell;

use critical_section::Mutex;
use defmt::{error, info};
use embassy_stm32::rtc::{DateTime, DayOfWeek, Rtc};
use hal_abstractions::SystemClock;
use node_core::calendar::CivilDateTime;

/// Global internal RTC instance
static RTC: Mutex<RefCell<Option<Rtc>>> = Mutex::new(RefCell::new(None));

/// Hand the RTC over to [`RtcClock`]. Call once during init.
pub fn initialize_rtc(rtc: Rtc) {
    critical_section::with(|cs| {
        RTC.borrow(cs).replace(Some(rtc));
    });
    info!("Internal RTC initialized");
}

/// [`SystemClock`] backed by the internal RTC
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcClock;

impl SystemClock for RtcClock {
    fn set_clock(&mut self, epoch_secs: i64, _micros: u32) {
        let Some(datetime) = to_datetime(epoch_secs) else {
            error!("Time {} out of RTC range", epoch_secs);
            return;
        };
        critical_section::with(|cs| match RTC.borrow(cs).borrow_mut().as_mut() {
            Some(rtc) => {
                if rtc.set_datetime(datetime).is_err() {
                    error!("RTC rejected {}", epoch_secs);
                }
            }
            None => error!("RTC not initialized"),
        });
    }

    /// 0 when the RTC is missing or unreadable
    fn now(&self) -> i64 {
        critical_section::with(|cs| {
            RTC.borrow(cs)
                .borrow_mut()
                .as_mut()
                .and_then(|rtc| rtc.now().ok())
                .map(from_datetime)
                .unwrap_or(0)
        })
    }
}

fn to_datetime(epoch_secs: i64) -> Option<DateTime> {
    let civil = CivilDateTime::from_unix(epoch_secs);
    let year = u16::try_from(civil.year).ok()?;
    DateTime::from(
        year,
        civil.month,
        civil.day,
        day_of_week(civil.weekday),
        civil.hour,
        civil.minute,
        civil.second,
        0,
    )
    .ok()
}

fn from_datetime(dt: DateTime) -> i64 {
    CivilDateTime {
        year: i32::from(dt.year()),
        month: dt.month(),
        day: dt.day(),
        hour: dt.hour(),
        minute: dt.minute(),
        second: dt.second(),
        weekday: 0,
    }
    .to_unix()
}

fn day_of_week(weekday: u8) -> DayOfWeek {
    match weekday {
        0 => DayOfWeek::Sunday,
        1 => DayOfWeek::Monday,
        2 => DayOfWeek::Tuesday,
        3 => DayOfWeek::Wednesday,
        4 => DayOfWeek::Thursday,
        5 => DayOfWeek::Friday,
        _ => DayOfWeek::Saturday,
    }
}
