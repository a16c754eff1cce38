//! Day-precision date arithmetic, all in UTC.

use time::{Date, OffsetDateTime};

/// The current UTC day (the current instant floored to UTC midnight).
pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Whole days from `start` to `end`; negative when `end` precedes `start`.
pub fn day_span(start: Date, end: Date) -> i64 {
    i64::from(end.to_julian_day()) - i64::from(start.to_julian_day())
}

/// Midpoint of two days, floored.
///
/// Equivalent to averaging the UTC-millisecond representations with integer
/// floor division and truncating the result to the day boundary.
pub fn midpoint(start: Date, end: Date) -> Date {
    let mid = (i64::from(start.to_julian_day()) + i64::from(end.to_julian_day())).div_euclid(2);
    Date::from_julian_day(mid as i32).unwrap_or(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn day_span_counts_whole_days() {
        assert_eq!(day_span(date!(2024 - 01 - 01), date!(2024 - 01 - 03)), 2);
        assert_eq!(day_span(date!(2024 - 01 - 03), date!(2024 - 01 - 01)), -2);
        assert_eq!(day_span(date!(2024 - 01 - 01), date!(2024 - 01 - 01)), 0);
    }

    #[test]
    fn day_span_crosses_month_and_year_boundaries() {
        assert_eq!(day_span(date!(2023 - 12 - 31), date!(2024 - 01 - 01)), 1);
        assert_eq!(day_span(date!(2024 - 02 - 28), date!(2024 - 03 - 01)), 2);
    }

    #[test]
    fn midpoint_floors_to_earlier_day() {
        // Even span: exact middle.
        assert_eq!(
            midpoint(date!(2024 - 01 - 01), date!(2024 - 01 - 05)),
            date!(2024 - 01 - 03)
        );
        // Odd span: the half-day floors down.
        assert_eq!(
            midpoint(date!(2024 - 01 - 01), date!(2024 - 01 - 04)),
            date!(2024 - 01 - 02)
        );
    }

    #[test]
    fn midpoint_of_adjacent_days_is_start() {
        assert_eq!(
            midpoint(date!(2024 - 01 - 01), date!(2024 - 01 - 02)),
            date!(2024 - 01 - 01)
        );
    }
}
