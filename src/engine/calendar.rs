use chrono::{Datelike, NaiveDate};

use crate::model::*;

use super::EngineError;

/// Classify one day. Unavailability wins over selection: a day outside the
/// window is `OutsideWindow` even if also reserved, and a reserved day is never
/// shown as `Selected`.
pub fn classify_day(
    day: Day,
    window: Option<&AvailabilityWindow>,
    reservations: &[Reservation],
    selected: Option<&DateRange>,
) -> DayState {
    if window.is_some_and(|w| !w.contains_day(day)) {
        return DayState::OutsideWindow;
    }
    if reservations
        .iter()
        .any(|r| r.status.occupies_calendar() && r.range.contains_day(day))
    {
        return DayState::Reserved;
    }
    if selected.is_some_and(|s| s.contains_day(day)) {
        return DayState::Selected;
    }
    DayState::Available
}

/// Lay out `year`-`month` Sunday-first and classify every day in it.
///
/// Leading cells before the 1st are `Empty`. `today` marks at most one cell
/// and is orthogonal to the day's state. The selection only counts when both
/// ends are set and ordered.
pub fn classify_month(
    year: i32,
    month: u32,
    window: Option<&AvailabilityWindow>,
    reservations: &[Reservation],
    selected: &ProposedRange,
    today: Day,
) -> Result<CalendarMonth, EngineError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or(EngineError::InvalidMonth { year, month })?;
    let leading = first.weekday().num_days_from_sunday() as usize;
    let selected = selected.as_range();

    let mut cells = Vec::with_capacity(leading + 31);
    cells.resize(leading, CalendarCell::Empty);
    for date in first.iter_days().take_while(|d| d.month() == month) {
        cells.push(CalendarCell::Day {
            date,
            state: classify_day(date, window, reservations, selected.as_ref()),
            today: date == today,
        });
    }

    Ok(CalendarMonth { year, month, cells })
}
