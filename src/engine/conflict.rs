use chrono::Datelike;
use rust_decimal::Decimal;

use crate::model::*;

use super::EngineError;

/// Local calendar date of the server.
pub fn today() -> Day {
    chrono::Local::now().date_naive()
}

/// First reservation that holds any day of `range`. Declined reservations are skipped.
pub fn first_conflict<'a, I>(reservations: I, range: &DateRange) -> Option<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    reservations.into_iter().find(|r| r.blocks(range))
}

/// Ledger-side lookup of the booking that holds any day of `range`.
pub(crate) fn conflicting_booking<'a>(is: &'a ItemState, range: &DateRange) -> Option<&'a BookingEntry> {
    is.overlapping(range)
        .find(|b| b.reservation.status.occupies_calendar())
}

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    use crate::limits::*;
    if range.start.year() < MIN_VALID_YEAR || range.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if range.day_count() > MAX_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: Option<&AvailabilityWindow>) -> Result<(), EngineError> {
    use crate::limits::*;
    if let Some(w) = window
        && (w.start.year() < MIN_VALID_YEAR || w.end.year() > MAX_VALID_YEAR)
    {
        return Err(EngineError::LimitExceeded("availability window out of range"));
    }
    Ok(())
}

pub(crate) fn validate_price(price: Decimal) -> Result<(), EngineError> {
    if price.is_sign_negative() || price > Decimal::from(crate::limits::MAX_DAILY_RATE) {
        return Err(EngineError::InvalidPrice(price));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::LimitExceeded(what));
    }
    if name.len() > crate::limits::MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}
