//! JSON records exchanged with the marketplace backend, and their conversion
//! into the typed model. Nothing malformed gets past `ItemSnapshot::from_payloads`.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::limits::MAX_DAILY_RATE;
use crate::model::*;

/// Item detail as served by `GET /games/{id}`. Other fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetail {
    #[serde(with = "rust_decimal::serde::float")]
    pub price_per_day: Decimal,
    #[serde(default, alias = "startDate")]
    pub availability_start: Option<String>,
    #[serde(default, alias = "endDate")]
    pub availability_end: Option<String>,
}

/// One entry of `GET /bookings/game/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRecord {
    pub start_date: String,
    pub end_date: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PayloadError {
    BadDate(String),
    UnknownStatus(String),
    NegativePrice(Decimal),
    PriceTooHigh(Decimal),
    /// Only one of the two window bounds was set.
    HalfWindow,
    InvertedWindow { start: Day, end: Day },
    InvertedReservation { start: Day, end: Day },
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::BadDate(s) => write!(f, "unparseable date: {s:?}"),
            PayloadError::UnknownStatus(s) => write!(f, "unknown reservation status: {s:?}"),
            PayloadError::NegativePrice(p) => write!(f, "negative price: {p}"),
            PayloadError::PriceTooHigh(p) => write!(f, "price above {MAX_DAILY_RATE}: {p}"),
            PayloadError::HalfWindow => {
                write!(f, "availability window needs both a start and an end")
            }
            PayloadError::InvertedWindow { start, end } => {
                write!(f, "availability window starts after it ends: {start} > {end}")
            }
            PayloadError::InvertedReservation { start, end } => {
                write!(f, "reservation ends before it starts: {start} > {end}")
            }
        }
    }
}

impl std::error::Error for PayloadError {}

/// Calendar date of a date-string. Accepts `YYYY-MM-DD`, a naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]`, or RFC 3339. Any time part is dropped; for
/// RFC 3339 the date is the one written, not converted to another zone.
pub fn parse_day(s: &str) -> Result<Day, PayloadError> {
    let s = s.trim();
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(day);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt.date());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local().date());
    }
    Err(PayloadError::BadDate(s.to_string()))
}

impl FromStr for ReservationStatus {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ReservationStatus::Pending),
            "APPROVED" => Ok(ReservationStatus::Approved),
            "DECLINED" => Ok(ReservationStatus::Declined),
            _ => Err(PayloadError::UnknownStatus(s.to_string())),
        }
    }
}

impl ItemDetail {
    pub fn terms(&self) -> Result<ItemTerms, PayloadError> {
        let price_per_day = self.price_per_day;
        if price_per_day.is_sign_negative() && !price_per_day.is_zero() {
            return Err(PayloadError::NegativePrice(price_per_day));
        }
        if price_per_day > Decimal::from(MAX_DAILY_RATE) {
            return Err(PayloadError::PriceTooHigh(price_per_day));
        }
        let window = match (&self.availability_start, &self.availability_end) {
            (None, None) => None,
            (Some(start), Some(end)) => {
                let (start, end) = (parse_day(start)?, parse_day(end)?);
                Some(DateRange::try_new(start, end).ok_or(PayloadError::InvertedWindow { start, end })?)
            }
            _ => return Err(PayloadError::HalfWindow),
        };
        Ok(ItemTerms { price_per_day, window })
    }
}

impl From<&ItemInfo> for ItemDetail {
    fn from(info: &ItemInfo) -> Self {
        Self {
            price_per_day: info.price_per_day,
            availability_start: info.window.map(|w| w.start.to_string()),
            availability_end: info.window.map(|w| w.end.to_string()),
        }
    }
}

impl ReservationRecord {
    pub fn to_reservation(&self) -> Result<Reservation, PayloadError> {
        let start = parse_day(&self.start_date)?;
        let end = parse_day(&self.end_date)?;
        let range = DateRange::try_new(start, end).ok_or(PayloadError::InvertedReservation { start, end })?;
        Ok(Reservation {
            range,
            status: self.status.parse()?,
        })
    }
}

impl From<&BookingInfo> for ReservationRecord {
    fn from(info: &BookingInfo) -> Self {
        Self {
            start_date: info.start.to_string(),
            end_date: info.end.to_string(),
            status: info.status.as_str().to_string(),
        }
    }
}

impl ItemSnapshot {
    /// Typed snapshot from the two backend payloads. The first bad record
    /// fails the whole conversion.
    pub fn from_payloads(item: &ItemDetail, records: &[ReservationRecord]) -> Result<Self, PayloadError> {
        let terms = item.terms()?;
        let reservations = records
            .iter()
            .map(ReservationRecord::to_reservation)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(terms, reservations))
    }
}
