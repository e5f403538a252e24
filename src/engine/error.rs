use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::{InvalidReason, ReservationStatus};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested days are held by this booking.
    Conflict(Ulid),
    Rejected(InvalidReason),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    HasActiveBookings(Ulid),
    InvalidPrice(Decimal),
    InvalidMonth {
        year: i32,
        month: u32,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => {
                write!(f, "{}: conflicts with booking {id}", InvalidReason::OverlapsExistingReservation)
            }
            EngineError::Rejected(reason) => write!(f, "{reason}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot delist item {id}: has pending or approved bookings")
            }
            EngineError::InvalidPrice(p) => write!(f, "invalid daily rate: {p}"),
            EngineError::InvalidMonth { year, month } => {
                write!(f, "invalid month: {year}-{month:02}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// The validation reason behind a rejected booking, if that is what this is.
    pub fn invalid_reason(&self) -> Option<InvalidReason> {
        match self {
            EngineError::Rejected(reason) => Some(*reason),
            EngineError::Conflict(_) => Some(InvalidReason::OverlapsExistingReservation),
            _ => None,
        }
    }
}
