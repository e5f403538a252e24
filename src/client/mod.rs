//! Client side of a booking: where item terms and reservations come from,
//! and the per-dialog session that checks a proposed range before it is
//! sent. Every check made here is advisory; the ledger decides.

mod http;
mod local;
mod session;

pub use http::HttpBackend;
pub use session::{BookingSession, LoadOutcome, SessionError};

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::Day;
use crate::payload::{ItemDetail, ReservationRecord};

/// Body of `POST /bookings/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub username: String,
    pub item_id: String,
    pub start_date: Day,
    pub end_date: Day,
}

/// What the backend confirms for an accepted booking. The total is the
/// server's, not the client's estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingReceipt {
    pub booking_id: String,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Transport failure or a non-4xx error status.
    Unavailable(String),
    /// The backend refused the request. Carries its message.
    Rejected(String),
    NotFound(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Unavailable(msg) => write!(f, "backend unavailable: {msg}"),
            BackendError::Rejected(msg) => write!(f, "{msg}"),
            BackendError::NotFound(id) => write!(f, "not found: {id}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Source of item terms and reservations, and the sink for booking requests.
#[async_trait]
pub trait BookingBackend: Send + Sync {
    async fn fetch_item(&self, item_id: &str) -> Result<ItemDetail, BackendError>;

    /// Every reservation of the item, whatever its status.
    async fn fetch_reservations(&self, item_id: &str) -> Result<Vec<ReservationRecord>, BackendError>;

    async fn submit_booking(&self, request: &BookingRequest) -> Result<BookingReceipt, BackendError>;
}

#[async_trait]
impl<T: BookingBackend + ?Sized> BookingBackend for Arc<T> {
    async fn fetch_item(&self, item_id: &str) -> Result<ItemDetail, BackendError> {
        (**self).fetch_item(item_id).await
    }

    async fn fetch_reservations(&self, item_id: &str) -> Result<Vec<ReservationRecord>, BackendError> {
        (**self).fetch_reservations(item_id).await
    }

    async fn submit_booking(&self, request: &BookingRequest) -> Result<BookingReceipt, BackendError> {
        (**self).submit_booking(request).await
    }
}
