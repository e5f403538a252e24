use async_trait::async_trait;
use ulid::Ulid;

use super::{BackendError, BookingBackend, BookingReceipt, BookingRequest};
use crate::engine::{Engine, EngineError};
use crate::payload::{ItemDetail, ReservationRecord};

/// In-process backend: a session talks straight to a ledger.
#[async_trait]
impl BookingBackend for Engine {
    async fn fetch_item(&self, item_id: &str) -> Result<ItemDetail, BackendError> {
        let id = parse_id(item_id)?;
        let info = self
            .get_item(&id)
            .await
            .ok_or_else(|| BackendError::NotFound(item_id.to_string()))?;
        Ok(ItemDetail::from(&info))
    }

    async fn fetch_reservations(&self, item_id: &str) -> Result<Vec<ReservationRecord>, BackendError> {
        let id = parse_id(item_id)?;
        let bookings = self.reservations_for_item(&id).await.map_err(backend_err)?;
        Ok(bookings.iter().map(ReservationRecord::from).collect())
    }

    async fn submit_booking(&self, request: &BookingRequest) -> Result<BookingReceipt, BackendError> {
        let item_id = parse_id(&request.item_id)?;
        let info = self
            .request_booking(
                Ulid::new(),
                item_id,
                request.username.clone(),
                Some(request.start_date),
                Some(request.end_date),
            )
            .await
            .map_err(backend_err)?;
        Ok(BookingReceipt {
            booking_id: info.id.to_string(),
            total_price: info.total_price,
        })
    }
}

fn parse_id(item_id: &str) -> Result<Ulid, BackendError> {
    Ulid::from_string(item_id).map_err(|_| BackendError::NotFound(item_id.to_string()))
}

fn backend_err(e: EngineError) -> BackendError {
    match e {
        EngineError::NotFound(id) => BackendError::NotFound(id.to_string()),
        EngineError::WalError(msg) => BackendError::Unavailable(msg),
        other => BackendError::Rejected(other.to_string()),
    }
}
