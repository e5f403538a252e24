use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{BackendError, BookingBackend, BookingReceipt, BookingRequest};
use crate::observability;
use crate::payload::{ItemDetail, ReservationRecord};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The marketplace REST backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

/// Error body. The backend uses either key.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Receipt as sent. Booking ids arrive as numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    booking_id: serde_json::Value,
    total_price: Decimal,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, op: &'static str, id: &str, path: &str) -> Result<T, BackendError> {
        let result = self.client.get(self.url(path)).send().await;
        let response = checked(op, id, result).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Unavailable(format!("error decoding response body: {e}")))
    }
}

/// Sort a response into success or a `BackendError`, recording the outcome.
async fn checked(
    op: &'static str,
    id: &str,
    result: reqwest::Result<Response>,
) -> Result<Response, BackendError> {
    let response = match result {
        Ok(r) => r,
        Err(e) => {
            metrics::counter!(observability::BACKEND_REQUESTS_TOTAL, "op" => op, "status" => "transport_error")
                .increment(1);
            tracing::warn!("{op} {id}: {e}");
            return Err(BackendError::Unavailable(e.to_string()));
        }
    };
    let status = response.status();
    let label = if status.is_success() {
        "ok"
    } else if status.is_client_error() {
        "rejected"
    } else {
        "error"
    };
    metrics::counter!(observability::BACKEND_REQUESTS_TOTAL, "op" => op, "status" => label).increment(1);
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(status, &body);
    tracing::debug!("{op} {id}: {status} {message}");
    if status == StatusCode::NOT_FOUND && op != "submit_booking" {
        Err(BackendError::NotFound(id.to_string()))
    } else if status.is_client_error() {
        Err(BackendError::Rejected(message))
    } else {
        Err(BackendError::Unavailable(format!("{status}: {message}")))
    }
}

/// The backend's own wording when it sent one, otherwise the raw body or the status.
fn error_message(status: StatusCode, body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    parsed
        .error
        .or(parsed.message)
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| status.to_string())
}

#[async_trait]
impl BookingBackend for HttpBackend {
    async fn fetch_item(&self, item_id: &str) -> Result<ItemDetail, BackendError> {
        self.get_json("fetch_item", item_id, &format!("/games/{item_id}")).await
    }

    async fn fetch_reservations(&self, item_id: &str) -> Result<Vec<ReservationRecord>, BackendError> {
        self.get_json("fetch_reservations", item_id, &format!("/bookings/game/{item_id}"))
            .await
    }

    async fn submit_booking(&self, request: &BookingRequest) -> Result<BookingReceipt, BackendError> {
        let result = self
            .client
            .post(self.url("/bookings/create"))
            .json(request)
            .send()
            .await;
        let response = checked("submit_booking", &request.item_id, result).await?;
        let raw: RawReceipt = response
            .json()
            .await
            .map_err(|e| BackendError::Unavailable(format!("error decoding response body: {e}")))?;
        let booking_id = match raw.booking_id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(BookingReceipt {
            booking_id,
            total_price: raw.total_price,
        })
    }
}
