use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use super::{BackendError, BookingBackend, BookingReceipt, BookingRequest};
use crate::engine::{self, EngineError};
use crate::model::*;
use crate::observability;
use crate::payload::{PayloadError, ReservationRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    NoItemLoaded,
    /// A submission was refused and the reservations have not been re-fetched since.
    StaleSnapshot,
    Invalid(InvalidReason),
    InvalidMonth { year: i32, month: u32 },
    Backend(BackendError),
    Payload(PayloadError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NoItemLoaded => write!(f, "no item loaded"),
            SessionError::StaleSnapshot => {
                write!(f, "reservations changed since they were loaded; reload before booking")
            }
            SessionError::Invalid(reason) => write!(f, "{reason}"),
            SessionError::InvalidMonth { year, month } => write!(f, "invalid month: {year}-{month:02}"),
            SessionError::Backend(e) => write!(f, "{e}"),
            SessionError::Payload(e) => write!(f, "bad payload: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<BackendError> for SessionError {
    fn from(e: BackendError) -> Self {
        SessionError::Backend(e)
    }
}

impl From<PayloadError> for SessionError {
    fn from(e: PayloadError) -> Self {
        SessionError::Payload(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// A later `load_item` started before this one finished; its data was dropped.
    Superseded,
}

#[derive(Debug, Default)]
struct SessionState {
    item_id: Option<String>,
    snapshot: Option<ItemSnapshot>,
    stale: bool,
}

/// State of one open booking dialog: the item being booked and the snapshot
/// its checks run against.
pub struct BookingSession<B> {
    backend: B,
    generation: AtomicU64,
    state: Mutex<SessionState>,
}

impl<B: BookingBackend> BookingSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            generation: AtomicU64::new(0),
            state: Mutex::new(SessionState::default()),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Fetch an item's terms and reservations. The most recent call wins.
    pub async fn load_item(&self, item_id: &str) -> Result<LoadOutcome, SessionError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.state.lock().await;
            *state = SessionState {
                item_id: Some(item_id.to_string()),
                ..SessionState::default()
            };
        }

        let fetched = tokio::try_join!(
            self.backend.fetch_item(item_id),
            self.backend.fetch_reservations(item_id)
        );
        if !self.is_current(generation) {
            tracing::debug!("load of item {item_id} superseded");
            return Ok(LoadOutcome::Superseded);
        }
        let (item, records) = fetched?;
        let snapshot = ItemSnapshot::from_payloads(&item, &records)?;

        let mut state = self.state.lock().await;
        if !self.is_current(generation) {
            return Ok(LoadOutcome::Superseded);
        }
        state.snapshot = Some(snapshot);
        state.stale = false;
        Ok(LoadOutcome::Loaded)
    }

    pub async fn snapshot(&self) -> Option<ItemSnapshot> {
        self.state.lock().await.snapshot.clone()
    }

    pub async fn is_stale(&self) -> bool {
        self.state.lock().await.stale
    }

    /// Advisory check of a proposed range against the loaded snapshot.
    pub async fn check(&self, proposed: &ProposedRange) -> Result<ValidationResult, SessionError> {
        let state = self.state.lock().await;
        let snapshot = state.snapshot.as_ref().ok_or(SessionError::NoItemLoaded)?;
        let result = snapshot.validate(proposed);
        metrics::counter!(observability::SESSION_VALIDATIONS_TOTAL, "outcome" => result.outcome_label())
            .increment(1);
        Ok(result)
    }

    pub async fn calendar(
        &self,
        year: i32,
        month: u32,
        selected: &ProposedRange,
        today: Day,
    ) -> Result<CalendarMonth, SessionError> {
        let state = self.state.lock().await;
        let snapshot = state.snapshot.as_ref().ok_or(SessionError::NoItemLoaded)?;
        engine::classify_month(
            year,
            month,
            snapshot.terms.window.as_ref(),
            &snapshot.reservations,
            selected,
            today,
        )
        .map_err(|e| match e {
            EngineError::InvalidMonth { year, month } => SessionError::InvalidMonth { year, month },
            other => SessionError::Backend(BackendError::Rejected(other.to_string())),
        })
    }

    /// Send a booking request for `proposed`. Blocked locally when the range
    /// does not pass the advisory check.
    pub async fn submit(&self, renter: &str, proposed: &ProposedRange) -> Result<BookingReceipt, SessionError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let (item_id, range) = {
            let state = self.state.lock().await;
            let (Some(item_id), Some(snapshot)) = (&state.item_id, &state.snapshot) else {
                return Err(SessionError::NoItemLoaded);
            };
            if state.stale {
                return Err(SessionError::StaleSnapshot);
            }
            let result = snapshot.validate(proposed);
            if let Some(reason) = result.reason() {
                return Err(SessionError::Invalid(reason));
            }
            let range = proposed.as_range().ok_or(SessionError::Invalid(InvalidReason::MissingDates))?;
            (item_id.clone(), range)
        };

        let request = BookingRequest {
            username: renter.to_string(),
            item_id: item_id.clone(),
            start_date: range.start,
            end_date: range.end,
        };
        match self.backend.submit_booking(&request).await {
            Ok(receipt) => {
                let mut state = self.state.lock().await;
                if self.is_current(generation)
                    && let Some(snapshot) = state.snapshot.as_mut()
                {
                    snapshot
                        .reservations
                        .push(Reservation { range, status: ReservationStatus::Pending });
                }
                tracing::info!("booked item {item_id} {}..{} as {}", range.start, range.end, receipt.booking_id);
                Ok(receipt)
            }
            Err(BackendError::Rejected(msg)) => {
                tracing::info!("booking of item {item_id} rejected: {msg}");
                if self.is_current(generation) {
                    self.state.lock().await.stale = true;
                    if let Err(e) = self.refresh().await {
                        tracing::warn!("re-fetching reservations for {item_id} failed: {e}");
                    }
                }
                Err(SessionError::Backend(BackendError::Rejected(msg)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-fetch the loaded item's reservations, clearing a stale mark.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let item_id = self
            .state
            .lock()
            .await
            .item_id
            .clone()
            .ok_or(SessionError::NoItemLoaded)?;

        let records = self.backend.fetch_reservations(&item_id).await?;
        let reservations = records
            .iter()
            .map(ReservationRecord::to_reservation)
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = self.state.lock().await;
        if !self.is_current(generation) {
            return Ok(());
        }
        let snapshot = state.snapshot.as_mut().ok_or(SessionError::NoItemLoaded)?;
        snapshot.reservations = reservations;
        state.stale = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ItemDetail;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// Scripted backend. Items named `slow-*` answer after a delay.
    #[derive(Default)]
    struct MockBackend {
        reservations: StdMutex<Vec<ReservationRecord>>,
        fail_reservations: StdMutex<bool>,
        submit_results: StdMutex<VecDeque<Result<BookingReceipt, BackendError>>>,
        submitted: StdMutex<Vec<BookingRequest>>,
    }

    impl MockBackend {
        fn with_reservations(records: Vec<ReservationRecord>) -> Self {
            let mock = Self::default();
            *mock.reservations.lock().unwrap() = records;
            mock
        }
    }

    #[async_trait]
    impl BookingBackend for MockBackend {
        async fn fetch_item(&self, item_id: &str) -> Result<ItemDetail, BackendError> {
            if item_id.starts_with("slow") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if item_id == "missing" {
                return Err(BackendError::NotFound(item_id.into()));
            }
            let price = Decimal::from(if item_id.starts_with("slow") { 99 } else { 10 });
            Ok(ItemDetail {
                price_per_day: price,
                availability_start: Some("2025-01-01".into()),
                availability_end: Some("2025-01-31".into()),
            })
        }

        async fn fetch_reservations(&self, _item_id: &str) -> Result<Vec<ReservationRecord>, BackendError> {
            if *self.fail_reservations.lock().unwrap() {
                return Err(BackendError::Unavailable("connection refused".into()));
            }
            Ok(self.reservations.lock().unwrap().clone())
        }

        async fn submit_booking(&self, request: &BookingRequest) -> Result<BookingReceipt, BackendError> {
            self.submitted.lock().unwrap().push(request.clone());
            self.submit_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Unavailable("no scripted result".into())))
        }
    }

    fn jan(day: u32) -> Day {
        Day::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn approved(start: &str, end: &str) -> ReservationRecord {
        ReservationRecord {
            start_date: start.into(),
            end_date: end.into(),
            status: "APPROVED".into(),
        }
    }

    fn receipt(id: &str, total: i64) -> BookingReceipt {
        BookingReceipt {
            booking_id: id.into(),
            total_price: Decimal::from(total),
        }
    }

    async fn loaded(mock: MockBackend) -> BookingSession<MockBackend> {
        let session = BookingSession::new(mock);
        assert_eq!(session.load_item("game-1").await.unwrap(), LoadOutcome::Loaded);
        session
    }

    #[tokio::test]
    async fn check_runs_against_loaded_snapshot() {
        let session = loaded(MockBackend::with_reservations(vec![approved("2025-01-10", "2025-01-12")])).await;

        let ok = session.check(&ProposedRange::new(jan(5), jan(9))).await.unwrap();
        let quote = ok.quote().unwrap();
        assert_eq!(quote.day_count, 5);
        assert_eq!(quote.total, Decimal::from(50));

        let overlap = session.check(&ProposedRange::new(jan(9), jan(10))).await.unwrap();
        assert_eq!(overlap.reason(), Some(InvalidReason::OverlapsExistingReservation));
        let missing = session.check(&ProposedRange::default()).await.unwrap();
        assert_eq!(missing.reason(), Some(InvalidReason::MissingDates));
    }

    #[tokio::test]
    async fn nothing_works_before_a_load() {
        let session = BookingSession::new(MockBackend::default());
        assert_eq!(
            session.check(&ProposedRange::new(jan(5), jan(9))).await,
            Err(SessionError::NoItemLoaded)
        );
        assert_eq!(
            session.submit("bob", &ProposedRange::new(jan(5), jan(9))).await,
            Err(SessionError::NoItemLoaded)
        );
        assert_eq!(session.refresh().await, Err(SessionError::NoItemLoaded));
    }

    #[tokio::test]
    async fn latest_load_wins() {
        let session = BookingSession::new(MockBackend::default());
        let (slow, fast) = tokio::join!(session.load_item("slow-game"), session.load_item("game-2"));
        assert_eq!(slow.unwrap(), LoadOutcome::Superseded);
        assert_eq!(fast.unwrap(), LoadOutcome::Loaded);

        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.terms.price_per_day, Decimal::from(10));
    }

    #[tokio::test]
    async fn failed_load_leaves_no_snapshot() {
        let session = loaded(MockBackend::default()).await;
        let err = session.load_item("missing").await.unwrap_err();
        assert_eq!(err, SessionError::Backend(BackendError::NotFound("missing".into())));
        assert!(session.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn bad_payload_fails_the_load() {
        let mock = MockBackend::with_reservations(vec![approved("2025-01-12", "2025-01-10")]);
        let session = BookingSession::new(mock);
        let err = session.load_item("game-1").await.unwrap_err();
        assert!(matches!(err, SessionError::Payload(PayloadError::InvertedReservation { .. })));
    }

    #[tokio::test]
    async fn submit_is_blocked_for_invalid_ranges() {
        let session = loaded(MockBackend::with_reservations(vec![approved("2025-01-10", "2025-01-12")])).await;
        assert_eq!(
            session.submit("bob", &ProposedRange::new(jan(12), jan(14))).await,
            Err(SessionError::Invalid(InvalidReason::OverlapsExistingReservation))
        );
        assert_eq!(
            session
                .submit("bob", &ProposedRange::new(jan(30), Day::from_ymd_opt(2025, 2, 2).unwrap()))
                .await,
            Err(SessionError::Invalid(InvalidReason::OutsideAvailabilityWindow))
        );
        assert!(session.backend.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn accepted_booking_holds_its_days() {
        let mock = MockBackend::default();
        mock.submit_results.lock().unwrap().push_back(Ok(receipt("b-1", 50)));
        let session = loaded(mock).await;

        let got = assert_ok!(session.submit("bob", &ProposedRange::new(jan(5), jan(9))).await);
        assert_eq!(got, receipt("b-1", 50));

        let sent = session.backend.submitted.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].item_id, "game-1");
        assert_eq!(sent[0].username, "bob");

        let again = session.check(&ProposedRange::new(jan(9), jan(9))).await.unwrap();
        assert_eq!(again.reason(), Some(InvalidReason::OverlapsExistingReservation));
    }

    #[tokio::test]
    async fn rejection_refreshes_reservations() {
        let mock = MockBackend::default();
        mock.submit_results
            .lock()
            .unwrap()
            .push_back(Err(BackendError::Rejected("Item already booked for these dates".into())));
        let session = loaded(mock).await;
        // Someone else booked in the meantime.
        *session.backend.reservations.lock().unwrap() = vec![approved("2025-01-06", "2025-01-07")];

        let err = assert_err!(session.submit("bob", &ProposedRange::new(jan(5), jan(9))).await);
        assert_eq!(
            err,
            SessionError::Backend(BackendError::Rejected("Item already booked for these dates".into()))
        );
        assert!(!session.is_stale().await);
        let now = session.check(&ProposedRange::new(jan(5), jan(9))).await.unwrap();
        assert_eq!(now.reason(), Some(InvalidReason::OverlapsExistingReservation));
    }

    #[tokio::test]
    async fn stays_stale_until_refetch_succeeds() {
        let mock = MockBackend::default();
        mock.submit_results
            .lock()
            .unwrap()
            .push_back(Err(BackendError::Rejected("conflict".into())));
        let session = loaded(mock).await;
        *session.backend.fail_reservations.lock().unwrap() = true;

        assert_err!(session.submit("bob", &ProposedRange::new(jan(5), jan(9))).await);
        assert!(session.is_stale().await);
        assert_eq!(
            session.submit("bob", &ProposedRange::new(jan(20), jan(21))).await,
            Err(SessionError::StaleSnapshot)
        );

        *session.backend.fail_reservations.lock().unwrap() = false;
        assert_ok!(session.refresh().await);
        assert!(!session.is_stale().await);
    }

    #[tokio::test]
    async fn calendar_marks_selection_and_reservations() {
        let session = loaded(MockBackend::with_reservations(vec![approved("2025-01-10", "2025-01-12")])).await;
        let month = session
            .calendar(2025, 1, &ProposedRange::new(jan(4), jan(6)), jan(5))
            .await
            .unwrap();
        assert_eq!(month.state_of(jan(5)), Some(DayState::Selected));
        assert_eq!(month.state_of(jan(11)), Some(DayState::Reserved));
        assert_eq!(month.state_of(jan(20)), Some(DayState::Available));

        assert_eq!(
            session.calendar(2025, 13, &ProposedRange::default(), jan(5)).await,
            Err(SessionError::InvalidMonth { year: 2025, month: 13 })
        );
    }
}
