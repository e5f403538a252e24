use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar day. The only time type; there is no time-of-day anywhere below.
pub type Day = NaiveDate;

/// Inclusive interval `[start, end]` of whole calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Day,
    pub end: Day,
}

impl DateRange {
    pub fn new(start: Day, end: Day) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// `None` when `end` is before `start`.
    pub fn try_new(start: Day, end: Day) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Number of calendar days covered, counting both ends.
    pub fn day_count(&self) -> u32 {
        ((self.end - self.start).num_days() + 1) as u32
    }

    /// Inclusive overlap: ranges sharing a single boundary day overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_day(&self, day: Day) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Span during which an owner allows an item to be booked at all.
pub type AvailabilityWindow = DateRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Declined,
}

impl ReservationStatus {
    /// Pending and approved reservations hold their days; declined ones release them.
    pub fn occupies_calendar(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Approved => "APPROVED",
            ReservationStatus::Declined => "DECLINED",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A renter's claim on an item, as seen by the availability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub range: DateRange,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn new(start: Day, end: Day, status: ReservationStatus) -> Self {
        Self {
            range: DateRange::new(start, end),
            status,
        }
    }

    /// True if this reservation takes any day of `range` away from other renters.
    pub fn blocks(&self, range: &DateRange) -> bool {
        self.status.occupies_calendar() && self.range.overlaps(range)
    }
}

/// Dates picked by a prospective renter. Either end may still be missing,
/// and nothing guarantees `start <= end`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProposedRange {
    pub start: Option<Day>,
    pub end: Option<Day>,
}

impl ProposedRange {
    pub fn new(start: Day, end: Day) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// The selection as a well-formed range, if both ends are set and ordered.
    pub fn as_range(&self) -> Option<DateRange> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => DateRange::try_new(start, end),
            _ => None,
        }
    }
}

/// Day count times daily rate. Kept at full precision; only `display_total`
/// rounds, so repeated recalculation never accumulates rounding error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    pub day_count: u32,
    pub daily_rate: Decimal,
    pub total: Decimal,
}

impl PriceQuote {
    pub fn display_total(&self) -> Decimal {
        self.total.round_dp(2)
    }
}

/// Why a proposed range cannot be booked. Variant order is check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidReason {
    MissingDates,
    EndBeforeStart,
    OutsideAvailabilityWindow,
    OverlapsExistingReservation,
}

impl InvalidReason {
    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            InvalidReason::MissingDates => "MISSING_DATES",
            InvalidReason::EndBeforeStart => "END_BEFORE_START",
            InvalidReason::OutsideAvailabilityWindow => "OUTSIDE_AVAILABILITY_WINDOW",
            InvalidReason::OverlapsExistingReservation => "OVERLAPS_EXISTING_RESERVATION",
        }
    }

    /// Inline message for the booking form. The window, when known, is named
    /// so the renter can see which dates are allowed.
    pub fn message(self, window: Option<&AvailabilityWindow>) -> String {
        match self {
            InvalidReason::MissingDates => "Please select both dates".to_string(),
            InvalidReason::EndBeforeStart => "End date must be after start date".to_string(),
            InvalidReason::OutsideAvailabilityWindow => match window {
                Some(w) => format!("Only available from {} to {}", w.start, w.end),
                None => "Selected dates are outside the availability period".to_string(),
            },
            InvalidReason::OverlapsExistingReservation => {
                "Selected dates overlap with existing booking".to_string()
            }
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Valid { day_count: u32, quote: PriceQuote },
    Invalid { reason: InvalidReason },
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid { .. })
    }

    pub fn reason(&self) -> Option<InvalidReason> {
        match self {
            ValidationResult::Invalid { reason } => Some(*reason),
            ValidationResult::Valid { .. } => None,
        }
    }

    pub fn quote(&self) -> Option<&PriceQuote> {
        match self {
            ValidationResult::Valid { quote, .. } => Some(quote),
            ValidationResult::Invalid { .. } => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            ValidationResult::Valid { .. } => "valid",
            ValidationResult::Invalid { reason } => match reason {
                InvalidReason::MissingDates => "missing_dates",
                InvalidReason::EndBeforeStart => "end_before_start",
                InvalidReason::OutsideAvailabilityWindow => "outside_window",
                InvalidReason::OverlapsExistingReservation => "overlap",
            },
        }
    }
}

// ── Calendar ─────────────────────────────────────────────────────

/// Render state of a single day in the month grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    OutsideWindow,
    Reserved,
    Selected,
    Available,
}

impl DayState {
    pub fn as_str(self) -> &'static str {
        match self {
            DayState::OutsideWindow => "OUTSIDE_WINDOW",
            DayState::Reserved => "RESERVED",
            DayState::Selected => "SELECTED",
            DayState::Available => "AVAILABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarCell {
    /// Padding before the first of the month.
    Empty,
    Day { date: Day, state: DayState, today: bool },
}

/// One month laid out Sunday-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarMonth {
    pub year: i32,
    pub month: u32,
    pub cells: Vec<CalendarCell>,
}

impl CalendarMonth {
    /// Non-empty cells only, in date order.
    pub fn days(&self) -> impl Iterator<Item = (Day, DayState, bool)> + '_ {
        self.cells.iter().filter_map(|cell| match *cell {
            CalendarCell::Day { date, state, today } => Some((date, state, today)),
            CalendarCell::Empty => None,
        })
    }

    pub fn state_of(&self, date: Day) -> Option<DayState> {
        self.days().find(|(d, _, _)| *d == date).map(|(_, s, _)| s)
    }
}

// ── Snapshots ────────────────────────────────────────────────────

/// Booking terms of a listed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemTerms {
    pub price_per_day: Decimal,
    pub window: Option<AvailabilityWindow>,
}

/// Everything the availability checks need about one item, captured at a
/// single point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSnapshot {
    pub terms: ItemTerms,
    pub reservations: Vec<Reservation>,
}

impl ItemSnapshot {
    pub fn new(terms: ItemTerms, reservations: Vec<Reservation>) -> Self {
        Self { terms, reservations }
    }

    pub fn validate(&self, proposed: &ProposedRange) -> ValidationResult {
        crate::engine::validate(
            self.terms.window.as_ref(),
            &self.reservations,
            proposed,
            self.terms.price_per_day,
        )
    }
}

// ── Ledger state ─────────────────────────────────────────────────

/// A booking as stored by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingEntry {
    pub id: Ulid,
    pub renter: String,
    pub reservation: Reservation,
    pub total_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct ItemState {
    pub id: Ulid,
    pub owner: String,
    pub price_per_day: Decimal,
    pub window: Option<AvailabilityWindow>,
    /// All bookings regardless of status, sorted by `range.start`.
    pub bookings: Vec<BookingEntry>,
    /// Set under the write lock when the item leaves the ledger. A handle
    /// cloned before that must treat the item as gone.
    pub delisted: bool,
}

impl ItemState {
    pub fn new(id: Ulid, owner: String, price_per_day: Decimal, window: Option<AvailabilityWindow>) -> Self {
        Self {
            id,
            owner,
            price_per_day,
            window,
            bookings: Vec::new(),
            delisted: false,
        }
    }

    pub fn terms(&self) -> ItemTerms {
        ItemTerms {
            price_per_day: self.price_per_day,
            window: self.window,
        }
    }

    /// Insert a booking maintaining sort order by start day.
    pub fn insert_booking(&mut self, booking: BookingEntry) {
        let start = booking.reservation.range.start;
        let pos = self
            .bookings
            .binary_search_by_key(&start, |b| b.reservation.range.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&BookingEntry> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut BookingEntry> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.bookings.iter().map(|b| b.reservation).collect()
    }

    /// Bookings whose days intersect `range`, any status.
    /// Binary search skips bookings that start after `range.end`.
    pub fn overlapping(&self, range: &DateRange) -> impl Iterator<Item = &BookingEntry> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.reservation.range.start <= range.end);
        let start = range.start;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.reservation.range.end >= start)
    }

    pub fn has_active_bookings(&self) -> bool {
        self.bookings
            .iter()
            .any(|b| b.reservation.status.occupies_calendar())
    }
}

/// Partial update of an item's terms. `window: Some(None)` clears the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub price_per_day: Option<Decimal>,
    pub window: Option<Option<AvailabilityWindow>>,
}

/// The event types. Flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ItemListed {
        id: Ulid,
        owner: String,
        #[serde(with = "rust_decimal::serde::str")]
        price_per_day: Decimal,
        window: Option<AvailabilityWindow>,
    },
    ItemUpdated {
        id: Ulid,
        #[serde(with = "rust_decimal::serde::str")]
        price_per_day: Decimal,
        window: Option<AvailabilityWindow>,
    },
    ItemDelisted {
        id: Ulid,
    },
    BookingRequested {
        id: Ulid,
        item_id: Ulid,
        renter: String,
        range: DateRange,
        #[serde(with = "rust_decimal::serde::str")]
        total_price: Decimal,
    },
    BookingStatusChanged {
        id: Ulid,
        item_id: Ulid,
        status: ReservationStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: Ulid,
    pub owner: String,
    pub price_per_day: Decimal,
    pub window: Option<AvailabilityWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub item_id: Ulid,
    pub renter: String,
    pub start: Day,
    pub end: Day,
    pub status: ReservationStatus,
    pub total_price: Decimal,
}

impl BookingInfo {
    pub fn from_entry(item_id: Ulid, entry: &BookingEntry) -> Self {
        Self {
            id: entry.id,
            item_id,
            renter: entry.renter.clone(),
            start: entry.reservation.range.start,
            end: entry.reservation.range.end,
            status: entry.reservation.status,
            total_price: entry.total_price,
        }
    }
}
