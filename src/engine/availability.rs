use rust_decimal::Decimal;

use crate::model::*;

use super::conflict::first_conflict;

// ── Availability Algorithm ────────────────────────────────────────

/// Decide whether `proposed` can be booked and, if so, what it costs.
///
/// Checks run in a fixed order so the renter always sees the same error
/// for the same input:
/// 1. both dates present
/// 2. end not before start (start == end is a one-day booking)
/// 3. inside the availability window, when the item has one
/// 4. no pending/approved reservation shares a day with the range
///    (inclusive: touching a reservation's first or last day conflicts)
///
/// Pure: no I/O, no clock, no hidden state.
pub fn validate(
    window: Option<&AvailabilityWindow>,
    reservations: &[Reservation],
    proposed: &ProposedRange,
    daily_rate: Decimal,
) -> ValidationResult {
    let (Some(start), Some(end)) = (proposed.start, proposed.end) else {
        return invalid(InvalidReason::MissingDates);
    };
    if end < start {
        return invalid(InvalidReason::EndBeforeStart);
    }
    let range = DateRange::new(start, end);

    if let Some(w) = window
        && !w.contains_range(&range)
    {
        return invalid(InvalidReason::OutsideAvailabilityWindow);
    }

    if first_conflict(reservations, &range).is_some() {
        return invalid(InvalidReason::OverlapsExistingReservation);
    }

    let day_count = range.day_count();
    ValidationResult::Valid {
        day_count,
        quote: compute_quote(day_count, daily_rate),
    }
}

/// `total = day_count * daily_rate`, unrounded. Saturates at `Decimal::MAX`.
pub fn compute_quote(day_count: u32, daily_rate: Decimal) -> PriceQuote {
    PriceQuote {
        day_count,
        daily_rate,
        total: Decimal::from(day_count).saturating_mul(daily_rate),
    }
}

fn invalid(reason: InvalidReason) -> ValidationResult {
    ValidationResult::Invalid { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> Day {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn jan(day: u32) -> Day {
        d(2025, 1, day)
    }

    fn rate(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn window() -> AvailabilityWindow {
        DateRange::new(jan(1), jan(31))
    }

    fn approved(start: Day, end: Day) -> Reservation {
        Reservation::new(start, end, ReservationStatus::Approved)
    }

    fn reason_of(result: ValidationResult) -> InvalidReason {
        result.reason().expect("expected an invalid result")
    }

    // ── Concrete scenario ─────────────────────────────────

    #[test]
    fn scenario_valid_before_reservation() {
        let reservations = vec![approved(jan(10), jan(12))];
        let result = validate(
            Some(&window()),
            &reservations,
            &ProposedRange::new(jan(5), jan(9)),
            rate(1000),
        );
        match result {
            ValidationResult::Valid { day_count, quote } => {
                assert_eq!(day_count, 5);
                assert_eq!(quote.total, rate(5000));
                assert_eq!(quote.display_total().to_string(), "50.00");
            }
            other => panic!("expected Valid, got {other:?}"),
        }
    }

    #[test]
    fn scenario_touching_reservation_start_overlaps() {
        let reservations = vec![approved(jan(10), jan(12))];
        let result = validate(
            Some(&window()),
            &reservations,
            &ProposedRange::new(jan(9), jan(10)),
            rate(1000),
        );
        assert_eq!(reason_of(result), InvalidReason::OverlapsExistingReservation);
    }

    #[test]
    fn scenario_outside_window() {
        let reservations = vec![approved(jan(10), jan(12))];
        let result = validate(
            Some(&window()),
            &reservations,
            &ProposedRange::new(d(2025, 2, 1), d(2025, 2, 2)),
            rate(1000),
        );
        assert_eq!(reason_of(result), InvalidReason::OutsideAvailabilityWindow);
    }

    #[test]
    fn scenario_end_before_start() {
        let reservations = vec![approved(jan(10), jan(12))];
        let result = validate(
            Some(&window()),
            &reservations,
            &ProposedRange::new(jan(15), jan(14)),
            rate(1000),
        );
        assert_eq!(reason_of(result), InvalidReason::EndBeforeStart);
    }

    // ── Check order and edge cases ───────────────────────

    #[test]
    fn missing_dates_first() {
        let only_start = ProposedRange { start: Some(jan(3)), end: None };
        let only_end = ProposedRange { start: None, end: Some(jan(3)) };
        for p in [ProposedRange::default(), only_start, only_end] {
            let result = validate(Some(&window()), &[], &p, rate(1000));
            assert_eq!(reason_of(result), InvalidReason::MissingDates);
        }
    }

    #[test]
    fn end_before_start_beats_window_and_overlap() {
        // Reversed range that is also outside the window and overlapping.
        let reservations = vec![approved(d(2024, 12, 1), d(2025, 3, 1))];
        for (s, e) in [(d(2025, 3, 5), d(2025, 2, 10)), (jan(20), jan(2)), (jan(2), d(2024, 12, 30))] {
            let result = validate(Some(&window()), &reservations, &ProposedRange::new(s, e), rate(1000));
            assert_eq!(reason_of(result), InvalidReason::EndBeforeStart);
            let result = validate(None, &[], &ProposedRange::new(s, e), rate(1000));
            assert_eq!(reason_of(result), InvalidReason::EndBeforeStart);
        }
    }

    #[test]
    fn window_check_beats_overlap() {
        let reservations = vec![approved(jan(25), d(2025, 2, 5))];
        let result = validate(
            Some(&window()),
            &reservations,
            &ProposedRange::new(jan(30), d(2025, 2, 1)),
            rate(1000),
        );
        assert_eq!(reason_of(result), InvalidReason::OutsideAvailabilityWindow);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let result = validate(Some(&window()), &[], &ProposedRange::new(jan(1), jan(31)), rate(100));
        assert!(result.is_valid());
        let early = validate(
            Some(&window()),
            &[],
            &ProposedRange::new(d(2024, 12, 31), jan(3)),
            rate(100),
        );
        assert_eq!(reason_of(early), InvalidReason::OutsideAvailabilityWindow);
        let late = validate(
            Some(&window()),
            &[],
            &ProposedRange::new(jan(30), d(2025, 2, 1)),
            rate(100),
        );
        assert_eq!(reason_of(late), InvalidReason::OutsideAvailabilityWindow);
    }

    #[test]
    fn no_window_means_only_reservations_matter() {
        let far = ProposedRange::new(d(2030, 6, 1), d(2030, 6, 30));
        let result = validate(None, &[], &far, rate(250));
        assert_eq!(result.quote().unwrap().total, rate(30 * 250));

        let reservations = vec![approved(d(2030, 6, 30), d(2030, 7, 2))];
        let result = validate(None, &reservations, &far, rate(250));
        assert_eq!(reason_of(result), InvalidReason::OverlapsExistingReservation);
    }

    #[test]
    fn single_day_costs_one_daily_rate() {
        for day in 1..=31 {
            let result = validate(Some(&window()), &[], &ProposedRange::new(jan(day), jan(day)), rate(1234));
            match result {
                ValidationResult::Valid { day_count, quote } => {
                    assert_eq!(day_count, 1);
                    assert_eq!(quote.total, rate(1234));
                }
                other => panic!("expected Valid, got {other:?}"),
            }
        }
    }

    #[test]
    fn declined_never_blocks_even_identical_range() {
        let reservations = vec![Reservation::new(jan(10), jan(12), ReservationStatus::Declined)];
        let result = validate(
            Some(&window()),
            &reservations,
            &ProposedRange::new(jan(10), jan(12)),
            rate(1000),
        );
        assert!(result.is_valid());
    }

    #[test]
    fn pending_blocks_like_approved() {
        let reservations = vec![Reservation::new(jan(10), jan(12), ReservationStatus::Pending)];
        let result = validate(
            Some(&window()),
            &reservations,
            &ProposedRange::new(jan(11), jan(11)),
            rate(1000),
        );
        assert_eq!(reason_of(result), InvalidReason::OverlapsExistingReservation);
    }

    #[test]
    fn touching_either_boundary_conflicts() {
        let reservations = vec![approved(jan(10), jan(12))];
        // proposed.end == r.start
        let before = validate(Some(&window()), &reservations, &ProposedRange::new(jan(8), jan(10)), rate(1));
        // proposed.start == r.end
        let after = validate(Some(&window()), &reservations, &ProposedRange::new(jan(12), jan(14)), rate(1));
        assert_eq!(reason_of(before), InvalidReason::OverlapsExistingReservation);
        assert_eq!(reason_of(after), InvalidReason::OverlapsExistingReservation);
        // One day of clearance on each side is fine.
        assert!(validate(Some(&window()), &reservations, &ProposedRange::new(jan(8), jan(9)), rate(1)).is_valid());
        assert!(validate(Some(&window()), &reservations, &ProposedRange::new(jan(13), jan(14)), rate(1)).is_valid());
    }

    #[test]
    fn proposed_range_enclosing_reservation_conflicts() {
        let reservations = vec![approved(jan(10), jan(12))];
        let result = validate(Some(&window()), &reservations, &ProposedRange::new(jan(5), jan(20)), rate(1));
        assert_eq!(reason_of(result), InvalidReason::OverlapsExistingReservation);
    }

    #[test]
    fn reservation_order_is_irrelevant() {
        let mut reservations = vec![
            approved(jan(20), jan(22)),
            Reservation::new(jan(1), jan(2), ReservationStatus::Declined),
            approved(jan(10), jan(12)),
        ];
        let proposed = ProposedRange::new(jan(13), jan(19));
        let first = validate(Some(&window()), &reservations, &proposed, rate(1000));
        reservations.reverse();
        let second = validate(Some(&window()), &reservations, &proposed, rate(1000));
        assert_eq!(first, second);
        assert!(first.is_valid());
    }

    #[test]
    fn validate_is_idempotent() {
        let reservations = vec![approved(jan(10), jan(12))];
        let inputs = [
            ProposedRange::new(jan(5), jan(9)),
            ProposedRange::new(jan(9), jan(10)),
            ProposedRange::new(jan(15), jan(14)),
            ProposedRange::default(),
        ];
        for p in inputs {
            let a = validate(Some(&window()), &reservations, &p, rate(999));
            let b = validate(Some(&window()), &reservations, &p, rate(999));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn zero_rate_is_free_but_valid() {
        let result = validate(None, &[], &ProposedRange::new(jan(1), jan(3)), Decimal::ZERO);
        assert_eq!(result.quote().unwrap().total, Decimal::ZERO);
    }

    // ── compute_quote ────────────────────────────────────

    #[test]
    fn quote_keeps_full_precision() {
        let quote = compute_quote(3, Decimal::new(3333, 3)); // 3.333/day
        assert_eq!(quote.total, Decimal::new(9999, 3));
        assert_eq!(quote.display_total(), Decimal::new(1000, 2));
    }

    #[test]
    fn quote_saturates_instead_of_overflowing() {
        let quote = compute_quote(366, Decimal::MAX);
        assert_eq!(quote.total, Decimal::MAX);

        let result = validate(None, &[], &ProposedRange::new(jan(1), jan(31)), Decimal::MAX);
        assert_eq!(result.quote().unwrap().total, Decimal::MAX);
    }

    #[test]
    fn quote_day_count_across_month_end() {
        let result = validate(None, &[], &ProposedRange::new(jan(30), d(2025, 2, 2)), rate(1000));
        match result {
            ValidationResult::Valid { day_count, quote } => {
                assert_eq!(day_count, 4);
                assert_eq!(quote.total, rate(4000));
            }
            other => panic!("expected Valid, got {other:?}"),
        }
    }
}
