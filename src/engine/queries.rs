use ulid::Ulid;

use crate::model::*;

use super::availability::validate;
use super::calendar::classify_month;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_item(&self, id: &Ulid) -> Option<ItemInfo> {
        let is = self.get_item_state(id)?;
        let guard = is.read().await;
        Some(item_info(&guard))
    }

    /// All listed items, ordered by id.
    pub async fn list_items(&self) -> Vec<ItemInfo> {
        let items: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(items.len());
        for is in items {
            out.push(item_info(&*is.read().await));
        }
        out.sort_by_key(|i| i.id);
        out
    }

    /// Terms and reservations read under one lock.
    pub async fn snapshot(&self, id: &Ulid) -> Result<ItemSnapshot, EngineError> {
        let is = self.get_item_state(id).ok_or(EngineError::NotFound(*id))?;
        let guard = is.read().await;
        Ok(ItemSnapshot::new(guard.terms(), guard.reservations()))
    }

    pub async fn get_booking(&self, id: &Ulid) -> Option<BookingInfo> {
        let item_id = self.get_item_for_booking(id)?;
        let is = self.get_item_state(&item_id)?;
        let guard = is.read().await;
        guard.booking(id).map(|b| BookingInfo::from_entry(item_id, b))
    }

    /// Every booking on an item, any status, in start order.
    pub async fn reservations_for_item(&self, item_id: &Ulid) -> Result<Vec<BookingInfo>, EngineError> {
        let is = self
            .get_item_state(item_id)
            .ok_or(EngineError::NotFound(*item_id))?;
        let guard = is.read().await;
        Ok(guard
            .bookings
            .iter()
            .map(|b| BookingInfo::from_entry(*item_id, b))
            .collect())
    }

    pub async fn bookings_by_renter(&self, renter: &str) -> Vec<BookingInfo> {
        self.collect_bookings(|_, b| b.renter == renter).await
    }

    /// Bookings on every item the owner has listed.
    pub async fn bookings_by_owner(&self, owner: &str) -> Vec<BookingInfo> {
        self.collect_bookings(|is, _| is.owner == owner).await
    }

    async fn collect_bookings<F>(&self, keep: F) -> Vec<BookingInfo>
    where
        F: Fn(&ItemState, &BookingEntry) -> bool,
    {
        let items: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for is in items {
            let guard = is.read().await;
            out.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| keep(&guard, b))
                    .map(|b| BookingInfo::from_entry(guard.id, b)),
            );
        }
        out.sort_by_key(|b| (b.start, b.id));
        out
    }

    /// What a booking request would get right now, without storing anything.
    /// Also returns the window the result was computed against, read under
    /// the same lock.
    pub async fn quote(
        &self,
        item_id: &Ulid,
        start: Option<Day>,
        end: Option<Day>,
    ) -> Result<(ValidationResult, Option<AvailabilityWindow>), EngineError> {
        let is = self
            .get_item_state(item_id)
            .ok_or(EngineError::NotFound(*item_id))?;
        let guard = is.read().await;
        let result = validate(
            guard.window.as_ref(),
            &guard.reservations(),
            &ProposedRange { start, end },
            guard.price_per_day,
        );
        Ok((result, guard.window))
    }

    pub async fn calendar(
        &self,
        item_id: &Ulid,
        year: i32,
        month: u32,
        today: Day,
    ) -> Result<CalendarMonth, EngineError> {
        let is = self
            .get_item_state(item_id)
            .ok_or(EngineError::NotFound(*item_id))?;
        let guard = is.read().await;
        classify_month(
            year,
            month,
            guard.window.as_ref(),
            &guard.reservations(),
            &ProposedRange::default(),
            today,
        )
    }
}

fn item_info(is: &ItemState) -> ItemInfo {
    ItemInfo {
        id: is.id,
        owner: is.owner.clone(),
        price_per_day: is.price_per_day,
        window: is.window,
    }
}
