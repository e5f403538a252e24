use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::validate;
use super::conflict::{conflicting_booking, validate_name, validate_price, validate_range, validate_window};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn list_item(
        &self,
        id: Ulid,
        owner: String,
        price_per_day: Decimal,
        window: Option<AvailabilityWindow>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_ITEMS {
            return Err(EngineError::LimitExceeded("too many items"));
        }
        validate_name(&owner, "owner name")?;
        validate_price(price_per_day)?;
        validate_window(window.as_ref())?;
        let _gate = self.compaction.read().await;

        // The id is claimed with the new item write-locked until the WAL answers.
        let is = Arc::new(RwLock::new(ItemState::new(id, owner.clone(), price_per_day, window)));
        let mut guard = is.clone().write_owned().await;
        match self.state.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(is.clone());
            }
        }

        let event = Event::ItemListed {
            id,
            owner,
            price_per_day,
            window,
        };
        if let Err(e) = self.wal_append(&event).await {
            guard.delisted = true;
            self.state.remove_if(&id, |_, v| Arc::ptr_eq(v, &is));
            return Err(e);
        }
        drop(guard);
        metrics::gauge!(observability::ITEMS_ACTIVE).set(self.state.len() as f64);
        self.notify.send(id, &event);
        tracing::debug!(item = %id, "item listed");
        Ok(())
    }

    /// Change an item's daily rate and/or window. Existing bookings are kept
    /// as they are; only future requests see the new terms.
    pub async fn update_item(&self, id: Ulid, patch: ItemPatch) -> Result<ItemInfo, EngineError> {
        if let Some(price) = patch.price_per_day {
            validate_price(price)?;
        }
        if let Some(window) = patch.window {
            validate_window(window.as_ref())?;
        }
        let _gate = self.compaction.read().await;
        let mut guard = self.item_write(&id).await?;

        let event = Event::ItemUpdated {
            id,
            price_per_day: patch.price_per_day.unwrap_or(guard.price_per_day),
            window: patch.window.unwrap_or(guard.window),
        };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(ItemInfo {
            id,
            owner: guard.owner.clone(),
            price_per_day: guard.price_per_day,
            window: guard.window,
        })
    }

    /// Remove an item. Refused while any booking still holds days on it.
    pub async fn delist_item(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction.read().await;
        let mut guard = self.item_write(&id).await?;
        if guard.has_active_bookings() {
            return Err(EngineError::HasActiveBookings(id));
        }

        let event = Event::ItemDelisted { id };
        self.wal_append(&event).await?;
        guard.delisted = true;
        for b in &guard.bookings {
            self.booking_to_item.remove(&b.id);
        }
        self.state.remove(&id);
        metrics::gauge!(observability::ITEMS_ACTIVE).set(self.state.len() as f64);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    /// Authoritative booking check. Runs the same availability rules as the
    /// renter's form, but under the item's write lock, so two renters racing
    /// for the same days cannot both get a pending booking.
    pub async fn request_booking(
        &self,
        id: Ulid,
        item_id: Ulid,
        renter: String,
        start: Option<Day>,
        end: Option<Day>,
    ) -> Result<BookingInfo, EngineError> {
        validate_name(&renter, "renter name")?;
        if self.booking_to_item.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let _gate = self.compaction.read().await;
        let mut guard = self.item_write(&item_id).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many bookings on item"));
        }

        let proposed = ProposedRange { start, end };
        let result = validate(
            guard.window.as_ref(),
            &guard.reservations(),
            &proposed,
            guard.price_per_day,
        );
        metrics::counter!(observability::BOOKING_VALIDATIONS_TOTAL, "outcome" => result.outcome_label())
            .increment(1);

        let quote = match result {
            ValidationResult::Valid { quote, .. } => quote,
            ValidationResult::Invalid { reason } => {
                tracing::debug!(item = %item_id, %renter, %reason, "booking refused");
                if reason == InvalidReason::OverlapsExistingReservation
                    && let Some(range) = proposed.as_range()
                    && let Some(holder) = conflicting_booking(&guard, &range)
                {
                    return Err(EngineError::Conflict(holder.id));
                }
                return Err(EngineError::Rejected(reason));
            }
        };
        let range = proposed
            .as_range()
            .ok_or(EngineError::Rejected(InvalidReason::MissingDates))?;
        validate_range(&range)?;

        let event = Event::BookingRequested {
            id,
            item_id,
            renter,
            range,
            total_price: quote.total,
        };
        self.persist_and_apply(item_id, &mut guard, &event).await?;
        let entry = guard
            .booking(&id)
            .ok_or_else(|| EngineError::WalError(format!("booking {id} missing after apply")))?;
        Ok(BookingInfo::from_entry(item_id, entry))
    }

    /// Owner decision on a pending booking. Approved and declined are final.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<BookingInfo, EngineError> {
        let _gate = self.compaction.read().await;
        let (item_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(&id)
            .map(|b| b.reservation.status)
            .ok_or(EngineError::NotFound(id))?;
        if current != ReservationStatus::Pending || status == ReservationStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: current,
                to: status,
            });
        }

        let event = Event::BookingStatusChanged { id, item_id, status };
        self.persist_and_apply(item_id, &mut guard, &event).await?;
        let entry = guard.booking(&id).ok_or(EngineError::NotFound(id))?;
        Ok(BookingInfo::from_entry(item_id, entry))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    /// Mutations wait until the compacted file has replaced the old one.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction.write().await;
        let items: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();

        for is in items {
            let guard = is.read().await;
            events.push(Event::ItemListed {
                id: guard.id,
                owner: guard.owner.clone(),
                price_per_day: guard.price_per_day,
                window: guard.window,
            });
            for b in &guard.bookings {
                events.push(Event::BookingRequested {
                    id: b.id,
                    item_id: guard.id,
                    renter: b.renter.clone(),
                    range: b.reservation.range,
                    total_price: b.total_price,
                });
                if b.reservation.status != ReservationStatus::Pending {
                    events.push(Event::BookingStatusChanged {
                        id: b.id,
                        item_id: guard.id,
                        status: b.reservation.status,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

