mod availability;
mod calendar;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{compute_quote, validate};
pub use calendar::{classify_day, classify_month};
pub use conflict::{first_conflict, today};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedItemState = Arc<RwLock<ItemState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let batch = vec![(event, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

/// The authoritative booking ledger: every listed item, its terms and its
/// bookings. Client-side checks are advisory; this is where a booking is
/// actually accepted or refused.
pub struct Engine {
    pub state: DashMap<Ulid, SharedItemState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → item id
    pub(super) booking_to_item: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared; `compact_wal` holds it exclusively, so no
    /// event can commit between its snapshot and the file swap.
    pub(super) compaction: RwLock<()>,
}

/// Apply an event directly to an ItemState. The caller holds the lock.
fn apply_to_item(is: &mut ItemState, event: &Event, booking_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ItemUpdated {
            price_per_day,
            window,
            ..
        } => {
            is.price_per_day = *price_per_day;
            is.window = *window;
        }
        Event::BookingRequested {
            id,
            item_id,
            renter,
            range,
            total_price,
        } => {
            is.insert_booking(BookingEntry {
                id: *id,
                renter: renter.clone(),
                reservation: Reservation {
                    range: *range,
                    status: ReservationStatus::Pending,
                },
                total_price: *total_price,
            });
            booking_map.insert(*id, *item_id);
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(b) = is.booking_mut(id) {
                b.reservation.status = *status;
            }
        }
        // ItemListed/Delisted are handled at the DashMap level, not here
        Event::ItemListed { .. } | Event::ItemDelisted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            booking_to_item: DashMap::new(),
            compaction: RwLock::new(()),
        };
        engine.replay(&events);
        metrics::gauge!(crate::observability::ITEMS_ACTIVE).set(engine.state.len() as f64);
        tracing::info!(
            "ledger replayed {} events: {} items, {} bookings",
            events.len(),
            engine.state.len(),
            engine.booking_to_item.len()
        );
        Ok(engine)
    }

    /// Rebuild in-memory state. We are the sole owner of these Arcs here, so
    /// `try_write` always succeeds; records that cannot be applied are skipped.
    fn replay(&self, events: &[Event]) {
        for event in events {
            match event {
                Event::ItemListed {
                    id,
                    owner,
                    price_per_day,
                    window,
                } => {
                    let is = ItemState::new(*id, owner.clone(), *price_per_day, *window);
                    self.state.insert(*id, Arc::new(RwLock::new(is)));
                }
                Event::ItemDelisted { id } => {
                    if let Some((_, item)) = self.state.remove(id)
                        && let Ok(guard) = item.try_read()
                    {
                        for b in &guard.bookings {
                            self.booking_to_item.remove(&b.id);
                        }
                    }
                }
                other => {
                    let item_id = event_item_id(other);
                    if let Some(item) = self.get_item_state(&item_id) {
                        match item.try_write() {
                            Ok(mut guard) => apply_to_item(&mut guard, other, &self.booking_to_item),
                            Err(_) => tracing::warn!("replay: item {item_id} locked, skipping event"),
                        }
                    }
                }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_item_state(&self, id: &Ulid) -> Option<SharedItemState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_item_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_item.get(booking_id).map(|e| *e.value())
    }

    /// Changes to one item's terms and bookings, as they are committed.
    pub fn subscribe(&self, item_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(item_id)
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        item_id: Ulid,
        is: &mut ItemState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_item(is, event, &self.booking_to_item);
        self.notify.send(item_id, event);
        Ok(())
    }

    /// Write lock on a live item. Fails with `NotFound` if the item was
    /// delisted while we waited for the lock.
    pub(super) async fn item_write(&self, item_id: &Ulid) -> Result<OwnedRwLockWriteGuard<ItemState>, EngineError> {
        let item = self
            .get_item_state(item_id)
            .ok_or(EngineError::NotFound(*item_id))?;
        let guard = item.write_owned().await;
        if guard.delisted {
            return Err(EngineError::NotFound(*item_id));
        }
        Ok(guard)
    }

    /// Lookup booking → item, get item, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ItemState>), EngineError> {
        let item_id = self
            .get_item_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let guard = self.item_write(&item_id).await?;
        Ok((item_id, guard))
    }
}

/// The item an event belongs to.
fn event_item_id(event: &Event) -> Ulid {
    match event {
        Event::ItemListed { id, .. } | Event::ItemUpdated { id, .. } | Event::ItemDelisted { id } => *id,
        Event::BookingRequested { item_id, .. } | Event::BookingStatusChanged { item_id, .. } => *item_id,
    }
}
