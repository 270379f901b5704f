mod availability;
mod clock;
mod conflict;
mod error;
mod mutations;
mod queries;
mod validation;

pub use availability::{availability, free_windows, is_bookable, merge_overlapping, subtract_intervals};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{EngineError, Entity};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub(super) type RoomWriteGuard = tokio::sync::OwnedRwLockWriteGuard<RoomState>;

/// Result of an operation whose primary write succeeded but which also
/// tried to move the room's status. `room_status_error` is set when that
/// secondary write failed; the primary write is not rolled back.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub room_status_error: Option<EngineError>,
}

impl<T> Outcome<T> {
    pub(crate) fn clean(value: T) -> Self {
        Self {
            value,
            room_status_error: None,
        }
    }
}

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
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
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
                if let Err(e) = &result {
                    warn!("WAL flush failed for {} events: {e}", batch.len());
                }
                respond_batch(batch, &result);

                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
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
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The availability engine plus the room and guest directories it checks
/// against. Every room's state sits behind its own lock; booking writes
/// hold that lock across check-then-write.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) guests: DashMap<Ulid, Guest>,
    /// Room number → room id. Enforces number uniqueness.
    pub(super) room_numbers: DashMap<String, Ulid>,
    /// Lower-cased email → guest id. Enforces email uniqueness.
    pub(super) guest_emails: DashMap<String, Ulid>,
    /// Reverse lookup: booking id → room id.
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    /// Ids whose creation is in flight. See [`IdClaim`].
    pub(super) pending_ids: DashSet<(Entity, Ulid)>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn Clock>,
    /// Mutations hold this shared for their whole run; compaction holds it
    /// exclusively so the snapshot and the log swap see the same state.
    pub(super) write_gate: RwLock<()>,
    #[cfg(test)]
    pub(super) wal_fault: WalFault,
}

/// Exclusive right to create the record with a given id. Held from the
/// existence check until the record is in its directory; dropping it (on
/// success, error or cancellation) lets the id be tried again.
pub(super) struct IdClaim<'a> {
    pending: &'a DashSet<(Entity, Ulid)>,
    key: (Entity, Ulid),
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}

/// Test hook that lets a fixed number of WAL appends through and fails
/// every one after that.
#[cfg(test)]
pub(super) struct WalFault(std::sync::atomic::AtomicI64);

#[cfg(test)]
impl WalFault {
    const OFF: i64 = -1;

    fn off() -> Self {
        Self(std::sync::atomic::AtomicI64::new(Self::OFF))
    }

    fn check(&self) -> Result<(), EngineError> {
        use std::sync::atomic::Ordering::SeqCst;
        let allowed = self
            .0
            .fetch_update(SeqCst, SeqCst, |n| (n > 0).then(|| n - 1))
            .is_ok();
        if allowed || self.0.load(SeqCst) == Self::OFF {
            Ok(())
        } else {
            Err(EngineError::WalError("simulated write failure".into()))
        }
    }
}

/// Apply a booking or room-level event to a room's state (caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { room } => {
            rs.room = room.clone();
        }
        Event::RoomStatusChanged { status, at, .. } => {
            rs.room.status = *status;
            rs.room.updated_at = *at;
        }
        Event::BookingCreated { booking } => {
            rs.insert_booking(booking.clone());
            booking_index.insert(booking.id, booking.room_id);
        }
        Event::BookingUpdated { booking } => {
            // Re-insert so a date edit keeps the list sorted by check-in.
            rs.remove_booking(booking.id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingDeleted { id, .. } => {
            rs.remove_booking(*id);
            booking_index.remove(id);
        }
        // Handled at the directory level, not here
        Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::GuestCreated { .. }
        | Event::GuestUpdated { .. }
        | Event::GuestDeleted { .. } => {}
    }
}

impl Engine {
    /// Open (or create) the WAL at `wal_path`, replay it, and start the
    /// group-commit writer. Must be called inside a Tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        Self::with_clock(wal_path, Arc::new(SystemClock))
    }

    pub fn with_clock(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            guests: DashMap::new(),
            room_numbers: DashMap::new(),
            guest_emails: DashMap::new(),
            booking_to_room: DashMap::new(),
            pending_ids: DashSet::new(),
            wal_tx,
            clock,
            write_gate: RwLock::new(()),
            #[cfg(test)]
            wal_fault: WalFault::off(),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never use blocking_write here: this may run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }
        info!(
            "replayed {} WAL events: {} rooms, {} guests, {} bookings",
            events.len(),
            engine.rooms.len(),
            engine.guests.len(),
            engine.booking_to_room.len()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::RoomCreated { room } => {
                self.room_numbers.insert(room.number.clone(), room.id);
                self.rooms
                    .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
            Event::RoomDeleted { id } => {
                if let Some((_, rs)) = self.rooms.remove(id)
                    && let Ok(guard) = rs.try_read()
                {
                    self.forget_room_indexes(&guard);
                }
            }
            Event::GuestCreated { guest } => {
                self.guest_emails.insert(guest.email.clone(), guest.id);
                self.guests.insert(guest.id, guest.clone());
            }
            Event::GuestUpdated { guest } => {
                let Some(mut current) = self.guests.get_mut(&guest.id) else {
                    return;
                };
                if current.email != guest.email {
                    self.guest_emails.remove(&current.email);
                    self.guest_emails.insert(guest.email.clone(), guest.id);
                }
                *current = guest.clone();
            }
            Event::GuestDeleted { id } => {
                if let Some((_, old)) = self.guests.remove(id) {
                    self.guest_emails.remove(&old.email);
                }
            }
            other => {
                let Some(room_id) = event_room_id(other) else { return };
                let Some(rs) = self.get_room_state(&room_id) else {
                    warn!("WAL replay: event for unknown room {room_id} skipped");
                    return;
                };
                let Ok(mut guard) = rs.try_write() else { return };
                if let Event::RoomUpdated { room } = other
                    && room.number != guard.room.number
                {
                    self.room_numbers.remove(&guard.room.number);
                    self.room_numbers.insert(room.number.clone(), room.id);
                }
                apply_to_room(&mut guard, other, &self.booking_to_room);
            }
        }
    }

    /// Drop the number and booking index entries of a room being removed.
    pub(super) fn forget_room_indexes(&self, rs: &RoomState) {
        self.room_numbers
            .remove_if(&rs.room.number, |_, id| *id == rs.room.id);
        for b in &rs.bookings {
            self.booking_to_room.remove(&b.id);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        #[cfg(test)]
        self.wal_fault.check()?;
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

    /// Let `n` more WAL appends succeed, then fail all the rest.
    #[cfg(test)]
    pub(crate) fn fail_wal_after(&self, n: i64) {
        self.wal_fault.0.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn heal_wal(&self) {
        self.fail_wal_after(WalFault::OFF);
    }

    /// Claim `id` for a record about to be created. `AlreadyExists` while
    /// another create of the same id is in flight.
    pub(super) fn claim_id(&self, entity: Entity, id: Ulid) -> Result<IdClaim<'_>, EngineError> {
        let key = (entity, id);
        if !self.pending_ids.insert(key) {
            return Err(EngineError::AlreadyExists(id));
        }
        Ok(IdClaim {
            pending: &self.pending_ids,
            key,
        })
    }

    /// WAL-append then apply to the locked room.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.booking_to_room);
        Ok(())
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    pub(super) fn room_state_or_not_found(&self, id: Ulid) -> Result<SharedRoomState, EngineError> {
        self.get_room_state(&id)
            .ok_or(EngineError::not_found(Entity::Room, id))
    }

    /// Acquire a room's write lock. Fails with NotFound if the room was
    /// deleted while we waited.
    pub(super) async fn write_room(&self, id: Ulid) -> Result<RoomWriteGuard, EngineError> {
        let rs = self.room_state_or_not_found(id)?;
        let guard = rs.clone().write_owned().await;
        let still_listed = self
            .rooms
            .get(&id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), &rs));
        if !still_listed {
            return Err(EngineError::not_found(Entity::Room, id));
        }
        Ok(guard)
    }

    /// Lookup booking → room, acquire that room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: Ulid,
    ) -> Result<RoomWriteGuard, EngineError> {
        let room_id = self
            .get_room_for_booking(&booking_id)
            .ok_or(EngineError::not_found(Entity::Booking, booking_id))?;
        let guard = self
            .write_room(room_id)
            .await
            .map_err(|_| EngineError::not_found(Entity::Booking, booking_id))?;
        // The booking may have been deleted while we waited for the lock.
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::not_found(Entity::Booking, booking_id));
        }
        Ok(guard)
    }

    /// Snapshot of every room lock, in id order.
    pub(super) fn room_states(&self) -> Vec<SharedRoomState> {
        let mut entries: Vec<(Ulid, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, rs)| rs).collect()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

/// The room an event applies to (for events that live under a room lock).
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomUpdated { room } => Some(room.id),
        Event::RoomStatusChanged { id, .. } => Some(*id),
        Event::BookingCreated { booking } | Event::BookingUpdated { booking } => Some(booking.room_id),
        Event::BookingDeleted { room_id, .. } => Some(*room_id),
        Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::GuestCreated { .. }
        | Event::GuestUpdated { .. }
        | Event::GuestDeleted { .. } => None,
    }
}
