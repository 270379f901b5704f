use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, stay_span, total_price, validate_span};
use super::validation;
use super::{Engine, EngineError, Entity, Outcome, WalCommand};

/// Claim `key` for `id` in a uniqueness index. Returns false when another
/// record already holds it.
fn reserve(index: &dashmap::DashMap<String, Ulid>, key: &str, id: Ulid) -> bool {
    match index.entry(key.to_string()) {
        Entry::Occupied(e) => *e.get() == id,
        Entry::Vacant(e) => {
            e.insert(id);
            true
        }
    }
}

fn release(index: &dashmap::DashMap<String, Ulid>, key: &str, id: Ulid) {
    index.remove_if(key, |_, owner| *owner == id);
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────────

    pub async fn create_room(&self, input: NewRoom) -> Result<Room, EngineError> {
        let _gate = self.write_gate.read().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        let _claim = self.claim_id(Entity::Room, input.id)?;
        if self.rooms.contains_key(&input.id) {
            return Err(EngineError::AlreadyExists(input.id));
        }
        let room = validation::new_room(input, self.clock.now_ms())?;
        if !reserve(&self.room_numbers, &room.number, room.id) {
            return Err(EngineError::validation("number", "room number already exists"));
        }

        let event = Event::RoomCreated { room: room.clone() };
        if let Err(e) = self.wal_append(&event).await {
            release(&self.room_numbers, &room.number, room.id);
            return Err(e);
        }
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        debug!(room = %room.id, number = %room.number, "room created");
        Ok(room)
    }

    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.write_room(id).await?;
        let room = validation::patched_room(&guard.room, patch, self.clock.now_ms())?;
        let old_number = guard.room.number.clone();
        let renumbered = room.number != old_number;
        if renumbered && !reserve(&self.room_numbers, &room.number, id) {
            return Err(EngineError::validation("number", "room number already exists"));
        }

        let event = Event::RoomUpdated { room: room.clone() };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            if renumbered {
                release(&self.room_numbers, &room.number, id);
            }
            return Err(e);
        }
        if renumbered {
            release(&self.room_numbers, &old_number, id);
        }
        Ok(room)
    }

    /// Set a room's status directly (front desk override, e.g. maintenance).
    pub async fn set_room_status(&self, id: Ulid, status: RoomStatus) -> Result<Room, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.write_room(id).await?;
        self.apply_room_status(&mut guard, status).await?;
        Ok(guard.room.clone())
    }

    /// Refused while any active booking references the room. The room's
    /// booking history goes with it.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let guard = self.write_room(id).await?;
        let active = guard.active_booking_count();
        if active > 0 {
            return Err(EngineError::InvalidState(format!(
                "cannot delete room with {active} active booking(s)"
            )));
        }

        self.wal_append(&Event::RoomDeleted { id }).await?;
        self.rooms.remove(&id);
        self.forget_room_indexes(&guard);
        debug!(room = %id, "room deleted");
        Ok(())
    }

    /// Persist a status change on a locked room. No-op if it already has it.
    pub(super) async fn apply_room_status(
        &self,
        rs: &mut RoomState,
        status: RoomStatus,
    ) -> Result<(), EngineError> {
        if rs.room.status == status {
            return Ok(());
        }
        let event = Event::RoomStatusChanged {
            id: rs.room.id,
            status,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(rs, &event).await
    }

    /// Room side effect of a booking entering `status`. Failures are logged
    /// and handed back rather than propagated.
    async fn follow_booking_status(
        &self,
        rs: &mut RoomState,
        status: BookingStatus,
    ) -> Option<EngineError> {
        let target = match status {
            BookingStatus::CheckedIn => RoomStatus::Occupied,
            BookingStatus::CheckedOut | BookingStatus::Cancelled
                if rs.room.status != RoomStatus::Maintenance =>
            {
                RoomStatus::Available
            }
            _ => return None,
        };
        self.set_status_best_effort(rs, target).await
    }

    async fn set_status_best_effort(&self, rs: &mut RoomState, status: RoomStatus) -> Option<EngineError> {
        match self.apply_room_status(rs, status).await {
            Ok(()) => None,
            Err(e) => {
                warn!(room = %rs.room.id, %status, "room status update failed: {e}");
                Some(e)
            }
        }
    }

    // ── Guests ───────────────────────────────────────────────────

    pub async fn create_guest(&self, input: NewGuest) -> Result<Guest, EngineError> {
        let _gate = self.write_gate.read().await;
        if self.guests.len() >= MAX_GUESTS {
            return Err(EngineError::LimitExceeded("too many guests"));
        }
        let _claim = self.claim_id(Entity::Guest, input.id)?;
        if self.guests.contains_key(&input.id) {
            return Err(EngineError::AlreadyExists(input.id));
        }
        let guest = validation::new_guest(input, self.clock.now_ms())?;
        if !reserve(&self.guest_emails, &guest.email, guest.id) {
            return Err(EngineError::validation("email", "email already registered"));
        }

        let event = Event::GuestCreated { guest: guest.clone() };
        if let Err(e) = self.wal_append(&event).await {
            release(&self.guest_emails, &guest.email, guest.id);
            return Err(e);
        }
        self.guests.insert(guest.id, guest.clone());
        Ok(guest)
    }

    pub async fn update_guest(&self, id: Ulid, patch: GuestPatch) -> Result<Guest, EngineError> {
        let _gate = self.write_gate.read().await;
        let current = self
            .guests
            .get(&id)
            .map(|g| g.clone())
            .ok_or(EngineError::not_found(Entity::Guest, id))?;
        let guest = validation::patched_guest(&current, patch, self.clock.now_ms())?;
        let new_email = guest.email != current.email;
        if new_email && !reserve(&self.guest_emails, &guest.email, id) {
            return Err(EngineError::validation("email", "email already registered"));
        }

        let event = Event::GuestUpdated { guest: guest.clone() };
        if let Err(e) = self.wal_append(&event).await {
            if new_email {
                release(&self.guest_emails, &guest.email, id);
            }
            return Err(e);
        }
        match self.guests.get_mut(&id) {
            Some(mut g) => *g = guest.clone(),
            None => {
                // Deleted while we were writing; replay skips the update too.
                if new_email {
                    release(&self.guest_emails, &guest.email, id);
                }
                return Err(EngineError::not_found(Entity::Guest, id));
            }
        }
        if new_email {
            release(&self.guest_emails, &current.email, id);
        }
        Ok(guest)
    }

    /// Refused while any active booking references the guest. Past bookings
    /// keep the guest id but lose the name and email in views.
    pub async fn delete_guest(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        if !self.guests.contains_key(&id) {
            return Err(EngineError::not_found(Entity::Guest, id));
        }
        let mut active = 0usize;
        for rs in self.room_states() {
            let guard = rs.read().await;
            active += guard
                .bookings
                .iter()
                .filter(|b| b.guest_id == id && b.is_active())
                .count();
        }
        if active > 0 {
            return Err(EngineError::InvalidState(format!(
                "cannot delete guest with {active} active booking(s)"
            )));
        }

        self.wal_append(&Event::GuestDeleted { id }).await?;
        if let Some((_, old)) = self.guests.remove(&id) {
            release(&self.guest_emails, &old.email, id);
        }
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────────

    /// Admit a booking. The room's write lock is held from the conflict check
    /// through the WAL append, so two overlapping requests cannot both pass.
    ///
    /// A stay starting before tomorrow's midnight, or a booking created
    /// already checked in, marks the room occupied.
    pub async fn create_booking(&self, input: NewBooking) -> Result<Outcome<BookingView>, EngineError> {
        let _gate = self.write_gate.read().await;
        let _claim = self.claim_id(Entity::Booking, input.id)?;
        if self.booking_to_room.contains_key(&input.id) {
            return Err(EngineError::AlreadyExists(input.id));
        }
        let guest = self
            .guests
            .get(&input.guest_id)
            .map(|g| g.clone())
            .ok_or(EngineError::not_found(Entity::Guest, input.guest_id))?;
        let mut guard = self.write_room(input.room_id).await?;

        if guard.room.status == RoomStatus::Maintenance {
            return Err(EngineError::InvalidState(
                "room is under maintenance".into(),
            ));
        }
        if input.check_in < self.clock.start_of_today() {
            return Err(EngineError::InvalidRange("check-in date cannot be in the past"));
        }
        let stay = stay_span(input.check_in, input.check_out)?;
        validate_span(&stay, MAX_STAY_MS)?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        if let Err(e) = check_no_conflict(&guard, &stay, None) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let status = input.status.unwrap_or_default();
        if !status.is_active() {
            return Err(EngineError::InvalidState(format!(
                "a booking cannot be created as {status}"
            )));
        }
        let notes = validation::notes(input.notes.as_deref())?;

        let now = self.clock.now_ms();
        let booking = Booking {
            id: input.id,
            guest_id: input.guest_id,
            room_id: input.room_id,
            stay,
            status,
            total_price: total_price(&stay, guard.room.price),
            notes,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated { booking: booking.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        debug!(booking = %booking.id, room = %booking.room_id, "booking created");

        let starts_today = stay.start < self.clock.start_of_tomorrow();
        let room_status_error = if starts_today || status == BookingStatus::CheckedIn {
            self.set_status_best_effort(&mut guard, RoomStatus::Occupied).await
        } else {
            None
        };

        Ok(Outcome {
            value: BookingView::new(booking, Some(&guest), &guard.room),
            room_status_error,
        })
    }

    /// Move a booking along the status graph and apply the room side effect.
    pub async fn transition_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Outcome<BookingView>, EngineError> {
        let patch = BookingPatch {
            status: Some(status),
            ..Default::default()
        };
        self.edit_booking(id, patch, true).await
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Outcome<BookingView>, EngineError> {
        self.transition_booking_status(id, BookingStatus::Cancelled).await
    }

    /// Partial edit. Date edits re-run the range and conflict checks and
    /// reprice the stay; a status change follows the transition graph.
    /// Re-sending the current status is accepted as a no-op here.
    pub async fn update_booking(
        &self,
        id: Ulid,
        patch: BookingPatch,
    ) -> Result<Outcome<BookingView>, EngineError> {
        self.edit_booking(id, patch, false).await
    }

    async fn edit_booking(
        &self,
        id: Ulid,
        patch: BookingPatch,
        must_move: bool,
    ) -> Result<Outcome<BookingView>, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_booking_write(id).await?;
        let current = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::not_found(Entity::Booking, id))?;

        let status = match patch.status {
            Some(next) if must_move || next != current.status => {
                if !current.status.can_transition_to(next) {
                    return Err(EngineError::InvalidTransition {
                        from: current.status,
                        to: next,
                    });
                }
                next
            }
            _ => current.status,
        };

        let mut booking = current.clone();
        if patch.touches_dates() {
            if current.status.is_terminal() {
                return Err(EngineError::InvalidState(format!(
                    "cannot change the dates of a {} booking",
                    current.status
                )));
            }
            let check_in = patch.check_in.unwrap_or(current.stay.start);
            let check_out = patch.check_out.unwrap_or(current.stay.end);
            if check_in != current.stay.start && check_in < self.clock.start_of_today() {
                return Err(EngineError::InvalidRange("check-in date cannot be in the past"));
            }
            let stay = stay_span(check_in, check_out)?;
            validate_span(&stay, MAX_STAY_MS)?;
            if status.is_active()
                && let Err(e) = check_no_conflict(&guard, &stay, Some(id))
            {
                metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }
            booking.total_price = total_price(&stay, guard.room.price);
            booking.stay = stay;
        }
        if let Some(notes) = patch.notes {
            booking.notes = validation::notes(notes.as_deref())?;
        }
        booking.status = status;
        booking.updated_at = self.clock.now_ms();

        let event = Event::BookingUpdated { booking: booking.clone() };
        self.persist_and_apply(&mut guard, &event).await?;

        let room_status_error = if status != current.status {
            debug!(booking = %id, from = %current.status, to = %status, "booking status changed");
            self.follow_booking_status(&mut guard, status).await
        } else {
            None
        };

        Ok(Outcome {
            value: self.view(booking, &guard.room),
            room_status_error,
        })
    }

    /// Remove a booking outright. Deleting an active booking releases the room.
    pub async fn delete_booking(&self, id: Ulid) -> Result<Outcome<Booking>, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_booking_write(id).await?;
        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::not_found(Entity::Booking, id))?;

        let event = Event::BookingDeleted {
            id,
            room_id: booking.room_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        if !booking.is_active() || guard.room.status == RoomStatus::Maintenance {
            return Ok(Outcome::clean(booking));
        }
        let room_status_error = self
            .set_status_best_effort(&mut guard, RoomStatus::Available)
            .await;
        Ok(Outcome {
            value: booking,
            room_status_error,
        })
    }

    // ── WAL maintenance ──────────────────────────────────────────

    /// Rewrite the WAL as the minimal event set for the current state.
    /// Blocks all mutations while the snapshot is taken and swapped in.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;
        let mut events = Vec::new();

        let mut guests: Vec<Guest> = self.guests.iter().map(|e| e.value().clone()).collect();
        guests.sort_by_key(|g| g.id);
        events.extend(guests.into_iter().map(|guest| Event::GuestCreated { guest }));

        for rs in self.room_states() {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
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
