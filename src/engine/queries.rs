use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{availability, free_windows, is_bookable};
use super::conflict::{stay_span, validate_span};
use super::{Engine, EngineError, Entity};

fn check_page(req: PageRequest) -> Result<PageRequest, EngineError> {
    if req.page == 0 {
        return Err(EngineError::validation("page", "must be at least 1"));
    }
    if req.page_size == 0 {
        return Err(EngineError::validation("page_size", "must be at least 1"));
    }
    if req.page_size > MAX_PAGE_SIZE {
        return Err(EngineError::LimitExceeded("page size too large"));
    }
    Ok(req)
}

/// Newest check-in first; ties broken by id so paging is stable.
fn newest_first(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| b.stay.start.cmp(&a.stay.start).then(b.id.cmp(&a.id)));
}

impl Engine {
    pub(super) fn view(&self, booking: Booking, room: &Room) -> BookingView {
        let guest = self.guests.get(&booking.guest_id).map(|g| g.clone());
        BookingView::new(booking, guest.as_ref(), room)
    }

    // ── Rooms ────────────────────────────────────────────────────

    pub async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.room_state_or_not_found(id)?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    /// Rooms ordered by number.
    pub async fn list_rooms(&self, filter: RoomFilter, req: PageRequest) -> Result<Page<Room>, EngineError> {
        let req = check_page(req)?;
        let mut rooms = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            let room = &guard.room;
            if filter.status.is_some_and(|s| s != room.status)
                || filter.room_type.is_some_and(|t| t != room.room_type)
            {
                continue;
            }
            rooms.push(room.clone());
        }
        rooms.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(Page::from_sorted(rooms, req))
    }

    /// Booking history of one room, newest check-in first.
    pub async fn room_bookings(&self, room_id: Ulid) -> Result<Vec<BookingView>, EngineError> {
        let rs = self.room_state_or_not_found(room_id)?;
        let guard = rs.read().await;
        let mut bookings = guard.bookings.clone();
        newest_first(&mut bookings);
        Ok(bookings
            .into_iter()
            .map(|b| self.view(b, &guard.room))
            .collect())
    }

    // ── Guests ───────────────────────────────────────────────────

    pub fn get_guest(&self, id: Ulid) -> Result<Guest, EngineError> {
        self.guests
            .get(&id)
            .map(|g| g.clone())
            .ok_or(EngineError::not_found(Entity::Guest, id))
    }

    /// Guests, most recently registered first.
    pub fn list_guests(&self, req: PageRequest) -> Result<Page<Guest>, EngineError> {
        let req = check_page(req)?;
        let mut guests: Vec<Guest> = self.guests.iter().map(|e| e.value().clone()).collect();
        guests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(Page::from_sorted(guests, req))
    }

    pub async fn guest_bookings(&self, guest_id: Ulid) -> Result<Vec<BookingView>, EngineError> {
        if !self.guests.contains_key(&guest_id) {
            return Err(EngineError::not_found(Entity::Guest, guest_id));
        }
        let filter = BookingFilter {
            guest_id: Some(guest_id),
            ..Default::default()
        };
        Ok(self.collect_bookings(filter).await)
    }

    // ── Bookings ─────────────────────────────────────────────────

    pub async fn get_booking(&self, id: Ulid) -> Result<BookingView, EngineError> {
        let room_id = self
            .get_room_for_booking(&id)
            .ok_or(EngineError::not_found(Entity::Booking, id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::not_found(Entity::Booking, id))?;
        let guard = rs.read().await;
        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::not_found(Entity::Booking, id))?;
        Ok(self.view(booking, &guard.room))
    }

    /// Bookings across all rooms, newest check-in first.
    pub async fn list_bookings(
        &self,
        filter: BookingFilter,
        req: PageRequest,
    ) -> Result<Page<BookingView>, EngineError> {
        let req = check_page(req)?;
        Ok(Page::from_sorted(self.collect_bookings(filter).await, req))
    }

    async fn collect_bookings(&self, filter: BookingFilter) -> Vec<BookingView> {
        let states = match filter.room_id {
            Some(id) => self.get_room_state(&id).into_iter().collect(),
            None => self.room_states(),
        };
        let mut views = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            views.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| {
                        filter.status.is_none_or(|s| s == b.status)
                            && filter.guest_id.is_none_or(|g| g == b.guest_id)
                    })
                    .map(|b| self.view(b.clone(), &guard.room)),
            );
        }
        views.sort_by(|a, b| {
            b.booking
                .stay
                .start
                .cmp(&a.booking.stay.start)
                .then(b.booking.id.cmp(&a.booking.id))
        });
        views
    }

    // ── Availability ─────────────────────────────────────────────

    /// Past check-in dates are allowed here; only creation rejects them.
    pub async fn check_availability(
        &self,
        room_id: Ulid,
        check_in: Ms,
        check_out: Ms,
    ) -> Result<Availability, EngineError> {
        let rs = self.room_state_or_not_found(room_id)?;
        let stay = stay_span(check_in, check_out)?;
        validate_span(&stay, MAX_QUERY_WINDOW_MS)?;
        let guard = rs.read().await;
        Ok(availability(&guard, &stay))
    }

    /// Rooms with status `available` and no active booking overlapping the
    /// stay, cheapest first (ties by number).
    pub async fn list_available_rooms(
        &self,
        check_in: Ms,
        check_out: Ms,
        room_type: Option<RoomType>,
    ) -> Result<Vec<Room>, EngineError> {
        let stay = stay_span(check_in, check_out)?;
        validate_span(&stay, MAX_QUERY_WINDOW_MS)?;
        let mut rooms = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            if room_type.is_some_and(|t| t != guard.room.room_type) {
                continue;
            }
            if is_bookable(&guard, &stay) {
                rooms.push(guard.room.clone());
            }
        }
        rooms.sort_by(|a, b| {
            a.price
                .total_cmp(&b.price)
                .then_with(|| a.number.cmp(&b.number))
        });
        Ok(rooms)
    }

    /// Gaps in `[from, to)` where the room holds no active booking.
    pub async fn free_windows(&self, room_id: Ulid, from: Ms, to: Ms) -> Result<Vec<Span>, EngineError> {
        let rs = self.room_state_or_not_found(room_id)?;
        if to <= from {
            return Err(EngineError::InvalidRange("window end must be after its start"));
        }
        let query = Span::new(from, to);
        validate_span(&query, MAX_QUERY_WINDOW_MS)?;
        let guard = rs.read().await;
        Ok(free_windows(&guard, &query))
    }
}
