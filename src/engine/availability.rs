use crate::model::*;

use super::conflict::find_conflict;

// ── Availability Algorithm ────────────────────────────────────────

/// Can `rs` take a new stay over `stay`? Only active bookings block, and a
/// stay that starts exactly when another ends does not overlap it.
/// Room status is not consulted here; callers apply their own status rule.
pub fn availability(rs: &RoomState, stay: &Span) -> Availability {
    let conflict = find_conflict(rs, stay, None).map(|b| ConflictInfo {
        booking_id: b.id,
        stay: b.stay,
    });
    Availability {
        room_id: rs.room.id,
        available: conflict.is_none(),
        conflict,
    }
}

/// Listed as available: status `available` and no active booking in the way.
pub fn is_bookable(rs: &RoomState, stay: &Span) -> bool {
    rs.room.status == RoomStatus::Available && find_conflict(rs, stay, None).is_none()
}

/// Gaps inside `query` not held by any active booking, sorted.
pub fn free_windows(rs: &RoomState, query: &Span) -> Vec<Span> {
    let mut held: Vec<Span> = rs
        .overlapping(query)
        .filter(|b| b.is_active())
        .map(|b| b.stay)
        .collect();
    held.sort_by_key(|s| s.start);
    let held = merge_overlapping(&held);
    subtract_intervals(&[*query], &held)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const D: Ms = DAY_MS;

    fn room(status: RoomStatus) -> RoomState {
        RoomState::new(Room {
            id: Ulid::new(),
            number: "201".into(),
            room_type: RoomType::Double,
            price: 150.0,
            status,
            capacity: 2,
            amenities: vec![],
            created_at: 0,
            updated_at: 0,
        })
    }

    fn with_booking(rs: &mut RoomState, start: Ms, end: Ms, status: BookingStatus) -> Ulid {
        let id = Ulid::new();
        rs.insert_booking(Booking {
            id,
            guest_id: Ulid::new(),
            room_id: rs.room.id,
            stay: Span::new(start, end),
            status,
            total_price: 0.0,
            notes: None,
            created_at: 0,
            updated_at: 0,
        });
        id
    }

    #[test]
    fn empty_room_is_available() {
        let rs = room(RoomStatus::Available);
        let a = availability(&rs, &Span::new(D, 3 * D));
        assert!(a.available);
        assert!(a.conflict.is_none());
        assert_eq!(a.room_id, rs.room.id);
    }

    #[test]
    fn overlap_reports_conflicting_interval() {
        let mut rs = room(RoomStatus::Available);
        let id = with_booking(&mut rs, D, 5 * D, BookingStatus::Confirmed);
        let a = availability(&rs, &Span::new(3 * D, 6 * D));
        assert!(!a.available);
        assert_eq!(
            a.conflict,
            Some(ConflictInfo {
                booking_id: id,
                stay: Span::new(D, 5 * D)
            })
        );
    }

    #[test]
    fn touching_endpoints_do_not_conflict() {
        let mut rs = room(RoomStatus::Available);
        with_booking(&mut rs, D, 3 * D, BookingStatus::Pending);
        assert!(availability(&rs, &Span::new(3 * D, 5 * D)).available);
        assert!(availability(&rs, &Span::new(0, D)).available);
    }

    #[test]
    fn inactive_bookings_never_conflict() {
        let mut rs = room(RoomStatus::Available);
        with_booking(&mut rs, D, 5 * D, BookingStatus::CheckedOut);
        with_booking(&mut rs, 2 * D, 4 * D, BookingStatus::Cancelled);
        assert!(availability(&rs, &Span::new(D, 5 * D)).available);
    }

    #[test]
    fn earliest_conflict_reported_first() {
        let mut rs = room(RoomStatus::Available);
        with_booking(&mut rs, 4 * D, 6 * D, BookingStatus::Pending);
        let first = with_booking(&mut rs, D, 3 * D, BookingStatus::CheckedIn);
        let a = availability(&rs, &Span::new(0, 10 * D));
        assert_eq!(a.conflict.map(|c| c.booking_id), Some(first));
    }

    #[test]
    fn cancelled_booking_skipped_in_favour_of_active() {
        let mut rs = room(RoomStatus::Available);
        with_booking(&mut rs, D, 3 * D, BookingStatus::Cancelled);
        let active = with_booking(&mut rs, 2 * D, 4 * D, BookingStatus::Pending);
        let a = availability(&rs, &Span::new(D, 4 * D));
        assert_eq!(a.conflict.map(|c| c.booking_id), Some(active));
    }

    #[test]
    fn bookable_requires_available_status() {
        let maintenance = room(RoomStatus::Maintenance);
        let occupied = room(RoomStatus::Occupied);
        let free = room(RoomStatus::Available);
        let stay = Span::new(D, 2 * D);
        assert!(!is_bookable(&maintenance, &stay));
        assert!(!is_bookable(&occupied, &stay));
        assert!(is_bookable(&free, &stay));
    }

    #[test]
    fn free_windows_between_bookings() {
        let mut rs = room(RoomStatus::Available);
        with_booking(&mut rs, 2 * D, 4 * D, BookingStatus::Confirmed);
        with_booking(&mut rs, 4 * D, 5 * D, BookingStatus::Pending);
        with_booking(&mut rs, 7 * D, 8 * D, BookingStatus::Cancelled);
        let free = free_windows(&rs, &Span::new(0, 10 * D));
        assert_eq!(free, vec![Span::new(0, 2 * D), Span::new(5 * D, 10 * D)]);
    }

    #[test]
    fn free_windows_fully_booked() {
        let mut rs = room(RoomStatus::Available);
        with_booking(&mut rs, 0, 10 * D, BookingStatus::CheckedIn);
        assert!(free_windows(&rs, &Span::new(D, 2 * D)).is_empty());
    }

    #[test]
    fn merge_and_subtract() {
        let merged = merge_overlapping(&[Span::new(0, 10), Span::new(5, 15), Span::new(15, 20), Span::new(30, 40)]);
        assert_eq!(merged, vec![Span::new(0, 20), Span::new(30, 40)]);

        let left = subtract_intervals(&[Span::new(0, 100)], &[Span::new(10, 20), Span::new(50, 60)]);
        assert_eq!(left, vec![Span::new(0, 10), Span::new(20, 50), Span::new(60, 100)]);

        assert!(subtract_intervals(&[], &[Span::new(0, 10)]).is_empty());
        assert_eq!(subtract_intervals(&[Span::new(0, 10)], &[]), vec![Span::new(0, 10)]);
    }
}
