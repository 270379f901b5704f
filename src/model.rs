use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// One calendar day in milliseconds. Nights are counted in these units.
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`. For a stay, `start` is check-in and
/// `end` is check-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Nights charged for this stay: partial days round up, so 25 hours is 2 nights.
    pub fn nights(&self) -> i64 {
        let d = self.duration_ms();
        d / DAY_MS + i64::from(d % DAY_MS != 0)
    }
}

// ── Enumerations ─────────────────────────────────────────────────

/// Returned when a status or type string is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            /// Case-insensitive, surrounding whitespace ignored.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomType {
    Single,
    Double,
    Suite,
    Deluxe,
}

string_enum!(RoomType, "room type", {
    Single => "single",
    Double => "double",
    Suite => "suite",
    Deluxe => "deluxe",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    #[default]
    Available,
    Occupied,
    Maintenance,
}

string_enum!(RoomStatus, "room status", {
    Available => "available",
    Occupied => "occupied",
    Maintenance => "maintenance",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

string_enum!(BookingStatus, "booking status", {
    Pending => "pending",
    Confirmed => "confirmed",
    CheckedIn => "checked-in",
    CheckedOut => "checked-out",
    Cancelled => "cancelled",
});

impl BookingStatus {
    /// Active bookings hold their room for `[check_in, check_out)`.
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed | Self::CheckedIn)
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::CheckedOut | Self::Cancelled)
    }

    /// pending → confirmed → checked-in → checked-out, and any active
    /// status → cancelled. Terminal statuses go nowhere.
    pub const fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Confirmed, Self::CheckedIn)
                | (Self::CheckedIn, Self::CheckedOut)
                | (Self::Pending | Self::Confirmed | Self::CheckedIn, Self::Cancelled)
        )
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub number: String,
    pub room_type: RoomType,
    pub price: f64,
    pub status: RoomStatus,
    pub capacity: u32,
    pub amenities: Vec<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: Option<String>,
    pub id_number: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub guest_id: Ulid,
    pub room_id: Ulid,
    pub stay: Span,
    pub status: BookingStatus,
    pub total_price: f64,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// A room together with every booking ever made on it, sorted by check-in.
/// One of these sits behind each room's lock.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by check-in.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.stay.start, |b| b.stay.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings (any status) whose stay overlaps the query window.
    /// Uses binary search to skip bookings checking in at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.end > query.start)
    }

    pub fn active_booking_count(&self) -> usize {
        self.bookings.iter().filter(|b| b.is_active()).count()
    }
}

// ── Inputs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NewRoom {
    pub id: Ulid,
    pub number: String,
    pub room_type: RoomType,
    pub price: f64,
    pub status: Option<RoomStatus>,
    pub capacity: Option<u32>,
    pub amenities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomPatch {
    pub number: Option<String>,
    pub room_type: Option<RoomType>,
    pub price: Option<f64>,
    pub status: Option<RoomStatus>,
    pub capacity: Option<u32>,
    pub amenities: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGuest {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: Option<String>,
    pub id_number: Option<String>,
}

/// `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<Option<String>>,
    pub id_number: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub guest_id: Ulid,
    pub room_id: Ulid,
    pub check_in: Ms,
    pub check_out: Ms,
    pub notes: Option<String>,
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub check_in: Option<Ms>,
    pub check_out: Option<Ms>,
    pub notes: Option<Option<String>>,
    pub status: Option<BookingStatus>,
}

impl BookingPatch {
    pub fn touches_dates(&self) -> bool {
        self.check_in.is_some() || self.check_out.is_some()
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types, flat with no nesting. This is the WAL record format.
/// Created/Updated events carry the full record so replay never has to
/// recompute derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated { room: Room },
    RoomUpdated { room: Room },
    RoomStatusChanged { id: Ulid, status: RoomStatus, at: Ms },
    RoomDeleted { id: Ulid },
    GuestCreated { guest: Guest },
    GuestUpdated { guest: Guest },
    GuestDeleted { id: Ulid },
    BookingCreated { booking: Booking },
    BookingUpdated { booking: Booking },
    BookingDeleted { id: Ulid, room_id: Ulid },
}

// ── Query types ──────────────────────────────────────────────────

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub pages: usize,
}

impl<T> Page<T> {
    /// Slice an already-sorted result set.
    pub fn from_sorted(all: Vec<T>, req: PageRequest) -> Self {
        let total = all.len();
        let page_size = req.page_size.max(1);
        let page = req.page.max(1);
        let pages = total.div_ceil(page_size);
        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Self {
            items,
            total,
            page,
            pages,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomFilter {
    pub status: Option<RoomStatus>,
    pub room_type: Option<RoomType>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub room_id: Option<Ulid>,
    pub guest_id: Option<Ulid>,
}

/// Answer to an availability query for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub room_id: Ulid,
    pub available: bool,
    /// The earliest-starting active booking overlapping the request.
    pub conflict: Option<ConflictInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictInfo {
    pub booking_id: Ulid,
    pub stay: Span,
}

/// A booking with the guest and room details a front desk wants to see.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingView {
    pub booking: Booking,
    /// `None` once the guest record has been deleted.
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub room_number: String,
    pub room_type: RoomType,
}

impl BookingView {
    pub fn new(booking: Booking, guest: Option<&Guest>, room: &Room) -> Self {
        Self {
            guest_name: guest.map(|g| g.name.clone()),
            guest_email: guest.map(|g| g.email.clone()),
            room_number: room.number.clone(),
            room_type: room.room_type,
            booking,
        }
    }

    pub fn nights(&self) -> i64 {
        self.booking.stay.nights()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            guest_id: Ulid::new(),
            room_id: Ulid::new(),
            stay: Span::new(start, end),
            status,
            total_price: 0.0,
            notes: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn room() -> Room {
        Room {
            id: Ulid::new(),
            number: "101".into(),
            room_type: RoomType::Single,
            price: 100.0,
            status: RoomStatus::Available,
            capacity: 1,
            amenities: vec![],
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn nights_round_up() {
        assert_eq!(Span::new(0, 3 * DAY_MS).nights(), 3);
        assert_eq!(Span::new(0, DAY_MS + 3_600_000).nights(), 2); // 25 hours
        assert_eq!(Span::new(0, 1).nights(), 1);
    }

    #[test]
    fn status_strings() {
        assert_eq!(BookingStatus::CheckedIn.as_str(), "checked-in");
        assert_eq!(" Checked-Out ".parse::<BookingStatus>().unwrap(), BookingStatus::CheckedOut);
        assert_eq!("SUITE".parse::<RoomType>().unwrap(), RoomType::Suite);
        assert_eq!("maintenance".parse::<RoomStatus>().unwrap(), RoomStatus::Maintenance);
        let err = "penthouse".parse::<RoomType>().unwrap_err();
        assert_eq!(err.kind, "room type");
    }

    #[test]
    fn transition_graph() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(CheckedIn));
        assert!(CheckedIn.can_transition_to(CheckedOut));
        for s in [Pending, Confirmed, CheckedIn] {
            assert!(s.can_transition_to(Cancelled));
        }
        assert!(!Pending.can_transition_to(CheckedOut));
        assert!(!Confirmed.can_transition_to(Pending));
        for terminal in [CheckedOut, Cancelled] {
            for next in [Pending, Confirmed, CheckedIn, CheckedOut, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn active_statuses() {
        use BookingStatus::*;
        assert!(Pending.is_active() && Confirmed.is_active() && CheckedIn.is_active());
        assert!(!CheckedOut.is_active() && !Cancelled.is_active());
    }

    #[test]
    fn bookings_kept_sorted() {
        let mut rs = RoomState::new(room());
        rs.insert_booking(booking(300, 400, BookingStatus::Pending));
        rs.insert_booking(booking(100, 200, BookingStatus::Pending));
        rs.insert_booking(booking(200, 300, BookingStatus::Cancelled));
        let starts: Vec<Ms> = rs.bookings.iter().map(|b| b.stay.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
        assert_eq!(rs.active_booking_count(), 2);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = RoomState::new(room());
        rs.insert_booking(booking(100, 200, BookingStatus::Pending));
        rs.insert_booking(booking(450, 600, BookingStatus::Pending));
        rs.insert_booking(booking(1000, 1100, BookingStatus::Pending));

        let hits: Vec<_> = rs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].stay, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = RoomState::new(room());
        rs.insert_booking(booking(100, 200, BookingStatus::Confirmed));
        assert_eq!(rs.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(rs.overlapping(&Span::new(0, 100)).count(), 0);
    }

    #[test]
    fn remove_booking_by_id() {
        let mut rs = RoomState::new(room());
        let b = booking(100, 200, BookingStatus::Pending);
        let id = b.id;
        rs.insert_booking(b);
        assert!(rs.remove_booking(Ulid::new()).is_none());
        assert_eq!(rs.remove_booking(id).map(|b| b.id), Some(id));
        assert!(rs.bookings.is_empty());
    }

    #[test]
    fn page_slicing() {
        let all: Vec<u32> = (0..25).collect();
        let p = Page::from_sorted(all.clone(), PageRequest { page: 3, page_size: 10 });
        assert_eq!(p.items, vec![20, 21, 22, 23, 24]);
        assert_eq!(p.total, 25);
        assert_eq!(p.pages, 3);

        let beyond = Page::from_sorted(all, PageRequest { page: 9, page_size: 10 });
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.page, 9);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RoomCreated { room: room() };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
