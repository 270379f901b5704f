//! Field-level checks applied before anything reaches the WAL.
//!
//! Strings are trimmed, emails lower-cased, and empty optional strings
//! collapse to `None`.

use crate::limits::*;
use crate::model::*;

use super::EngineError;

fn required(field: &'static str, value: &str, max_len: usize) -> Result<String, EngineError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(EngineError::validation(field, "is required"));
    }
    if v.len() > max_len {
        return Err(EngineError::LimitExceeded(field_too_long(field)));
    }
    Ok(v.to_string())
}

fn optional(
    field: &'static str,
    value: Option<&str>,
    max_len: usize,
) -> Result<Option<String>, EngineError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.len() > max_len => Err(EngineError::LimitExceeded(field_too_long(field))),
        Some(v) => Ok(Some(v.to_string())),
    }
}

fn field_too_long(field: &'static str) -> &'static str {
    match field {
        "number" => "room number too long",
        "name" => "name too long",
        "email" => "email too long",
        "phone" => "phone too long",
        "notes" => "notes too long",
        _ => "field too long",
    }
}

pub(crate) fn room_number(value: &str) -> Result<String, EngineError> {
    required("number", value, MAX_ROOM_NUMBER_LEN)
}

pub(crate) fn price(value: f64) -> Result<f64, EngineError> {
    if !value.is_finite() {
        return Err(EngineError::validation("price", "must be a finite number"));
    }
    if value < 0.0 {
        return Err(EngineError::validation("price", "cannot be negative"));
    }
    Ok(value)
}

pub(crate) fn capacity(value: u32) -> Result<u32, EngineError> {
    if value < 1 {
        return Err(EngineError::validation("capacity", "must be at least 1"));
    }
    Ok(value)
}

pub(crate) fn amenities(values: Vec<String>) -> Result<Vec<String>, EngineError> {
    if values.len() > MAX_AMENITIES {
        return Err(EngineError::LimitExceeded("too many amenities"));
    }
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        let v = v.trim();
        if v.is_empty() {
            continue;
        }
        if v.len() > MAX_AMENITY_LEN {
            return Err(EngineError::LimitExceeded("amenity too long"));
        }
        out.push(v.to_string());
    }
    Ok(out)
}

pub(crate) fn guest_name(value: &str) -> Result<String, EngineError> {
    required("name", value, MAX_NAME_LEN)
}

pub(crate) fn phone(value: &str) -> Result<String, EngineError> {
    required("phone", value, MAX_PHONE_LEN)
}

pub(crate) fn address(value: Option<&str>) -> Result<Option<String>, EngineError> {
    optional("address", value, MAX_NAME_LEN)
}

pub(crate) fn id_number(value: Option<&str>) -> Result<Option<String>, EngineError> {
    optional("id_number", value, MAX_NAME_LEN)
}

pub(crate) fn notes(value: Option<&str>) -> Result<Option<String>, EngineError> {
    optional("notes", value, MAX_NOTES_LEN)
}

/// Trimmed, lower-cased, and shaped like `^\S+@\S+\.\S+$`.
pub(crate) fn email(value: &str) -> Result<String, EngineError> {
    let v = required("email", value, MAX_EMAIL_LEN)?.to_lowercase();
    if !looks_like_email(&v) {
        return Err(EngineError::validation("email", "please provide a valid email"));
    }
    Ok(v)
}

fn looks_like_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    // Some '@' with at least one char before it, then a '.' with at least
    // one char on either side somewhere after it.
    s.char_indices().filter(|&(_, c)| c == '@').any(|(at, _)| {
        if at == 0 {
            return false;
        }
        let domain = &s[at + 1..];
        domain
            .char_indices()
            .any(|(dot, c)| c == '.' && dot >= 1 && dot + 1 < domain.len())
    })
}

pub(crate) fn new_room(input: NewRoom, now: Ms) -> Result<Room, EngineError> {
    Ok(Room {
        id: input.id,
        number: room_number(&input.number)?,
        room_type: input.room_type,
        price: price(input.price)?,
        status: input.status.unwrap_or_default(),
        capacity: capacity(input.capacity.unwrap_or(1))?,
        amenities: amenities(input.amenities)?,
        created_at: now,
        updated_at: now,
    })
}

pub(crate) fn patched_room(current: &Room, patch: RoomPatch, now: Ms) -> Result<Room, EngineError> {
    let mut room = current.clone();
    if let Some(n) = patch.number {
        room.number = room_number(&n)?;
    }
    if let Some(t) = patch.room_type {
        room.room_type = t;
    }
    if let Some(p) = patch.price {
        room.price = price(p)?;
    }
    if let Some(s) = patch.status {
        room.status = s;
    }
    if let Some(c) = patch.capacity {
        room.capacity = capacity(c)?;
    }
    if let Some(a) = patch.amenities {
        room.amenities = amenities(a)?;
    }
    room.updated_at = now;
    Ok(room)
}

pub(crate) fn new_guest(input: NewGuest, now: Ms) -> Result<Guest, EngineError> {
    Ok(Guest {
        id: input.id,
        name: guest_name(&input.name)?,
        email: email(&input.email)?,
        phone: phone(&input.phone)?,
        address: address(input.address.as_deref())?,
        id_number: id_number(input.id_number.as_deref())?,
        created_at: now,
        updated_at: now,
    })
}

pub(crate) fn patched_guest(current: &Guest, patch: GuestPatch, now: Ms) -> Result<Guest, EngineError> {
    let mut guest = current.clone();
    if let Some(n) = patch.name {
        guest.name = guest_name(&n)?;
    }
    if let Some(e) = patch.email {
        guest.email = email(&e)?;
    }
    if let Some(p) = patch.phone {
        guest.phone = phone(&p)?;
    }
    if let Some(a) = patch.address {
        guest.address = address(a.as_deref())?;
    }
    if let Some(i) = patch.id_number {
        guest.id_number = id_number(i.as_deref())?;
    }
    guest.updated_at = now;
    Ok(guest)
}
