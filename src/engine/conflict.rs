use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Build a stay from raw timestamps. `check_out` must be strictly after `check_in`.
pub(crate) fn stay_span(check_in: Ms, check_out: Ms) -> Result<Span, EngineError> {
    if check_out <= check_in {
        return Err(EngineError::InvalidRange(
            "check-out date must be after check-in date",
        ));
    }
    Ok(Span::new(check_in, check_out))
}

pub(crate) fn validate_span(span: &Span, max_width: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > max_width {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

/// First active booking (earliest check-in) overlapping `span`, ignoring `exclude`.
pub(crate) fn find_conflict<'a>(
    rs: &'a RoomState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<&'a Booking> {
    rs.overlapping(span)
        .find(|b| b.is_active() && Some(b.id) != exclude)
}

pub(crate) fn check_no_conflict(
    rs: &RoomState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(rs, span, exclude) {
        Some(b) => Err(EngineError::Conflict {
            booking_id: b.id,
            stay: b.stay,
        }),
        None => Ok(()),
    }
}

/// `ceil(days) × nightly price`.
pub(crate) fn total_price(stay: &Span, price: f64) -> f64 {
    stay.nights() as f64 * price
}
