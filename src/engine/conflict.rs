use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub fn validate_span(span: &Span) -> Result<(), EngineError> {
    if !span.is_well_formed() {
        return Err(EngineError::InvalidSpan(*span));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SLOT_DURATION_MS {
        return Err(EngineError::LimitExceeded("time slot too long"));
    }
    Ok(())
}

pub fn validate_room_fields(name: &str, description: Option<&str>) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::LimitExceeded("room name must not be empty"));
    }
    if name.len() > MAX_ROOM_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if description.is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(EngineError::LimitExceeded("room description too long"));
    }
    Ok(())
}

/// First existing slot of the room that overlaps `span`.
pub(crate) fn find_overlap<'a>(rs: &'a RoomState, span: &Span) -> Option<&'a TimeSlot> {
    rs.overlapping(span).next()
}

/// First overlapping pair within a batch of spans.
///
/// After sorting by start, any overlap implies an overlap between neighbours, so a
/// single linear pass suffices.
pub fn find_batch_overlap(spans: &[Span]) -> Option<(Span, Span)> {
    let mut sorted = spans.to_vec();
    sorted.sort_by_key(|s| (s.start, s.end));
    sorted
        .windows(2)
        .find(|w| w[0].overlaps(&w[1]))
        .map(|w| (w[0], w[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Ms = 1_800_000_000_000;

    #[test]
    fn batch_overlap_detects_non_adjacent_input_order() {
        let spans = [
            Span::new(T0 + 200, T0 + 300),
            Span::new(T0, T0 + 100),
            Span::new(T0 + 250, T0 + 400),
        ];
        let (a, b) = find_batch_overlap(&spans).unwrap();
        assert_eq!(a, Span::new(T0 + 200, T0 + 300));
        assert_eq!(b, Span::new(T0 + 250, T0 + 400));
    }

    #[test]
    fn batch_touching_spans_are_fine() {
        let spans = [
            Span::new(T0 + 100, T0 + 200),
            Span::new(T0, T0 + 100),
            Span::new(T0 + 200, T0 + 300),
        ];
        assert!(find_batch_overlap(&spans).is_none());
        assert!(find_batch_overlap(&[]).is_none());
    }

    #[test]
    fn batch_identical_spans_overlap() {
        let s = Span::new(T0, T0 + 60_000);
        assert!(find_batch_overlap(&[s, s]).is_some());
    }

    #[test]
    fn span_validation() {
        assert!(validate_span(&Span::new(T0, T0 + 1)).is_ok());
        assert!(matches!(
            validate_span(&Span::new(T0, T0)),
            Err(EngineError::InvalidSpan(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(T0 + 5, T0)),
            Err(EngineError::InvalidSpan(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(0, 10)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(T0, T0 + MAX_SLOT_DURATION_MS + 1)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn room_field_validation() {
        assert!(validate_room_fields("Attic", None).is_ok());
        assert!(validate_room_fields("  ", None).is_err());
        assert!(validate_room_fields(&"x".repeat(MAX_ROOM_NAME_LEN + 1), None).is_err());
        let long = "d".repeat(MAX_DESCRIPTION_LEN + 1);
        assert!(validate_room_fields("Attic", Some(&long)).is_err());
    }
}
