use crate::limits::*;
use crate::model::*;

use super::StoreError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

pub(crate) fn validate_doc_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::invalid_argument("empty document id"));
    }
    if id.len() > MAX_DOC_ID_LEN {
        return Err(StoreError::invalid_argument("document id too long"));
    }
    if id.contains('/') {
        return Err(StoreError::invalid_argument("document id may not contain '/'"));
    }
    Ok(())
}

/// Shape checks the store enforces regardless of who writes.
fn validate_new_booking(new: &NewBooking) -> Result<(), StoreError> {
    let required = [
        ("room", &new.room),
        ("date", &new.date),
        ("slot", &new.slot),
        ("courseCode", &new.course_code),
        ("bookedBy", &new.booked_by),
        ("userId", &new.user_id),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(StoreError::invalid_argument(&format!("{field} is required")));
        }
    }
    if new.course_code.len() > MAX_COURSE_CODE_LEN
        || new.booked_by.len() > MAX_BOOKED_BY_LEN
        || new.notes.len() > MAX_NOTES_LEN
        || new.user_id.len() > MAX_USER_ID_LEN
    {
        return Err(StoreError::invalid_argument("field too long"));
    }
    Ok(())
}

/// Access rule for a write: only creation is allowed, and only for the
/// authenticated user's own `userId`.
pub(crate) fn check_create(
    existing: Option<&Booking>,
    new: &NewBooking,
    auth_uid: &str,
) -> Result<(), StoreError> {
    if existing.is_some() {
        return Err(StoreError::permission_denied("bookings cannot be updated"));
    }
    if auth_uid.is_empty() || new.user_id != auth_uid {
        return Err(StoreError::permission_denied(
            "userId must match the authenticated user",
        ));
    }
    validate_new_booking(new)
}

/// Access rule for a delete: only the booking's creator.
pub(crate) fn check_delete(existing: &Booking, auth_uid: &str) -> Result<(), StoreError> {
    if auth_uid.is_empty() || existing.user_id != auth_uid {
        return Err(StoreError::permission_denied(
            "only the creator may cancel a booking",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ErrorCode;

    fn new_booking(user: &str) -> NewBooking {
        NewBooking {
            room: "E101".into(),
            date: "2024-05-01".into(),
            slot: "07:00 - 09:00".into(),
            course_code: "COMM 101".into(),
            booked_by: "Sarah".into(),
            notes: String::new(),
            user_id: user.into(),
        }
    }

    #[test]
    fn create_requires_matching_uid() {
        assert!(check_create(None, &new_booking("u1"), "u1").is_ok());
        let err = check_create(None, &new_booking("u1"), "u2").unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
        let err = check_create(None, &new_booking(""), "").unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
    }

    #[test]
    fn create_over_existing_is_denied() {
        let existing = new_booking("u1").into_booking("x".into(), 1);
        let err = check_create(Some(&existing), &new_booking("u1"), "u1").unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
    }

    #[test]
    fn create_rejects_blank_and_oversized_fields() {
        let mut blank = new_booking("u1");
        blank.course_code = "   ".into();
        let err = check_create(None, &blank, "u1").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert!(err.message.contains("courseCode"));

        let mut long = new_booking("u1");
        long.notes = "n".repeat(MAX_NOTES_LEN + 1);
        let err = check_create(None, &long, "u1").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn delete_only_by_creator() {
        let existing = new_booking("u1").into_booking("x".into(), 1);
        assert!(check_delete(&existing, "u1").is_ok());
        assert_eq!(
            check_delete(&existing, "u2").unwrap_err().code,
            ErrorCode::PermissionDenied
        );
        assert_eq!(
            check_delete(&existing, "").unwrap_err().code,
            ErrorCode::PermissionDenied
        );
    }

    #[test]
    fn doc_id_validation() {
        assert!(validate_doc_id("2024-05-01_E101_07_00_-_09_00").is_ok());
        assert!(validate_doc_id("").is_err());
        assert!(validate_doc_id("a/b").is_err());
        assert!(validate_doc_id(&"x".repeat(MAX_DOC_ID_LEN + 1)).is_err());
    }
}
