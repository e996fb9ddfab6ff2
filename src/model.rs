use serde::{Deserialize, Serialize};

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Document key inside the booking collection.
pub type DocId = String;

/// The persisted booking document. Serializes to the shared storage shape
/// `{ id, room, date, slot, courseCode, bookedBy, notes, userId, createdAt }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: DocId,
    pub room: String,
    pub date: String,
    pub slot: String,
    pub course_code: String,
    pub booked_by: String,
    pub notes: String,
    pub user_id: String,
    /// Assigned by the store at commit time.
    pub created_at: Ms,
}

impl Booking {
    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(&self.date, &self.room)
    }
}

/// A booking as staged inside a transaction: everything except the fields the
/// store fills in on commit (`id` comes from the document key, `createdAt`
/// from the server clock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub room: String,
    pub date: String,
    pub slot: String,
    pub course_code: String,
    pub booked_by: String,
    pub notes: String,
    pub user_id: String,
}

impl NewBooking {
    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(&self.date, &self.room)
    }

    pub(crate) fn into_booking(self, id: DocId, created_at: Ms) -> Booking {
        Booking {
            id,
            room: self.room,
            date: self.date,
            slot: self.slot,
            course_code: self.course_code,
            booked_by: self.booked_by,
            notes: self.notes,
            user_id: self.user_id,
            created_at,
        }
    }
}

/// Equality filter `date == date AND room == room`. Watches and queries are
/// scoped to one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub date: String,
    pub room: String,
}

impl PartitionKey {
    pub fn new(date: &str, room: &str) -> Self {
        Self {
            date: date.to_string(),
            room: room.to_string(),
        }
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.date, self.room)
    }
}

/// Current contents of one document slot. `version` 0 means never written;
/// a deleted document keeps its last version with `booking == None`.
#[derive(Debug, Clone, Default)]
pub struct DocumentSlot {
    pub version: u64,
    pub booking: Option<Booking>,
}

/// One document as seen by a query, tombstones included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedDocument {
    pub id: DocId,
    pub version: u64,
    pub booking: Option<Booking>,
}

/// The event types, flat with no nesting. This is the WAL record format and the
/// change notification pushed to watchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    DocumentWritten {
        id: DocId,
        version: u64,
        booking: Booking,
    },
    DocumentDeleted {
        id: DocId,
        version: u64,
        partition: PartitionKey,
    },
}

impl Event {
    pub fn doc_id(&self) -> &str {
        match self {
            Event::DocumentWritten { id, .. } | Event::DocumentDeleted { id, .. } => id,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Event::DocumentWritten { version, .. } | Event::DocumentDeleted { version, .. } => {
                *version
            }
        }
    }

    pub fn partition(&self) -> PartitionKey {
        match self {
            Event::DocumentWritten { booking, .. } => booking.partition(),
            Event::DocumentDeleted { partition, .. } => partition.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Booking {
        Booking {
            id: "2024-05-01_E101_07_00_-_09_00".into(),
            room: "E101".into(),
            date: "2024-05-01".into(),
            slot: "07:00 - 09:00".into(),
            course_code: "PSYC 201".into(),
            booked_by: "John".into(),
            notes: String::new(),
            user_id: "u-1".into(),
            created_at: 1_714_550_400_000,
        }
    }

    #[test]
    fn booking_json_uses_storage_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "bookedBy",
                "courseCode",
                "createdAt",
                "date",
                "id",
                "notes",
                "room",
                "slot",
                "userId"
            ]
        );
        assert_eq!(obj["courseCode"], "PSYC 201");
        assert_eq!(obj["createdAt"], 1_714_550_400_000_i64);
    }

    #[test]
    fn booking_json_accepts_external_documents() {
        let raw = r#"{
            "id": "2024-05-01_F102_09_00_-_11_00",
            "room": "F102",
            "date": "2024-05-01",
            "slot": "09:00 - 11:00",
            "courseCode": "COMM 101",
            "bookedBy": "Sarah",
            "notes": "bring projector",
            "userId": "u-2",
            "createdAt": 5
        }"#;
        let booking: Booking = serde_json::from_str(raw).unwrap();
        assert_eq!(booking.room, "F102");
        assert_eq!(booking.notes, "bring projector");
        assert_eq!(booking.partition(), PartitionKey::new("2024-05-01", "F102"));
    }

    #[test]
    fn event_accessors() {
        let b = sample();
        let written = Event::DocumentWritten {
            id: b.id.clone(),
            version: 3,
            booking: b.clone(),
        };
        assert_eq!(written.doc_id(), b.id);
        assert_eq!(written.version(), 3);
        assert_eq!(written.partition(), b.partition());

        let deleted = Event::DocumentDeleted {
            id: b.id.clone(),
            version: 4,
            partition: b.partition(),
        };
        assert_eq!(deleted.version(), 4);
        assert_eq!(deleted.partition().to_string(), "2024-05-01/E101");
    }
}
