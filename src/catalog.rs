/// A named group of rooms (a building block).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub rooms: Vec<String>,
}

/// Static room and time-slot reference data. Loaded once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    blocks: Vec<Block>,
    time_slots: Vec<String>,
}

const BLOCK_E: &[&str] = &[
    "E101", "E102", "E103", "E104", "E201", "E202", "E203", "E204", "E301", "E302", "E303", "E304",
];

const BLOCK_F: &[&str] = &[
    "F102", "F103", "F104", "F201", "F202", "F301", "F302", "F303", "F304", "F403", "F404",
];

const TIME_SLOTS: &[&str] = &[
    "07:00 - 09:00",
    "09:00 - 11:00",
    "11:00 - 13:00",
    "13:00 - 15:00",
    "15:00 - 17:00",
    "17:00 - 19:00",
];

impl Default for Catalog {
    fn default() -> Self {
        let block = |name: &str, rooms: &[&str]| Block {
            name: name.to_string(),
            rooms: rooms.iter().map(|r| r.to_string()).collect(),
        };
        Self::new(
            vec![block("Block E", BLOCK_E), block("Block F", BLOCK_F)],
            TIME_SLOTS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl Catalog {
    pub fn new(blocks: Vec<Block>, time_slots: Vec<String>) -> Self {
        Self { blocks, time_slots }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// All rooms in block order.
    pub fn rooms(&self) -> impl Iterator<Item = &str> {
        self.blocks
            .iter()
            .flat_map(|b| b.rooms.iter().map(String::as_str))
    }

    /// Daily slots in chronological order.
    pub fn time_slots(&self) -> &[String] {
        &self.time_slots
    }

    pub fn contains_room(&self, room: &str) -> bool {
        self.rooms().any(|r| r == room)
    }

    pub fn contains_slot(&self, slot: &str) -> bool {
        self.time_slots.iter().any(|s| s == slot)
    }

    pub fn slot_index(&self, slot: &str) -> Option<usize> {
        self.time_slots.iter().position(|s| s == slot)
    }

    pub fn block_of(&self, room: &str) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| b.rooms.iter().any(|r| r == room))
    }

    /// The room selected when nothing else has been chosen.
    pub fn first_room(&self) -> Option<&str> {
        self.rooms().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_shape() {
        let c = Catalog::default();
        assert_eq!(c.blocks().len(), 2);
        assert_eq!(c.rooms().count(), 23);
        assert_eq!(c.time_slots().len(), 6);
        assert_eq!(c.first_room(), Some("E101"));
    }

    #[test]
    fn lookups() {
        let c = Catalog::default();
        assert!(c.contains_room("F404"));
        assert!(!c.contains_room("F101"));
        assert!(c.contains_slot("13:00 - 15:00"));
        assert!(!c.contains_slot("13:00-15:00"));
        assert_eq!(c.slot_index("09:00 - 11:00"), Some(1));
        assert_eq!(c.block_of("F201").map(|b| b.name.as_str()), Some("Block F"));
        assert!(c.block_of("Z999").is_none());
    }
}
