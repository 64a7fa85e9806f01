use std::path::{Path, PathBuf};

use crate::error::{ContractError, Result};

pub const SLOT_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSlot {
    index: usize,
    path: Option<PathBuf>,
}

impl ImageSlot {
    fn empty(index: usize) -> Self {
        Self { index, path: None }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based number shown to users and used in "Image N" prompt references.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_occupied(&self) -> bool {
        self.path.is_some()
    }
}

/// Fixed set of input-image slots for one app session.
///
/// Slots keep their index for their whole life: removing slot 1 leaves slots
/// 0, 2 and 3 where they were, and the next add reuses the lowest free index.
/// Paths are not validated here; callers check existence before adding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSession {
    slots: [ImageSlot; SLOT_COUNT],
}

impl Default for SlotSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotSession {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(ImageSlot::empty),
        }
    }

    /// Fills the first empty slot (scanning 0 to 3). Returns false and leaves
    /// the session untouched when every slot is occupied.
    pub fn add_to_next_available(&mut self, path: impl Into<PathBuf>) -> bool {
        self.try_add_to_next_available(path).is_ok()
    }

    pub fn try_add_to_next_available(&mut self, path: impl Into<PathBuf>) -> Result<usize> {
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.path.is_none()) else {
            return Err(ContractError::SlotFull {
                capacity: SLOT_COUNT,
            });
        };
        slot.path = Some(path.into());
        Ok(slot.index)
    }

    /// Clears one slot and returns what it held. Out-of-range indices are a no-op.
    pub fn remove_at(&mut self, index: usize) -> Option<PathBuf> {
        self.slots.get_mut(index).and_then(|slot| slot.path.take())
    }

    /// Overwrites a slot regardless of occupancy. This is the hook for
    /// caller-side overflow policies such as "replace slot 0 when full".
    pub fn replace_at(&mut self, index: usize, path: impl Into<PathBuf>) -> Result<Option<PathBuf>> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(ContractError::SlotIndexOutOfRange {
                index,
                capacity: SLOT_COUNT,
            })?;
        Ok(slot.path.replace(path.into()))
    }

    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            slot.path = None;
        }
    }

    /// Occupied paths in ascending slot order. The order decides both the
    /// "Image N" references in a multi-image prompt and attachment order.
    pub fn active_paths(&self) -> Vec<PathBuf> {
        self.active_slots()
            .filter_map(|slot| slot.path.clone())
            .collect()
    }

    pub fn active_slots(&self) -> impl Iterator<Item = &ImageSlot> {
        self.slots.iter().filter(|slot| slot.is_occupied())
    }

    pub fn count(&self) -> usize {
        self.active_slots().count()
    }

    pub fn is_full(&self) -> bool {
        self.count() == SLOT_COUNT
    }

    pub fn slots(&self) -> &[ImageSlot] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.slots.get(index).and_then(ImageSlot::path)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{SlotSession, SLOT_COUNT};
    use crate::error::ContractError;

    fn full_session() -> SlotSession {
        let mut session = SlotSession::new();
        for name in ["a.png", "b.png", "c.png", "d.png"] {
            assert!(session.add_to_next_available(name));
        }
        session
    }

    #[test]
    fn add_fills_lowest_free_index() {
        let mut session = SlotSession::new();
        assert!(session.add_to_next_available("a.png"));
        assert!(session.add_to_next_available("b.png"));
        assert_eq!(session.get(0), Some(PathBuf::from("a.png").as_path()));
        assert_eq!(session.get(1), Some(PathBuf::from("b.png").as_path()));
        assert_eq!(session.count(), 2);
    }

    #[test]
    fn add_on_full_session_is_rejected_and_leaves_slots_unchanged() {
        let mut session = full_session();
        let before = session.clone();

        assert!(!session.add_to_next_available("e.png"));
        assert_eq!(session, before);
        assert!(matches!(
            session.try_add_to_next_available("e.png"),
            Err(ContractError::SlotFull { capacity: SLOT_COUNT })
        ));
        assert_eq!(session, before);
    }

    #[test]
    fn removed_index_is_reused_by_next_add() {
        let mut session = full_session();
        assert_eq!(session.remove_at(1), Some(PathBuf::from("b.png")));
        assert_eq!(session.count(), 3);
        assert_eq!(session.get(2), Some(PathBuf::from("c.png").as_path()));

        assert!(session.add_to_next_available("p.png"));
        assert_eq!(session.get(1), Some(PathBuf::from("p.png").as_path()));

        let slot = &session.slots()[1];
        assert_eq!((slot.index(), slot.number()), (1, 2));
        assert!(session.is_full());
    }

    #[test]
    fn remove_out_of_range_is_noop() {
        let mut session = full_session();
        assert_eq!(session.remove_at(SLOT_COUNT), None);
        assert_eq!(session.count(), SLOT_COUNT);
    }

    #[test]
    fn active_paths_follow_slot_order_not_fill_order() -> anyhow::Result<()> {
        let mut session = SlotSession::new();
        session.replace_at(2, "two.png")?;
        session.replace_at(0, "zero.png")?;

        assert_eq!(
            session.active_paths(),
            vec![PathBuf::from("zero.png"), PathBuf::from("two.png")]
        );
        let numbers: Vec<usize> = session.active_slots().map(|slot| slot.number()).collect();
        assert_eq!(numbers, vec![1, 3]);
        Ok(())
    }

    #[test]
    fn replace_at_rejects_out_of_range() {
        let mut session = SlotSession::new();
        assert!(matches!(
            session.replace_at(4, "x.png"),
            Err(ContractError::SlotIndexOutOfRange { index: 4, .. })
        ));
    }

    #[test]
    fn clear_all_empties_every_slot() {
        let mut session = full_session();
        session.clear_all();
        assert_eq!(session.count(), 0);
        assert!(session.active_paths().is_empty());
        assert!(session.add_to_next_available("again.png"));
        assert_eq!(session.get(0), Some(PathBuf::from("again.png").as_path()));
    }
}
