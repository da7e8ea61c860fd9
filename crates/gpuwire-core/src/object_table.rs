//! Generation-checked object tables.
//!
//! A slot goes `vacant -> live -> vacant (generation + 1)`. An id resolves
//! only while its slot is live at exactly the id's generation, so a stale id
//! can never alias the slot's next occupant. A slot freed at generation
//! `u32::MAX` is retired rather than wrapped.

use gpuwire_protocol::ObjectId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("object index {index} is beyond the per-type limit of {max}")]
    IndexOutOfRange { index: u32, max: u32 },

    #[error("slot {index} is still live at generation {generation}")]
    SlotLive { index: u32, generation: u32 },

    #[error("id {id} is older than its slot's generation {current}")]
    StaleGeneration { id: ObjectId, current: u32 },

    #[error("slot {index} exhausted its generations and is retired")]
    Retired { index: u32 },

    #[error("object {id} not found")]
    NotFound { id: ObjectId },

    #[error("all {max} object slots are in use")]
    Exhausted { max: u32 },
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    data: Option<T>,
    retired: bool,
}

impl<T> Slot<T> {
    fn vacant() -> Self {
        Self {
            generation: 0,
            data: None,
            retired: false,
        }
    }
}

#[derive(Debug)]
pub struct ObjectTable<T> {
    slots: Vec<Slot<T>>,
    /// Freed indices available to [`ObjectTable::allocate`]; most recent last.
    free: Vec<u32>,
    recycle: bool,
    live: usize,
    max_objects: u32,
}

impl<T> ObjectTable<T> {
    /// A table that names its own objects and recycles freed slots.
    pub fn new(max_objects: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            recycle: true,
            live: 0,
            max_objects,
        }
    }

    /// A table whose ids are chosen by the peer through
    /// [`ObjectTable::allocate_at`]. Freed indices are not tracked.
    pub fn adopting(max_objects: u32) -> Self {
        Self {
            recycle: false,
            ..Self::new(max_objects)
        }
    }

    /// Picks an id for a new object, reusing the most recently freed slot.
    pub fn allocate(&mut self, data: T) -> Result<ObjectId, TableError> {
        while let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            if slot.data.is_some() || slot.retired {
                continue;
            }
            slot.data = Some(data);
            self.live += 1;
            return Ok(ObjectId::new(index, slot.generation));
        }

        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        if index >= self.max_objects {
            return Err(TableError::Exhausted {
                max: self.max_objects,
            });
        }
        self.slots.push(Slot {
            generation: 0,
            data: Some(data),
            retired: false,
        });
        self.live += 1;
        Ok(ObjectId::new(index, 0))
    }

    /// Adopts an id chosen by the peer.
    ///
    /// The table grows on demand up to the per-type limit. Fails if the slot
    /// is live or retired, or if `id` predates the slot's current generation.
    pub fn allocate_at(&mut self, id: ObjectId, data: T) -> Result<(), TableError> {
        if id.index >= self.max_objects {
            return Err(TableError::IndexOutOfRange {
                index: id.index,
                max: self.max_objects,
            });
        }
        let index = id.index as usize;
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, Slot::vacant);
        }

        let slot = &mut self.slots[index];
        if slot.retired {
            return Err(TableError::Retired { index: id.index });
        }
        if slot.data.is_some() {
            return Err(TableError::SlotLive {
                index: id.index,
                generation: slot.generation,
            });
        }
        if id.generation < slot.generation {
            return Err(TableError::StaleGeneration {
                id,
                current: slot.generation,
            });
        }

        slot.generation = id.generation;
        slot.data = Some(data);
        self.live += 1;
        Ok(())
    }

    /// Vacates the slot and bumps its generation.
    pub fn free(&mut self, id: ObjectId) -> Result<T, TableError> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation && s.data.is_some())
            .ok_or(TableError::NotFound { id })?;

        let data = slot.data.take().ok_or(TableError::NotFound { id })?;
        self.live -= 1;
        match slot.generation.checked_add(1) {
            Some(next) => {
                slot.generation = next;
                if self.recycle {
                    self.free.push(id.index);
                }
            }
            None => slot.retired = true,
        }
        Ok(data)
    }

    pub fn get(&self, id: ObjectId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.data.as_ref())
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.data.as_mut())
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.data
                .as_ref()
                .map(|data| (ObjectId::new(i as u32, s.generation), data))
        })
    }

    /// Ids of every live object.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Frees every live object, returning them in index order.
    pub fn drain(&mut self) -> Vec<(ObjectId, T)> {
        let ids = self.ids();
        ids.into_iter()
            .filter_map(|id| self.free(id).ok().map(|data| (id, data)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn freed_ids_stop_resolving_and_the_slot_is_reused() {
        let mut table = ObjectTable::new(16);
        let a = table.allocate("a").unwrap();
        assert_eq!(a, ObjectId::new(0, 0));

        assert_eq!(table.free(a).unwrap(), "a");
        let b = table.allocate("b").unwrap();
        assert_eq!(b, ObjectId::new(0, 1));

        assert_eq!(table.get(a), None);
        assert_eq!(table.get(b), Some(&"b"));
        assert_eq!(table.free(a), Err(TableError::NotFound { id: a }));
    }

    #[test]
    fn allocate_at_follows_the_peer() {
        let mut server = ObjectTable::adopting(8);
        server.allocate_at(ObjectId::new(3, 0), 30).unwrap();
        assert_eq!(server.len(), 1);
        assert_eq!(
            server.allocate_at(ObjectId::new(3, 0), 31),
            Err(TableError::SlotLive {
                index: 3,
                generation: 0,
            })
        );

        server.free(ObjectId::new(3, 0)).unwrap();
        assert_eq!(
            server.allocate_at(ObjectId::new(3, 0), 32),
            Err(TableError::StaleGeneration {
                id: ObjectId::new(3, 0),
                current: 1,
            })
        );
        server.allocate_at(ObjectId::new(3, 1), 33).unwrap();
        assert_eq!(server.get(ObjectId::new(3, 1)), Some(&33));

        assert_eq!(
            server.allocate_at(ObjectId::new(8, 0), 0),
            Err(TableError::IndexOutOfRange { index: 8, max: 8 })
        );
    }

    #[test]
    fn last_generation_retires_the_slot() {
        let mut table = ObjectTable::new(2);
        let last = ObjectId::new(0, u32::MAX);
        table.allocate_at(last, ()).unwrap();
        table.free(last).unwrap();
        assert_eq!(
            table.allocate_at(ObjectId::new(0, u32::MAX), ()),
            Err(TableError::Retired { index: 0 })
        );

        // The retired slot is skipped; allocation moves to fresh indices.
        assert_eq!(table.allocate(()).unwrap(), ObjectId::new(1, 0));
        assert_eq!(table.allocate(()), Err(TableError::Exhausted { max: 2 }));
    }

    #[test]
    fn drain_frees_everything() {
        let mut table = ObjectTable::new(8);
        let a = table.allocate(1).unwrap();
        let b = table.allocate(2).unwrap();
        assert_eq!(table.drain(), vec![(a, 1), (b, 2)]);
        assert!(table.is_empty());
        assert!(!table.contains(a));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            rng_algorithm: proptest::test_runner::RngAlgorithm::ChaCha,
            rng_seed: proptest::test_runner::RngSeed::Fixed(0x7461_626c),
            .. ProptestConfig::default()
        })]

        // Client and server tables stay in lockstep when the server adopts
        // every id the client hands out.
        #[test]
        fn server_mirrors_client(ops in proptest::collection::vec(any::<Option<prop::sample::Index>>(), 0..300)) {
            let mut client = ObjectTable::new(64);
            let mut server = ObjectTable::adopting(64);
            let mut live: Vec<ObjectId> = Vec::new();
            let mut dead: Vec<ObjectId> = Vec::new();

            for op in ops {
                match op {
                    Some(pick) if !live.is_empty() => {
                        let id = live.swap_remove(pick.index(live.len()));
                        client.free(id).unwrap();
                        server.free(id).unwrap();
                        dead.push(id);
                    }
                    _ => {
                        let Ok(id) = client.allocate(()) else { continue };
                        server.allocate_at(id, ()).unwrap();
                        live.push(id);
                    }
                }
            }

            for id in &live {
                prop_assert!(server.contains(*id));
            }
            for id in &dead {
                prop_assert!(!server.contains(*id));
            }
            prop_assert_eq!(server.len(), live.len());
        }
    }
}
