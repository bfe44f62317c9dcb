//! Bidirectional map from proxy identity to placed-object record.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::object::{ObjectId, PlacedObject, WorldId};

#[derive(Default)]
struct Maps {
    by_uuid: HashMap<Uuid, Arc<PlacedObject>>,
    by_numeric: HashMap<i64, Uuid>,
}

/// Registry of placed objects keyed by both identity components.
///
/// Lookups return `Arc` snapshots; callers never mutate shared state through
/// them.
#[derive(Default)]
pub struct ObjectRegistry {
    maps: RwLock<Maps>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under both identity components.
    ///
    /// Registering the same identity twice replaces the record. A known uuid
    /// with a different numeric id is a stale record and must be purged first.
    pub fn register(&self, object: PlacedObject) -> Result<Arc<PlacedObject>, RegistryError> {
        let mut maps = self.maps.write();
        let id = object.id;
        if let Some(existing) = maps.by_uuid.get(&id.uuid) {
            if existing.id.numeric != id.numeric {
                return Err(RegistryError::Conflict {
                    uuid: id.uuid,
                    existing: existing.id.numeric,
                    incoming: id.numeric,
                });
            }
        }
        if let Some(owner) = maps.by_numeric.get(&id.numeric) {
            if *owner != id.uuid {
                return Err(RegistryError::NumericTaken {
                    numeric: id.numeric,
                    existing: *owner,
                });
            }
        }
        let record = Arc::new(object);
        maps.by_numeric.insert(id.numeric, id.uuid);
        maps.by_uuid.insert(id.uuid, Arc::clone(&record));
        Ok(record)
    }

    pub fn get(&self, uuid: &Uuid) -> Option<Arc<PlacedObject>> {
        self.maps.read().by_uuid.get(uuid).cloned()
    }

    pub fn get_by_numeric(&self, numeric: i64) -> Option<Arc<PlacedObject>> {
        let maps = self.maps.read();
        let uuid = maps.by_numeric.get(&numeric)?;
        maps.by_uuid.get(uuid).cloned()
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.maps.read().by_uuid.contains_key(uuid)
    }

    /// Remove a record if both identity components still match.
    pub fn unregister(&self, id: &ObjectId) -> Option<Arc<PlacedObject>> {
        let mut maps = self.maps.write();
        match maps.by_uuid.get(&id.uuid) {
            Some(existing) if existing.id.numeric == id.numeric => {}
            _ => return None,
        }
        maps.by_numeric.remove(&id.numeric);
        maps.by_uuid.remove(&id.uuid)
    }

    /// Remove whatever record is stored under `uuid`, regardless of numeric id.
    pub fn purge(&self, uuid: &Uuid) -> Option<Arc<PlacedObject>> {
        let mut maps = self.maps.write();
        let record = maps.by_uuid.remove(uuid)?;
        maps.by_numeric.remove(&record.id.numeric);
        Some(record)
    }

    /// Publish a modified copy of an existing record.
    ///
    /// Returns `None` if the object is gone; the closure is not called then.
    pub fn update<F>(&self, uuid: &Uuid, f: F) -> Option<Arc<PlacedObject>>
    where
        F: FnOnce(&mut PlacedObject),
    {
        let mut maps = self.maps.write();
        let slot = maps.by_uuid.get_mut(uuid)?;
        let mut next = (**slot).clone();
        f(&mut next);
        // Identity is fixed for the lifetime of a record.
        next.id = slot.id;
        *slot = Arc::new(next);
        Some(Arc::clone(slot))
    }

    pub fn all(&self) -> Vec<Arc<PlacedObject>> {
        self.maps.read().by_uuid.values().cloned().collect()
    }

    pub fn in_world(&self, world: WorldId) -> Vec<Arc<PlacedObject>> {
        self.maps
            .read()
            .by_uuid
            .values()
            .filter(|o| o.world == world)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.maps.read().by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
