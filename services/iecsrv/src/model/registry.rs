use std::sync::Arc;

use parking_lot::RwLock;

use super::DataPoint;

/// Stable reference to a registered point
///
/// The generation is bumped whenever a slot is freed, so a handle to a removed
/// point never resolves to the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    point: Option<Arc<DataPoint>>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

/// Generation-checked arena owning every data point of a server
#[derive(Default)]
pub struct PointRegistry {
    inner: RwLock<Slots>,
}

impl PointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, point: DataPoint) -> PointHandle {
        let point = Arc::new(point);
        let mut inner = self.inner.write();
        inner.len += 1;
        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.point = Some(point);
            return PointHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = inner.slots.len() as u32;
        inner.slots.push(Slot {
            generation: 0,
            point: Some(point),
        });
        PointHandle {
            index,
            generation: 0,
        }
    }

    /// Resolve a handle; `None` once the point has been removed
    pub fn get(&self, handle: PointHandle) -> Option<Arc<DataPoint>> {
        let inner = self.inner.read();
        inner
            .slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.point.clone())
    }

    pub fn contains(&self, handle: PointHandle) -> bool {
        let inner = self.inner.read();
        inner
            .slots
            .get(handle.index as usize)
            .is_some_and(|slot| slot.generation == handle.generation && slot.point.is_some())
    }

    pub fn remove(&self, handle: PointHandle) -> Option<Arc<DataPoint>> {
        let mut inner = self.inner.write();
        let slot = inner.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let point = slot.point.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(handle.index);
        inner.len -= 1;
        Some(point)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
