//! Collaborator contract between the tick driver and game logic
//!
//! The driver never looks inside the map. It hands `&mut M` to every entity
//! once per tick, in insertion order.

/// Something that advances by one step each tick.
///
/// `tick` runs serially on the tick thread, so it should not block for long.
pub trait Entity<M>: Send {
    fn tick(&mut self, map: &mut M);
}

impl<M, F> Entity<M> for F
where
    F: FnMut(&mut M) + Send,
{
    fn tick(&mut self, map: &mut M) {
        self(map)
    }
}

/// The map together with the entities that act on it.
pub struct World<M> {
    pub map: M,
    entities: Vec<Box<dyn Entity<M>>>,
}

impl<M> World<M> {
    pub fn new(map: M) -> Self {
        Self {
            map,
            entities: Vec::new(),
        }
    }

    pub fn add_entity(&mut self, entity: impl Entity<M> + 'static) {
        self.entities.push(Box::new(entity));
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Runs one tick of every entity.
    pub fn tick(&mut self) {
        let Self { map, entities } = self;
        for entity in entities.iter_mut() {
            entity.tick(map);
        }
    }
}

impl<M: std::fmt::Debug> std::fmt::Debug for World<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("map", &self.map)
            .field("entities", &self.entities.len())
            .finish()
    }
}
