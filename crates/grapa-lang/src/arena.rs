use std::marker::PhantomData;

/// A generation-checked identifier for elements stored in an [`Arena`].
///
/// An id keeps the generation of the arena it was allocated in. Once the arena
/// is cleared the id goes stale and [`Arena::get`] returns `None` instead of
/// handing out whatever now lives in that slot.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArenaId<T> {
    id: u32,
    generation: u32,
    _phantom_data: PhantomData<T>,
}

impl<T> Copy for ArenaId<T> {}

impl<T> Clone for ArenaId<T> {
    #[inline(always)]
    fn clone(&self) -> ArenaId<T> {
        *self
    }
}

impl<T> ArenaId<T> {
    pub const fn new(id: u32, generation: u32) -> ArenaId<T> {
        Self {
            id,
            generation,
            _phantom_data: PhantomData,
        }
    }

    pub const fn index(&self) -> usize {
        self.id as usize
    }

    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

/// Per-session node storage used for weak pointers.
#[derive(Debug, Clone, Default)]
pub struct Arena<T> {
    items: Vec<T>,
    generation: u32,
}

impl<T> Arena<T> {
    /// Creates a new arena with the specified initial capacity.
    pub fn new(size: usize) -> Self {
        Arena {
            items: Vec::with_capacity(size),
            generation: 0,
        }
    }

    /// Allocates a value in the arena and returns its identifier.
    pub fn alloc(&mut self, value: T) -> ArenaId<T> {
        let arena_id = self.items.len() as u32;
        self.items.push(value);
        ArenaId::new(arena_id, self.generation)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the element for `id`, or `None` if it is out of bounds or stale.
    pub fn get(&self, id: ArenaId<T>) -> Option<&T> {
        if id.generation != self.generation {
            return None;
        }
        self.items.get(id.index())
    }

    /// Drops every element and invalidates all outstanding ids.
    pub fn clear(&mut self) {
        self.items.clear();
        self.generation = self.generation.wrapping_add(1);
    }
}
