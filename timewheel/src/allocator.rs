use std::fmt::{self, Debug};
use std::hash::Hash;
use std::marker::PhantomData;

use downcast_rs::{impl_downcast, Downcast};
use generational_arena::Index;
use nohash::IntMap;

use crate::errors::InvalidIdError;

/// Trait for state stores that provide both access and insertion/removal
/// capabilities.
///
/// Components of a simulated system keep their mutable state behind an
/// [`Allocator`] and only hold the returned ids. This keeps the component
/// structs themselves immutable (and therefore freely shareable), makes every
/// state mutation go through a single store, and lets an id double as the
/// *identity* of the stored object — two ids compare equal iff they refer to
/// the same insertion.
pub trait Allocator: 'static {
    /// Type used to identify objects of type `T`.
    ///
    /// For safety, once an object with an id is removed, that id should never
    /// be used again by the same [`Allocator`].
    type Id<T: 'static>: Copy + Eq + Hash + Debug + 'static;

    /// Inserts an object of type `T`.
    fn insert<T: 'static>(&mut self, object: T) -> Self::Id<T>;

    /// Removes an object of type `T`.
    ///
    /// If you need an owned version of the removed object, use [`Self::pop`].
    fn remove<T: 'static>(&mut self, id: Self::Id<T>) -> Result<(), InvalidIdError>;

    /// Removes an object of type `T` and returns an owned version.
    fn pop<T: 'static>(&mut self, id: Self::Id<T>) -> Result<T, InvalidIdError>;

    /// Acquire a reference to an object of type `T` by id.
    fn get<T: 'static>(&self, id: Self::Id<T>) -> Result<&T, InvalidIdError>;

    /// Acquire a mutable reference to an object of type `T` by id.
    fn get_mut<T: 'static>(&mut self, id: Self::Id<T>) -> Result<&mut T, InvalidIdError>;
}

/// Id returned by [`Arena`].
///
/// Generational: an id becomes permanently invalid when the object it refers
/// to is removed, even if the slot is later reused.
pub struct ArenaId<T> {
    index: Index,
    _phan: PhantomData<T>,
}

impl<T> ArenaId<T> {
    fn new(index: Index) -> Self {
        Self {
            index,
            _phan: PhantomData,
        }
    }
}

impl<T> Debug for ArenaId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaId")
            .field("index", &self.index)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Clone for ArenaId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaId<T> {}

impl<T> PartialEq for ArenaId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index.eq(&other.index)
    }
}

impl<T> Eq for ArenaId<T> {}

impl<T> PartialOrd for ArenaId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for ArenaId<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for ArenaId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

/// Newtype around [`std::any::TypeId`] so it can be used as a
/// [`nohash`]-hashed key (a `TypeId` already is a hash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TypeId(std::any::TypeId);

impl TypeId {
    fn of<T: ?Sized + 'static>() -> Self {
        Self(std::any::TypeId::of::<T>())
    }
}

impl nohash::IsEnabled for TypeId {}

trait TableTrait: Downcast {}
impl_downcast!(TableTrait);

/// Per-type storage: one generational arena per stored type.
struct Table<T: 'static>(generational_arena::Arena<T>);

impl<T: 'static> Default for Table<T> {
    fn default() -> Self {
        Self(generational_arena::Arena::new())
    }
}

impl<T: 'static> TableTrait for Table<T> {}

/// The provided [`Allocator`] implementation: a `TypeId`-keyed map of
/// per-type generational arenas.
#[derive(Default)]
pub struct Arena {
    tables: IntMap<TypeId, Box<dyn TableTrait>>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    fn table<T: 'static>(&self) -> Option<&Table<T>> {
        let b = self.tables.get(&TypeId::of::<T>())?;
        Some(
            b.downcast_ref()
                .expect("map should never contain a table not corresponding to its key"),
        )
    }

    fn table_mut<T: 'static>(&mut self) -> Option<&mut Table<T>> {
        let b = self.tables.get_mut(&TypeId::of::<T>())?;
        Some(
            b.downcast_mut()
                .expect("map should never contain a table not corresponding to its key"),
        )
    }

    fn table_or_default_mut<T: 'static>(&mut self) -> &mut Table<T> {
        let b = self
            .tables
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::<Table<T>>::default());
        b.downcast_mut()
            .expect("map should never contain a table not corresponding to its key")
    }
}

impl Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("tables", &self.tables.len())
            .finish_non_exhaustive()
    }
}

impl Allocator for Arena {
    type Id<T: 'static> = ArenaId<T>;

    fn insert<T: 'static>(&mut self, object: T) -> Self::Id<T> {
        ArenaId::new(self.table_or_default_mut::<T>().0.insert(object))
    }

    fn remove<T: 'static>(&mut self, id: Self::Id<T>) -> Result<(), InvalidIdError> {
        self.pop(id).map(|_| ())
    }

    fn pop<T: 'static>(&mut self, id: Self::Id<T>) -> Result<T, InvalidIdError> {
        self.table_mut::<T>()
            .and_then(|table| table.0.remove(id.index))
            .ok_or(InvalidIdError)
    }

    fn get<T: 'static>(&self, id: Self::Id<T>) -> Result<&T, InvalidIdError> {
        self.table::<T>()
            .and_then(|table| table.0.get(id.index))
            .ok_or(InvalidIdError)
    }

    fn get_mut<T: 'static>(&mut self, id: Self::Id<T>) -> Result<&mut T, InvalidIdError> {
        self.table_mut::<T>()
            .and_then(|table| table.0.get_mut(id.index))
            .ok_or(InvalidIdError)
    }
}
