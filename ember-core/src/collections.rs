//! Collection aliases shared across the engine crates.

pub use smallvec::SmallVec;
pub use std::collections::hash_map::DefaultHasher;

pub mod hashmap {
    pub use hashbrown::hash_map::Entry;

    pub type HashMap<K, V> = hashbrown::HashMap<K, V, foldhash::fast::RandomState>;
    pub type HashSet<T> = hashbrown::HashSet<T, foldhash::fast::RandomState>;
}
