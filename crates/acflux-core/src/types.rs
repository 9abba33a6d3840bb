use rustc_hash::{FxHashMap, FxHashSet};

pub type FastMap<K, V> = FxHashMap<K, V>;
pub type FastSet<T> = FxHashSet<T>;
