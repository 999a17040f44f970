use std::hash::Hash;

use hashbrown::HashMap;
use pathfinding::undirected::connected_components::components;

pub fn sorted_hashmap_iter<T, U>(hashmap: &HashMap<T, U>) -> impl Iterator<Item = (&T, &U)>
where
    T: Ord + Hash,
{
    let mut keys: Vec<&T> = hashmap.keys().collect();
    keys.sort();
    keys.into_iter().map(|k| (k, &hashmap[k]))
}

/// Connected components of the union of `groups`, each sorted, in order of
/// their smallest element. Every member of a group lands in the same component.
pub fn partition<T>(groups: &[Vec<T>]) -> Vec<Vec<T>>
where
    T: Copy + Hash + Eq + Ord,
{
    let groups: Vec<Vec<T>> = groups.iter().filter(|g| !g.is_empty()).cloned().collect();
    let mut sets: Vec<Vec<T>> = components(&groups)
        .into_iter()
        .map(|c| {
            let mut v: Vec<T> = c.into_iter().collect();
            v.sort();
            v
        })
        .collect();
    sets.sort();
    sets
}

/// Maps every key of `sets` to the index of the set holding it.
pub fn set_index<T: Copy + Hash + Eq>(sets: &[Vec<T>]) -> HashMap<T, usize> {
    let mut index = HashMap::new();
    for (i, s) in sets.iter().enumerate() {
        for &k in s {
            index.insert(k, i);
        }
    }
    index
}
