use hashbrown::{HashMap, HashSet};
use mapshuffle_game::util::{partition, set_index};
use mapshuffle_game::{ConnectionType, CornerKey, Pos, Uid};

use crate::metalocation::Metalocation;

#[derive(Clone, Debug, Default)]
pub struct TraverseOpts {
    pub without: HashSet<Pos>, // Positions treated as impassable
    pub with: HashMap<Pos, Uid>, // Hypothetical screens overriding the grid
    pub flight: bool,
    pub no_flagged: bool, // Treat flag-gated passages as closed
}

impl TraverseOpts {
    pub fn mode(&self) -> usize {
        (self.flight as usize) << 1 | self.no_flagged as usize
    }
}

/// Partition of corner keys into mutually reachable groups.
#[derive(Clone, Debug, Default)]
pub struct Traversal {
    sets: Vec<Vec<CornerKey>>,
    index: HashMap<CornerKey, usize>,
}

impl Traversal {
    /// Every corner key reachable with `key` (including `key` itself).
    pub fn get(&self, key: CornerKey) -> Option<&[CornerKey]> {
        self.index.get(&key).map(|&i| self.sets[i].as_slice())
    }

    pub fn sets(&self) -> &[Vec<CornerKey>] {
        &self.sets
    }

    pub fn keys(&self) -> impl Iterator<Item = CornerKey> + '_ {
        self.index.keys().copied()
    }

    pub fn connected(&self, a: CornerKey, b: CornerKey) -> bool {
        match (self.index.get(&a), self.index.get(&b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

impl<'a> Metalocation<'a> {
    pub fn traverse(&self, opts: &TraverseOpts) -> Traversal {
        let mode = opts.mode();
        let mut groups: Vec<Vec<CornerKey>> = vec![];
        for &pos in self.all_pos() {
            if opts.without.contains(&pos) {
                continue;
            }
            let scr = match opts.with.get(&pos) {
                Some(&uid) => self.catalog.screen(uid),
                None => self.get(pos),
            };
            for segment in &scr.connections[mode] {
                groups.push(segment.iter().map(|&d| (pos << 8) + d).collect());
            }
        }
        let sets = partition(&groups);
        let index = set_index(&sets);
        Traversal { sets, index }
    }

    /// Connection type of the exit behind an exit corner key, if it is usable here.
    ///
    /// Edge exits only count on the matching map boundary.
    pub fn exit_type(&self, key: CornerKey) -> Option<ConnectionType> {
        if key & 0xf0 != 0xe0 {
            return None;
        }
        let pos = key >> 8;
        let kind = self.get(pos).data.exits.get(key & 0xf)?.kind;
        let (y, x) = (pos >> 4, pos & 0xf);
        let on_boundary = match kind {
            ConnectionType::EdgeTop => y == 0,
            ConnectionType::EdgeBottom => y + 1 == self.height,
            ConnectionType::EdgeLeft => x == 0,
            ConnectionType::EdgeRight => x + 1 == self.width,
            _ => true,
        };
        on_boundary.then_some(kind)
    }
}
