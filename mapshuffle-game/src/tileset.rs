use hashbrown::{HashMap, HashSet};
use serde::Deserialize;
use serde_hex::{CompactPfx, SerHex};

use crate::{ConnectionType, LocationId, Metascreen, RawScreenId, TilesetIdx, Uid};

#[derive(Deserialize, Clone, Debug, Default)]
pub struct TilesetData {
    pub name: String,
    #[serde(with = "SerHex::<CompactPfx>")]
    pub tileset_id: u8,
    #[serde(with = "SerHex::<CompactPfx>")]
    pub tile_effects: u8,
    #[serde(default)]
    pub consolidated: bool,
    // Restricts the tileset to these locations (if non-empty)
    #[serde(default)]
    pub only_locations: Vec<LocationId>,
    #[serde(default)]
    pub except_locations: Vec<LocationId>,
    // Pairs of screen names that may not be stacked vertically (above, below)
    #[serde(default)]
    pub banned_vertical: Vec<(String, String)>,
    // Pairs of screen names that may not be placed side by side (left, right)
    #[serde(default)]
    pub banned_horizontal: Vec<(String, String)>,
}

/// The set of screen variants legal under one rendering tileset.
#[derive(Clone, Debug)]
pub struct Metatileset {
    pub idx: TilesetIdx,
    pub name: String,
    pub tileset_id: u8,
    pub tile_effects: u8,
    pub consolidated: bool,
    pub only_locations: Vec<LocationId>,
    pub except_locations: Vec<LocationId>,
    pub empty: Uid,
    pub exit: Uid,
    members: Vec<Uid>,
    from_id: HashMap<RawScreenId, Vec<Uid>>,
    exits: HashMap<ConnectionType, Vec<Uid>>,
    edges: HashMap<Uid, [char; 4]>,
    banned: [HashSet<(Uid, Uid)>; 2], // [vertical, horizontal]
}

impl Metatileset {
    /// `members` must be in uid order and include `empty`; `exit` is the shared sentinel.
    pub fn new(
        idx: TilesetIdx,
        data: &TilesetData,
        members: Vec<&Metascreen>,
        empty: Uid,
        exit: &Metascreen,
        banned: [HashSet<(Uid, Uid)>; 2],
    ) -> Metatileset {
        let mut from_id: HashMap<RawScreenId, Vec<Uid>> = HashMap::new();
        let mut exits: HashMap<ConnectionType, Vec<Uid>> = HashMap::new();
        let mut edges: HashMap<Uid, [char; 4]> = HashMap::new();
        for s in members.iter().copied().chain(std::iter::once(exit)) {
            edges.insert(s.uid, [s.edge(0), s.edge(1), s.edge(2), s.edge(3)]);
        }
        for s in &members {
            if let Some(raw) = s.sid().raw() {
                from_id.entry(raw).or_default().push(s.uid);
            }
            for e in &s.data.exits {
                let v = exits.entry(e.kind).or_default();
                if !v.contains(&s.uid) {
                    v.push(s.uid);
                }
            }
        }
        Metatileset {
            idx,
            name: data.name.clone(),
            tileset_id: data.tileset_id,
            tile_effects: data.tile_effects,
            consolidated: data.consolidated,
            only_locations: data.only_locations.clone(),
            except_locations: data.except_locations.clone(),
            empty,
            exit: exit.uid,
            members: members.iter().map(|s| s.uid).collect(),
            from_id,
            exits,
            edges,
            banned,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Uid> + '_ {
        self.members.iter().copied()
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.edges.contains_key(&uid)
    }

    /// Variants whose physical screen is `raw`, in uid order.
    pub fn get_metascreens(&self, raw: RawScreenId) -> &[Uid] {
        self.from_id.get(&raw).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn get_exits(&self, kind: ConnectionType) -> &[Uid] {
        self.exits.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn effects(&self) -> u8 {
        self.tile_effects
    }

    pub fn allows_location(&self, id: LocationId) -> bool {
        if !self.only_locations.is_empty() && !self.only_locations.contains(&id) {
            return false;
        }
        !self.except_locations.contains(&id)
    }

    pub fn is_banned_vertical(&self, above: Uid, below: Uid) -> bool {
        self.banned[0].contains(&(above, below))
    }

    pub fn is_banned_horizontal(&self, left: Uid, right: Uid) -> bool {
        self.banned[1].contains(&(left, right))
    }

    /// Whether screen `b` may sit at offset `delta` (one of -16, -1, 1, 16) from screen `a`.
    ///
    /// The empty sentinel marks unfilled cells and fits anywhere. The exit sentinel
    /// requires an open edge facing it.
    pub fn check(&self, a: Uid, b: Uid, delta: isize) -> bool {
        if a == self.empty || b == self.empty {
            return true;
        }
        let (first, second) = if delta > 0 { (a, b) } else { (b, a) };
        let vertical = delta.abs() == 16;
        if vertical && self.is_banned_vertical(first, second) {
            return false;
        }
        if !vertical && self.is_banned_horizontal(first, second) {
            return false;
        }
        // Edges of `first` (above/left) and `second` (below/right) that face each other.
        let (d1, d2) = if vertical { (2, 0) } else { (3, 1) };
        let (Some(e1), Some(e2)) = (self.edges.get(&first), self.edges.get(&second)) else {
            return false;
        };
        let (e1, e2) = (e1[d1], e2[d2]);
        if first == self.exit || second == self.exit {
            let other = if first == self.exit { e2 } else { e1 };
            return (first == self.exit && second == self.exit) || other != ' ';
        }
        e1 != '*' && e1 == e2
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::ScreenCatalog;
    use anyhow::Result;

    fn catalog() -> Result<ScreenCatalog> {
        let json = r#"{
            "tilesets": [{"name": "cave", "tileset_id": "0x88", "tile_effects": "0xb5",
                          "banned_horizontal": [["hall_we", "dead_end_w"]]}],
            "screens": {
                "empty": {"id": {"canonical": 128}, "tilesets": ["cave"], "feature": ["empty"]},
                "hall_we": {"id": {"canonical": 129}, "tilesets": ["cave"], "edges": " c c"},
                "hall_ns": {"id": {"canonical": 130}, "tilesets": ["cave"], "edges": "c c "},
                "dead_end_w": {"id": {"canonical": 131}, "tilesets": ["cave"], "edges": " c  "},
                "pillar": {"id": {"canonical": 132}, "tilesets": ["cave"], "edges": "****"}
            }
        }"#;
        ScreenCatalog::from_json_str(json)
    }

    #[test]
    fn test_check() -> Result<()> {
        let c = catalog()?;
        let ts = c.tileset_by_name("cave").unwrap();
        let uid = |name: &str| c.by_name(name).unwrap().uid;
        let (we, ns) = (uid("hall_we"), uid("hall_ns"));
        let (dead, pillar) = (uid("dead_end_w"), uid("pillar"));

        assert!(ts.check(we, we, 1));
        assert!(ts.check(we, we, -1));
        // Two blank edges meet as solid wall.
        assert!(ts.check(we, we, 16));
        assert!(ts.check(ns, ns, -16));
        assert!(!ts.check(we, ns, 1));
        // Banned even though the edges match.
        assert!(!ts.check(we, dead, 1));
        assert!(ts.check(dead, we, -1) == ts.check(we, dead, 1));
        assert!(!ts.check(pillar, pillar, 1));
        assert!(ts.check(ts.empty, pillar, 1));
        assert!(ts.check(we, ts.exit, 1));
        assert!(!ts.check(we, ts.exit, 16));
        Ok(())
    }

    #[test]
    fn test_lookup() -> Result<()> {
        let c = catalog()?;
        let ts = c.tileset_by_name("cave").unwrap();
        assert_eq!(ts.get_metascreens(0x81), &[c.by_name("hall_we").unwrap().uid]);
        assert!(ts.get_metascreens(0x99).is_empty());
        assert_eq!(ts.iter().count(), 5);
        assert!(ts.allows_location(0x10));
        Ok(())
    }
}
