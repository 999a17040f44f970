// The changes suggested by this lint usually make the code more cluttered and less clear:
#![allow(clippy::needless_range_loop)]

pub mod catalog;
pub mod tileset;
pub mod util;

use anyhow::{bail, Result};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_hex::{CompactPfx, SerHex, SerHexSeq, StrictPfx};
use std::hash::Hash;
use strum_macros::{Display, EnumString, VariantNames};

pub use catalog::ScreenCatalog;
pub use tileset::Metatileset;

pub type Pos = usize; // Screen position within a location grid: row << 4 | column
pub type LocPos = usize; // Location ID << 8 | Pos
pub type LocationId = usize; // Location ID (0x00..0xff) in the ROM
pub type FlagId = usize; // Game flag ID, 0x200..0x2ff for location flags
pub type Uid = usize; // Variant ID: index into ScreenCatalog.screens
pub type RawScreenId = u8; // Screen ID as stored in the location's screen table
pub type TilesetIdx = usize; // Index into ScreenCatalog.tilesets
pub type CornerKey = usize; // Pos << 8 | corner code, as produced by Metascreen.connections
pub type FeatureMask = u32;

#[derive(Default, Clone, Debug)]
pub struct IndexedVec<T: Hash + Eq> {
    pub keys: Vec<T>,
    pub index_by_key: HashMap<T, usize>,
}

impl<T: Hash + Eq> IndexedVec<T> {
    pub fn add<U: ToOwned<Owned = T> + ?Sized>(&mut self, name: &U) -> usize {
        if !self.index_by_key.contains_key(&name.to_owned()) {
            let idx = self.keys.len();
            self.index_by_key.insert(name.to_owned(), self.keys.len());
            self.keys.push(name.to_owned());
            idx
        } else {
            self.index_by_key[&name.to_owned()]
        }
    }
}

/// Identifies the physical screen a variant renders as.
///
/// Most variants reuse a screen already present in the ROM. Variants that still need a
/// screen to be allocated for them carry an alias number instead, and cannot be written
/// back until they are renumbered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenId {
    Canonical(RawScreenId),
    Alias(u16),
}

impl ScreenId {
    pub fn raw(&self) -> Option<RawScreenId> {
        match self {
            ScreenId::Canonical(id) => Some(*id),
            ScreenId::Alias(_) => None,
        }
    }
}

impl Default for ScreenId {
    fn default() -> Self {
        ScreenId::Alias(0)
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumString,
    VariantNames,
    Display,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Feature {
    Empty,
    Pit,
    Arena,
    Spikes,
    Wide,
    River,
    Bridge,
    Wall,
    Ramp,
    Overpass,
    Underpass,
    Whirlpool,
    Deadend,
    #[serde(rename = "stair:up")]
    #[strum(serialize = "stair:up")]
    StairUp,
    #[serde(rename = "stair:down")]
    #[strum(serialize = "stair:down")]
    StairDown,
    Portoa1,
    Portoa2,
    Portoa3,
    Lake,
    Lighthouse,
    Cabin,
    Windmill,
    Altar,
    Pyramid,
    Crypt,
    Manual,
    Consolidate,
}

// Unique features are never shared between screens, so they are packed as
// combinations of 3 of the 6 bits in this range.
const UNIQUE_FEATURE_BITS: FeatureMask = 0x3f00_0000;

impl Feature {
    pub fn mask(self) -> FeatureMask {
        match self {
            Feature::Empty => 0x01,
            Feature::Pit => 0x02,
            Feature::Arena => 0x04,
            Feature::Spikes => 0x08,
            Feature::Wide => 0x10,
            Feature::River => 0x20,
            Feature::Bridge => 0x40,
            Feature::Wall => 0x80,
            Feature::Ramp => 0x100,
            Feature::Overpass => 0x200,
            Feature::Underpass => 0x400,
            Feature::Whirlpool => 0x800,
            Feature::Deadend => 0x1000,
            Feature::StairUp => 0x1_0000,
            Feature::StairDown => 0x2_0000,
            Feature::Portoa1 => 0x0700_0000,
            Feature::Portoa2 => 0x0b00_0000,
            Feature::Portoa3 => 0x0d00_0000,
            Feature::Lake => 0x0e00_0000,
            Feature::Lighthouse => 0x1300_0000,
            Feature::Cabin => 0x1500_0000,
            Feature::Windmill => 0x1600_0000,
            Feature::Altar => 0x1900_0000,
            Feature::Pyramid => 0x1a00_0000,
            Feature::Crypt => 0x1c00_0000,
            Feature::Manual => 0x4000_0000,
            Feature::Consolidate => 0x8000_0000,
        }
    }

    pub fn is_unique(self) -> bool {
        self.mask() & UNIQUE_FEATURE_BITS != 0
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumString,
    VariantNames,
    Display,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionType {
    #[serde(rename = "stair:up")]
    #[strum(serialize = "stair:up")]
    StairUp,
    #[serde(rename = "stair:down")]
    #[strum(serialize = "stair:down")]
    StairDown,
    #[serde(rename = "edge:top")]
    #[strum(serialize = "edge:top")]
    EdgeTop,
    #[serde(rename = "edge:bottom")]
    #[strum(serialize = "edge:bottom")]
    EdgeBottom,
    #[serde(rename = "edge:left")]
    #[strum(serialize = "edge:left")]
    EdgeLeft,
    #[serde(rename = "edge:right")]
    #[strum(serialize = "edge:right")]
    EdgeRight,
    #[serde(rename = "seamless:up")]
    #[strum(serialize = "seamless:up")]
    SeamlessUp,
    #[serde(rename = "seamless:down")]
    #[strum(serialize = "seamless:down")]
    SeamlessDown,
    Cave,
    Crypt,
    Door,
    Door2,
    Door3,
    Fortress,
    Gate,
    Swamp,
    Teleporter,
    Windmill,
}

impl ConnectionType {
    pub fn is_seamless(self) -> bool {
        matches!(self, ConnectionType::SeamlessUp | ConnectionType::SeamlessDown)
    }

    /// Direction of the map edge this connection sits on: 0 = top, 1 = left, 2 = bottom, 3 = right.
    pub fn edge_dir(self) -> Option<usize> {
        match self {
            ConnectionType::EdgeTop => Some(0),
            ConnectionType::EdgeLeft => Some(1),
            ConnectionType::EdgeBottom => Some(2),
            ConnectionType::EdgeRight => Some(3),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize)]
pub enum FlagKind {
    #[serde(rename = "always")]
    #[strum(serialize = "always")]
    Always,
    #[serde(rename = "calm")]
    #[strum(serialize = "calm")]
    Calm,
    #[serde(rename = "custom:false")]
    #[strum(serialize = "custom:false")]
    CustomFalse,
    #[serde(rename = "custom:true")]
    #[strum(serialize = "custom:true")]
    CustomTrue,
}

impl FlagKind {
    pub fn is_custom(self) -> bool {
        matches!(self, FlagKind::CustomFalse | FlagKind::CustomTrue)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub dy: i32,
    pub dx: i32,
    pub reachable: bool,
}

/// Strategy for telling apart variants that share a raw screen ID.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Matcher {
    #[default]
    Never,
    /// Every probe must see the expected reachability, measured in pixels from the
    /// screen's top-left corner, and the flag condition must hold if given.
    Probes {
        all: Vec<Probe>,
        #[serde(default)]
        flag: Option<bool>,
    },
}

impl Matcher {
    pub fn evaluate<F: Fn(i32, i32) -> bool>(&self, reach: F, flag: bool) -> bool {
        match self {
            Matcher::Never => false,
            Matcher::Probes { all, flag: want } => {
                if let Some(want) = want {
                    if *want != flag {
                        return false;
                    }
                }
                all.iter().all(|p| reach(p.dy, p.dx) == p.reachable)
            }
        }
    }
}

/// A port on a screen through which it joins another location.
///
/// `entrance` is a YyXx pixel coordinate (it may exceed 0xffff for entrances that sit
/// on the screen below); `exits` are the YX tiles that trigger the exit.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Connection {
    #[serde(rename = "type")]
    pub kind: ConnectionType,
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub dir: u8,
    #[serde(default, with = "SerHex::<CompactPfx>")]
    pub entrance: u32,
    #[serde(with = "SerHexSeq::<StrictPfx>")]
    pub exits: Vec<u8>,
    #[serde(default, with = "SerHexSeq::<StrictPfx>")]
    pub allowed_exits: Vec<u8>,
}

fn seq(n: u32, f: impl Fn(u32) -> u32) -> Vec<u8> {
    (0..n).map(|i| f(i) as u8).collect()
}

impl Connection {
    fn new(kind: ConnectionType, dir: u8, entrance: u32, exits: Vec<u8>) -> Self {
        Connection {
            kind,
            manual: false,
            dir,
            entrance,
            exits,
            allowed_exits: vec![],
        }
    }

    pub fn with_kind(mut self, kind: ConnectionType) -> Self {
        self.kind = kind;
        self
    }

    pub fn up_stair(tile: u8, width: u32) -> Self {
        let tile = tile as u32;
        let y = tile >> 4;
        let x = tile & 0xf;
        if width == 1 {
            let dy = if y == 0xe { 0x2800 } else { 0x1800 };
            let entrance = ((y << 12) + dy) | ((x << 4) + 0x0008);
            return Connection::new(ConnectionType::StairUp, 2, entrance, vec![tile as u8]);
        }
        let entrance = y << 12 | ((x << 4) + (width << 3));
        let exits = seq(width, |i| tile.wrapping_sub(0x10) + i);
        Connection::new(ConnectionType::StairUp, 0, entrance, exits)
    }

    pub fn down_stair(tile: u8, width: u32) -> Self {
        let tile = tile as u32;
        let y = tile >> 4;
        let x = tile & 0xf;
        if width == 1 {
            let entrance = (y << 12).wrapping_sub(0x0800) | ((x << 4) + 0x0008);
            let mut c = Connection::new(ConnectionType::StairDown, 2, entrance, vec![tile as u8]);
            c.allowed_exits = vec![(tile + 16) as u8, tile.wrapping_sub(16) as u8];
            return c;
        }
        let entrance = y << 12 | 0x0f00 | ((x << 4) + (width << 3));
        let mut c = Connection::new(
            ConnectionType::StairDown,
            2,
            entrance,
            seq(width, |i| tile + 0x10 + i),
        );
        c.allowed_exits = seq(width, |i| tile + 0x20 + i);
        c.allowed_exits.extend(seq(width, |i| tile + i));
        c
    }

    pub fn cave(tile: u8) -> Self {
        Connection::up_stair(tile.wrapping_add(16), 2).with_kind(ConnectionType::Cave)
    }

    pub fn door(tile: u8) -> Self {
        Connection::up_stair(tile, 1).with_kind(ConnectionType::Door)
    }

    /// `tile` is the bottom-left tile of the cave mouth.
    pub fn waterfall_cave(tile: u8) -> Self {
        let tile = tile as u32;
        let y = tile >> 4;
        let x = tile & 0xf;
        Connection::new(
            ConnectionType::Cave,
            0,
            y << 12 | x << 4 | 0xf,
            vec![(tile - 0xf) as u8, (tile + 1) as u8],
        )
    }

    pub fn top_edge(left: u32, width: u32, top: u32) -> Self {
        Connection::new(
            ConnectionType::EdgeTop,
            0,
            ((top + 1) << 12) | ((left << 4) + (width << 3)),
            seq(width, |i| (top << 4) | (i + left)),
        )
    }

    pub fn bottom_edge(left: u32, width: u32, shift: u32) -> Self {
        Connection::new(
            ConnectionType::EdgeBottom,
            2,
            0xdf00 | ((left << 4) + (width << 3) + 16 * shift),
            seq(width, |i| 0xe0 | (i + left)),
        )
    }

    /// Indoor-only screens have their bottom entrance one tile higher.
    pub fn bottom_edge_house(left: u32, width: u32, shift: u32) -> Self {
        Connection::new(
            ConnectionType::EdgeBottom,
            2,
            0xaf00 | ((left << 4) + (width << 3) + 16 * shift),
            seq(width, |i| 0xb0 | (i + left)),
        )
    }

    pub fn left_edge(top: u32, height: u32, shift: u32) -> Self {
        Connection::new(
            ConnectionType::EdgeLeft,
            1,
            ((top << 12) + ((16 * shift) << 8) + (height << 11)) | 0x10,
            seq(height, |i| (i + top) << 4),
        )
    }

    pub fn right_edge(top: u32, height: u32, shift: u32) -> Self {
        Connection::new(
            ConnectionType::EdgeRight,
            3,
            ((top << 12) + ((16 * shift) << 8) + (height << 11)) | 0xef,
            seq(height, |i| (i + top) << 4 | 0xf),
        )
    }

    pub fn seamless_up(tile: u8, width: u32) -> Self {
        let tile = tile as u32;
        Connection::new(ConnectionType::SeamlessUp, 0, 0, seq(width, |i| tile + i))
    }

    pub fn seamless_down(tile: u8, width: u32) -> Self {
        let tile = tile as u32;
        Connection::new(ConnectionType::SeamlessDown, 2, 0, seq(width, |i| tile + i))
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Icon {
    pub full: [String; 3],
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ScreenData {
    pub id: ScreenId,
    #[serde(default)]
    pub tilesets: Vec<String>,
    #[serde(default)]
    pub feature: Vec<Feature>,
    #[serde(default)]
    pub exits: Vec<Connection>,
    #[serde(default)]
    pub edges: Option<String>, // One character per direction: N, W, S, E
    #[serde(default)]
    pub connect: Option<String>,
    #[serde(default)]
    pub wall: Option<u8>, // Tile of a removable wall
    #[serde(default)]
    pub flag: Option<FlagKind>,
    #[serde(default, rename = "match")]
    pub matcher: Option<Matcher>,
    #[serde(default)]
    pub poi: Vec<[i32; 3]>, // (priority, dy, dx)
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub icon: Option<Icon>,
}

// Characters that split a `connect` string into separate segments, indexed by
// connection mode (flight << 1 | no_flagged). Other separator characters are ignored.
const CONNECTION_BLOCKS: [&str; 4] = ["|:", "|:=-", "|", "|="];
const CONNECTION_BLOCK_SET: [char; 4] = ['|', ':', '-', '='];

/// A compiled screen variant.
#[derive(Clone, Debug)]
pub struct Metascreen {
    pub uid: Uid,
    pub name: String,
    pub data: ScreenData,
    features: FeatureMask,
    // Internally connected corner groups, indexed by connection mode.
    pub connections: [Vec<Vec<CornerKey>>; 4],
}

impl Metascreen {
    pub fn new(uid: Uid, name: &str, data: ScreenData) -> Result<Metascreen> {
        let mut features = 0;
        for f in &data.feature {
            features |= f.mask();
        }
        for exit in &data.exits {
            match exit.kind {
                ConnectionType::StairUp => features |= Feature::StairUp.mask(),
                ConnectionType::StairDown => features |= Feature::StairDown.mask(),
                _ => {}
            }
        }

        let mut connections: [Vec<Vec<CornerKey>>; 4] = Default::default();
        for mode in 0..4 {
            let mut segments: Vec<Vec<CornerKey>> = vec![vec![]];
            let mut poi_index = 0;
            let mut exit_index = 0;
            for term in data.connect.as_deref().unwrap_or("").chars() {
                if CONNECTION_BLOCKS[mode].contains(term) {
                    segments.push(vec![]);
                    continue;
                }
                if CONNECTION_BLOCK_SET.contains(&term) {
                    continue;
                }
                let delta = match term {
                    'p' => {
                        poi_index += 1;
                        0xf0 | (poi_index - 1)
                    }
                    'x' => {
                        exit_index += 1;
                        0xe0 | (exit_index - 1)
                    }
                    _ => {
                        let num = match term.to_digit(16) {
                            Some(n) if n > 0 => n as usize,
                            _ => bail!("bad term '{}' in connections of {}", term, name),
                        };
                        let channel = (num & 3) << (num & 4);
                        let offset = if num & 8 != 0 {
                            if num & 4 != 0 {
                                0x0100
                            } else {
                                0x1000
                            }
                        } else {
                            0
                        };
                        channel | offset
                    }
                };
                if let Some(cur) = segments.last_mut() {
                    cur.push(delta);
                }
            }
            if let Some(cur) = segments.last_mut() {
                while poi_index < data.poi.len() {
                    cur.push(0xf0 | poi_index);
                    poi_index += 1;
                }
                while exit_index < data.exits.len() {
                    cur.push(0xe0 | exit_index);
                    exit_index += 1;
                }
            }
            connections[mode] = segments;
        }

        Ok(Metascreen {
            uid,
            name: name.to_string(),
            data,
            features,
            connections,
        })
    }

    pub fn features(&self) -> FeatureMask {
        self.features
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        if feature.is_unique() {
            self.features & UNIQUE_FEATURE_BITS == feature.mask()
        } else {
            self.features & feature.mask() != 0
        }
    }

    pub fn has_features(&self, mask: FeatureMask) -> bool {
        self.features & mask == mask
    }

    pub fn is_empty(&self) -> bool {
        self.has_feature(Feature::Empty)
    }

    pub fn has_wall(&self) -> bool {
        self.data.wall.is_some() || self.has_feature(Feature::Wall)
    }

    pub fn flag(&self) -> Option<FlagKind> {
        self.data.flag
    }

    pub fn sid(&self) -> ScreenId {
        self.data.id
    }

    /// Edge signature character in the given direction (0 = N, 1 = W, 2 = S, 3 = E).
    pub fn edge(&self, dir: usize) -> char {
        self.data
            .edges
            .as_deref()
            .and_then(|e| e.chars().nth(dir))
            .unwrap_or(' ')
    }

    /// Bit mask of map edges this screen has exits on: 1 = top, 2 = left, 4 = bottom, 8 = right.
    pub fn edge_exits(&self) -> u8 {
        let mut mask = 0;
        for e in &self.data.exits {
            if let Some(dir) = e.kind.edge_dir() {
                mask |= 1 << dir;
            }
        }
        mask
    }

    /// Finds the connection whose exit tiles include `tile`.
    ///
    /// `single` indicates a single-height location, where bottom-edge tiles sit two rows higher.
    pub fn find_exit_type(&self, tile: u8, single: bool, seamless: bool) -> Option<&Connection> {
        for exit in &self.data.exits {
            if exit.kind.is_seamless() != seamless {
                continue;
            }
            let t0 = if single && exit.kind == ConnectionType::EdgeBottom && tile >= 0xc0 {
                tile.wrapping_add(0x20)
            } else {
                tile
            };
            if exit.exits.contains(&t0) || exit.allowed_exits.contains(&t0) {
                return Some(exit);
            }
        }
        None
    }

    pub fn find_exit_by_type(&self, kind: ConnectionType) -> Option<&Connection> {
        self.data.exits.iter().find(|e| e.kind == kind)
    }

    pub fn find_entrance_type(&self, coord: u32, single: bool) -> Option<ConnectionType> {
        for exit in &self.data.exits {
            if exit.kind.is_seamless() {
                continue;
            }
            let c0 = if single && exit.kind == ConnectionType::EdgeBottom && coord >= 0xbf00 {
                coord + 0x2000
            } else {
                coord
            };
            let t0 = ((c0 & 0xf0) >> 4 | (c0 & 0xf000) >> 8) as u8;
            if exit.entrance == c0 || exit.exits.contains(&t0) || exit.allowed_exits.contains(&t0)
            {
                return Some(exit.kind);
            }
        }
        None
    }

    pub fn icon_row(&self, row: usize) -> Option<&str> {
        self.data.icon.as_ref().map(|icon| icon.full[row].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn screen(connect: &str, exits: Vec<Connection>) -> Result<Metascreen> {
        let data = ScreenData {
            id: ScreenId::Canonical(0x80),
            edges: Some("cccc".to_string()),
            connect: Some(connect.to_string()),
            exits,
            ..Default::default()
        };
        Metascreen::new(0, "test", data)
    }

    #[test]
    fn test_connection_spelling() {
        assert_eq!(
            ConnectionType::from_str("seamless:down").unwrap(),
            ConnectionType::SeamlessDown
        );
        assert_eq!(ConnectionType::EdgeBottom.to_string(), "edge:bottom");
        assert_eq!(FlagKind::from_str("custom:true").unwrap(), FlagKind::CustomTrue);
        let t: ConnectionType = serde_json::from_str("\"stair:up\"").unwrap();
        assert_eq!(t, ConnectionType::StairUp);
    }

    #[test]
    fn test_connect_string() -> Result<()> {
        // North and south joined through a flagged passage, west alone.
        let s = screen("2=a|6", vec![])?;
        assert_eq!(s.connections[0], vec![vec![0x02, 0x1002], vec![0x20]]);
        assert_eq!(s.connections[1], vec![vec![0x02], vec![0x1002], vec![0x20]]);
        assert_eq!(s.connections[2], vec![vec![0x02, 0x1002], vec![0x20]]);
        assert_eq!(s.connections[3], vec![vec![0x02], vec![0x1002], vec![0x20]]);
        Ok(())
    }

    #[test]
    fn test_connect_unreferenced_exits() -> Result<()> {
        let s = screen("e", vec![Connection::right_edge(7, 2, 0)])?;
        assert_eq!(s.connections[0], vec![vec![0x120, 0xe0]]);
        assert!(screen("0", vec![]).is_err());
        Ok(())
    }

    #[test]
    fn test_connection_constructors() {
        let c = Connection::up_stair(0x32, 2);
        assert_eq!(c.entrance, 0x3030);
        assert_eq!(c.exits, vec![0x22, 0x23]);
        let c = Connection::down_stair(0xa2, 2);
        assert_eq!(c.entrance, 0xaf30);
        assert_eq!(c.exits, vec![0xb2, 0xb3]);
        let c = Connection::door(0x68);
        assert_eq!(c.kind, ConnectionType::Door);
        assert_eq!(c.entrance, 0x7888);
        assert_eq!(c.exits, vec![0x68]);
        let c = Connection::left_edge(7, 2, 0);
        assert_eq!(c.entrance, 0x8010);
        assert_eq!(c.exits, vec![0x70, 0x80]);
        let c = Connection::bottom_edge(7, 2, 0);
        assert_eq!(c.entrance, 0xdf80);
        assert_eq!(c.exits, vec![0xe7, 0xe8]);
    }

    #[test]
    fn test_find_types() -> Result<()> {
        let s = screen(
            "",
            vec![Connection::bottom_edge(7, 2, 0), Connection::left_edge(7, 2, 0)],
        )?;
        assert_eq!(s.edge_exits(), 0b0110);
        assert_eq!(
            s.find_exit_type(0xe8, false, false).map(|c| c.kind),
            Some(ConnectionType::EdgeBottom)
        );
        // Single-height locations put the bottom edge two rows higher.
        assert_eq!(
            s.find_exit_type(0xc8, true, false).map(|c| c.kind),
            Some(ConnectionType::EdgeBottom)
        );
        assert!(s.find_exit_type(0x70, false, true).is_none());
        assert_eq!(s.find_entrance_type(0x8010, false), Some(ConnectionType::EdgeLeft));
        assert_eq!(s.find_entrance_type(0xbf80, true), Some(ConnectionType::EdgeBottom));
        Ok(())
    }

    #[test]
    fn test_features() -> Result<()> {
        let data = ScreenData {
            id: ScreenId::Canonical(0x90),
            feature: vec![Feature::Lake, Feature::Wall],
            exits: vec![Connection::down_stair(0xa2, 2)],
            ..Default::default()
        };
        let s = Metascreen::new(0, "lake", data)?;
        assert!(s.has_feature(Feature::Lake));
        assert!(!s.has_feature(Feature::Portoa1));
        assert!(s.has_feature(Feature::StairDown));
        assert!(s.has_features(Feature::Wall.mask() | Feature::StairDown.mask()));
        assert!(!s.has_features(Feature::Wall.mask() | Feature::Arena.mask()));
        assert!(s.has_wall());
        Ok(())
    }

    #[test]
    fn test_matcher() {
        let m = Matcher::Probes {
            all: vec![
                Probe { dy: 0x108, dx: 0x78, reachable: true },
                Probe { dy: -0x30, dx: 0x78, reachable: false },
            ],
            flag: None,
        };
        assert!(m.evaluate(|dy, _| dy > 0, false));
        assert!(!m.evaluate(|_, _| true, false));
        assert!(!Matcher::Never.evaluate(|_, _| true, true));
    }
}
