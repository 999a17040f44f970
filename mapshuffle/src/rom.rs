use std::fmt::{self, Display, Formatter};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use hashbrown::{HashMap, HashSet};
use log::info;
use mapshuffle_game::util::{partition, set_index};
use mapshuffle_game::{FlagId, LocationId, Pos, RawScreenId};
use serde::{Deserialize, Serialize};
use serde_hex::{CompactPfx, SerHex, SerHexSeq, StrictPfx};

pub const ALWAYS_TRUE: FlagId = 0x2fe;
pub const CALMED_ANGRY_SEA: FlagId = 0x283;
pub const MAX_ENTRANCES: usize = 0x20;

// Bit set in an exit's entrance byte for seamless transitions.
pub const SEAMLESS_ENTRANCE: u8 = 0x20;

/// Contiguous hex string of raw bytes, e.g. "0x0007110000081100".
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct HexBlob(#[serde(with = "SerHexSeq::<StrictPfx>")] pub Vec<u8>);

impl HexBlob {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Entrance table record: x and y pixel coordinates, little-endian.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Entrance {
    pub x: u16,
    pub y: u16,
}

impl Entrance {
    pub const SIZE: usize = 4;

    pub fn from_bytes(d: &[u8]) -> Entrance {
        Entrance {
            x: d[0] as u16 | (d[1] as u16) << 8,
            y: d[2] as u16 | (d[3] as u16) << 8,
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.x & 0xff) as u8,
            (self.x >> 8) as u8,
            (self.y & 0xff) as u8,
            (self.y >> 8) as u8,
        ]
    }

    /// Builds an entrance at YyXx pixel coordinate `coord` within screen `screen`.
    pub fn of(screen: Pos, coord: u32) -> Entrance {
        Entrance {
            x: ((screen & 0x0f) << 8) as u16 | (coord & 0xff) as u16,
            y: ((screen >> 4) << 8) as u16 | ((coord >> 8) & 0xff) as u16,
        }
    }

    pub fn screen(&self) -> Pos {
        (((self.y >> 8) & 0x0f) << 4 | ((self.x >> 8) & 0x0f)) as Pos
    }

    pub fn tile(&self) -> u8 {
        ((self.y & 0xf0) | (self.x & 0xf0) >> 4) as u8
    }

    pub fn coord(&self) -> u32 {
        ((self.y & 0xff) as u32) << 8 | (self.x & 0xff) as u32
    }

    pub fn used(&self) -> bool {
        (self.x >> 8) < 0x08
    }
}

/// Exit table record: tile coordinates, destination location, and entrance index.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Exit {
    pub xt: u8,
    pub yt: u8,
    pub dest: u8,
    pub entrance: u8,
}

impl Exit {
    pub const SIZE: usize = 4;

    pub fn from_bytes(d: &[u8]) -> Exit {
        Exit {
            xt: d[0],
            yt: d[1],
            dest: d[2],
            entrance: d[3],
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [self.xt, self.yt, self.dest, self.entrance]
    }

    pub fn of(screen: Pos, tile: u8, dest: LocationId, entrance: u8) -> Exit {
        Exit {
            xt: ((screen & 0x0f) << 4) as u8 | (tile & 0x0f),
            yt: (screen & 0xf0) as u8 | (tile >> 4),
            dest: dest as u8,
            entrance,
        }
    }

    pub fn screen(&self) -> Pos {
        ((self.yt & 0xf0) | (self.xt & 0xf0) >> 4) as Pos
    }

    pub fn tile(&self) -> u8 {
        (self.yt & 0x0f) << 4 | (self.xt & 0x0f)
    }

    pub fn is_seamless(&self) -> bool {
        self.entrance & SEAMLESS_ENTRANCE != 0
    }
}

/// Location flag record: the low byte of a 0x2xx flag and the yx screen it guards.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LocationFlag {
    pub flag: FlagId,
    pub screen: u8,
}

impl LocationFlag {
    pub const SIZE: usize = 2;

    pub fn from_bytes(d: &[u8]) -> LocationFlag {
        LocationFlag {
            flag: d[0] as FlagId | 0x200,
            screen: d[1],
        }
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        [(self.flag & 0xff) as u8, self.screen]
    }

    pub fn of(screen: Pos, flag: FlagId) -> Result<LocationFlag> {
        ensure!(flag & !0xff == 0x200, "bad flag: {:x}", flag);
        Ok(LocationFlag {
            flag,
            screen: screen as u8,
        })
    }

    pub fn xs(&self) -> usize {
        (self.screen & 0x07) as usize
    }

    pub fn set_xs(&mut self, xs: usize) {
        self.screen = (self.screen & !0x07) | (xs as u8 & 0x07);
    }

    pub fn ys(&self) -> usize {
        (self.screen >> 4) as usize
    }
}

/// Pit record: falling through `from_screen` lands on `to_screen` of location `dest`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Pit {
    pub from_screen: u8,
    pub to_screen: u8,
    pub dest: u8,
}

impl Pit {
    pub const SIZE: usize = 4;

    pub fn from_bytes(d: &[u8]) -> Pit {
        Pit {
            dest: d[0],
            from_screen: (d[3] & 0xf0) | (d[1] & 0x70) >> 4,
            to_screen: (d[3] & 0x0f) << 4 | (d[1] & 0x07),
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [
            self.dest,
            (self.from_screen & 0x07) << 4 | (self.to_screen & 0x07),
            0,
            (self.from_screen & 0xf0) | self.to_screen >> 4,
        ]
    }
}

/// NPC/trigger/chest spawn record, kept as raw bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Spawn {
    pub data: [u8; 4],
}

impl Spawn {
    pub const SIZE: usize = 4;

    pub fn from_bytes(d: &[u8]) -> Spawn {
        Spawn {
            data: [d[0], d[1], d[2], d[3]],
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        self.data
    }

    pub fn yt(&self) -> u8 {
        self.data[0]
    }

    /// 7-bit x tile coordinate.
    pub fn xt(&self) -> u8 {
        self.data[1] & 0x7f
    }

    pub fn set_xt(&mut self, xt: u8) {
        self.data[1] = (self.data[1] & 0x80) | (xt & 0x7f);
    }

    pub fn timed(&self) -> bool {
        self.data[1] & 0x80 != 0
    }

    pub fn kind(&self) -> u8 {
        self.data[2] & 0x07
    }

    pub fn id(&self) -> u8 {
        self.data[3]
    }

    pub fn used(&self) -> bool {
        self.data[0] != 0xfe
    }
}

fn decode_table<T>(blob: &HexBlob, size: usize, f: impl Fn(&[u8]) -> T) -> Result<Vec<T>> {
    ensure!(
        blob.0.len() % size == 0,
        "table length {} is not a multiple of {}",
        blob.0.len(),
        size
    );
    Ok(blob.0.chunks(size).map(f).collect())
}

fn encode_table<T, const N: usize>(records: &[T], f: impl Fn(&T) -> [u8; N]) -> HexBlob {
    HexBlob(records.iter().flat_map(f).collect())
}

/// Serialized form of a location in the world dump.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LocationData {
    pub id: LocationId,
    #[serde(default)]
    pub name: String,
    #[serde(with = "SerHex::<CompactPfx>")]
    pub tileset: u8,
    #[serde(with = "SerHex::<CompactPfx>")]
    pub tile_effects: u8,
    pub width: usize,
    pub height: usize,
    pub screens: Vec<HexBlob>, // One blob per row
    #[serde(default, skip_serializing_if = "HexBlob::is_empty")]
    pub entrances: HexBlob,
    #[serde(default, skip_serializing_if = "HexBlob::is_empty")]
    pub exits: HexBlob,
    #[serde(default, skip_serializing_if = "HexBlob::is_empty")]
    pub flags: HexBlob,
    #[serde(default, skip_serializing_if = "HexBlob::is_empty")]
    pub pits: HexBlob,
    #[serde(default, skip_serializing_if = "HexBlob::is_empty")]
    pub spawns: HexBlob,
}

#[derive(Clone, Debug, Default)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub tileset: u8,
    pub tile_effects: u8,
    pub width: usize,
    pub height: usize,
    pub screens: Vec<Vec<RawScreenId>>,
    pub entrances: Vec<Entrance>,
    pub exits: Vec<Exit>,
    pub flags: Vec<LocationFlag>,
    pub pits: Vec<Pit>,
    pub spawns: Vec<Spawn>,
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ${:02x}", self.name, self.id)
    }
}

impl Location {
    pub fn from_data(data: &LocationData) -> Result<Location> {
        let loc = Location {
            id: data.id,
            name: data.name.clone(),
            tileset: data.tileset,
            tile_effects: data.tile_effects,
            width: data.width,
            height: data.height,
            screens: data.screens.iter().map(|r| r.0.clone()).collect(),
            entrances: decode_table(&data.entrances, Entrance::SIZE, Entrance::from_bytes)?,
            exits: decode_table(&data.exits, Exit::SIZE, Exit::from_bytes)?,
            flags: decode_table(&data.flags, LocationFlag::SIZE, LocationFlag::from_bytes)?,
            pits: decode_table(&data.pits, Pit::SIZE, Pit::from_bytes)?,
            spawns: decode_table(&data.spawns, Spawn::SIZE, Spawn::from_bytes)?,
        };
        ensure!(
            loc.screens.len() == loc.height && loc.screens.iter().all(|r| r.len() == loc.width),
            "screen table of {} does not match its {}x{} size",
            loc,
            loc.height,
            loc.width
        );
        Ok(loc)
    }

    pub fn to_data(&self) -> LocationData {
        LocationData {
            id: self.id,
            name: self.name.clone(),
            tileset: self.tileset,
            tile_effects: self.tile_effects,
            width: self.width,
            height: self.height,
            screens: self.screens.iter().map(|r| HexBlob(r.clone())).collect(),
            entrances: encode_table(&self.entrances, Entrance::to_bytes),
            exits: encode_table(&self.exits, Exit::to_bytes),
            flags: encode_table(&self.flags, LocationFlag::to_bytes),
            pits: encode_table(&self.pits, Pit::to_bytes),
            spawns: encode_table(&self.spawns, Spawn::to_bytes),
        }
    }

    pub fn screen_at(&self, pos: Pos) -> Option<RawScreenId> {
        self.screens.get(pos >> 4)?.get(pos & 0xf).copied()
    }

    /// Index of the entrance at `coord` on screen `screen`, registering a new one if needed.
    pub fn find_or_add_entrance(&mut self, screen: Pos, coord: u32) -> Result<u8> {
        for (i, e) in self.entrances.iter().enumerate() {
            if e.screen() == screen && e.coord() == coord {
                return Ok(i as u8);
            }
        }
        ensure!(
            self.entrances.len() < MAX_ENTRANCES,
            "Too many entrances in {}",
            self
        );
        self.entrances.push(Entrance::of(screen, coord));
        Ok((self.entrances.len() - 1) as u8)
    }

    /// Tiles reachable on foot (or in flight) from any used entrance, mapped to their effects byte.
    ///
    /// Keys are YXyx: screen row and column, then tile row and column.
    pub fn reachable_tiles(&self, tiles: &TileData, fly: bool) -> Result<HashMap<usize, u8>> {
        let exits: HashSet<usize> = self
            .exits
            .iter()
            .map(|e| e.screen() << 8 | e.tile() as usize)
            .collect();
        let effects = tiles.tile_effects(self.tile_effects)?;
        let alternates = tiles.alternates.get(&self.tileset);
        let mut passable: HashSet<usize> = HashSet::new();

        for y in 0..self.height {
            for x in 0..self.width {
                let screen = tiles.screen(self.screens[y][x])?;
                let pos = y << 4 | x;
                let flagged = self.flags.iter().any(|f| f.screen as usize == pos);
                for t in 0..0xf0 {
                    let tile_id = pos << 8 | t;
                    if exits.contains(&tile_id) {
                        continue;
                    }
                    let mut tile = screen[t];
                    let mut eff = effects[tile as usize];
                    let mask = if fly { 0x04 } else { 0x06 };
                    if flagged && eff & mask != 0 && tile < 0x20 {
                        if let Some(alt) = alternates.and_then(|a| a.0.get(tile as usize)) {
                            if *alt != tile {
                                tile = *alt;
                                eff = effects[tile as usize];
                            }
                        }
                    }
                    if eff & mask == 0 {
                        passable.insert(tile_id);
                    }
                }
            }
        }

        let mut sorted: Vec<usize> = passable.iter().copied().collect();
        sorted.sort();
        let mut groups: Vec<Vec<usize>> = vec![];
        for &t in &sorted {
            groups.push(vec![t]);
            let right = if t & 0x0f == 0x0f { t + 0xf1 } else { t + 1 };
            if passable.contains(&right) {
                groups.push(vec![t, right]);
            }
            let below = if t & 0xf0 == 0xe0 { t + 0xf20 } else { t + 16 };
            if passable.contains(&below) {
                groups.push(vec![t, below]);
            }
        }
        let index = set_index(&partition(&groups));

        let mut roots: HashSet<usize> = HashSet::new();
        for e in &self.entrances {
            if !e.used() {
                continue;
            }
            if let Some(&r) = index.get(&(e.screen() << 8 | e.tile() as usize)) {
                roots.insert(r);
            }
        }
        let mut out: HashMap<usize, u8> = HashMap::new();
        for t in sorted {
            if index.get(&t).is_some_and(|r| roots.contains(r)) {
                let screen = tiles.screen(self.screens[t >> 12][(t >> 8) & 0x0f])?;
                out.insert(t, effects[screen[t & 0xff] as usize]);
            }
        }
        Ok(out)
    }
}

/// Raw tile layouts and tile effects, used only to probe tile-level reachability.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TileData {
    #[serde(default)]
    pub screens: HashMap<RawScreenId, HexBlob>, // 0xf0 tile ids per screen
    #[serde(default)]
    pub tile_effects: HashMap<u8, HexBlob>, // 0x100 effect bytes per tile effects id
    #[serde(default)]
    pub alternates: HashMap<u8, HexBlob>, // 0x20 flagged alternates per tileset id
}

impl TileData {
    fn screen(&self, id: RawScreenId) -> Result<&[u8]> {
        let s = self
            .screens
            .get(&id)
            .with_context(|| format!("No tile data for screen {:02x}", id))?;
        ensure!(s.0.len() >= 0xf0, "Short tile data for screen {:02x}", id);
        Ok(&s.0)
    }

    fn tile_effects(&self, id: u8) -> Result<&[u8]> {
        let e = self
            .tile_effects
            .get(&id)
            .with_context(|| format!("No tile effects {:02x}", id))?;
        ensure!(e.0.len() >= 0x100, "Short tile effects {:02x}", id);
        Ok(&e.0)
    }

    pub fn is_empty(&self) -> bool {
        self.screens.is_empty()
    }
}

/// Tracks which location flags are in use.
#[derive(Clone, Debug, Default)]
pub struct Flags {
    used: HashSet<FlagId>,
}

impl Flags {
    pub fn mark_used(&mut self, flag: FlagId) {
        self.used.insert(flag);
    }

    pub fn is_used(&self, flag: FlagId) -> bool {
        self.used.contains(&flag)
    }

    /// Allocates the first free flag in 0x280..0x300.
    pub fn alloc(&mut self, segment: FlagId) -> Result<FlagId> {
        if segment != 0x200 {
            bail!("Cannot allocate outside segment 0x200: {:x}", segment);
        }
        for flag in 0x280..0x300 {
            if !self.used.contains(&flag) {
                self.used.insert(flag);
                return Ok(flag);
            }
        }
        bail!("No free flags in segment {:x}", segment);
    }
}

#[derive(Serialize, Deserialize, Default)]
pub struct WorldData {
    pub locations: Vec<LocationData>,
    #[serde(default)]
    pub tiles: TileData,
}

/// The slice of ROM state that location-grid editing reads and writes.
#[derive(Clone, Debug, Default)]
pub struct Rom {
    pub locations: HashMap<LocationId, Location>,
    pub flags: Flags,
    pub tiles: TileData,
}

impl Rom {
    pub fn new(locations: Vec<Location>, tiles: TileData) -> Rom {
        let mut flags = Flags::default();
        for loc in &locations {
            for f in &loc.flags {
                flags.mark_used(f.flag);
            }
        }
        flags.mark_used(ALWAYS_TRUE);
        flags.mark_used(CALMED_ANGRY_SEA);
        Rom {
            locations: locations.into_iter().map(|l| (l.id, l)).collect(),
            flags,
            tiles,
        }
    }

    pub fn from_data(data: &WorldData) -> Result<Rom> {
        let mut locations = vec![];
        for l in &data.locations {
            locations.push(
                Location::from_data(l)
                    .with_context(|| format!("Unable to decode location {:02x}", l.id))?,
            );
        }
        Ok(Rom::new(locations, data.tiles.clone()))
    }

    pub fn from_json_str(s: &str) -> Result<Rom> {
        let data: WorldData = serde_json::from_str(s)?;
        Rom::from_data(&data)
    }

    pub fn load(path: &Path) -> Result<Rom> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to load world at path {}", path.display()))?;
        let rom = Rom::from_json_str(&s)
            .with_context(|| format!("Unable to parse world at path {}", path.display()))?;
        info!("Loaded {} locations from {}", rom.locations.len(), path.display());
        Ok(rom)
    }

    pub fn to_data(&self) -> WorldData {
        let mut ids: Vec<&LocationId> = self.locations.keys().collect();
        ids.sort();
        WorldData {
            locations: ids.into_iter().map(|id| self.locations[id].to_data()).collect(),
            tiles: self.tiles.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let s = serde_json::to_string_pretty(&self.to_data())?;
        std::fs::write(path, s)
            .with_context(|| format!("Unable to save world at path {}", path.display()))?;
        Ok(())
    }

    pub fn location(&self, id: LocationId) -> Result<&Location> {
        self.locations
            .get(&id)
            .with_context(|| format!("No location {:02x}", id))
    }

    pub fn location_mut(&mut self, id: LocationId) -> Result<&mut Location> {
        self.locations
            .get_mut(&id)
            .with_context(|| format!("No location {:02x}", id))
    }
}
