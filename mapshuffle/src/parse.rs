use anyhow::{bail, Context, Result};
use hashbrown::{HashMap, HashSet};
use log::{debug, info, warn};
use mapshuffle_game::{
    ConnectionType, FlagKind, LocationId, Matcher, Metascreen, Metatileset, Pos, RawScreenId,
    ScreenCatalog,
};

use crate::exits::Metalocations;
use crate::metalocation::{Dir, Metalocation};
use crate::rom::{Location, Rom, ALWAYS_TRUE};

// Exits known to point nowhere useful in the vanilla data: location << 16 | pos << 8 | tile.
const UNKNOWN_EXIT_WHITELIST: [usize; 14] = [
    0x01003a, 0x01003b, 0x1440a0, 0x1540a0, 0x1a3060, 0x1a30a0, 0x402000, 0x402030, 0x4180d0,
    0x6087bf, 0xa10326, 0xa10329, 0xa90626, 0xa90629,
];

fn is_known_bad_exit(id: LocationId, pos: Pos, tile: u8) -> bool {
    UNKNOWN_EXIT_WHITELIST.contains(&(id << 16 | pos << 8 | tile as usize))
}

/// Picks the single tileset able to represent every screen of `location`.
pub fn infer_tileset<'a>(
    catalog: &'a ScreenCatalog,
    location: &Location,
) -> Result<&'a Metatileset> {
    let mut tilesets: Vec<&Metatileset> = catalog
        .tilesets
        .iter()
        .filter(|ts| ts.tileset_id == location.tileset && ts.allows_location(location.id))
        .collect();
    let used: HashSet<RawScreenId> = location.screens.iter().flatten().copied().collect();
    let mut used: Vec<RawScreenId> = used.into_iter().collect();
    used.sort();
    for raw in used {
        tilesets.retain(|ts| !ts.get_metascreens(raw).is_empty());
        if tilesets.is_empty() {
            bail!("No tileset for {:02x} in {}", raw, location);
        }
    }
    if tilesets.len() != 1 {
        let names: Vec<&str> = tilesets.iter().map(|ts| ts.name.as_str()).collect();
        bail!(
            "Non-unique tileset for {}: [{}]",
            location,
            names.join(", ")
        );
    }
    Ok(tilesets[0])
}

/// Lazily computed tile reachability, only needed when a variant has a matcher.
struct Reachability<'r> {
    rom: &'r Rom,
    location: &'r Location,
    tiles: Option<HashSet<usize>>,
}

impl<'r> Reachability<'r> {
    fn get(&mut self) -> Result<&HashSet<usize>> {
        if self.tiles.is_none() {
            let mut tiles: HashSet<usize> = self
                .location
                .reachable_tiles(&self.rom.tiles, true)
                .with_context(|| format!("Unable to probe reachability in {}", self.location))?
                .into_keys()
                .collect();
            // Seamless exits count as reachable just inside the screen they lead from.
            for exit in &self.location.exits {
                if !exit.is_seamless() {
                    continue;
                }
                let y = exit.tile() >> 4;
                if y == 0 && exit.screen() >= 16 {
                    tiles.insert((exit.screen() - 16) << 8 | 0x88);
                } else if y == 0xe {
                    tiles.insert(exit.screen() << 8 | 0x88);
                }
            }
            self.tiles = Some(tiles);
        }
        Ok(self.tiles.get_or_insert_with(HashSet::new))
    }
}

fn pick_variant<'a>(
    candidates: &[&'a Metascreen],
    flag: Option<usize>,
    mut reach: impl FnMut(i32, i32) -> Result<bool>,
) -> Result<Option<&'a Metascreen>> {
    let mut matchers: Vec<&Metascreen> = vec![];
    let mut best: Vec<&Metascreen> = vec![];
    for &s in candidates {
        if s.data.matcher.is_some() {
            matchers.push(s);
        } else if (s.flag() == Some(FlagKind::Always) && flag == Some(ALWAYS_TRUE))
            || (s.flag().is_none() && !s.has_wall() && flag.is_none())
        {
            best.insert(0, s);
        } else {
            best.push(s);
        }
    }
    for s in matchers {
        let Some(matcher) = &s.data.matcher else {
            continue;
        };
        // Probe results are collected up front since evaluation takes a plain predicate.
        let mut probes: HashMap<(i32, i32), bool> = HashMap::new();
        if let Matcher::Probes { all, .. } = matcher {
            for p in all {
                probes.insert((p.dy, p.dx), reach(p.dy, p.dx)?);
            }
        }
        let hit = matcher.evaluate(
            |dy, dx| probes.get(&(dy, dx)).copied().unwrap_or(false),
            flag.is_some(),
        );
        if hit {
            return Ok(Some(s));
        }
    }
    Ok(best.first().copied())
}

impl<'a> Metalocation<'a> {
    /// Builds the grid for location `id` from its current layout.
    ///
    /// Resolves raw screen ids to variants, stamps edge exits into the border,
    /// links every resolvable exit, and recovers flag bookkeeping.
    pub fn of(
        rom: &Rom,
        catalog: &'a ScreenCatalog,
        id: LocationId,
        tileset: Option<&'a Metatileset>,
    ) -> Result<Metalocation<'a>> {
        let location = rom.location(id)?;
        let tileset = match tileset {
            Some(ts) => ts,
            None => infer_tileset(catalog, location)?,
        };
        let (height, width) = (location.height, location.width);
        let mut meta = Metalocation::new(id, catalog, tileset, height, width);
        let mut reachability = Reachability {
            rom,
            location,
            tiles: None,
        };

        for y in 0..height {
            for x in 0..width {
                let pos = y << 4 | x;
                let raw = location.screens[y][x];
                let candidates: Vec<&Metascreen> = tileset
                    .get_metascreens(raw)
                    .iter()
                    .map(|&uid| catalog.screen(uid))
                    .collect();
                let screen = match candidates.len() {
                    0 => None,
                    1 => Some(candidates[0]),
                    _ => {
                        let flag = location
                            .flags
                            .iter()
                            .find(|f| f.screen as usize == pos)
                            .map(|f| f.flag);
                        pick_variant(&candidates, flag, |dy, dx| {
                            let x0 = ((x as i32) << 8) + dx;
                            let y0 = ((y as i32) << 8) + dy;
                            if x0 < 0 || y0 < 0 {
                                return Ok(false);
                            }
                            let t = (y0 << 4) & 0xf000 | x0 & 0xf00 | y0 & 0xf0 | (x0 >> 4) & 0xf;
                            Ok(reachability.get()?.contains(&(t as usize)))
                        })?
                    }
                };
                let Some(screen) = screen else {
                    bail!("impossible: no screen for {:02x} in {} @ {:02x}", raw, location, pos);
                };
                meta.set_internal(pos, screen.uid);
                let edges = screen.edge_exits();
                if y == 0 && edges & 1 != 0 {
                    meta.mark_edge_exit(pos, Dir::N);
                }
                if x == 0 && edges & 2 != 0 {
                    meta.mark_edge_exit(pos, Dir::W);
                }
                if y + 1 == height && edges & 4 != 0 {
                    meta.mark_edge_exit(pos, Dir::S);
                }
                if x + 1 == width && edges & 8 != 0 {
                    meta.mark_edge_exit(pos, Dir::E);
                }
            }
        }

        meta.parse_exits(rom, location);

        for pit in &location.pits {
            meta.pits.insert(
                pit.from_screen as Pos,
                (pit.dest as usize) << 8 | pit.to_screen as usize,
            );
        }

        for f in &location.flags {
            let pos = f.screen as Pos;
            if !meta.in_bounds(pos) {
                continue;
            }
            let scr = meta.get(pos);
            match scr.flag() {
                Some(kind) if kind.is_custom() => {
                    meta.custom_flags.insert(pos, f.flag);
                }
                None if scr.has_wall() => {
                    meta.free_flags.insert(f.flag);
                }
                _ => {}
            }
        }
        Ok(meta)
    }

    fn parse_exits(&mut self, rom: &Rom, location: &Location) {
        let single = location.height == 1;
        for exit in &location.exits {
            if exit.dest == 0xff {
                continue;
            }
            let src_pos = exit.screen();
            if !self.in_bounds(src_pos) {
                warn!("Exit outside of {} @ {:02x}", location, src_pos);
                continue;
            }
            let src_screen = self.get(src_pos);
            let Some(src_exit) = src_screen.find_exit_type(exit.tile(), single, exit.is_seamless())
            else {
                if is_known_bad_exit(location.id, src_pos, exit.tile()) {
                    debug!(
                        "Skipping known bad exit {:02x} in {} @ {:02x}",
                        exit.tile(),
                        location,
                        src_pos
                    );
                    continue;
                }
                let all: Vec<String> = src_screen
                    .data
                    .exits
                    .iter()
                    .map(|e| {
                        let tiles: Vec<String> = e.exits.iter().map(|t| format!("{:02x}", t)).collect();
                        format!("{}: {}", e.kind, tiles.join(", "))
                    })
                    .collect();
                warn!(
                    "Unknown exit {:02x}: {} in {} @ {:02x}:\n  {}",
                    exit.tile(),
                    src_screen.name,
                    location,
                    src_pos,
                    all.join("\n  ")
                );
                continue;
            };
            let src_type = src_exit.kind;
            if self.get_exit(src_pos, src_type).is_some() {
                continue;
            }
            let dest_id = exit.dest as LocationId;

            if src_type.is_seamless() {
                let down = src_type == ConnectionType::SeamlessDown;
                let first = src_exit.exits.first().copied().unwrap_or(0) as i32;
                let tile = first + if down { -16 } else { 16 };
                let dest_pos = if tile < 0 {
                    src_pos.checked_sub(16)
                } else if tile >= 0xf0 {
                    Some(src_pos + 16)
                } else {
                    Some(src_pos)
                };
                let Some(dest_pos) = dest_pos else {
                    warn!("Seamless exit off the top of {} @ {:02x}", location, src_pos);
                    continue;
                };
                let dest_type = if down {
                    ConnectionType::SeamlessUp
                } else {
                    ConnectionType::SeamlessDown
                };
                self.set_exit_one_way(src_pos, src_type, (dest_id << 8 | dest_pos, dest_type));
                continue;
            }

            let Some(dest) = rom.locations.get(&dest_id) else {
                warn!("Exit from {} @ {:02x} to missing location {:02x}", location, src_pos, dest_id);
                continue;
            };
            let Some(entrance) = dest.entrances.get((exit.entrance & 0x1f) as usize) else {
                warn!(
                    "Missing entrance {:02x} in {} for exit from {} @ {:02x}",
                    exit.entrance & 0x1f,
                    dest,
                    location,
                    src_pos
                );
                continue;
            };
            let mut dest_pos = entrance.screen();
            let mut dest_coord = entrance.coord();
            if src_type == ConnectionType::Door && entrance.y & 0xf0 == 0 && dest_pos >= 0x10 {
                dest_pos -= 0x10;
                dest_coord += 0x10000;
            }
            let Some(dest_raw) = dest.screen_at(dest_pos) else {
                warn!("Entrance outside of {} @ {:02x}", dest, dest_pos);
                continue;
            };
            let dest_type = self
                .catalog
                .get_by_id(dest_raw, dest.tileset)
                .into_iter()
                .find_map(|s| s.find_entrance_type(dest_coord, dest.height == 1));
            let Some(dest_type) = dest_type else {
                let mut lines: Vec<String> = vec![];
                for s in self.catalog.get_by_id(dest_raw, dest.tileset) {
                    for e in s.data.exits.iter().filter(|e| !e.kind.is_seamless()) {
                        lines.push(format!("  {} {}: {:04x}", s.name, e.kind, e.entrance));
                    }
                }
                warn!(
                    "Bad entrance {:04x}: raw {:02x} in {} @ {:02x}\n{}",
                    dest_coord,
                    dest_raw,
                    dest,
                    dest_pos,
                    lines.join("\n")
                );
                continue;
            };
            self.set_exit_one_way(src_pos, src_type, (dest_id << 8 | dest_pos, dest_type));

            if let Some(e0) = location.entrances.first() {
                if e0.screen() == src_pos {
                    let coord = e0.coord() as i64;
                    let ent = src_exit.entrance as i64;
                    let dx = (ent & 0xff) - (coord & 0xff);
                    let dy = (ent >> 8) - (coord >> 8);
                    if dx * dx + dy * dy <= 0x400 {
                        self.entrance0 = Some(src_type);
                    }
                }
            }
        }
    }
}

impl<'a> Metalocations<'a> {
    /// Parses every location of `rom` that maps onto a unique tileset, logging the rest.
    pub fn parse_all(rom: &Rom, catalog: &'a ScreenCatalog) -> Metalocations<'a> {
        let mut ids: Vec<LocationId> = rom.locations.keys().copied().collect();
        ids.sort();
        let mut metas = Metalocations::new();
        for id in ids {
            match Metalocation::of(rom, catalog, id, None) {
                Ok(meta) => {
                    metas.insert(meta);
                }
                Err(e) => warn!("Skipping location {:02x}: {:#}", id, e),
            }
        }
        info!("Parsed {} of {} locations", metas.len(), rom.locations.len());
        metas
    }
}
