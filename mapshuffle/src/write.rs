use anyhow::{bail, Result};
use hashbrown::HashSet;
use log::debug;
use mapshuffle_game::util::{partition, set_index};
use mapshuffle_game::{FlagId, FlagKind, LocationId, Pos};

use crate::exits::Metalocations;
use crate::metalocation::Metalocation;
use crate::rom::{
    Entrance, Exit, LocationFlag, Pit, Rom, ALWAYS_TRUE, CALMED_ANGRY_SEA, SEAMLESS_ENTRANCE,
};

// Entrance coordinates past the last tile row belong to the screen below.
fn split_coord(pos: Pos, coord: u32) -> (Pos, u32) {
    if coord > 0xefff {
        (pos + 0x10, coord - 0x10000)
    } else {
        (pos, coord)
    }
}

/// Positions connected to an exit through open screen edges. Walls on other
/// screens can never be reached and need no flag.
fn reachable_screens(meta: &Metalocation, seamless: &HashSet<Pos>) -> HashSet<Pos> {
    let mut groups: Vec<Vec<Pos>> = vec![];
    for &pos in meta.all_pos() {
        if seamless.contains(&pos) {
            continue;
        }
        let scr = meta.get(pos);
        let below = pos + 16;
        let right = pos + 1;
        groups.push(vec![pos]);
        if !seamless.contains(&below) && scr.edge(2) != ' ' {
            groups.push(vec![pos, below]);
        }
        if !seamless.contains(&right) && scr.edge(3) != ' ' {
            groups.push(vec![pos, right]);
        }
    }
    let sets = partition(&groups);
    let index = set_index(&sets);
    let roots: HashSet<usize> = meta
        .exits()
        .into_iter()
        .filter_map(|(pos, _, _)| index.get(&pos).copied())
        .collect();
    meta.all_pos()
        .iter()
        .copied()
        .filter(|pos| index.get(pos).is_some_and(|i| roots.contains(i)))
        .collect()
}

impl<'a> Metalocations<'a> {
    /// Flushes the grid, exits, flags, and pits of location `id` into `rom`.
    ///
    /// Entrances are registered on destination locations as needed.
    pub fn write(&self, id: LocationId, rom: &mut Rom) -> Result<()> {
        let meta = self.meta(id)?;
        let mut exits: Vec<Exit> = vec![];
        let mut seamless: HashSet<Pos> = HashSet::new();
        for (src_pos, src_type, (dest_tile, dest_type)) in meta.exits() {
            let src_screen = meta.get(src_pos);
            let dest_id = dest_tile >> 8;
            let dest_screen = self.meta(dest_id)?.get(dest_tile & 0xff);
            let src_exit = src_screen.find_exit_by_type(src_type);
            let dest_exit = dest_screen.find_exit_by_type(dest_type);
            let (Some(src_exit), Some(dest_exit)) = (src_exit, dest_exit) else {
                bail!(
                    "Missing {} exit:\n  From: {} @ {:02x}:{} {}\n  To:   {} @ {:02x}:{} {}",
                    if src_exit.is_some() { "dest" } else { "source" },
                    rom.location(id)?,
                    src_pos,
                    src_type,
                    src_screen.name,
                    rom.location(dest_id)?,
                    dest_tile & 0xff,
                    dest_type,
                    dest_screen.name
                );
            };
            let entrance = if dest_exit.kind.is_seamless() {
                seamless.insert(src_pos);
                SEAMLESS_ENTRANCE
            } else {
                let (dest_pos, dest_coord) = split_coord(dest_tile & 0xff, dest_exit.entrance);
                rom.location_mut(dest_id)?
                    .find_or_add_entrance(dest_pos, dest_coord)?
            };
            for &tile in &src_exit.exits {
                // Tiles past the last row spill into the screen below.
                let (screen, tile) = if tile & 0xf0 == 0xf0 {
                    (src_pos + 0x10, tile & 0x0f)
                } else {
                    (src_pos, tile)
                };
                exits.push(Exit::of(screen, tile, dest_id, entrance));
            }
        }

        let reachable = reachable_screens(meta, &seamless);
        let mut free_flags: Vec<FlagId> = meta.free_flags.iter().copied().collect();
        free_flags.sort_unstable_by(|a, b| b.cmp(a));
        let mut flags: Vec<LocationFlag> = vec![];
        for &pos in meta.all_pos() {
            let scr = meta.get(pos);
            let flag = if scr.has_wall() && reachable.contains(&pos) {
                match free_flags.pop() {
                    Some(f) => Some(f),
                    None => Some(rom.flags.alloc(0x200)?),
                }
            } else {
                match scr.flag() {
                    Some(FlagKind::Always) => Some(ALWAYS_TRUE),
                    Some(FlagKind::Calm) => Some(CALMED_ANGRY_SEA),
                    Some(FlagKind::CustomFalse) => meta.custom_flags.get(&pos).copied(),
                    Some(FlagKind::CustomTrue) => {
                        Some(meta.custom_flags.get(&pos).copied().unwrap_or(ALWAYS_TRUE))
                    }
                    None => None,
                }
            };
            if let Some(flag) = flag {
                flags.push(LocationFlag::of(pos, flag)?);
            }
        }

        let mut pits: Vec<Pit> = meta
            .pits()
            .iter()
            .map(|(&from, &to)| Pit {
                from_screen: from as u8,
                to_screen: (to & 0xff) as u8,
                dest: (to >> 8) as u8,
            })
            .collect();
        pits.sort_by_key(|p| p.from_screen);

        let location = rom.location_mut(id)?;
        location.exits = exits;
        location.width = meta.width();
        location.height = meta.height();
        location.screens = (0..meta.height())
            .map(|y| {
                (0..meta.width())
                    .map(|x| meta.get(y << 4 | x).sid().raw().unwrap_or(0))
                    .collect()
            })
            .collect();
        location.tileset = meta.tileset.tileset_id;
        location.tile_effects = meta.tileset.effects();
        location.flags = flags;
        location.pits = pits;
        debug!(
            "Wrote {}: {} exits, {} flags",
            location,
            location.exits.len(),
            location.flags.len()
        );
        Ok(())
    }

    /// Points entrance 0 of location `id` back at the exit it originally sat on.
    pub fn write_entrance0(&self, id: LocationId, rom: &mut Rom) -> Result<()> {
        let meta = self.meta(id)?;
        let Some(kind) = meta.entrance0() else {
            return Ok(());
        };
        for (pos, t, _) in meta.exits() {
            if t != kind {
                continue;
            }
            let Some(exit) = meta.get(pos).find_exit_by_type(kind) else {
                continue;
            };
            let (screen, coord) = split_coord(pos, exit.entrance);
            let entrance = Entrance::of(screen, coord);
            let location = rom.location_mut(id)?;
            match location.entrances.first_mut() {
                Some(e) => *e = entrance,
                None => location.entrances.push(entrance),
            }
            return Ok(());
        }
        Ok(())
    }

    /// Writes every location, then restores their entrance 0.
    pub fn write_all(&self, rom: &mut Rom) -> Result<()> {
        for id in self.ids() {
            self.write(id, rom)?;
        }
        for id in self.ids() {
            self.write_entrance0(id, rom)?;
        }
        Ok(())
    }
}
