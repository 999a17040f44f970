use anyhow::{bail, Result};
use hashbrown::{HashMap, HashSet};
use mapshuffle_game::{ConnectionType, FlagId, Pos, Uid};
use rand::{seq::SliceRandom, Rng};

use crate::exits::Metalocations;
use crate::metalocation::{ExitTarget, Metalocation};

impl<'a> Metalocation<'a> {
    /// Carries flags over from `orig`, the grid this one replaces.
    ///
    /// Free flags are copied as is. Custom flags follow their screen variant: each
    /// custom-flag screen here takes a random flag from a screen of the same variant
    /// in `orig`.
    pub fn transfer_flags<R: Rng>(&mut self, orig: &Metalocation, rng: &mut R) -> Result<()> {
        self.free_flags = orig.free_flags.clone();
        let mut customs: HashMap<Uid, Vec<FlagId>> = HashMap::new();
        let mut custom_pos: Vec<(Pos, FlagId)> =
            orig.custom_flags.iter().map(|(&p, &f)| (p, f)).collect();
        custom_pos.sort();
        for (pos, flag) in custom_pos {
            customs.entry(orig.get_uid(pos)).or_default().push(flag);
        }
        let mut uids: Vec<Uid> = customs.keys().copied().collect();
        uids.sort();
        for uid in uids {
            if let Some(flags) = customs.get_mut(&uid) {
                flags.shuffle(rng);
            }
        }
        self.custom_flags.clear();
        for pos in self.all_pos().to_vec() {
            let scr = self.get(pos);
            if !scr.flag().is_some_and(|f| f.is_custom()) {
                continue;
            }
            let Some(flag) = customs.get_mut(&scr.uid).and_then(|v| v.pop()) else {
                bail!("No flag for {} at ${:02x} @{:02x}", scr.name, self.id, pos);
            };
            self.custom_flags.insert(pos, flag);
        }
        Ok(())
    }

    pub fn transfer_pits(&mut self, orig: &Metalocation) {
        self.pits = orig.pits.clone();
    }

    /// Positions able to host each exit type, in random order.
    fn eligible_exits<R: Rng>(&self, rng: &mut R) -> HashMap<ConnectionType, Vec<Pos>> {
        let mut exits: HashMap<ConnectionType, Vec<Pos>> = HashMap::new();
        for &pos in self.all_pos() {
            let (y, x) = (pos >> 4, pos & 0xf);
            for conn in &self.get(pos).data.exits {
                let eligible = match conn.kind {
                    ConnectionType::EdgeTop => y == 0,
                    ConnectionType::EdgeLeft => x == 0,
                    ConnectionType::EdgeBottom => y + 1 >= self.height(),
                    ConnectionType::EdgeRight => x + 1 >= self.width(),
                    _ => true,
                };
                if eligible {
                    exits.entry(conn.kind).or_default().push(pos);
                }
            }
        }
        let mut kinds: Vec<ConnectionType> = exits.keys().copied().collect();
        kinds.sort();
        for kind in kinds {
            if let Some(v) = exits.get_mut(&kind) {
                v.shuffle(rng);
            }
        }
        exits
    }
}

impl<'a> Metalocations<'a> {
    /// Moves every exit of the registered grid for `new.id` onto a random screen of
    /// `new` offering the same connection type, rewiring the far ends to follow.
    ///
    /// Exits between two screens of the same location are moved as a pair.
    pub fn transfer_exits<R: Rng>(&mut self, new: &mut Metalocation<'a>, rng: &mut R) -> Result<()> {
        let id = new.id;
        let orig_exits: Vec<(Pos, ConnectionType, ExitTarget)> = self.meta(id)?.exits();
        let mut eligible = new.eligible_exits(rng);
        let mut self_exits: HashMap<ConnectionType, HashSet<Pos>> = HashMap::new();
        for (opos, kind, (etile, etype)) in orig_exits {
            if self_exits.get(&kind).is_some_and(|s| s.contains(&opos)) {
                continue;
            }
            let Some(pos) = eligible.get_mut(&kind).and_then(|v| v.pop()) else {
                bail!(
                    "Could not transfer exit {} in ${:02x}: no eligible screen\n{}",
                    kind,
                    id,
                    new.show()
                );
            };
            let epos = etile & 0xff;
            if etile >> 8 == id {
                let Some(npos) = eligible.get_mut(&etype).and_then(|v| v.pop()) else {
                    bail!(
                        "Could not transfer exit {} in ${:02x}: no eligible screen for its partner\n{}",
                        etype,
                        id,
                        new.show()
                    );
                };
                new.set_exit_one_way(pos, kind, (id << 8 | npos, etype));
                new.set_exit_one_way(npos, etype, (id << 8 | pos, kind));
                self_exits.entry(etype).or_default().insert(epos);
                continue;
            }
            let Some(ret) = self.meta(etile >> 8)?.get_exit(epos, etype) else {
                bail!(
                    "No exit for ${:02x} at {:02x} {} (from ${:02x} at {:02x} {})",
                    etile >> 8,
                    epos,
                    etype,
                    id,
                    opos,
                    kind
                );
            };
            if ret == (id << 8 | opos, kind) {
                self.set_one_way(etile, etype, (id << 8 | pos, kind))?;
            }
            new.set_exit_one_way(pos, kind, (etile, etype));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metalocation::tests::catalog;
    use mapshuffle_game::ScreenCatalog;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const DOOR: ConnectionType = ConnectionType::Door;

    fn grid<'c>(c: &'c ScreenCatalog, id: usize, names: &[&str]) -> Metalocation<'c> {
        let ts = c.tileset_by_name("cave").unwrap();
        let mut m = Metalocation::new(id, c, ts, 1, names.len());
        for (x, name) in names.iter().enumerate() {
            m.set_internal(x, c.by_name(name).unwrap().uid);
        }
        m
    }

    #[test]
    fn test_transfer_exits() -> Result<()> {
        let c = catalog();
        let mut metas = Metalocations::new();
        metas.insert(grid(&c, 0x10, &["cave_door_s", "cave_stairs_e", "cave_door_s"]));
        metas.insert(grid(&c, 0x11, &["cave_door_s"]));
        metas.connect((0x1000, DOOR), (0x1100, DOOR))?;
        metas.connect((0x1001, DOOR), (0x1002, DOOR))?;

        let mut rng = StdRng::seed_from_u64(0);
        let mut new = grid(&c, 0x10, &["cave_door_s", "cave_door_s", "cave_door_s"]);
        metas.transfer_exits(&mut new, &mut rng)?;
        assert_eq!(new.exits().len(), 3);

        // The outside exit still pairs with location 11.
        let (back, kind) = metas.get(0x11).unwrap().get_exit(0, DOOR).unwrap();
        assert_eq!((back >> 8, kind), (0x10, DOOR));
        assert_eq!(new.get_exit(back & 0xff, DOOR), Some((0x1100, DOOR)));

        // The internal pair points at each other.
        let internal: Vec<Pos> = new
            .exits()
            .into_iter()
            .filter(|(_, _, (dest, _))| dest >> 8 == 0x10)
            .map(|(pos, _, _)| pos)
            .collect();
        assert_eq!(internal.len(), 2);
        assert_eq!(new.get_exit(internal[0], DOOR), Some((0x1000 | internal[1], DOOR)));
        assert_eq!(new.get_exit(internal[1], DOOR), Some((0x1000 | internal[0], DOOR)));
        Ok(())
    }

    #[test]
    fn test_transfer_exits_no_room() -> Result<()> {
        let c = catalog();
        let mut metas = Metalocations::new();
        metas.insert(grid(&c, 0x10, &["cave_door_s", "cave_stairs_e", "cave_door_s"]));
        metas.insert(grid(&c, 0x11, &["cave_door_s"]));
        metas.connect((0x1000, DOOR), (0x1100, DOOR))?;
        metas.connect((0x1001, DOOR), (0x1002, DOOR))?;
        let mut rng = StdRng::seed_from_u64(1);
        let mut new = grid(&c, 0x10, &["cave_door_s", "cave_door_s"]);
        let err = metas.transfer_exits(&mut new, &mut rng).unwrap_err();
        assert!(err.to_string().starts_with("Could not transfer exit door in $10"));
        Ok(())
    }

    #[test]
    fn test_transfer_flags() -> Result<()> {
        let json = r#"{
            "tilesets": [{"name": "cave", "tileset_id": "0x88", "tile_effects": "0xb5"}],
            "screens": {
                "cave_empty": {"id": {"canonical": 128}, "tilesets": ["cave"], "feature": ["empty"]},
                "cave_hall_sealed": {"id": {"canonical": 134}, "tilesets": ["cave"],
                                     "edges": " c c", "flag": "custom:false"},
                "cave_hall_we": {"id": {"canonical": 130}, "tilesets": ["cave"], "edges": " c c"}
            }
        }"#;
        let c = ScreenCatalog::from_json_str(json)?;
        let mut orig = grid(&c, 0x10, &["cave_hall_sealed", "cave_hall_we", "cave_hall_sealed"]);
        orig.custom_flags.insert(0, 0x2a0);
        orig.custom_flags.insert(2, 0x2a1);
        orig.free_flags.insert(0x2b0);
        orig.pits.insert(1, 0x1100);
        let mut rng = StdRng::seed_from_u64(0);

        let mut new = grid(&c, 0x10, &["cave_hall_we", "cave_hall_sealed", "cave_hall_sealed"]);
        new.transfer_flags(&orig, &mut rng)?;
        new.transfer_pits(&orig);
        let mut flags: Vec<FlagId> = new.custom_flags.values().copied().collect();
        flags.sort();
        assert_eq!(flags, vec![0x2a0, 0x2a1]);
        assert!(!new.custom_flags.contains_key(&0));
        assert!(new.free_flags.contains(&0x2b0));
        assert_eq!(new.pits().get(&1), Some(&0x1100));

        let mut more = grid(
            &c,
            0x10,
            &["cave_hall_sealed", "cave_hall_sealed", "cave_hall_sealed"],
        );
        let err = more.transfer_flags(&orig, &mut rng).unwrap_err();
        assert!(err.to_string().starts_with("No flag for cave_hall_sealed"));
        Ok(())
    }
}
