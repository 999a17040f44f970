use anyhow::{bail, Context, Result};
use hashbrown::{HashMap, HashSet};
use log::debug;
use mapshuffle_game::{ConnectionType, LocPos, LocationId, Pos, Uid};

use crate::metalocation::{ExitTarget, Metalocation};
use crate::rom::Location;

/// Every parsed location grid, so exit edits can keep both halves in sync.
#[derive(Default)]
pub struct Metalocations<'a> {
    metas: HashMap<LocationId, Metalocation<'a>>,
}

impl<'a> Metalocations<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, meta: Metalocation<'a>) -> Option<Metalocation<'a>> {
        self.metas.insert(meta.id, meta)
    }

    pub fn remove(&mut self, id: LocationId) -> Option<Metalocation<'a>> {
        self.metas.remove(&id)
    }

    pub fn get(&self, id: LocationId) -> Option<&Metalocation<'a>> {
        self.metas.get(&id)
    }

    pub fn get_mut(&mut self, id: LocationId) -> Option<&mut Metalocation<'a>> {
        self.metas.get_mut(&id)
    }

    pub fn contains(&self, id: LocationId) -> bool {
        self.metas.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    /// Location ids in ascending order.
    pub fn ids(&self) -> Vec<LocationId> {
        let mut ids: Vec<LocationId> = self.metas.keys().copied().collect();
        ids.sort();
        ids
    }

    pub(crate) fn meta(&self, id: LocationId) -> Result<&Metalocation<'a>> {
        self.metas
            .get(&id)
            .with_context(|| format!("No metalocation for {:02x}", id))
    }

    pub(crate) fn meta_mut(&mut self, id: LocationId) -> Result<&mut Metalocation<'a>> {
        self.metas
            .get_mut(&id)
            .with_context(|| format!("No metalocation for {:02x}", id))
    }

    pub(crate) fn set_one_way(
        &mut self,
        tile: LocPos,
        kind: ConnectionType,
        target: ExitTarget,
    ) -> Result<()> {
        self.meta_mut(tile >> 8)?
            .set_exit_one_way(tile & 0xff, kind, target);
        Ok(())
    }

    fn delete_one_way(&mut self, tile: LocPos, kind: ConnectionType) -> Result<()> {
        self.meta_mut(tile >> 8)?.delete_exit(tile & 0xff, kind);
        Ok(())
    }

    /// Installs the exit at `pos` of location `id` and its reverse on the destination.
    pub fn set_exit(
        &mut self,
        id: LocationId,
        pos: Pos,
        kind: ConnectionType,
        target: ExitTarget,
    ) -> Result<()> {
        let (dest, dest_type) = target;
        if !self.contains(dest >> 8) {
            bail!("Cannot set two-way exit without meta for {:02x}", dest >> 8);
        }
        self.meta_mut(id)?.set_exit_one_way(pos, kind, target);
        self.set_one_way(dest, dest_type, (id << 8 | pos, kind))
    }

    /// Links `a` and `b` to each other, leaving any previous partners untouched.
    pub fn connect(&mut self, a: ExitTarget, b: ExitTarget) -> Result<()> {
        self.meta(b.0 >> 8)?;
        self.set_one_way(a.0, a.1, b)?;
        self.set_one_way(b.0, b.1, a)
    }

    /// Connects `src` to `dest` (both location << 8 | pos).
    ///
    /// Missing types are inferred from the current exits or the screens. Whatever each
    /// side was linked to before is linked to the other's old partner, so every exit
    /// touched stays paired; a lone previous link is dropped instead.
    pub fn attach(
        &mut self,
        src: LocPos,
        dest: LocPos,
        src_type: Option<ConnectionType>,
        dest_type: Option<ConnectionType>,
    ) -> Result<()> {
        let src_type = match src_type {
            Some(t) => t,
            None => self.meta(src >> 8)?.pick_type_from_exits(src & 0xff)?,
        };
        let dest_type = match dest_type {
            Some(t) => t,
            None => self.meta(dest >> 8)?.pick_type_from_exits(dest & 0xff)?,
        };
        let prev_dest = self.meta(src >> 8)?.get_exit(src & 0xff, src_type);
        let prev_src = self.meta(dest >> 8)?.get_exit(dest & 0xff, dest_type);
        if prev_dest == Some((dest, dest_type)) && prev_src == Some((src, src_type)) {
            return Ok(());
        }
        // A previous link to either endpoint is the reverse of a one-way exit.
        let endpoint = |e: &ExitTarget| *e == (src, src_type) || *e == (dest, dest_type);
        let prev_dest = prev_dest.filter(|e| !endpoint(e));
        let prev_src = prev_src.filter(|e| !endpoint(e));
        for prev in [prev_src, prev_dest].into_iter().flatten() {
            self.meta(prev.0 >> 8)?;
        }
        self.set_one_way(src, src_type, (dest, dest_type))?;
        self.set_one_way(dest, dest_type, (src, src_type))?;
        match (prev_src, prev_dest) {
            (Some(prev_src), Some(prev_dest)) if prev_src != prev_dest => {
                self.set_one_way(prev_src.0, prev_src.1, prev_dest)?;
                self.set_one_way(prev_dest.0, prev_dest.1, prev_src)?;
            }
            (Some(prev), _) | (None, Some(prev)) => {
                self.delete_one_way(prev.0, prev.1)?;
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Moves several exits of location `id` at once: (old pos, old type, new pos, new type).
    ///
    /// Every exit is checked before anything changes. Pairs within the location that
    /// move together keep pointing at each other's new position.
    pub fn move_exits(
        &mut self,
        id: LocationId,
        moves: &[(Pos, ConnectionType, Pos, ConnectionType)],
    ) -> Result<()> {
        let meta = self.meta(id)?;
        let mut remap: HashMap<(Pos, ConnectionType), ExitTarget> = HashMap::new();
        let mut moved: Vec<(Pos, ConnectionType, Pos, ConnectionType, ExitTarget)> = vec![];
        for &(old_pos, old_type, new_pos, new_type) in moves {
            let Some(target) = meta.get_exit(old_pos, old_type) else {
                bail!("No exit at {:02x} {} in {:02x}", old_pos, old_type, id);
            };
            self.meta(target.0 >> 8)?;
            remap.insert((old_pos, old_type), (id << 8 | new_pos, new_type));
            moved.push((old_pos, old_type, new_pos, new_type, target));
        }
        let meta = self.meta_mut(id)?;
        for &(old_pos, old_type, ..) in &moved {
            meta.delete_exit(old_pos, old_type);
        }
        for (_, _, new_pos, new_type, (dest, dest_type)) in moved {
            let partner = (dest >> 8 == id)
                .then(|| remap.get(&(dest & 0xff, dest_type)).copied())
                .flatten();
            let meta = self.meta_mut(id)?;
            match partner {
                Some(partner) => meta.set_exit_one_way(new_pos, new_type, partner),
                None => {
                    meta.set_exit_one_way(new_pos, new_type, (dest, dest_type));
                    self.set_one_way(dest, dest_type, (id << 8 | new_pos, new_type))?;
                }
            }
        }
        Ok(())
    }

    pub fn move_exit(
        &mut self,
        id: LocationId,
        prev: Pos,
        next: Pos,
        prev_type: Option<ConnectionType>,
        next_type: Option<ConnectionType>,
    ) -> Result<()> {
        let meta = self.meta(id)?;
        let prev_type = match prev_type {
            Some(t) => t,
            None => meta.pick_type_from_exits(prev)?,
        };
        let next_type = match next_type {
            Some(t) => t,
            None => meta.pick_type_from_screens(next)?,
        };
        self.move_exits(id, &[(prev, prev_type, next, next_type)])
    }

    /// Hands the exits and pits of every kept screen in `other` over from location `from`.
    ///
    /// `other` is a replacement grid that is not (yet) in the registry. Screens marked
    /// for deletion keep their exits behind.
    pub fn move_exits_and_pits_to(
        &mut self,
        from: LocationId,
        other: &mut Metalocation<'a>,
    ) -> Result<()> {
        let moved: HashSet<Pos> = other
            .all_pos()
            .iter()
            .copied()
            .filter(|&pos| !other.get(pos).data.delete)
            .collect();
        let exits = self.meta(from)?.exits();
        for (pos, kind, (dest, dest_type)) in exits {
            if !moved.contains(&pos) {
                continue;
            }
            let back = (other.id << 8 | pos, kind);
            if dest >> 8 == other.id {
                other.set_exit_one_way(dest & 0xff, dest_type, back);
            } else {
                self.set_one_way(dest, dest_type, back)?;
            }
            other.set_exit_one_way(pos, kind, (dest, dest_type));
            self.meta_mut(from)?.delete_exit(pos, kind);
        }
        let meta = self.meta_mut(from)?;
        let mut pits: Vec<(Pos, LocPos)> = meta
            .pits
            .iter()
            .filter(|(from, _)| moved.contains(*from))
            .map(|(&from, &to)| (from, to))
            .collect();
        pits.sort();
        for (pit_from, to) in pits {
            meta.pits.remove(&pit_from);
            other.pits.insert(pit_from, to);
        }
        Ok(())
    }

    /// Keeps only exits of `a` and `b` whose far end points back at them, copying each
    /// confirmed exit into both. Used for pairs of locations that share one layout.
    /// Seamless exits are left alone.
    pub fn reconcile_exits(&mut self, a: LocationId, b: LocationId) -> Result<()> {
        let mut add: Vec<(LocationId, Pos, ConnectionType, ExitTarget)> = vec![];
        let mut del: Vec<(LocationId, Pos, ConnectionType)> = vec![];
        for (loc, other) in [(a, b), (b, a)] {
            let exits = self.meta(loc)?.exits();
            for (pos, kind, (dest, dest_type)) in exits {
                if dest_type.is_seamless() {
                    continue;
                }
                let reverse = self
                    .get(dest >> 8)
                    .and_then(|m| m.get_exit(dest & 0xff, dest_type));
                if reverse == Some((loc << 8 | pos, kind)) {
                    add.push((other, pos, kind, (dest, dest_type)));
                } else {
                    del.push((loc, pos, kind));
                }
            }
        }
        for (loc, pos, kind) in del {
            debug!("Dropping unconfirmed exit {:02x}:{:02x} {}", loc, pos, kind);
            self.meta_mut(loc)?.delete_exit(pos, kind);
        }
        for (loc, pos, kind, target) in add {
            self.meta_mut(loc)?.set_exit_one_way(pos, kind, target);
        }
        Ok(())
    }

    /// Tiles (location << 16 | pos << 8 | tile) that trigger the exit at `exit`.
    pub fn find_exit_tiles(&self, exit: ExitTarget) -> Result<Vec<usize>> {
        let (tile, kind) = exit;
        let meta = self.meta(tile >> 8)?;
        let scr = meta.get(tile & 0xff);
        let Some(conn) = scr.find_exit_by_type(kind) else {
            bail!("No {} exit on {} in {:02x} @ {:02x}", kind, scr.name, tile >> 8, tile & 0xff);
        };
        Ok(conn
            .exits
            .iter()
            .map(|&t| tile << 8 | t as usize)
            .collect())
    }

    /// Replaces `deleted` columns starting at `left` with `inserted` new ones in
    /// location `id`, moving its exits, spawns, and flags along with the grid.
    ///
    /// Exits inside the deleted range are removed along with their far halves, as
    /// are spawns and flags there. Nothing changes if the splice is rejected.
    pub fn splice_columns(
        &mut self,
        id: LocationId,
        location: &mut Location,
        left: usize,
        deleted: usize,
        inserted: usize,
        screens: &[Vec<Uid>],
    ) -> Result<()> {
        let meta = self.meta(id)?;
        meta.check_splice(left, deleted, inserted, screens)?;
        let delta = inserted as isize - deleted as isize;
        let edge = left + deleted;
        let mut dropped: Vec<(LocPos, ConnectionType, ExitTarget)> = vec![];
        let mut kept: Vec<(Pos, ConnectionType)> = vec![];
        for (pos, kind, target) in meta.exits() {
            let x = pos & 0xf;
            if x >= left && x < edge {
                dropped.push((id << 8 | pos, kind, target));
            } else if x >= edge {
                kept.push((pos, kind));
            }
        }
        // Same-location partners of dropped exits go with them.
        let gone: HashSet<(LocPos, ConnectionType)> = dropped
            .iter()
            .flat_map(|&(tile, kind, far)| [(tile, kind), far])
            .collect();
        let moves: Vec<(Pos, ConnectionType, Pos, ConnectionType)> = kept
            .into_iter()
            .filter(|&(pos, kind)| !gone.contains(&(id << 8 | pos, kind)))
            .map(|(pos, kind)| (pos, kind, (pos as isize + delta) as Pos, kind))
            .collect();

        for (tile, kind, (dest, dest_type)) in dropped {
            debug!("Dropping spliced exit {:06x} {}", tile, kind);
            self.meta_mut(id)?.delete_exit(tile & 0xff, kind);
            if let Some(far) = self.get_mut(dest >> 8) {
                far.delete_exit(dest & 0xff, dest_type);
            }
        }
        self.move_exits(id, &moves)?;
        self.meta_mut(id)?
            .splice_grid_columns(left, deleted, inserted, screens)?;

        let (x0, x1) = (left << 4, edge << 4);
        location.spawns.retain(|s| {
            let keep = (s.xt() as usize) < x0 || s.xt() as usize >= x1;
            if !keep {
                debug!("Dropping spliced spawn {:02x?} in {:02x}", s.data, id);
            }
            keep
        });
        for spawn in &mut location.spawns {
            if spawn.xt() as usize >= x1 {
                spawn.set_xt((spawn.xt() as isize + (delta << 4)) as u8);
            }
        }
        location.flags.retain(|f| {
            let keep = f.xs() < left || f.xs() >= edge;
            if !keep {
                debug!("Dropping spliced flag {:03x} in {:02x}", f.flag, id);
            }
            keep
        });
        for flag in &mut location.flags {
            if flag.xs() >= edge {
                flag.set_xs((flag.xs() as isize + delta) as usize);
            }
        }
        let meta = self.meta(id)?;
        location.width = meta.width();
        location.screens = (0..meta.height())
            .map(|y| {
                (0..meta.width())
                    .map(|x| meta.get(y << 4 | x).sid().raw().unwrap_or(0))
                    .collect()
            })
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metalocation::tests::catalog;
    use crate::metalocation::Dir;
    use crate::rom::{LocationFlag, Spawn};
    use mapshuffle_game::ScreenCatalog;

    const DOOR: ConnectionType = ConnectionType::Door;

    fn registry(c: &ScreenCatalog) -> Metalocations<'_> {
        let ts = c.tileset_by_name("cave").unwrap();
        let door = c.by_name("cave_door_s").unwrap().uid;
        let mut metas = Metalocations::new();
        for id in [0x10, 0x11, 0x12, 0x13] {
            let mut m = Metalocation::new(id, c, ts, 1, 2);
            m.set_internal(0, door);
            m.set_internal(1, door);
            metas.insert(m);
        }
        metas
    }

    fn exit(metas: &Metalocations, tile: LocPos) -> Option<ExitTarget> {
        metas.get(tile >> 8).unwrap().get_exit(tile & 0xff, DOOR)
    }

    #[test]
    fn test_set_exit() -> Result<()> {
        let c = catalog();
        let mut metas = registry(&c);
        metas.set_exit(0x10, 0, DOOR, (0x1101, DOOR))?;
        assert_eq!(exit(&metas, 0x1000), Some((0x1101, DOOR)));
        assert_eq!(exit(&metas, 0x1101), Some((0x1000, DOOR)));
        let err = metas.set_exit(0x10, 0, DOOR, (0x2001, DOOR)).unwrap_err();
        assert_eq!(err.to_string(), "Cannot set two-way exit without meta for 20");
        Ok(())
    }

    #[test]
    fn test_attach() -> Result<()> {
        let c = catalog();
        let mut metas = registry(&c);
        metas.connect((0x1000, DOOR), (0x1100, DOOR))?;
        metas.connect((0x1200, DOOR), (0x1300, DOOR))?;

        // Both endpoints already linked: their old partners pair up.
        metas.attach(0x1000, 0x1200, None, None)?;
        assert_eq!(exit(&metas, 0x1000), Some((0x1200, DOOR)));
        assert_eq!(exit(&metas, 0x1200), Some((0x1000, DOOR)));
        assert_eq!(exit(&metas, 0x1100), Some((0x1300, DOOR)));
        assert_eq!(exit(&metas, 0x1300), Some((0x1100, DOOR)));

        // Repeating the link changes nothing.
        metas.attach(0x1000, 0x1200, Some(DOOR), Some(DOOR))?;
        assert_eq!(exit(&metas, 0x1000), Some((0x1200, DOOR)));

        // One side linked: its old partner loses the dangling link.
        metas.attach(0x1001, 0x1100, None, None)?;
        assert_eq!(exit(&metas, 0x1001), Some((0x1100, DOOR)));
        assert_eq!(exit(&metas, 0x1100), Some((0x1001, DOOR)));
        assert_eq!(exit(&metas, 0x1300), None);
        Ok(())
    }

    #[test]
    fn test_attach_one_way_reverse() -> Result<()> {
        let c = catalog();
        let mut metas = registry(&c);
        metas
            .get_mut(0x11)
            .unwrap()
            .set_exit_one_way(0, DOOR, (0x1000, DOOR));
        metas.attach(0x1000, 0x1100, None, None)?;
        assert_eq!(exit(&metas, 0x1000), Some((0x1100, DOOR)));
        assert_eq!(exit(&metas, 0x1100), Some((0x1000, DOOR)));
        Ok(())
    }

    #[test]
    fn test_attach_through_one_way_exit() -> Result<()> {
        let c = catalog();
        let mut metas = registry(&c);
        metas
            .get_mut(0x10)
            .unwrap()
            .set_exit_one_way(0, DOOR, (0x1100, DOOR));
        metas.connect((0x1100, DOOR), (0x1200, DOOR))?;
        metas.attach(0x1000, 0x1100, None, None)?;
        assert_eq!(exit(&metas, 0x1000), Some((0x1100, DOOR)));
        assert_eq!(exit(&metas, 0x1100), Some((0x1000, DOOR)));
        assert_eq!(exit(&metas, 0x1200), None);
        Ok(())
    }

    #[test]
    fn test_move_exit() -> Result<()> {
        let c = catalog();
        let mut metas = registry(&c);
        metas.connect((0x1000, DOOR), (0x1101, DOOR))?;
        metas.move_exit(0x10, 0, 1, None, None)?;
        assert_eq!(exit(&metas, 0x1000), None);
        assert_eq!(exit(&metas, 0x1001), Some((0x1101, DOOR)));
        assert_eq!(exit(&metas, 0x1101), Some((0x1001, DOOR)));
        assert!(metas.move_exit(0x10, 0, 1, None, None).is_err());
        Ok(())
    }

    #[test]
    fn test_move_exits_swap() -> Result<()> {
        let c = catalog();
        let mut metas = registry(&c);
        metas.connect((0x1000, DOOR), (0x1100, DOOR))?;
        metas.connect((0x1001, DOOR), (0x1101, DOOR))?;
        metas.move_exits(0x10, &[(0, DOOR, 1, DOOR), (1, DOOR, 0, DOOR)])?;
        assert_eq!(exit(&metas, 0x1000), Some((0x1101, DOOR)));
        assert_eq!(exit(&metas, 0x1001), Some((0x1100, DOOR)));
        assert_eq!(exit(&metas, 0x1100), Some((0x1001, DOOR)));
        assert_eq!(exit(&metas, 0x1101), Some((0x1000, DOOR)));
        Ok(())
    }

    #[test]
    fn test_move_exits_within_location() -> Result<()> {
        let c = catalog();
        let mut metas = registry(&c);
        metas.connect((0x1000, DOOR), (0x1001, DOOR))?;
        metas.move_exits(0x10, &[(0, DOOR, 1, DOOR), (1, DOOR, 0, DOOR)])?;
        assert_eq!(exit(&metas, 0x1000), Some((0x1001, DOOR)));
        assert_eq!(exit(&metas, 0x1001), Some((0x1000, DOOR)));

        // A partner left in place is pointed at the moved exit.
        let cave = ConnectionType::Cave;
        metas.move_exits(0x10, &[(1, DOOR, 1, cave)])?;
        assert_eq!(exit(&metas, 0x1000), Some((0x1001, cave)));
        assert_eq!(metas.get(0x10).unwrap().get_exit(1, cave), Some((0x1000, DOOR)));
        assert_eq!(exit(&metas, 0x1001), None);

        // Nothing moves when any exit is missing.
        let err = metas
            .move_exits(0x10, &[(0, DOOR, 1, DOOR), (5, DOOR, 6, DOOR)])
            .unwrap_err();
        assert_eq!(err.to_string(), "No exit at 05 door in 10");
        assert_eq!(exit(&metas, 0x1000), Some((0x1001, cave)));
        assert_eq!(exit(&metas, 0x1001), None);
        Ok(())
    }

    #[test]
    fn test_reconcile_exits() -> Result<()> {
        let c = catalog();
        let mut metas = registry(&c);
        metas.connect((0x1000, DOOR), (0x1200, DOOR))?;
        metas
            .get_mut(0x11)
            .unwrap()
            .set_exit_one_way(1, DOOR, (0x1301, DOOR));
        metas.reconcile_exits(0x10, 0x11)?;
        assert_eq!(exit(&metas, 0x1000), Some((0x1200, DOOR)));
        assert_eq!(exit(&metas, 0x1100), Some((0x1200, DOOR)));
        assert_eq!(exit(&metas, 0x1101), None);
        Ok(())
    }

    #[test]
    fn test_move_exits_and_pits_to() -> Result<()> {
        let c = catalog();
        let mut metas = registry(&c);
        metas.connect((0x1000, DOOR), (0x1100, DOOR))?;
        metas.get_mut(0x10).unwrap().pits.insert(0, 0x1201);
        let ts = c.tileset_by_name("cave").unwrap();
        let mut other = Metalocation::new(0x10, &c, ts, 1, 2);
        other.set_internal(0, c.by_name("cave_door_s").unwrap().uid);
        metas.move_exits_and_pits_to(0x10, &mut other)?;
        assert_eq!(other.get_exit(0, DOOR), Some((0x1100, DOOR)));
        assert_eq!(other.pits().get(&0), Some(&0x1201));
        assert!(metas.get(0x10).unwrap().exits().is_empty());
        metas.insert(other);
        assert_eq!(exit(&metas, 0x1000), Some((0x1100, DOOR)));
        Ok(())
    }

    #[test]
    fn test_find_exit_tiles() -> Result<()> {
        let c = catalog();
        let metas = registry(&c);
        assert_eq!(metas.find_exit_tiles((0x1001, DOOR))?, vec![0x100168]);
        assert!(metas
            .find_exit_tiles((0x1001, ConnectionType::Cave))
            .is_err());
        Ok(())
    }

    fn splice_fixture(c: &ScreenCatalog) -> (Metalocations<'_>, Location) {
        let ts = c.tileset_by_name("cave").unwrap();
        let we = c.by_name("cave_hall_we").unwrap().uid;
        let door = c.by_name("cave_door_s").unwrap().uid;
        let mut metas = Metalocations::new();
        let mut m = Metalocation::new(0x10, c, ts, 1, 3);
        m.set_internal(0, we);
        m.set_internal(1, we);
        m.set_internal(2, door);
        metas.insert(m);
        let mut d = Metalocation::new(0x11, c, ts, 1, 1);
        d.set_internal(0, door);
        metas.insert(d);
        let location = Location {
            id: 0x10,
            width: 3,
            height: 1,
            screens: vec![vec![0x82, 0x82, 0x84]],
            spawns: vec![
                Spawn::from_bytes(&[0x05, 0x04, 0, 1]),
                Spawn::from_bytes(&[0x05, 0x14, 0, 2]),
                Spawn::from_bytes(&[0x05, 0x24, 0, 3]),
            ],
            flags: vec![LocationFlag::from_bytes(&[0x90, 0x02])],
            ..Default::default()
        };
        (metas, location)
    }

    #[test]
    fn test_splice_noop() -> Result<()> {
        let c = catalog();
        let (mut metas, mut location) = splice_fixture(&c);
        metas.connect((0x1002, DOOR), (0x1100, DOOR))?;
        let before = (metas.get(0x10).unwrap().screens.clone(), location.screens.clone());
        metas.splice_columns(0x10, &mut location, 1, 0, 0, &[vec![]])?;
        assert_eq!(metas.get(0x10).unwrap().width(), 3);
        assert_eq!(
            (metas.get(0x10).unwrap().screens.clone(), location.screens.clone()),
            before
        );
        assert_eq!(exit(&metas, 0x1002), Some((0x1100, DOOR)));
        assert_eq!(exit(&metas, 0x1100), Some((0x1002, DOOR)));
        Ok(())
    }

    #[test]
    fn test_splice_delete() -> Result<()> {
        let c = catalog();
        let (mut metas, mut location) = splice_fixture(&c);
        metas.connect((0x1002, DOOR), (0x1100, DOOR))?;
        metas.splice_columns(0x10, &mut location, 1, 1, 0, &[vec![]])?;
        let m = metas.get(0x10).unwrap();
        assert_eq!(m.width(), 2);
        assert_eq!(m.screen_names(), "cave_hall_we cave_door_s");
        assert_eq!(location.screens, vec![vec![0x82, 0x84]]);
        assert_eq!(exit(&metas, 0x1001), Some((0x1100, DOOR)));
        assert_eq!(exit(&metas, 0x1100), Some((0x1001, DOOR)));
        let xts: Vec<u8> = location.spawns.iter().map(|s| s.xt()).collect();
        assert_eq!(xts, vec![0x04, 0x14]);
        assert_eq!(location.flags[0].xs(), 1);
        Ok(())
    }

    #[test]
    fn test_splice_insert() -> Result<()> {
        let c = catalog();
        let (mut metas, mut location) = splice_fixture(&c);
        metas.connect((0x1002, DOOR), (0x1100, DOOR))?;
        let we = c.by_name("cave_hall_we").unwrap().uid;
        metas.splice_columns(0x10, &mut location, 1, 0, 2, &[vec![we, we]])?;
        let m = metas.get(0x10).unwrap();
        assert_eq!(m.width(), 5);
        assert_eq!(m.size(), 5);
        assert_eq!(exit(&metas, 0x1004), Some((0x1100, DOOR)));
        assert_eq!(exit(&metas, 0x1100), Some((0x1004, DOOR)));
        let xts: Vec<u8> = location.spawns.iter().map(|s| s.xt()).collect();
        assert_eq!(xts, vec![0x04, 0x34, 0x44]);
        assert_eq!(location.flags[0].xs(), 4);
        Ok(())
    }

    #[test]
    fn test_splice_moves_pairs_within_location() -> Result<()> {
        let c = catalog();
        let (mut metas, mut location) = splice_fixture(&c);
        metas.connect((0x1001, DOOR), (0x1002, DOOR))?;
        let we = c.by_name("cave_hall_we").unwrap().uid;
        metas.splice_columns(0x10, &mut location, 0, 0, 1, &[vec![we]])?;
        assert_eq!(exit(&metas, 0x1002), Some((0x1003, DOOR)));
        assert_eq!(exit(&metas, 0x1003), Some((0x1002, DOOR)));
        assert_eq!(exit(&metas, 0x1001), None);
        Ok(())
    }

    #[test]
    fn test_splice_drops_pair_across_deleted_columns() -> Result<()> {
        let c = catalog();
        let (mut metas, mut location) = splice_fixture(&c);
        metas.connect((0x1000, DOOR), (0x1002, DOOR))?;
        metas.splice_columns(0x10, &mut location, 0, 1, 0, &[vec![]])?;
        let m = metas.get(0x10).unwrap();
        assert_eq!(m.width(), 2);
        assert!(m.exits().is_empty());
        assert_eq!(location.width, 2);
        let xts: Vec<u8> = location.spawns.iter().map(|s| s.xt()).collect();
        assert_eq!(xts, vec![0x04, 0x14]);
        Ok(())
    }

    #[test]
    fn test_splice_rejected_without_mutation() -> Result<()> {
        let c = catalog();
        let (mut metas, mut location) = splice_fixture(&c);
        metas.connect((0x1002, DOOR), (0x1100, DOOR))?;
        let snapshot = |metas: &Metalocations, location: &Location| {
            (
                metas.get(0x10).unwrap().screens.clone(),
                location.width,
                location.screens.clone(),
                location.spawns.clone(),
                location.flags.clone(),
            )
        };
        let before = snapshot(&metas, &location);
        // One row of screens is needed, not two.
        let we = c.by_name("cave_hall_we").unwrap().uid;
        assert!(metas
            .splice_columns(0x10, &mut location, 0, 1, 1, &[vec![we], vec![we]])
            .is_err());
        assert!(metas
            .splice_columns(0x10, &mut location, 2, 2, 0, &[vec![]])
            .is_err());
        assert_eq!(snapshot(&metas, &location), before);
        assert_eq!(exit(&metas, 0x1002), Some((0x1100, DOOR)));
        assert_eq!(exit(&metas, 0x1100), Some((0x1002, DOOR)));
        Ok(())
    }

    #[test]
    fn test_splice_keeps_west_edge_exit() -> Result<()> {
        let c = catalog();
        let (mut metas, mut location) = splice_fixture(&c);
        metas.get_mut(0x10).unwrap().mark_edge_exit(0x00, Dir::W);
        let we = c.by_name("cave_hall_we").unwrap().uid;
        metas.splice_columns(0x10, &mut location, 1, 0, 1, &[vec![we]])?;
        let m = metas.get(0x10).unwrap();
        assert_eq!(m.width(), 4);
        let west: Vec<bool> = m
            .borders()
            .iter()
            .filter(|b| b.dir == Dir::W)
            .map(|b| b.exit)
            .collect();
        assert_eq!(west, vec![true]);
        Ok(())
    }
}
