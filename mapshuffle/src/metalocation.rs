use anyhow::{bail, ensure, Result};
use hashbrown::HashMap;
use hashbrown::HashSet;
use mapshuffle_game::{
    ConnectionType, Feature, FeatureMask, FlagId, LocPos, LocationId, Metascreen, Metatileset,
    Pos, RawScreenId, ScreenCatalog, ScreenId, Uid,
};

/// Far end of an exit: (destination location << 8 | destination pos, destination type).
pub type ExitTarget = (LocPos, ConnectionType);

// Storage offsets of the N, W, S, E neighbors.
const DPOS: [isize; 4] = [-16, -1, 16, 1];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dir {
    N = 0,
    W = 1,
    S = 2,
    E = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Border {
    pub pos: Pos,
    pub dir: Dir,
    pub screen: Uid,   // Screen at the edge position
    pub neighbor: Uid, // Screen just outside it
    pub exit: bool,    // Whether the neighbor is the exit sentinel
}

/// One location laid out as a grid of screen variants, plus its half of the exit graph.
///
/// The grid is stored with one padding row above and below the logical area: the
/// screen at `pos` lives at index `pos + 16`. Unfilled cells and padding hold the
/// tileset's empty sentinel; padding next to an exit holds the exit sentinel.
#[derive(Clone, Debug)]
pub struct Metalocation<'a> {
    pub id: LocationId,
    pub catalog: &'a ScreenCatalog,
    pub tileset: &'a Metatileset,
    pub custom_flags: HashMap<Pos, FlagId>,
    pub free_flags: HashSet<FlagId>,
    pub(crate) height: usize,
    pub(crate) width: usize,
    pub(crate) screens: Vec<Uid>,
    pub(crate) exits: HashMap<(Pos, ConnectionType), ExitTarget>,
    pub(crate) features: HashMap<Pos, FeatureMask>,
    // Consolidated screens and the raw id they are counted under
    counted: HashMap<Uid, RawScreenId>,
    pub(crate) counts: Option<HashMap<RawScreenId, usize>>,
    pub(crate) filled: usize,
    pos: Vec<Pos>,
    pub(crate) entrance0: Option<ConnectionType>,
    pub(crate) pits: HashMap<Pos, LocPos>,
}

fn all_pos(height: usize, width: usize) -> Vec<Pos> {
    let mut p = vec![];
    for y in 0..height {
        for x in 0..width {
            p.push(y << 4 | x);
        }
    }
    p
}

fn multiset_add(counts: &mut HashMap<RawScreenId, usize>, id: RawScreenId) {
    *counts.entry(id).or_insert(0) += 1;
}

fn multiset_delete(counts: &mut HashMap<RawScreenId, usize>, id: RawScreenId) {
    if let Some(n) = counts.get_mut(&id) {
        *n -= 1;
        if *n == 0 {
            counts.remove(&id);
        }
    }
}

impl<'a> Metalocation<'a> {
    pub fn new(
        id: LocationId,
        catalog: &'a ScreenCatalog,
        tileset: &'a Metatileset,
        height: usize,
        width: usize,
    ) -> Metalocation<'a> {
        let mut counted = HashMap::new();
        let counts = if tileset.consolidated {
            for uid in tileset.iter() {
                let scr = catalog.screen(uid);
                if let (true, Some(raw)) = (scr.has_feature(Feature::Consolidate), scr.sid().raw())
                {
                    counted.insert(uid, raw);
                }
            }
            Some(HashMap::new())
        } else {
            None
        };
        Metalocation {
            id,
            catalog,
            tileset,
            custom_flags: HashMap::new(),
            free_flags: HashSet::new(),
            height,
            width,
            screens: vec![tileset.empty; (height + 2) << 4],
            exits: HashMap::new(),
            features: HashMap::new(),
            counted,
            counts,
            filled: 0,
            pos: all_pos(height, width),
            entrance0: None,
            pits: HashMap::new(),
        }
    }

    pub fn empty(&self) -> Uid {
        self.tileset.empty
    }

    pub fn get_uid(&self, pos: Pos) -> Uid {
        self.screens.get(pos + 16).copied().unwrap_or(self.tileset.empty)
    }

    pub fn get(&self, pos: Pos) -> &'a Metascreen {
        self.catalog.screen(self.get_uid(pos))
    }

    /// Number of filled (non-empty) cells.
    pub fn size(&self) -> usize {
        self.filled
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn set_width(&mut self, width: usize) {
        self.width = width;
        self.bookkeep();
    }

    pub fn set_height(&mut self, height: usize) {
        self.screens.resize((height + 2) << 4, self.tileset.empty);
        self.height = height;
        self.bookkeep();
    }

    pub fn all_pos(&self) -> &[Pos] {
        &self.pos
    }

    pub fn in_bounds(&self, pos: Pos) -> bool {
        (pos & 15) < self.width && (pos >> 4) < self.height
    }

    pub fn consolidated_counts(&self) -> Option<&HashMap<RawScreenId, usize>> {
        self.counts.as_ref()
    }

    pub fn entrance0(&self) -> Option<ConnectionType> {
        self.entrance0
    }

    pub fn pits(&self) -> &HashMap<Pos, LocPos> {
        &self.pits
    }

    /// Writes `uid` at raw storage index `index`, keeping the fill count and consolidated counts.
    pub(crate) fn set_internal_at(&mut self, index: usize, uid: Uid) {
        let empty = self.tileset.empty;
        let in_bounds = index >= 16 && self.in_bounds(index - 16);
        let prev = self.screens[index];
        if in_bounds && prev != empty {
            self.filled -= 1;
        }
        if in_bounds && uid != empty {
            self.filled += 1;
        }
        self.screens[index] = uid;
        if let (true, Some(counts)) = (in_bounds, &mut self.counts) {
            if let Some(&raw) = self.counted.get(&prev) {
                multiset_delete(counts, raw);
            }
            if let Some(&raw) = self.counted.get(&uid) {
                multiset_add(counts, raw);
            }
        }
    }

    /// Writes `uid` at `pos` without any compatibility checks.
    pub fn set_internal(&mut self, pos: Pos, uid: Uid) {
        self.set_internal_at(pos + 16, uid);
    }

    pub fn set_feature(&mut self, pos: Pos, feature: Feature) {
        *self.features.entry(pos).or_insert(0) |= feature.mask();
    }

    pub fn features(&self, pos: Pos) -> FeatureMask {
        self.features.get(&pos).copied().unwrap_or(0)
    }

    fn neighbor_at(&self, index: isize) -> Uid {
        if index < 0 {
            return self.tileset.empty;
        }
        self.screens
            .get(index as usize)
            .copied()
            .unwrap_or(self.tileset.empty)
    }

    /// Places `uid` at `pos` if it offers every feature required there and fits all
    /// four neighbors. Leaves the grid untouched and returns false otherwise.
    pub fn set(&mut self, pos: Pos, uid: Uid) -> bool {
        let scr = self.catalog.screen(uid);
        if let Some(&features) = self.features.get(&pos) {
            if !scr.has_features(features) {
                return false;
            }
        }
        let t0 = (pos + 16) as isize;
        for delta in DPOS {
            let other = self.neighbor_at(t0 + delta);
            if !self.tileset.check(uid, other, delta) {
                return false;
            }
        }
        self.set_internal(pos, uid);
        true
    }

    /// Overwrites a rectangle of screens starting at `pos`, then verifies it.
    /// `None` leaves a cell unchanged. On a bad neighbor the grid is restored.
    pub fn set2d(&mut self, pos: Pos, screens: &[Vec<Option<Uid>>]) -> Result<()> {
        let height = screens.len();
        let width = screens.iter().map(|r| r.len()).max().unwrap_or(0);
        self.save_excursion(|m| {
            let mut p = pos;
            for row in screens {
                for (dx, scr) in row.iter().enumerate() {
                    if let Some(uid) = scr {
                        m.set_internal(p + dx, *uid);
                    }
                }
                p += 16;
            }
            m.verify(pos, height, width)?;
            Ok(true)
        })?;
        Ok(())
    }

    /// Checks every vertical and horizontal seam touching the rectangle at `pos0`.
    pub fn verify(&self, pos0: Pos, height: usize, width: usize) -> Result<()> {
        let max_y = (self.height + 1) << 4;
        for dy in 0..=height {
            let base = pos0 + 16 + (dy << 4);
            for dx in 0..=width {
                let index = base + dx;
                let Some(&scr) = self.screens.get(index) else {
                    break;
                };
                let above = self.screens[index - 16];
                let left = self.screens[index - 1];
                if (index & 0xf) < self.width && !self.tileset.check(above, scr, 16) {
                    bail!(
                        "bad neighbor {} above {} at ${:02x} @ {:02x}",
                        self.catalog.screen(above).name,
                        self.catalog.screen(scr).name,
                        self.id,
                        index - 16
                    );
                }
                if index < max_y && !self.tileset.check(left, scr, 1) {
                    bail!(
                        "bad neighbor {} left of {} at ${:02x} @ {:02x}",
                        self.catalog.screen(left).name,
                        self.catalog.screen(scr).name,
                        self.id,
                        index - 16
                    );
                }
            }
        }
        Ok(())
    }

    /// Checks every pair of adjacent filled cells.
    pub fn validate(&self) -> Result<()> {
        let empty = self.tileset.empty;
        for &pos in &self.pos {
            let scr = self.get_uid(pos);
            if scr == empty {
                continue;
            }
            let y = pos >> 4;
            let x = pos & 0xf;
            if y > 0 {
                let above = self.get_uid(pos - 16);
                if above != empty && !self.tileset.check(above, scr, 16) {
                    bail!(
                        "bad neighbor {} ({:02x}) above {} ({:02x})",
                        self.catalog.screen(above).name,
                        pos - 16,
                        self.catalog.screen(scr).name,
                        pos
                    );
                }
            }
            if x > 0 {
                let left = self.get_uid(pos - 1);
                if left != empty && !self.tileset.check(left, scr, 1) {
                    bail!(
                        "bad neighbor {} ({:02x}) left of {} ({:02x})",
                        self.catalog.screen(left).name,
                        pos - 1,
                        self.catalog.screen(scr).name,
                        pos
                    );
                }
            }
        }
        Ok(())
    }

    /// Recomputes the position list, fill count, and consolidated counts from the grid.
    pub fn bookkeep(&mut self) {
        self.pos = all_pos(self.height, self.width);
        self.filled = 0;
        let empty = self.tileset.empty;
        let mut counts = self.counts.as_ref().map(|_| HashMap::new());
        for &pos in &self.pos {
            let scr = self.screens[pos + 16];
            if let (Some(counts), Some(&raw)) = (&mut counts, self.counted.get(&scr)) {
                multiset_add(counts, raw);
            }
            if scr != empty {
                self.filled += 1;
            }
        }
        self.counts = counts;
    }

    /// Runs `f` as a transaction over the grid, consolidated counts, fill count and
    /// feature map. They are restored unless `f` returns `Ok(true)`; an error from `f`
    /// is returned after restoring.
    pub fn save_excursion<F>(&mut self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Self) -> Result<bool>,
    {
        let screens = self.screens.clone();
        let counts = self.counts.clone();
        let filled = self.filled;
        let features = self.features.clone();
        let result = f(self);
        if let Ok(true) = result {
            return Ok(true);
        }
        self.screens = screens;
        self.counts = counts;
        self.filled = filled;
        self.features = features;
        result
    }

    /// Replaces `deleted` columns starting at `left` with `inserted` new ones.
    ///
    /// `screens` gives the new columns for each row. Returns the width delta.
    /// Exits and owning-location records are not touched here.
    pub(crate) fn splice_grid_columns(
        &mut self,
        left: usize,
        deleted: usize,
        inserted: usize,
        screens: &[Vec<Uid>],
    ) -> Result<isize> {
        let new_width = self.check_splice(left, deleted, inserted, screens)?;
        let (empty, exit) = (self.tileset.empty, self.tileset.exit);
        let rows = self.height + 2;
        // Column 15 holds the west border of the next row unless the grid fills it.
        let span = if self.width < 16 && new_width < 16 { 15 } else { 16 };
        self.save_excursion(|m| {
            for r in 0..rows {
                let cells = r << 4..(r << 4) + span;
                let row = &m.screens[cells.clone()];
                let mut next: Vec<Uid> = row[..left].to_vec();
                if r >= 1 && r <= screens.len() {
                    next.extend_from_slice(&screens[r - 1]);
                } else {
                    next.extend(std::iter::repeat(empty).take(inserted));
                }
                next.extend_from_slice(&row[(left + deleted).min(span)..]);
                let spill = next.get(span).copied();
                next.resize(span, empty);
                m.screens[cells].copy_from_slice(&next);
                // An east border pushed into column 15 shares it with the next row's west border.
                if spill == Some(exit) {
                    m.screens[(r << 4) + 15] = exit;
                }
            }
            Ok(true)
        })?;
        self.width = new_width;
        self.bookkeep();
        Ok(inserted as isize - deleted as isize)
    }

    /// Rejects a column splice that `splice_grid_columns` cannot apply, returning
    /// the new width otherwise.
    pub(crate) fn check_splice(
        &self,
        left: usize,
        deleted: usize,
        inserted: usize,
        screens: &[Vec<Uid>],
    ) -> Result<usize> {
        ensure!(
            self.features.is_empty(),
            "bad features: cannot splice ${:02x} with required features",
            self.id
        );
        ensure!(
            left + deleted <= self.width,
            "splice {}+{} out of range for width {}",
            left,
            deleted,
            self.width
        );
        ensure!(
            screens.len() == self.height && screens.iter().all(|r| r.len() == inserted),
            "splice needs {} rows of {} screens",
            self.height,
            inserted
        );
        let new_width = self.width + inserted - deleted;
        ensure!(new_width <= 16, "splice would widen ${:02x} past 16", self.id);
        Ok(new_width)
    }

    /// Edge positions with their direction, their screen, and the screen just outside.
    pub fn borders(&self) -> Vec<Border> {
        let exit = self.tileset.exit;
        let mut out = vec![];
        if self.width == 0 || self.height == 0 {
            return out;
        }
        for x in 0..self.width {
            let top = x;
            let bottom = (self.height - 1) << 4 | x;
            let above = self.screens[top];
            let below = self.screens[bottom + 32];
            out.push(Border {
                pos: top,
                dir: Dir::N,
                screen: self.screens[top + 16],
                neighbor: above,
                exit: above == exit,
            });
            out.push(Border {
                pos: bottom,
                dir: Dir::S,
                screen: self.screens[bottom + 16],
                neighbor: below,
                exit: below == exit,
            });
        }
        for y in 0..self.height {
            let left = y << 4;
            let right = left | (self.width - 1);
            let west = self.screens[left + 15];
            let east = self.screens[right + 17];
            out.push(Border {
                pos: left,
                dir: Dir::W,
                screen: self.screens[left + 16],
                neighbor: west,
                exit: west == exit,
            });
            out.push(Border {
                pos: right,
                dir: Dir::E,
                screen: self.screens[right + 16],
                neighbor: east,
                exit: east == exit,
            });
        }
        out
    }

    /// Stamps the exit sentinel just outside `pos` in direction `dir`.
    pub fn mark_edge_exit(&mut self, pos: Pos, dir: Dir) {
        let index = (pos + 16) as isize + DPOS[dir as usize];
        if index >= 0 && (index as usize) < self.screens.len() {
            self.set_internal_at(index as usize, self.tileset.exit);
        }
    }

    ////////////////////////////////////////////////////////////////
    // Exit graph (this location's half)

    pub fn set_exit_one_way(&mut self, pos: Pos, kind: ConnectionType, target: ExitTarget) {
        self.exits.insert((pos, kind), target);
    }

    pub fn delete_exit(&mut self, pos: Pos, kind: ConnectionType) -> Option<ExitTarget> {
        self.exits.remove(&(pos, kind))
    }

    pub fn get_exit(&self, pos: Pos, kind: ConnectionType) -> Option<ExitTarget> {
        self.exits.get(&(pos, kind)).copied()
    }

    /// All exits in (pos, type) order.
    pub fn exits(&self) -> Vec<(Pos, ConnectionType, ExitTarget)> {
        let mut v: Vec<(Pos, ConnectionType, ExitTarget)> = self
            .exits
            .iter()
            .map(|(&(pos, kind), &target)| (pos, kind, target))
            .collect();
        v.sort();
        v
    }

    pub fn exit_types_at(&self, pos: Pos) -> Vec<ConnectionType> {
        let mut v: Vec<ConnectionType> = self
            .exits
            .keys()
            .filter(|(p, _)| *p == pos)
            .map(|&(_, kind)| kind)
            .collect();
        v.sort();
        v
    }

    /// Raw ids of tileset screens that declare an exit of the given type.
    pub fn exit_candidates(&self, kind: ConnectionType) -> Vec<ScreenId> {
        let mut out = vec![];
        for uid in self.tileset.iter() {
            let scr = self.catalog.screen(uid);
            if scr.data.exits.iter().any(|e| e.kind == kind) {
                out.push(scr.sid());
            }
        }
        out
    }

    pub fn try_add_one_of(&mut self, pos: Pos, candidates: &[Uid]) -> bool {
        for &candidate in candidates {
            if self.set(pos, candidate) {
                return true;
            }
        }
        false
    }

    pub fn pick_type_from_exits(&self, pos: Pos) -> Result<ConnectionType> {
        let types = self.exit_types_at(pos);
        match types.len() {
            0 => self.pick_type_from_screens(pos),
            1 => Ok(types[0]),
            _ => bail!("No single type for {:02x}: {:?}", pos, types),
        }
    }

    pub fn pick_type_from_screens(&self, pos: Pos) -> Result<ConnectionType> {
        let types: Vec<ConnectionType> = self.get(pos).data.exits.iter().map(|e| e.kind).collect();
        if types.len() != 1 {
            bail!("No single type for {:02x}: {:?}", pos, types);
        }
        Ok(types[0])
    }

    ////////////////////////////////////////////////////////////////
    // Display

    pub fn show(&self) -> String {
        let mut lines = vec![];
        let header: Vec<String> = (0..self.width).map(|x| format!("{:x}", x)).collect();
        lines.push(format!("   {}", header.join("  ")));
        for y in 0..self.height {
            for r in 0..3 {
                let mut line = if r == 1 {
                    format!("{:x} ", y)
                } else {
                    "  ".to_string()
                };
                for x in 0..self.width {
                    let scr = self.get(y << 4 | x);
                    match scr.icon_row(r) {
                        Some(icon) => line.push_str(icon),
                        None => line.push_str(if r == 1 { " ? " } else { "   " }),
                    }
                }
                lines.push(line);
            }
        }
        lines.join("\n")
    }

    pub fn screen_names(&self) -> String {
        let mut lines = vec![];
        for y in 0..self.height {
            let names: Vec<&str> = (0..self.width)
                .map(|x| self.get(y << 4 | x).name.as_str())
                .collect();
            lines.push(names.join(" "));
        }
        lines.join("\n")
    }
}
