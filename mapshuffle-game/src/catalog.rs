use std::path::Path;

use anyhow::{bail, Context, Result};
use hashbrown::{HashMap, HashSet};
use log::info;
use serde::Deserialize;

use crate::tileset::TilesetData;
use crate::util::sorted_hashmap_iter;
use crate::{
    IndexedVec, Metascreen, Metatileset, RawScreenId, ScreenData, ScreenId, TilesetIdx, Uid,
};

pub const EXIT_SCREEN_NAME: &str = "exit";

#[derive(Deserialize, Default)]
pub struct CatalogData {
    pub tilesets: Vec<TilesetData>,
    pub screens: HashMap<String, ScreenData>,
}

/// Read-only table of every screen variant and tileset, keyed by name.
///
/// Variant ids are assigned in sorted name order, so the same definitions always
/// compile to the same ids.
#[derive(Debug)]
pub struct ScreenCatalog {
    pub screens: Vec<Metascreen>,
    pub tilesets: Vec<Metatileset>,
    pub screen_isv: IndexedVec<String>,
    pub tileset_isv: IndexedVec<String>,
    pub exit: Uid,
}

#[derive(Default)]
pub struct CatalogBuilder {
    data: CatalogData,
}

impl CatalogBuilder {
    pub fn tileset(mut self, tileset: TilesetData) -> Self {
        self.data.tilesets.push(tileset);
        self
    }

    pub fn screen(mut self, name: &str, data: ScreenData) -> Self {
        self.data.screens.insert(name.to_string(), data);
        self
    }

    pub fn build(self) -> Result<ScreenCatalog> {
        ScreenCatalog::from_data(self.data)
    }
}

impl ScreenCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn load(path: &Path) -> Result<ScreenCatalog> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to load screen catalog at {}", path.display()))?;
        let catalog = Self::from_json_str(&s)
            .with_context(|| format!("Unable to parse screen catalog at {}", path.display()))?;
        info!(
            "Loaded {} screens in {} tilesets from {}",
            catalog.screens.len(),
            catalog.tilesets.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn from_json_str(s: &str) -> Result<ScreenCatalog> {
        let data: CatalogData = serde_json::from_str(s)?;
        Self::from_data(data)
    }

    pub fn from_data(mut data: CatalogData) -> Result<ScreenCatalog> {
        if !data.screens.contains_key(EXIT_SCREEN_NAME) {
            data.screens.insert(
                EXIT_SCREEN_NAME.to_string(),
                ScreenData {
                    id: ScreenId::Alias(0),
                    ..Default::default()
                },
            );
        }

        let mut tileset_isv: IndexedVec<String> = IndexedVec::default();
        for t in &data.tilesets {
            if tileset_isv.index_by_key.contains_key(&t.name) {
                bail!("Duplicate tileset {}", t.name);
            }
            tileset_isv.add(&t.name);
        }

        let mut screen_isv: IndexedVec<String> = IndexedVec::default();
        let mut screens: Vec<Metascreen> = vec![];
        let mut members: Vec<Vec<Uid>> = vec![vec![]; data.tilesets.len()];
        for (name, screen_data) in sorted_hashmap_iter(&data.screens) {
            let uid = screen_isv.add(name);
            for t in &screen_data.tilesets {
                let Some(&idx) = tileset_isv.index_by_key.get(t) else {
                    bail!("Unknown tileset {} for screen {}", t, name);
                };
                members[idx].push(uid);
            }
            screens.push(Metascreen::new(uid, name, screen_data.clone())?);
        }
        let exit = screen_isv.index_by_key[EXIT_SCREEN_NAME];

        let mut tilesets: Vec<Metatileset> = vec![];
        for (idx, t) in data.tilesets.iter().enumerate() {
            let member_screens: Vec<&Metascreen> = members[idx]
                .iter()
                .filter(|&&uid| uid != exit)
                .map(|&uid| &screens[uid])
                .collect();
            let Some(empty) = member_screens.iter().find(|s| s.is_empty()).map(|s| s.uid) else {
                bail!("No empty screen for {}", t.name);
            };
            let lookup = |name: &String| -> Result<Uid> {
                screen_isv
                    .index_by_key
                    .get(name)
                    .copied()
                    .with_context(|| format!("Unknown screen {} in tileset {}", name, t.name))
            };
            let mut banned: [HashSet<(Uid, Uid)>; 2] = Default::default();
            for (a, b) in &t.banned_vertical {
                banned[0].insert((lookup(a)?, lookup(b)?));
            }
            for (a, b) in &t.banned_horizontal {
                banned[1].insert((lookup(a)?, lookup(b)?));
            }
            tilesets.push(Metatileset::new(
                idx,
                t,
                member_screens,
                empty,
                &screens[exit],
                banned,
            ));
        }

        Ok(ScreenCatalog {
            screens,
            tilesets,
            screen_isv,
            tileset_isv,
            exit,
        })
    }

    pub fn screen(&self, uid: Uid) -> &Metascreen {
        &self.screens[uid]
    }

    pub fn by_name(&self, name: &str) -> Option<&Metascreen> {
        self.screen_isv
            .index_by_key
            .get(name)
            .map(|&uid| &self.screens[uid])
    }

    pub fn tileset(&self, idx: TilesetIdx) -> &Metatileset {
        &self.tilesets[idx]
    }

    pub fn tileset_by_name(&self, name: &str) -> Option<&Metatileset> {
        self.tileset_isv
            .index_by_key
            .get(name)
            .map(|&idx| &self.tilesets[idx])
    }

    /// All variants of raw screen `raw` across every tileset sharing the raw tileset id.
    pub fn get_by_id(&self, raw: RawScreenId, tileset_id: u8) -> Vec<&Metascreen> {
        let mut uids: Vec<Uid> = vec![];
        for ts in &self.tilesets {
            if ts.tileset_id != tileset_id {
                continue;
            }
            for &uid in ts.get_metascreens(raw) {
                if !uids.contains(&uid) {
                    uids.push(uid);
                }
            }
        }
        uids.sort();
        uids.into_iter().map(|uid| &self.screens[uid]).collect()
    }
}
