use std::path::{Path, PathBuf};

use anyhow::Result;
use mapshuffle::exits::Metalocations;
use mapshuffle::rom::{Entrance, Exit, Rom};
use mapshuffle_game::{ConnectionType, ScreenCatalog};

fn data_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

fn load() -> Result<(ScreenCatalog, Rom)> {
    let catalog = ScreenCatalog::load(&data_path("catalog.json"))?;
    let rom = Rom::load(&data_path("world.json"))?;
    Ok((catalog, rom))
}

#[test]
fn parse_links_edge_exits() -> Result<()> {
    let (catalog, rom) = load()?;
    let metas = Metalocations::parse_all(&rom, &catalog);

    // The odd tileset has no catalog entry and is skipped.
    assert_eq!(metas.ids(), vec![0x10, 0x11]);

    let west = metas.get(0x10).unwrap();
    assert_eq!(west.screen_names(), "cave_exit_w cave_dead_end_w");
    assert_eq!(
        west.exits(),
        vec![(0x00, ConnectionType::EdgeLeft, (0x1100, ConnectionType::EdgeRight))]
    );
    assert_eq!(west.entrance0(), Some(ConnectionType::EdgeLeft));

    let east = metas.get(0x11).unwrap();
    assert_eq!(
        east.get_exit(0x00, ConnectionType::EdgeRight),
        Some((0x1000, ConnectionType::EdgeLeft))
    );
    Ok(())
}

#[test]
fn write_back_reproduces_world() -> Result<()> {
    let (catalog, rom) = load()?;
    let metas = Metalocations::parse_all(&rom, &catalog);
    let mut out = rom.clone();
    metas.write_all(&mut out)?;

    for id in [0x10, 0x11, 0x12] {
        let (a, b) = (rom.location(id)?, out.location(id)?);
        assert_eq!(a.screens, b.screens, "screens of {}", a);
        assert_eq!((a.width, a.height), (b.width, b.height), "size of {}", a);
        assert_eq!((a.tileset, a.tile_effects), (b.tileset, b.tile_effects));
        assert_eq!(a.exits, b.exits, "exits of {}", a);
        assert_eq!(a.entrances, b.entrances, "entrances of {}", a);
        assert!(b.flags.is_empty() && b.pits.is_empty());
    }

    let reloaded = Rom::from_data(&out.to_data())?;
    assert_eq!(
        reloaded.location(0x10)?.exits,
        vec![Exit::of(0x00, 0x70, 0x11, 0), Exit::of(0x00, 0x80, 0x11, 0)]
    );
    assert_eq!(
        reloaded.location(0x11)?.entrances,
        vec![Entrance::of(0x00, 0x80ef)]
    );
    Ok(())
}

#[test]
fn reconnect_after_disconnect() -> Result<()> {
    let (catalog, rom) = load()?;
    let mut metas = Metalocations::parse_all(&rom, &catalog);
    let removed = metas
        .get_mut(0x10)
        .unwrap()
        .delete_exit(0x00, ConnectionType::EdgeLeft);
    assert_eq!(removed, Some((0x1100, ConnectionType::EdgeRight)));

    let mut out = rom.clone();
    metas.write_all(&mut out)?;
    assert!(out.location(0x10)?.exits.is_empty());
    assert_eq!(out.location(0x11)?.exits, rom.location(0x11)?.exits);

    metas.connect(
        (0x1000, ConnectionType::EdgeLeft),
        (0x1100, ConnectionType::EdgeRight),
    )?;
    let mut out = rom.clone();
    metas.write_all(&mut out)?;
    assert_eq!(out.location(0x10)?.exits, rom.location(0x10)?.exits);
    Ok(())
}
