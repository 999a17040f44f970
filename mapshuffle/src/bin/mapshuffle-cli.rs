use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use mapshuffle::exits::Metalocations;
use mapshuffle::rom::Rom;
use mapshuffle_game::{LocationId, ScreenCatalog};
use std::num::ParseIntError;
use std::path::PathBuf;

fn parse_location_id(s: &str) -> Result<LocationId, ParseIntError> {
    LocationId::from_str_radix(s.trim_start_matches("0x"), 16)
}

#[derive(Parser)]
struct Args {
    #[arg(long)]
    catalog: PathBuf,

    #[arg(long)]
    world: PathBuf,

    // Hex location id to show; all parsed locations if omitted
    #[arg(long, value_parser = parse_location_id)]
    location: Option<LocationId>,

    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let catalog = ScreenCatalog::load(&args.catalog)?;
    let mut rom = Rom::load(&args.world)?;
    let metas = Metalocations::parse_all(&rom, &catalog);

    let ids = match args.location {
        Some(id) => vec![id],
        None => metas.ids(),
    };
    for id in ids {
        let meta = metas
            .get(id)
            .with_context(|| format!("Location {:02x} was not parsed", id))?;
        let location = rom.location(id)?;
        println!(
            "{} ({}, {}x{}, {} screens, {} exits)",
            location,
            meta.tileset.name,
            meta.height(),
            meta.width(),
            meta.size(),
            meta.exits().len()
        );
        println!("{}", meta.show());
        println!("{}\n", meta.screen_names());
        if let Err(e) = meta.validate() {
            error!("{}: {:#}", location, e);
        }
    }

    if let Some(output) = &args.output {
        metas.write_all(&mut rom)?;
        rom.save(output)?;
        info!("Wrote {} locations to {}", metas.len(), output.display());
    }
    Ok(())
}
