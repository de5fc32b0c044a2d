use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rx_formats::StackManifest;

#[derive(Parser, Debug)]
#[command(about = "Pack a JSON stack manifest into an .rxa archive", version)]
struct Args {
    /// Stack manifest JSON (variables + cards)
    manifest: PathBuf,

    /// Destination archive path
    #[arg(long, short)]
    out: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let manifest = StackManifest::from_json_file(&args.manifest)?;
    let writer = manifest
        .to_archive()
        .with_context(|| format!("packing {}", args.manifest.display()))?;
    writer.write_to(&args.out)?;
    println!(
        "Packed {} cards ({} resources) into {}",
        manifest.cards.len(),
        writer.len(),
        args.out.display()
    );
    Ok(())
}
