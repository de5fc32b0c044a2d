use std::env;

use anyhow::{Context, Result};
use rx_formats::{CardRecord, ResourceKind, RxArchive, decode_name_table};

fn main() -> Result<()> {
    let path = env::args()
        .nth(1)
        .context("usage: rxa_dump <stack archive>")?;
    let archive = RxArchive::open(&path)?;
    println!(
        "{} entries in {}",
        archive.entries().len(),
        archive.path().display()
    );
    for entry in archive.entries() {
        let bytes = archive.read_entry_bytes(entry);
        let detail = match entry.kind {
            ResourceKind::CARD => match CardRecord::decode(bytes) {
                Ok(card) => format!(
                    "'{}' hotspots={} handlers={}",
                    card.name,
                    card.hotspots.len(),
                    card.scripts.len()
                ),
                Err(err) => format!("undecodable: {err:#}"),
            },
            ResourceKind::NAME => match decode_name_table(bytes) {
                Ok(names) => format!("{} variables", names.len()),
                Err(err) => format!("undecodable: {err:#}"),
            },
            _ => String::new(),
        };
        println!(
            "{kind:<4} {id:>6} {offset:>10} {size:>8}  {detail}",
            kind = entry.kind.as_str(),
            id = entry.id,
            offset = entry.offset,
            size = entry.size
        );
    }
    Ok(())
}
