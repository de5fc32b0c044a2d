use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveWriter, ResourceKind};
use crate::card::{CardRecord, encode_name_table};

/// JSON authoring form of a stack: the variable-name table plus card records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackManifest {
    #[serde(default)]
    pub variables: Vec<String>,
    pub cards: Vec<ManifestCard>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestCard {
    pub id: u16,
    #[serde(flatten)]
    pub record: CardRecord,
}

impl StackManifest {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading stack manifest {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("parsing stack manifest {}", path.display()))
    }

    pub fn to_archive(&self) -> Result<ArchiveWriter> {
        let mut writer = ArchiveWriter::new();
        writer.add(ResourceKind::NAME, 0, encode_name_table(&self.variables)?);
        let mut seen = BTreeSet::new();
        for card in &self.cards {
            ensure!(seen.insert(card.id), "card {} declared more than once", card.id);
            let bytes = card
                .record
                .encode()
                .with_context(|| format!("encoding card {}", card.id))?;
            writer.add(ResourceKind::CARD, u32::from(card.id), bytes);
        }
        Ok(writer)
    }
}
