use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info, warn};
use rx_formats::{CardRecord, ResourceKind, RxArchive, decode_name_table};
use serde::{Deserialize, Serialize};

use crate::error::StackError;

/// One open archive belonging to a stack.
pub trait StackArchive: Send + Sync {
    fn label(&self) -> String;
    fn card_bytes(&self, id: u16) -> Option<Vec<u8>>;
    fn card_ids(&self) -> Vec<u16>;
    fn variable_names(&self) -> anyhow::Result<Option<Vec<String>>>;
}

/// Opens the archives that make up a stack. May block on I/O; only the
/// stack loader and synchronous card loads call it.
pub trait ArchiveProvider: Send + Sync {
    fn open_stack(&self, key: &str) -> Result<Vec<Box<dyn StackArchive>>, StackError>;
}

impl StackArchive for RxArchive {
    fn label(&self) -> String {
        self.path().display().to_string()
    }

    fn card_bytes(&self, id: u16) -> Option<Vec<u8>> {
        self.read_resource(ResourceKind::CARD, u32::from(id))
            .map(|bytes| bytes.to_vec())
    }

    fn card_ids(&self) -> Vec<u16> {
        self.ids(ResourceKind::CARD)
            .filter_map(|id| u16::try_from(id).ok())
            .collect()
    }

    fn variable_names(&self) -> anyhow::Result<Option<Vec<String>>> {
        self.read_resource(ResourceKind::NAME, 0)
            .map(decode_name_table)
            .transpose()
    }
}

/// Serves stack `key` from `<key>.rxa` and every `<key>_*.rxa` file under a
/// data root.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn archive_paths(&self, key: &str) -> Result<Vec<PathBuf>, StackError> {
        let prefix = key.to_ascii_lowercase();
        let entries = fs::read_dir(&self.root).map_err(|err| StackError::Archive {
            stack: key.to_string(),
            detail: format!("reading {}: {err}", self.root.display()),
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                let is_archive = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("rxa"))
                    .unwrap_or(false);
                let matches_key = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(|stem| stem_matches_key(&stem.to_ascii_lowercase(), &prefix))
                    .unwrap_or(false);
                is_archive && matches_key
            })
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// `aspit` and `aspit_sounds` belong to stack `aspit`; `aspitx` does not.
fn stem_matches_key(stem: &str, key: &str) -> bool {
    match stem.strip_prefix(key) {
        Some(rest) => rest.is_empty() || rest.starts_with('_'),
        None => false,
    }
}

impl ArchiveProvider for DirectoryProvider {
    fn open_stack(&self, key: &str) -> Result<Vec<Box<dyn StackArchive>>, StackError> {
        let mut opened: Vec<Box<dyn StackArchive>> = Vec::new();
        for path in self.archive_paths(key)? {
            match RxArchive::open(&path) {
                Ok(archive) => opened.push(Box::new(archive)),
                Err(err) => warn!("failed to open {}: {err:#}", path.display()),
            }
        }
        if opened.is_empty() {
            return Err(StackError::StackNotFound(key.to_string()));
        }
        Ok(opened)
    }
}

/// Archive held entirely in memory; useful for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    label: String,
    cards: BTreeMap<u16, Vec<u8>>,
    variables: Option<Vec<String>>,
}

impl MemoryArchive {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_card(mut self, id: u16, record: &CardRecord) -> anyhow::Result<Self> {
        self.cards.insert(id, record.encode()?);
        Ok(self)
    }

    pub fn with_raw_card(mut self, id: u16, bytes: Vec<u8>) -> Self {
        self.cards.insert(id, bytes);
        self
    }

    pub fn with_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

impl StackArchive for MemoryArchive {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn card_bytes(&self, id: u16) -> Option<Vec<u8>> {
        self.cards.get(&id).cloned()
    }

    fn card_ids(&self) -> Vec<u16> {
        self.cards.keys().copied().collect()
    }

    fn variable_names(&self) -> anyhow::Result<Option<Vec<String>>> {
        Ok(self.variables.clone())
    }
}

/// Provider backed by [`MemoryArchive`]s; counts `open_stack` calls.
#[derive(Default)]
pub struct MemoryProvider {
    stacks: BTreeMap<String, MemoryArchive>,
    opens: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack(mut self, key: impl Into<String>, archive: MemoryArchive) -> Self {
        self.stacks.insert(key.into(), archive);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ArchiveProvider for MemoryProvider {
    fn open_stack(&self, key: &str) -> Result<Vec<Box<dyn StackArchive>>, StackError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let archive = self
            .stacks
            .get(key)
            .ok_or_else(|| StackError::StackNotFound(key.to_string()))?;
        Ok(vec![Box::new(archive.clone())])
    }
}

/// A loaded stack: its open archives plus the card directory.
pub struct Stack {
    key: String,
    archives: Vec<Box<dyn StackArchive>>,
    card_ids: Vec<u16>,
    variable_names: Vec<String>,
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("key", &self.key)
            .field("archives", &self.archives.len())
            .field("cards", &self.card_ids.len())
            .finish()
    }
}

impl Stack {
    pub fn load(provider: &dyn ArchiveProvider, key: &str) -> Result<Self, StackError> {
        let archives = provider.open_stack(key)?;
        let mut card_ids: Vec<u16> = archives
            .iter()
            .flat_map(|archive| archive.card_ids())
            .collect();
        card_ids.sort_unstable();
        card_ids.dedup();

        let mut variable_names = Vec::new();
        for archive in &archives {
            let names = archive.variable_names().map_err(|err| StackError::Archive {
                stack: key.to_string(),
                detail: format!("{}: {err:#}", archive.label()),
            })?;
            if let Some(names) = names {
                variable_names = names;
                break;
            }
        }

        Ok(Stack {
            key: key.to_string(),
            archives,
            card_ids,
            variable_names,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn card_ids(&self) -> &[u16] {
        &self.card_ids
    }

    pub fn variable_names(&self) -> &[String] {
        &self.variable_names
    }

    pub fn variable_name(&self, index: u16) -> Option<&str> {
        self.variable_names.get(index as usize).map(String::as_str)
    }

    pub fn card_bytes(&self, id: u16) -> Result<Vec<u8>, StackError> {
        self.archives
            .iter()
            .find_map(|archive| archive.card_bytes(id))
            .ok_or_else(|| StackError::CardNotFound {
                stack: self.key.clone(),
                id,
            })
    }
}

/// Live reference to a card inside a loaded stack.
#[derive(Debug, Clone)]
pub struct CardDescriptor {
    stack: Arc<Stack>,
    id: u16,
}

impl CardDescriptor {
    pub fn new(stack: Arc<Stack>, id: u16) -> Self {
        Self { stack, id }
    }

    pub fn stack(&self) -> &Arc<Stack> {
        &self.stack
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn load_record(&self) -> Result<CardRecord, StackError> {
        let bytes = self.stack.card_bytes(self.id)?;
        CardRecord::decode(&bytes).map_err(|err| StackError::CorruptCard {
            stack: self.stack.key().to_string(),
            id: self.id,
            detail: format!("{err:#}"),
        })
    }

    pub fn simple(&self) -> SimpleCardDescriptor {
        SimpleCardDescriptor::new(self.stack.key(), self.id)
    }
}

impl fmt::Display for CardDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stack.key(), self.id)
    }
}

/// Serializable location datum: stack name and card id, no live references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleCardDescriptor {
    pub stack: String,
    pub id: u16,
}

impl SimpleCardDescriptor {
    pub fn new(stack: impl Into<String>, id: u16) -> Self {
        Self {
            stack: stack.into(),
            id,
        }
    }
}

impl fmt::Display for SimpleCardDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stack, self.id)
    }
}

/// Resolves stack keys to loaded stacks, loading each key at most once.
///
/// Readers take the read side of the active table. A miss takes the
/// creation lock just long enough to fetch the per-key load gate, so loads
/// of different keys never wait on each other.
pub struct StackResolver {
    provider: Arc<dyn ArchiveProvider>,
    active: RwLock<HashMap<String, Arc<Stack>>>,
    creation: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StackResolver {
    pub fn new(provider: Arc<dyn ArchiveProvider>) -> Self {
        Self {
            provider,
            active: RwLock::new(HashMap::new()),
            creation: Mutex::new(HashMap::new()),
        }
    }

    pub fn loaded(&self, key: &str) -> Option<Arc<Stack>> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    pub fn loaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn resolve(&self, key: &str) -> Result<Arc<Stack>, StackError> {
        if let Some(stack) = self.loaded(key) {
            return Ok(stack);
        }

        let gate = {
            let mut creation = self
                .creation
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            creation
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _loading = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(stack) = self.loaded(key) {
            return Ok(stack);
        }

        debug!("loading stack {key}");
        let stack = Arc::new(Stack::load(self.provider.as_ref(), key)?);
        info!(
            "stack {key} loaded ({} cards, {} variables)",
            stack.card_ids().len(),
            stack.variable_names().len()
        );
        Ok(self.publish(stack))
    }

    pub fn resolve_card(&self, location: &SimpleCardDescriptor) -> Result<CardDescriptor, StackError> {
        let stack = self.resolve(&location.stack)?;
        Ok(CardDescriptor::new(stack, location.id))
    }

    fn publish(&self, stack: Arc<Stack>) -> Arc<Stack> {
        let mut active = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = active.get(stack.key()) {
            debug_assert!(false, "stack {} loaded twice", stack.key());
            warn!("discarding duplicate load of stack {}", stack.key());
            return existing.clone();
        }
        active.insert(stack.key().to_string(), stack.clone());
        stack
    }

    /// Drops every cached stack; used by world teardown.
    pub fn clear(&self) {
        self.active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.creation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
