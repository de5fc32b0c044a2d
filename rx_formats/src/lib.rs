pub mod archive;
pub mod card;
pub mod manifest;

pub use archive::{ArchiveEntry, ArchiveWriter, ResourceKind, RxArchive};
pub use card::{
    BRANCH_DEFAULT_CASE, BRANCH_OPCODE, BranchCase, ButtonRecord, CardRecord, CoreRectRecord,
    HotspotRecord, MovieRecord, PictureRecord, ScriptCommand, ScriptHandler, SoundGroupRecord,
    decode_name_table, encode_name_table,
};
pub use manifest::{ManifestCard, StackManifest};
