use std::io::{Cursor, Read};

use anyhow::{Context, Result, bail, ensure};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

/// Opcode of the only command with a nested layout.
pub const BRANCH_OPCODE: u16 = 8;
/// Case value that matches when no other case does.
pub const BRANCH_DEFAULT_CASE: u16 = 0xFFFF;

const MAX_NESTING: usize = 16;

/// Decoded card resource: card scripts, hotspots, and the resource lists
/// that scripts activate by index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scripts: Vec<ScriptHandler>,
    #[serde(default)]
    pub hotspots: Vec<HotspotRecord>,
    #[serde(default)]
    pub pictures: Vec<PictureRecord>,
    #[serde(default)]
    pub sound_groups: Vec<SoundGroupRecord>,
    #[serde(default)]
    pub movies: Vec<MovieRecord>,
    #[serde(default)]
    pub buttons: Vec<ButtonRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptHandler {
    pub event: u16,
    pub commands: Vec<ScriptCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptCommand {
    Op {
        opcode: u16,
        #[serde(default)]
        args: Vec<u16>,
    },
    Branch {
        variable: u16,
        cases: Vec<BranchCase>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCase {
    pub value: u16,
    pub commands: Vec<ScriptCommand>,
}

/// Rectangle in authored card coordinates, top-left origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreRectRecord {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotRecord {
    pub id: u16,
    pub rect: CoreRectRecord,
    #[serde(default)]
    pub cursor: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub scripts: Vec<ScriptHandler>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PictureRecord {
    pub index: u16,
    pub bitmap: u16,
    pub rect: CoreRectRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundGroupRecord {
    pub index: u16,
    pub sounds: Vec<u16>,
    #[serde(default)]
    pub volume: u16,
    #[serde(default)]
    pub looping: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub index: u16,
    pub movie: u16,
    pub code: u16,
    #[serde(default)]
    pub left: i16,
    #[serde(default)]
    pub top: i16,
    #[serde(default)]
    pub looping: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonRecord {
    pub index: u16,
    pub enabled: bool,
    pub hotspot_id: u16,
}

impl CardRecord {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        let record = read_card(&mut reader)?;
        let consumed = reader.position() as usize;
        ensure!(
            consumed == bytes.len(),
            "card record has {} trailing bytes",
            bytes.len() - consumed
        );
        Ok(record)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_string(&mut out, &self.name)?;
        write_handlers(&mut out, &self.scripts)?;

        write_count(&mut out, self.hotspots.len())?;
        for hotspot in &self.hotspots {
            out.write_u16::<BigEndian>(hotspot.id)?;
            write_rect(&mut out, hotspot.rect)?;
            out.write_u16::<BigEndian>(hotspot.cursor)?;
            out.write_u16::<BigEndian>(u16::from(hotspot.enabled))?;
            write_string(&mut out, &hotspot.name)?;
            write_handlers(&mut out, &hotspot.scripts)?;
        }

        write_count(&mut out, self.pictures.len())?;
        for picture in &self.pictures {
            out.write_u16::<BigEndian>(picture.index)?;
            out.write_u16::<BigEndian>(picture.bitmap)?;
            write_rect(&mut out, picture.rect)?;
        }

        write_count(&mut out, self.sound_groups.len())?;
        for group in &self.sound_groups {
            out.write_u16::<BigEndian>(group.index)?;
            write_count(&mut out, group.sounds.len())?;
            for sound in &group.sounds {
                out.write_u16::<BigEndian>(*sound)?;
            }
            out.write_u16::<BigEndian>(group.volume)?;
            out.write_u16::<BigEndian>(u16::from(group.looping))?;
        }

        write_count(&mut out, self.movies.len())?;
        for movie in &self.movies {
            out.write_u16::<BigEndian>(movie.index)?;
            out.write_u16::<BigEndian>(movie.movie)?;
            out.write_u16::<BigEndian>(movie.code)?;
            out.write_i16::<BigEndian>(movie.left)?;
            out.write_i16::<BigEndian>(movie.top)?;
            out.write_u16::<BigEndian>(u16::from(movie.looping))?;
        }

        write_count(&mut out, self.buttons.len())?;
        for button in &self.buttons {
            out.write_u16::<BigEndian>(button.index)?;
            out.write_u16::<BigEndian>(u16::from(button.enabled))?;
            out.write_u16::<BigEndian>(button.hotspot_id)?;
        }

        Ok(out)
    }
}

fn read_card<R: Read>(reader: &mut R) -> Result<CardRecord> {
    let name = read_string(reader).context("reading card name")?;
    let scripts = read_handlers(reader).context("reading card scripts")?;

    let hotspot_count = reader.read_u16::<BigEndian>().context("reading hotspot count")?;
    let mut hotspots = Vec::with_capacity(hotspot_count as usize);
    for index in 0..hotspot_count {
        let hotspot = read_hotspot(reader).with_context(|| format!("reading hotspot {index}"))?;
        hotspots.push(hotspot);
    }

    let picture_count = reader.read_u16::<BigEndian>().context("reading PLST count")?;
    let mut pictures = Vec::with_capacity(picture_count as usize);
    for _ in 0..picture_count {
        pictures.push(PictureRecord {
            index: reader.read_u16::<BigEndian>()?,
            bitmap: reader.read_u16::<BigEndian>()?,
            rect: read_rect(reader)?,
        });
    }

    let group_count = reader.read_u16::<BigEndian>().context("reading SLST count")?;
    let mut sound_groups = Vec::with_capacity(group_count as usize);
    for _ in 0..group_count {
        let index = reader.read_u16::<BigEndian>()?;
        let sound_count = reader.read_u16::<BigEndian>()?;
        let mut sounds = Vec::with_capacity(sound_count as usize);
        for _ in 0..sound_count {
            sounds.push(reader.read_u16::<BigEndian>()?);
        }
        sound_groups.push(SoundGroupRecord {
            index,
            sounds,
            volume: reader.read_u16::<BigEndian>()?,
            looping: reader.read_u16::<BigEndian>()? != 0,
        });
    }

    let movie_count = reader.read_u16::<BigEndian>().context("reading MLST count")?;
    let mut movies = Vec::with_capacity(movie_count as usize);
    for _ in 0..movie_count {
        movies.push(MovieRecord {
            index: reader.read_u16::<BigEndian>()?,
            movie: reader.read_u16::<BigEndian>()?,
            code: reader.read_u16::<BigEndian>()?,
            left: reader.read_i16::<BigEndian>()?,
            top: reader.read_i16::<BigEndian>()?,
            looping: reader.read_u16::<BigEndian>()? != 0,
        });
    }

    let button_count = reader.read_u16::<BigEndian>().context("reading BLST count")?;
    let mut buttons = Vec::with_capacity(button_count as usize);
    for _ in 0..button_count {
        buttons.push(ButtonRecord {
            index: reader.read_u16::<BigEndian>()?,
            enabled: reader.read_u16::<BigEndian>()? != 0,
            hotspot_id: reader.read_u16::<BigEndian>()?,
        });
    }

    Ok(CardRecord {
        name,
        scripts,
        hotspots,
        pictures,
        sound_groups,
        movies,
        buttons,
    })
}

fn read_hotspot<R: Read>(reader: &mut R) -> Result<HotspotRecord> {
    let id = reader.read_u16::<BigEndian>()?;
    let rect = read_rect(reader)?;
    let cursor = reader.read_u16::<BigEndian>()?;
    let enabled = reader.read_u16::<BigEndian>()? != 0;
    let name = read_string(reader)?;
    let scripts = read_handlers(reader)?;
    Ok(HotspotRecord {
        id,
        rect,
        cursor,
        name,
        enabled,
        scripts,
    })
}

fn read_handlers<R: Read>(reader: &mut R) -> Result<Vec<ScriptHandler>> {
    let count = reader.read_u16::<BigEndian>()?;
    let mut handlers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let event = reader.read_u16::<BigEndian>()?;
        let commands = read_commands(reader, 0)
            .with_context(|| format!("reading handler for event {event}"))?;
        handlers.push(ScriptHandler { event, commands });
    }
    Ok(handlers)
}

fn read_commands<R: Read>(reader: &mut R, depth: usize) -> Result<Vec<ScriptCommand>> {
    if depth > MAX_NESTING {
        bail!("branch nesting deeper than {MAX_NESTING}");
    }
    let count = reader.read_u16::<BigEndian>()?;
    let mut commands = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let opcode = reader.read_u16::<BigEndian>()?;
        if opcode == BRANCH_OPCODE {
            let variable = reader.read_u16::<BigEndian>()?;
            let case_count = reader.read_u16::<BigEndian>()?;
            let mut cases = Vec::with_capacity(case_count as usize);
            for _ in 0..case_count {
                let value = reader.read_u16::<BigEndian>()?;
                let commands = read_commands(reader, depth + 1)?;
                cases.push(BranchCase { value, commands });
            }
            commands.push(ScriptCommand::Branch { variable, cases });
        } else {
            let argc = reader.read_u16::<BigEndian>()?;
            let mut args = Vec::with_capacity(argc as usize);
            for _ in 0..argc {
                args.push(reader.read_u16::<BigEndian>()?);
            }
            commands.push(ScriptCommand::Op { opcode, args });
        }
    }
    Ok(commands)
}

fn write_handlers(out: &mut Vec<u8>, handlers: &[ScriptHandler]) -> Result<()> {
    write_count(out, handlers.len())?;
    for handler in handlers {
        out.write_u16::<BigEndian>(handler.event)?;
        write_commands(out, &handler.commands)?;
    }
    Ok(())
}

fn write_commands(out: &mut Vec<u8>, commands: &[ScriptCommand]) -> Result<()> {
    write_count(out, commands.len())?;
    for command in commands {
        match command {
            ScriptCommand::Op { opcode, args } => {
                ensure!(
                    *opcode != BRANCH_OPCODE,
                    "branch commands must use the branch layout"
                );
                out.write_u16::<BigEndian>(*opcode)?;
                write_count(out, args.len())?;
                for arg in args {
                    out.write_u16::<BigEndian>(*arg)?;
                }
            }
            ScriptCommand::Branch { variable, cases } => {
                out.write_u16::<BigEndian>(BRANCH_OPCODE)?;
                out.write_u16::<BigEndian>(*variable)?;
                write_count(out, cases.len())?;
                for case in cases {
                    out.write_u16::<BigEndian>(case.value)?;
                    write_commands(out, &case.commands)?;
                }
            }
        }
    }
    Ok(())
}

fn read_rect<R: Read>(reader: &mut R) -> Result<CoreRectRecord> {
    Ok(CoreRectRecord {
        left: reader.read_i16::<BigEndian>()?,
        top: reader.read_i16::<BigEndian>()?,
        right: reader.read_i16::<BigEndian>()?,
        bottom: reader.read_i16::<BigEndian>()?,
    })
}

fn write_rect(out: &mut Vec<u8>, rect: CoreRectRecord) -> Result<()> {
    out.write_i16::<BigEndian>(rect.left)?;
    out.write_i16::<BigEndian>(rect.top)?;
    out.write_i16::<BigEndian>(rect.right)?;
    out.write_i16::<BigEndian>(rect.bottom)?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u8()? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let len = u8::try_from(value.len())
        .with_context(|| format!("name '{value}' longer than 255 bytes"))?;
    out.write_u8(len)?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn write_count(out: &mut Vec<u8>, count: usize) -> Result<()> {
    let count = u16::try_from(count).context("list longer than 65535 entries")?;
    out.write_u16::<BigEndian>(count)?;
    Ok(())
}

/// Decodes a `NAME` resource: the stack's ordered variable-name table.
pub fn decode_name_table(bytes: &[u8]) -> Result<Vec<String>> {
    let mut reader = Cursor::new(bytes);
    let count = reader.read_u16::<BigEndian>().context("reading name count")?;
    let mut names = Vec::with_capacity(count as usize);
    for index in 0..count {
        names.push(read_string(&mut reader).with_context(|| format!("reading name {index}"))?);
    }
    Ok(names)
}

pub fn encode_name_table(names: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_count(&mut out, names.len())?;
    for name in names {
        write_string(&mut out, name)?;
    }
    Ok(out)
}
