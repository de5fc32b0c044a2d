//! Card script interpretation: the closed opcode set and the interpreter
//! that runs it against the active card.

mod engine;
mod opcode;

pub use engine::{ScriptEngine, MAX_SCRIPT_DEPTH};
pub use opcode::Opcode;
