use thiserror::Error;

/// Resource errors raised while resolving stacks and cards.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("no archives found for stack '{0}'")]
    StackNotFound(String),
    #[error("card {id} not found in stack '{stack}'")]
    CardNotFound { stack: String, id: u16 },
    #[error("archive error in stack '{stack}': {detail}")]
    Archive { stack: String, detail: String },
    #[error("card {id} in stack '{stack}' is corrupt: {detail}")]
    CorruptCard {
        stack: String,
        id: u16,
        detail: String,
    },
}

/// Failures that abort the running script without touching the engine.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    #[error("opcode {opcode:?} expects {expected} operands, got {actual}")]
    MissingOperands {
        opcode: crate::script::Opcode,
        expected: usize,
        actual: usize,
    },
    #[error("{list} has no record with index {index}")]
    ResourceIndex { list: &'static str, index: u16 },
    #[error("no hotspot with id {0}")]
    UnknownHotspot(u16),
    #[error("variable index {0} is not in the stack name table")]
    UnknownVariable(u16),
    #[error("no movie registered under code {0}")]
    UnknownMovie(u16),
    #[error("render state {0} does not exist")]
    UnknownRenderState(u16),
    #[error("branch opcode without case table")]
    MalformedBranch,
    #[error("script nesting exceeded {0} levels")]
    TooDeep(usize),
    #[error("no active card")]
    NoActiveCard,
    #[error(transparent)]
    Stack(#[from] StackError),
}

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world has been torn down")]
    TornDown,
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Stack(#[from] StackError),
    #[error(transparent)]
    Script(#[from] ScriptError),
}
