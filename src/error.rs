use thiserror::Error;

use crate::arena::Addr;

/// Failures of the arena's checked accessors and its capacity guard.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArenaError {
    #[error("allocation of {requested} bytes exceeds arena capacity {capacity}")]
    TooLarge { requested: usize, capacity: usize },
    #[error("null arena address")]
    Null,
    #[error("range {addr:#x}+{len} is outside the live arena region")]
    OutOfBounds { addr: Addr, len: usize },
    #[error("string at {addr:#x} is not valid UTF-8")]
    InvalidUtf8 { addr: Addr },
    #[error("string at {addr:#x} is not nul-terminated")]
    Unterminated { addr: Addr },
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unknown runtime {0:#x}")]
    UnknownRuntime(u32),
    #[error("unknown context {0:#x}")]
    UnknownContext(u32),
    #[error("runtime {0:#x} still has live contexts")]
    RuntimeBusy(u32),
    #[error("registry full")]
    Exhausted,
    #[error("bridge re-entered while a call is in progress")]
    Reentrant,
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("engine error: {0}")]
    Engine(#[from] rquickjs::Error),
}

pub type Result<T, E = BridgeError> = core::result::Result<T, E>;
