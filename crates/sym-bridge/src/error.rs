//! Editor-facing error type
//!
//! Mirrors the negative bridge return codes of the shared contract while
//! staying a normal Rust error. Kernel faults that already latched the
//! header error word pass through wrapped.

use thiserror::Error;

use sym_core::error::{KernelError, codes};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("source id not found")]
    NotFound,

    #[error("table full")]
    TableFull,

    #[error("invalid pointer")]
    InvalidPtr,

    #[error("command ring full; retry next tick")]
    RingFull,

    #[error("zone B allocator exhausted")]
    Exhausted,

    #[error(transparent)]
    Kernel(KernelError),
}

impl BridgeError {
    /// The negative code non-Rust callers of the original contract see.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotFound => codes::BRIDGE_NOT_FOUND,
            Self::TableFull => codes::BRIDGE_TABLE_FULL,
            Self::InvalidPtr => codes::BRIDGE_INVALID_PTR,
            Self::RingFull => codes::RING_FULL,
            Self::Exhausted => codes::ALLOC_EXHAUSTED,
            Self::Kernel(_) => codes::BRIDGE_INVALID_PTR,
        }
    }
}

impl From<KernelError> for BridgeError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::HeapExhausted => Self::Exhausted,
            KernelError::RingFull => Self::RingFull,
            KernelError::InvalidPtr { .. } => Self::InvalidPtr,
            KernelError::TableFull => Self::TableFull,
            other => Self::Kernel(other),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
