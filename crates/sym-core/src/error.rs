//! Error types for the Symbiont kernel
//!
//! Errors never travel as panics. Fallible operations return `Result`, and
//! the shared header keeps a last-error latch (`KernelFault` as a u32) that
//! any thread can read without unwinding machinery.

use thiserror::Error;

/// Header-level fault codes, latched into the shared error word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KernelFault {
    Ok = 0,
    HeapExhausted = 1,
    SafeZone = 2,
    InvalidPtr = 3,
    KernelPanic = 4,
    LoadFactorWarning = 5,
    FreeListCorrupt = 6,
    UnknownOpcode = 7,
}

impl KernelFault {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::HeapExhausted,
            2 => Self::SafeZone,
            3 => Self::InvalidPtr,
            4 => Self::KernelPanic,
            5 => Self::LoadFactorWarning,
            6 => Self::FreeListCorrupt,
            _ => Self::UnknownOpcode,
        }
    }

    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Tier-3 faults: the kernel does not self-heal from these.
    #[inline]
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::KernelPanic | Self::FreeListCorrupt | Self::UnknownOpcode
        )
    }
}

/// Kernel error type.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    #[error("node heap exhausted")]
    HeapExhausted,

    #[error("edit inside safe zone (tick {tick}, playhead {playhead})")]
    SafeZone { tick: u32, playhead: u32 },

    #[error("invalid pointer {ptr:#x}")]
    InvalidPtr { ptr: u32 },

    #[error("kernel panic: {reason}")]
    KernelPanic { reason: &'static str },

    #[error("identity table past load-factor threshold")]
    LoadFactorWarning,

    #[error("free list corrupt at {ptr:#x}")]
    FreeListCorrupt { ptr: u32 },

    #[error("unknown opcode {opcode}")]
    UnknownOpcode { opcode: u32 },

    #[error("synapse table full")]
    TableFull,

    #[error("synapse chain exceeded step cap")]
    ChainLoop,

    #[error("command ring full")]
    RingFull,

    #[error("ring not initialized")]
    RingNotInitialized,

    #[error("invalid configuration: {field}")]
    BadConfig { field: &'static str },

    #[error("region too small: {actual} bytes, need {required}")]
    RegionTooSmall { actual: u32, required: u32 },

    #[error("bad magic or version")]
    BadHeader,
}

impl KernelError {
    /// The header fault latched alongside this error, if any.
    pub fn fault(&self) -> Option<KernelFault> {
        match self {
            Self::HeapExhausted => Some(KernelFault::HeapExhausted),
            Self::SafeZone { .. } => Some(KernelFault::SafeZone),
            Self::InvalidPtr { .. } => Some(KernelFault::InvalidPtr),
            Self::KernelPanic { .. } => Some(KernelFault::KernelPanic),
            Self::LoadFactorWarning => Some(KernelFault::LoadFactorWarning),
            Self::FreeListCorrupt { .. } => Some(KernelFault::FreeListCorrupt),
            Self::UnknownOpcode { .. } => Some(KernelFault::UnknownOpcode),
            _ => None,
        }
    }
}

/// Result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Negative return-code families shared with non-Rust readers of the region.
pub mod codes {
    /// Bridge-level codes
    pub const BRIDGE_NOT_FOUND: i32 = -1;
    pub const BRIDGE_TABLE_FULL: i32 = -2;
    pub const BRIDGE_INVALID_PTR: i32 = -3;

    /// Synapse allocator codes
    pub const SYN_INVALID_PTR: i32 = -1;
    pub const SYN_TABLE_FULL: i32 = -2;
    pub const SYN_CHAIN_LOOP: i32 = -3;

    /// Local allocator code
    pub const ALLOC_EXHAUSTED: i32 = -1;

    /// Ring codes
    pub const RING_OK: i32 = 0;
    pub const RING_FULL: i32 = -1;
    pub const RING_NOT_INITIALIZED: i32 = -2;
}
