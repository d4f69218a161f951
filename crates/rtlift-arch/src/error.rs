//! Error types for decoding, rewriting and lifting.

use rtlift_core::Address;
use thiserror::Error;

/// Error type for instruction decoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Unknown opcode encountered.
    #[error("unknown opcode at {address}: {bytes:02x?}")]
    UnknownOpcode { address: Address, bytes: Vec<u8> },

    /// Instruction was truncated (not enough bytes).
    #[error("truncated instruction at {address}: need {needed} bytes, have {available}")]
    Truncated {
        address: Address,
        needed: usize,
        available: usize,
    },

    /// Invalid instruction encoding.
    #[error("invalid encoding at {address}: {reason}")]
    InvalidEncoding { address: Address, reason: String },

    /// Valid encoding this decoder does not model.
    #[error("unsupported instruction at {address}: {reason}")]
    Unsupported { address: Address, reason: String },
}

impl DecodeError {
    /// Creates a new UnknownOpcode error.
    pub fn unknown_opcode(address: Address, bytes: &[u8]) -> Self {
        Self::UnknownOpcode {
            address,
            bytes: bytes.to_vec(),
        }
    }

    /// Creates a new Truncated error.
    pub fn truncated(address: Address, needed: usize, available: usize) -> Self {
        Self::Truncated {
            address,
            needed,
            available,
        }
    }

    /// Creates a new InvalidEncoding error.
    pub fn invalid_encoding(address: Address, reason: impl Into<String>) -> Self {
        Self::InvalidEncoding {
            address,
            reason: reason.into(),
        }
    }

    /// Creates a new Unsupported error.
    pub fn unsupported(address: Address, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            address,
            reason: reason.into(),
        }
    }

    /// Returns the address of the undecodable bytes.
    pub fn address(&self) -> Address {
        match self {
            Self::UnknownOpcode { address, .. }
            | Self::Truncated { address, .. }
            | Self::InvalidEncoding { address, .. }
            | Self::Unsupported { address, .. } => *address,
        }
    }
}

/// Error type for instruction rewriting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RewriteError {
    /// The rewriter has no RTL for this instruction form.
    #[error("unsupported instruction at {address}: {instruction}")]
    UnsupportedInstruction {
        address: Address,
        length: usize,
        instruction: String,
    },

    /// The instruction stream could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl RewriteError {
    /// Returns the address of the offending instruction.
    pub fn address(&self) -> Address {
        match self {
            Self::UnsupportedInstruction { address, .. } => *address,
            Self::Decode(e) => e.address(),
        }
    }

    /// Returns the number of bytes the offending instruction occupies.
    /// Undecodable bytes are skipped one at a time.
    pub fn length(&self) -> usize {
        match self {
            Self::UnsupportedInstruction { length, .. } => *length,
            Self::Decode(_) => 1,
        }
    }
}

/// Error type for architecture selection and configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArchError {
    #[error("unknown architecture: {0}")]
    UnknownArchitecture(String),

    #[error("invalid value for option {key}: {reason}")]
    InvalidOption { key: String, reason: String },
}

impl ArchError {
    /// Creates a new InvalidOption error.
    pub fn invalid_option(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Error type for lifting a procedure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LiftError {
    #[error(transparent)]
    Image(#[from] rtlift_core::Error),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("architecture {architecture} has no {capability}")]
    MissingCapability {
        architecture: String,
        capability: &'static str,
    },
}
