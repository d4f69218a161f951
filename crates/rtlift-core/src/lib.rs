//! # rtlift-core
//!
//! Core abstractions for the rtlift decompiler. This crate defines
//! architecture-neutral types for addresses, registers, flag groups,
//! machine instructions, memory images, procedure frames, and the
//! register-transfer lists (RTL) that lifted code is expressed in.

pub mod address;
pub mod arch;
pub mod error;
pub mod flags;
pub mod frame;
pub mod image;
pub mod instruction;
pub mod operand;
pub mod register;
pub mod rtl;
pub mod segment;
pub mod signature;

pub use address::Address;
pub use arch::{Bitness, Endianness};
pub use error::{Error, Result};
pub use flags::{FlagBit, FlagGroupStorage, FlagTable};
pub use frame::{Frame, Identifier, Storage};
pub use image::{ImageReader, ImageWriter, MemoryArea};
pub use instruction::{Condition, ControlFlow, MachineInstruction, Operation};
pub use operand::{Immediate, MachineOperand, MemoryRef};
pub use register::{RegisterClass, RegisterFile, RegisterStorage};
pub use rtl::{
    BinaryOperator, Constant, Expression, RtlEmitter, RtlInstructionCluster, RtlStatement,
    UnaryOperator,
};
pub use segment::{ImageSegment, SegmentAccess, SegmentMap};
pub use signature::{FunctionSignature, Parameter};
