//! Regex bytecode
//!
//! A compiled pattern is a flat [`ByteCode`] buffer of [`ByteCodeValue`]
//! units. This module provides the instruction vocabulary ([`opcodes`]), the
//! decoder ([`instruction`]), the buffer and its emit helpers ([`chunk`]),
//! a reference backtracking [`matcher`] and the [`optimizer`] passes that
//! rewrite a buffer in place.

pub mod chunk;
pub mod instruction;
pub mod matcher;
pub mod opcodes;
pub mod optimizer;

/// One unit of a program buffer
pub type ByteCodeValue = u64;

pub use chunk::{ByteCode, Instructions, TryInstructions};
pub use instruction::{
    decode, CompareArgs, CompareOperand, CompareTypeAndValuePair, DecodeError, DecodeResult,
    Instruction, InstructionKind,
};
pub use matcher::{Match, MatchError, MatchResult, Matcher, MatcherConfig};
pub use opcodes::{BoundaryKind, CharClass, CharRange, CharacterCompareType, OpCodeId};
