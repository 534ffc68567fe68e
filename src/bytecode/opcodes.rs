//! Regex bytecode opcodes
//!
//! This module defines the instruction set consumed by the matcher and
//! rewritten by the optimizer, together with the operand vocabulary of
//! `Compare` instructions. Every value is stored as one [`ByteCodeValue`]
//! unit in the program buffer.
//!
//! [`ByteCodeValue`]: super::ByteCodeValue

use std::fmt;

use super::ByteCodeValue;

/// Regex bytecode opcode enumeration
///
/// Opcodes are grouped by category with reserved ranges. The numeric value
/// is what gets written into the buffer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpCodeId {
    // === Control Flow (0x00-0x0F) ===
    /// Unconditional relative jump: `[op, offset]`
    Jump = 0x00,
    /// Fork, trying the jump target first: `[op, offset]`
    ForkJump = 0x01,
    /// Fork, trying the fall-through first: `[op, offset]`
    ForkStay = 0x02,
    /// Atomic ForkJump, replaces its own backtrack frame: `[op, offset]`
    ForkReplaceJump = 0x03,
    /// Atomic ForkStay, replaces its own backtrack frame: `[op, offset]`
    ForkReplaceStay = 0x04,
    /// Jump guarded by an empty-match check: `[op, offset, checkpoint, form]`
    JumpNonEmpty = 0x05,
    /// Bounded backward jump: `[op, distance, count, id]`
    Repeat = 0x06,
    /// Drop all backtrack frames and fail: `[op]`
    FailForks = 0x07,

    // === Character Tests (0x10-0x1F) ===
    /// Character test: `[op, arg_count, args_size, args...]`
    Compare = 0x10,

    // === Assertions (0x20-0x2F) ===
    /// Start of input: `[op]`
    CheckBegin = 0x20,
    /// End of input: `[op]`
    CheckEnd = 0x21,
    /// Word boundary test: `[op, kind]`
    CheckBoundary = 0x22,

    // === Position Bookkeeping (0x30-0x3F) ===
    /// Push the current position: `[op]`
    Save = 0x30,
    /// Pop and restore a saved position: `[op]`
    Restore = 0x31,
    /// Move the position back: `[op, count]`
    GoBack = 0x32,
    /// Record the position for JumpNonEmpty: `[op, id]`
    Checkpoint = 0x33,

    // === Captures (0x40-0x4F) ===
    /// Open a capture group: `[op, id]`
    SaveLeftCaptureGroup = 0x40,
    /// Close a capture group: `[op, id]`
    SaveRightCaptureGroup = 0x41,
    /// Reset a capture group: `[op, id]`
    ClearCaptureGroup = 0x42,
}

impl OpCodeId {
    /// Decode an opcode from a buffer unit
    pub fn from_value(value: ByteCodeValue) -> Option<Self> {
        let op = match value {
            0x00 => Self::Jump,
            0x01 => Self::ForkJump,
            0x02 => Self::ForkStay,
            0x03 => Self::ForkReplaceJump,
            0x04 => Self::ForkReplaceStay,
            0x05 => Self::JumpNonEmpty,
            0x06 => Self::Repeat,
            0x07 => Self::FailForks,
            0x10 => Self::Compare,
            0x20 => Self::CheckBegin,
            0x21 => Self::CheckEnd,
            0x22 => Self::CheckBoundary,
            0x30 => Self::Save,
            0x31 => Self::Restore,
            0x32 => Self::GoBack,
            0x33 => Self::Checkpoint,
            0x40 => Self::SaveLeftCaptureGroup,
            0x41 => Self::SaveRightCaptureGroup,
            0x42 => Self::ClearCaptureGroup,
            _ => return None,
        };
        Some(op)
    }

    /// Convert opcode to its buffer unit
    #[inline]
    pub fn to_value(self) -> ByteCodeValue {
        self as u8 as ByteCodeValue
    }

    /// Get the mnemonic name for this opcode
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Jump => "Jump",
            Self::ForkJump => "ForkJump",
            Self::ForkStay => "ForkStay",
            Self::ForkReplaceJump => "ForkReplaceJump",
            Self::ForkReplaceStay => "ForkReplaceStay",
            Self::JumpNonEmpty => "JumpNonEmpty",
            Self::Repeat => "Repeat",
            Self::FailForks => "FailForks",
            Self::Compare => "Compare",
            Self::CheckBegin => "CheckBegin",
            Self::CheckEnd => "CheckEnd",
            Self::CheckBoundary => "CheckBoundary",
            Self::Save => "Save",
            Self::Restore => "Restore",
            Self::GoBack => "GoBack",
            Self::Checkpoint => "Checkpoint",
            Self::SaveLeftCaptureGroup => "SaveLeftCaptureGroup",
            Self::SaveRightCaptureGroup => "SaveRightCaptureGroup",
            Self::ClearCaptureGroup => "ClearCaptureGroup",
        }
    }

    /// Size in units for opcodes whose size does not depend on operands.
    ///
    /// Returns `None` for `Compare`, whose size is read from its header.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::FailForks | Self::CheckBegin | Self::CheckEnd | Self::Save | Self::Restore => {
                Some(1)
            }
            Self::Jump
            | Self::ForkJump
            | Self::ForkStay
            | Self::ForkReplaceJump
            | Self::ForkReplaceStay
            | Self::CheckBoundary
            | Self::GoBack
            | Self::Checkpoint
            | Self::SaveLeftCaptureGroup
            | Self::SaveRightCaptureGroup
            | Self::ClearCaptureGroup => Some(2),
            Self::JumpNonEmpty | Self::Repeat => Some(4),
            Self::Compare => None,
        }
    }

    /// Check if this is one of the four fork opcodes
    pub fn is_fork(self) -> bool {
        matches!(
            self,
            Self::ForkJump | Self::ForkStay | Self::ForkReplaceJump | Self::ForkReplaceStay
        )
    }

    /// Check if this opcode carries a relative forward-style offset
    pub fn is_relative_jump(self) -> bool {
        self == Self::Jump || self == Self::JumpNonEmpty || self.is_fork()
    }

    /// Check if this opcode transfers control anywhere but the next instruction
    pub fn is_control_flow(self) -> bool {
        self.is_relative_jump() || self == Self::Repeat
    }

    /// The atomic counterpart of a backtracking fork, if any
    pub fn atomic_form(self) -> Option<Self> {
        match self {
            Self::ForkJump => Some(Self::ForkReplaceJump),
            Self::ForkStay => Some(Self::ForkReplaceStay),
            _ => None,
        }
    }
}

impl fmt::Display for OpCodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Operand type of a `Compare` instruction
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharacterCompareType {
    /// Sentinel, never valid in a program
    Undefined = 0x00,
    /// Toggle the sticky inversion flag
    Inverse = 0x01,
    /// Invert only the next operand
    TemporaryInverse = 0x02,
    /// Any character
    AnyChar = 0x03,
    /// One code point
    Char = 0x04,
    /// Literal run of code points
    String = 0x05,
    /// POSIX-style class
    CharClass = 0x06,
    /// Inclusive code point range, packed `from << 32 | to`
    CharRange = 0x07,
    /// Precompiled sorted range table
    LookupTable = 0x08,
    /// Back-reference to a capture group
    Reference = 0x09,
    /// Unicode binary property
    Property = 0x0a,
    /// Unicode general category
    GeneralCategory = 0x0b,
    /// Unicode script
    Script = 0x0c,
    /// Unicode script extension
    ScriptExtension = 0x0d,
    /// Sentinel left behind by class parsing, never valid in a program
    RangeExpressionDummy = 0x0e,
    /// Open a group whose members are OR'd
    Or = 0x0f,
    /// Open a group whose members are AND'd
    And = 0x10,
    /// Close the innermost Or/And group
    EndAndOr = 0x11,
}

impl CharacterCompareType {
    /// Decode a compare type from a buffer unit
    pub fn from_value(value: ByteCodeValue) -> Option<Self> {
        let ty = match value {
            0x00 => Self::Undefined,
            0x01 => Self::Inverse,
            0x02 => Self::TemporaryInverse,
            0x03 => Self::AnyChar,
            0x04 => Self::Char,
            0x05 => Self::String,
            0x06 => Self::CharClass,
            0x07 => Self::CharRange,
            0x08 => Self::LookupTable,
            0x09 => Self::Reference,
            0x0a => Self::Property,
            0x0b => Self::GeneralCategory,
            0x0c => Self::Script,
            0x0d => Self::ScriptExtension,
            0x0e => Self::RangeExpressionDummy,
            0x0f => Self::Or,
            0x10 => Self::And,
            0x11 => Self::EndAndOr,
            _ => return None,
        };
        Some(ty)
    }

    /// Convert to its buffer unit
    #[inline]
    pub fn to_value(self) -> ByteCodeValue {
        self as u8 as ByteCodeValue
    }

    /// Operand types encoded as a lone type unit
    pub fn has_no_value(self) -> bool {
        matches!(
            self,
            Self::Inverse
                | Self::TemporaryInverse
                | Self::AnyChar
                | Self::Or
                | Self::And
                | Self::EndAndOr
                | Self::Undefined
                | Self::RangeExpressionDummy
        )
    }

    /// Operand types that query the Unicode collaborator
    pub fn is_unicode_property(self) -> bool {
        matches!(
            self,
            Self::Property | Self::GeneralCategory | Self::Script | Self::ScriptExtension
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::Inverse => "Inverse",
            Self::TemporaryInverse => "TemporaryInverse",
            Self::AnyChar => "AnyChar",
            Self::Char => "Char",
            Self::String => "String",
            Self::CharClass => "CharClass",
            Self::CharRange => "CharRange",
            Self::LookupTable => "LookupTable",
            Self::Reference => "Reference",
            Self::Property => "Property",
            Self::GeneralCategory => "GeneralCategory",
            Self::Script => "Script",
            Self::ScriptExtension => "ScriptExtension",
            Self::RangeExpressionDummy => "RangeExpressionDummy",
            Self::Or => "Or",
            Self::And => "And",
            Self::EndAndOr => "EndAndOr",
        }
    }
}

impl fmt::Display for CharacterCompareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// POSIX-style character classes (ASCII semantics)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharClass {
    Alnum = 0,
    Alpha = 1,
    Blank = 2,
    Cntrl = 3,
    Digit = 4,
    Graph = 5,
    Lower = 6,
    Print = 7,
    Punct = 8,
    Space = 9,
    Upper = 10,
    Word = 11,
    Xdigit = 12,
}

impl CharClass {
    pub const ALL: [CharClass; 13] = [
        Self::Alnum,
        Self::Alpha,
        Self::Blank,
        Self::Cntrl,
        Self::Digit,
        Self::Graph,
        Self::Lower,
        Self::Print,
        Self::Punct,
        Self::Space,
        Self::Upper,
        Self::Word,
        Self::Xdigit,
    ];

    pub fn from_value(value: ByteCodeValue) -> Option<Self> {
        Self::ALL.get(usize::try_from(value).ok()?).copied()
    }

    #[inline]
    pub fn to_value(self) -> ByteCodeValue {
        self as u8 as ByteCodeValue
    }

    /// Class membership. Code points outside ASCII never belong to a class.
    pub fn matches(self, cp: u32) -> bool {
        let Ok(byte) = u8::try_from(cp) else {
            return false;
        };
        if !byte.is_ascii() {
            return false;
        }
        match self {
            Self::Alnum => byte.is_ascii_alphanumeric(),
            Self::Alpha => byte.is_ascii_alphabetic(),
            Self::Blank => byte == b' ' || byte == b'\t',
            Self::Cntrl => byte.is_ascii_control(),
            Self::Digit => byte.is_ascii_digit(),
            Self::Graph => byte.is_ascii_graphic(),
            Self::Lower => byte.is_ascii_lowercase(),
            Self::Print => byte.is_ascii_graphic() || byte == b' ',
            Self::Punct => byte.is_ascii_punctuation(),
            // \v is not covered by is_ascii_whitespace
            Self::Space => byte.is_ascii_whitespace() || byte == 0x0b,
            Self::Upper => byte.is_ascii_uppercase(),
            Self::Word => byte.is_ascii_alphanumeric() || byte == b'_',
            Self::Xdigit => byte.is_ascii_hexdigit(),
        }
    }

    /// Whether any code point belongs to both classes
    pub fn intersects(self, other: CharClass) -> bool {
        self == other || (0u32..0x80).any(|cp| self.matches(cp) && other.matches(cp))
    }
}

/// Kind of word-boundary assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundaryKind {
    Word,
    NonWord,
}

impl BoundaryKind {
    pub fn from_value(value: ByteCodeValue) -> Option<Self> {
        match value {
            0 => Some(Self::Word),
            1 => Some(Self::NonWord),
            _ => None,
        }
    }

    pub fn to_value(self) -> ByteCodeValue {
        match self {
            Self::Word => 0,
            Self::NonWord => 1,
        }
    }
}

/// Inclusive range of code points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharRange {
    pub from: u32,
    pub to: u32,
}

impl CharRange {
    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    /// A range covering exactly one code point
    pub fn single(cp: u32) -> Self {
        Self { from: cp, to: cp }
    }

    /// Unpack a range stored as `from << 32 | to`
    pub fn unpack(value: ByteCodeValue) -> Self {
        Self {
            from: (value >> 32) as u32,
            to: (value & 0xffff_ffff) as u32,
        }
    }

    pub fn pack(self) -> ByteCodeValue {
        ((self.from as ByteCodeValue) << 32) | self.to as ByteCodeValue
    }

    #[inline]
    pub fn contains(&self, cp: u32) -> bool {
        self.from <= cp && cp <= self.to
    }

    #[inline]
    pub fn intersects(&self, other: &CharRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    /// Number of code points, saturating on the full range
    pub fn len(&self) -> u32 {
        (self.to - self.from).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

impl fmt::Display for CharRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (char::from_u32(self.from), char::from_u32(self.to)) {
            (Some(a), Some(b)) if !a.is_control() && !b.is_control() => {
                write!(f, "'{}'-'{}'", a, b)
            }
            _ => write!(f, "{:#x}-{:#x}", self.from, self.to),
        }
    }
}

/// ASCII lowercase of a code point, identity elsewhere
#[inline]
pub fn ascii_lower(cp: u32) -> u32 {
    if (b'A' as u32..=b'Z' as u32).contains(&cp) {
        cp + 32
    } else {
        cp
    }
}

/// ASCII uppercase of a code point, identity elsewhere
#[inline]
pub fn ascii_upper(cp: u32) -> u32 {
    if (b'a' as u32..=b'z' as u32).contains(&cp) {
        cp - 32
    } else {
        cp
    }
}
