//! Instruction decoding
//!
//! Every pass reads the program through [`decode`], which turns the unit at
//! an index into a tagged [`Instruction`] carrying its opcode, its decoded
//! operands and its size. Sizes are always recoverable from the units alone,
//! so any rewrite can recompute offsets without an external table.
//!
//! Decoding a `Compare` walks all of its operands once, so iterating the
//! operands of an already-decoded instruction cannot fail.

use smallvec::SmallVec;

use super::opcodes::{BoundaryKind, CharClass, CharRange, CharacterCompareType, OpCodeId};
use super::ByteCodeValue;
use crate::unicode::{GeneralCategory, Property, Script};

/// Highest valid code point
pub const MAX_CODE_POINT: u32 = 0x10ffff;

/// Errors produced while decoding a program buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The unit at `ip` is not an opcode
    UnknownOpcode { ip: usize, value: ByteCodeValue },
    /// A compare operand has an unknown type
    UnknownCompareType { ip: usize, value: ByteCodeValue },
    /// A sentinel compare type appeared in the operand stream
    SentinelOperand { ip: usize, ty: CharacterCompareType },
    /// The instruction runs past the end of the buffer
    Truncated { ip: usize, needed: usize, available: usize },
    /// The operand count of a Compare does not match its declared size
    CompareSizeMismatch { ip: usize, declared: usize, actual: usize },
    /// An operand value is out of its domain
    InvalidOperand { ip: usize, detail: &'static str },
    /// A jump target is outside the buffer or not on an instruction start
    InvalidJumpTarget { ip: usize, target: isize },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownOpcode { ip, value } => {
                write!(f, "Unknown opcode {:#x} at {:04x}", value, ip)
            }
            Self::UnknownCompareType { ip, value } => {
                write!(f, "Unknown compare type {:#x} at {:04x}", value, ip)
            }
            Self::SentinelOperand { ip, ty } => {
                write!(f, "Sentinel compare type {} at {:04x}", ty, ip)
            }
            Self::Truncated { ip, needed, available } => write!(
                f,
                "Truncated instruction at {:04x}: needs {} units, {} available",
                ip, needed, available
            ),
            Self::CompareSizeMismatch { ip, declared, actual } => write!(
                f,
                "Compare at {:04x} declares {} argument units but its operands use {}",
                ip, declared, actual
            ),
            Self::InvalidOperand { ip, detail } => {
                write!(f, "Invalid operand at {:04x}: {}", ip, detail)
            }
            Self::InvalidJumpTarget { ip, target } => {
                write!(f, "Jump at {:04x} targets {}, which is not an instruction start", ip, target)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl DecodeError {
    /// Index of the offending instruction or operand
    pub fn ip(&self) -> usize {
        match *self {
            Self::UnknownOpcode { ip, .. }
            | Self::UnknownCompareType { ip, .. }
            | Self::SentinelOperand { ip, .. }
            | Self::Truncated { ip, .. }
            | Self::CompareSizeMismatch { ip, .. }
            | Self::InvalidOperand { ip, .. }
            | Self::InvalidJumpTarget { ip, .. } => ip,
        }
    }
}

/// Result type for decoding
pub type DecodeResult<T> = Result<T, DecodeError>;

/// A flat `(type, value)` compare operand
///
/// This is the representation the analyses work on. Value-less operand types
/// carry a zero value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompareTypeAndValuePair {
    pub ty: CharacterCompareType,
    pub value: ByteCodeValue,
}

impl CompareTypeAndValuePair {
    pub fn new(ty: CharacterCompareType, value: ByteCodeValue) -> Self {
        Self { ty, value }
    }

    pub fn char(c: char) -> Self {
        Self::code_point(c as u32)
    }

    pub fn code_point(cp: u32) -> Self {
        Self::new(CharacterCompareType::Char, cp as ByteCodeValue)
    }

    pub fn range(from: char, to: char) -> Self {
        Self::code_point_range(from as u32, to as u32)
    }

    pub fn code_point_range(from: u32, to: u32) -> Self {
        Self::new(CharacterCompareType::CharRange, CharRange::new(from, to).pack())
    }

    pub fn class(class: CharClass) -> Self {
        Self::new(CharacterCompareType::CharClass, class.to_value())
    }

    pub fn reference(group: usize) -> Self {
        Self::new(CharacterCompareType::Reference, group as ByteCodeValue)
    }

    pub fn property(property: Property) -> Self {
        Self::new(CharacterCompareType::Property, property.0 as ByteCodeValue)
    }

    pub fn general_category(category: GeneralCategory) -> Self {
        Self::new(CharacterCompareType::GeneralCategory, category.0 as ByteCodeValue)
    }

    pub fn script(script: Script) -> Self {
        Self::new(CharacterCompareType::Script, script.0 as ByteCodeValue)
    }

    pub fn script_extension(script: Script) -> Self {
        Self::new(CharacterCompareType::ScriptExtension, script.0 as ByteCodeValue)
    }

    pub fn marker(ty: CharacterCompareType) -> Self {
        Self::new(ty, 0)
    }

    pub fn inverse() -> Self {
        Self::marker(CharacterCompareType::Inverse)
    }

    pub fn temporary_inverse() -> Self {
        Self::marker(CharacterCompareType::TemporaryInverse)
    }

    pub fn any_char() -> Self {
        Self::marker(CharacterCompareType::AnyChar)
    }

    /// The range this operand tests, for Char and CharRange operands
    pub fn char_range(&self) -> Option<CharRange> {
        match self.ty {
            CharacterCompareType::Char => Some(CharRange::single(self.value as u32)),
            CharacterCompareType::CharRange => Some(CharRange::unpack(self.value)),
            _ => None,
        }
    }

    /// Append the buffer encoding of this operand.
    ///
    /// String and LookupTable operands have multi-unit encodings and cannot
    /// be expressed as a pair; they are written through [`CompareOperand`].
    pub fn encode_into(&self, out: &mut Vec<ByteCodeValue>) {
        out.push(self.ty.to_value());
        if !self.ty.has_no_value() {
            out.push(self.value);
        }
    }
}

/// Fully decoded compare operand borrowing multi-unit payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOperand<'a> {
    Inverse,
    TemporaryInverse,
    AnyChar,
    Char(u32),
    /// Code points of a literal run
    String(&'a [ByteCodeValue]),
    CharClass(CharClass),
    CharRange(CharRange),
    /// Packed ranges: case-sensitive table, then its insensitive shadow
    LookupTable {
        sensitive: &'a [ByteCodeValue],
        insensitive: &'a [ByteCodeValue],
    },
    Reference(usize),
    Property(Property),
    GeneralCategory(GeneralCategory),
    Script(Script),
    ScriptExtension(Script),
    Or,
    And,
    EndAndOr,
}

impl CompareOperand<'_> {
    pub fn compare_type(&self) -> CharacterCompareType {
        match self {
            Self::Inverse => CharacterCompareType::Inverse,
            Self::TemporaryInverse => CharacterCompareType::TemporaryInverse,
            Self::AnyChar => CharacterCompareType::AnyChar,
            Self::Char(_) => CharacterCompareType::Char,
            Self::String(_) => CharacterCompareType::String,
            Self::CharClass(_) => CharacterCompareType::CharClass,
            Self::CharRange(_) => CharacterCompareType::CharRange,
            Self::LookupTable { .. } => CharacterCompareType::LookupTable,
            Self::Reference(_) => CharacterCompareType::Reference,
            Self::Property(_) => CharacterCompareType::Property,
            Self::GeneralCategory(_) => CharacterCompareType::GeneralCategory,
            Self::Script(_) => CharacterCompareType::Script,
            Self::ScriptExtension(_) => CharacterCompareType::ScriptExtension,
            Self::Or => CharacterCompareType::Or,
            Self::And => CharacterCompareType::And,
            Self::EndAndOr => CharacterCompareType::EndAndOr,
        }
    }

    /// Number of units this operand occupies
    pub fn size(&self) -> usize {
        match self {
            Self::String(cps) => 2 + cps.len(),
            Self::LookupTable { sensitive, insensitive } => 3 + sensitive.len() + insensitive.len(),
            other if other.compare_type().has_no_value() => 1,
            _ => 2,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<ByteCodeValue>) {
        out.push(self.compare_type().to_value());
        match *self {
            Self::Char(cp) => out.push(cp as ByteCodeValue),
            Self::String(cps) => {
                out.push(cps.len() as ByteCodeValue);
                out.extend_from_slice(cps);
            }
            Self::CharClass(class) => out.push(class.to_value()),
            Self::CharRange(range) => out.push(range.pack()),
            Self::LookupTable { sensitive, insensitive } => {
                out.push(sensitive.len() as ByteCodeValue);
                out.push(insensitive.len() as ByteCodeValue);
                out.extend_from_slice(sensitive);
                out.extend_from_slice(insensitive);
            }
            Self::Reference(group) => out.push(group as ByteCodeValue),
            Self::Property(p) => out.push(p.0 as ByteCodeValue),
            Self::GeneralCategory(c) => out.push(c.0 as ByteCodeValue),
            Self::Script(s) | Self::ScriptExtension(s) => out.push(s.0 as ByteCodeValue),
            Self::Inverse
            | Self::TemporaryInverse
            | Self::AnyChar
            | Self::Or
            | Self::And
            | Self::EndAndOr => {}
        }
    }
}

/// Arguments of a decoded `Compare` instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareArgs<'a> {
    count: usize,
    units: &'a [ByteCodeValue],
}

impl<'a> CompareArgs<'a> {
    /// Number of operands
    pub fn count(&self) -> usize {
        self.count
    }

    /// Raw argument units (without the three-unit header)
    pub fn units(&self) -> &'a [ByteCodeValue] {
        self.units
    }

    /// Iterate over the decoded operands
    pub fn operands(&self) -> CompareOperands<'a> {
        CompareOperands {
            units: self.units,
            pos: 0,
            remaining: self.count,
        }
    }

    /// Operands as flat pairs, in order.
    ///
    /// LookupTables are expanded into one CharRange per sensitive range
    /// (each re-prefixed with a TemporaryInverse when the table itself was
    /// temporarily inverted) and Strings collapse to their first code point.
    pub fn flat_compares(&self) -> SmallVec<[CompareTypeAndValuePair; 4]> {
        let mut result = SmallVec::new();
        let mut pending_temporary_inverse = false;

        for operand in self.operands() {
            match operand {
                CompareOperand::TemporaryInverse => {
                    pending_temporary_inverse = true;
                    continue;
                }
                CompareOperand::LookupTable { sensitive, .. } => {
                    for &packed in sensitive {
                        if pending_temporary_inverse {
                            result.push(CompareTypeAndValuePair::temporary_inverse());
                        }
                        result.push(CompareTypeAndValuePair::new(
                            CharacterCompareType::CharRange,
                            packed,
                        ));
                    }
                }
                other => {
                    if pending_temporary_inverse {
                        result.push(CompareTypeAndValuePair::temporary_inverse());
                    }
                    result.push(flat_pair(&other));
                }
            }
            pending_temporary_inverse = false;
        }

        if pending_temporary_inverse {
            result.push(CompareTypeAndValuePair::temporary_inverse());
        }
        result
    }
}

fn flat_pair(operand: &CompareOperand<'_>) -> CompareTypeAndValuePair {
    use CompareTypeAndValuePair as Pair;
    match *operand {
        CompareOperand::Char(cp) => Pair::code_point(cp),
        CompareOperand::String(cps) => Pair::new(
            CharacterCompareType::String,
            cps.first().copied().unwrap_or_default(),
        ),
        CompareOperand::CharClass(class) => Pair::class(class),
        CompareOperand::CharRange(range) => {
            Pair::new(CharacterCompareType::CharRange, range.pack())
        }
        CompareOperand::Reference(group) => Pair::reference(group),
        CompareOperand::Property(p) => Pair::property(p),
        CompareOperand::GeneralCategory(c) => Pair::general_category(c),
        CompareOperand::Script(s) => Pair::script(s),
        CompareOperand::ScriptExtension(s) => Pair::script_extension(s),
        other => Pair::marker(other.compare_type()),
    }
}

/// Iterator over the operands of a validated Compare
#[derive(Debug, Clone)]
pub struct CompareOperands<'a> {
    units: &'a [ByteCodeValue],
    pos: usize,
    remaining: usize,
}

impl<'a> Iterator for CompareOperands<'a> {
    type Item = CompareOperand<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // Arguments were checked when the instruction was decoded
        let (operand, size) = decode_operand(self.units, self.pos, 0).ok()?;
        self.pos += size;
        self.remaining -= 1;
        Some(operand)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// Decoded operands of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind<'a> {
    Jump { offset: isize },
    ForkJump { offset: isize },
    ForkStay { offset: isize },
    ForkReplaceJump { offset: isize },
    ForkReplaceStay { offset: isize },
    JumpNonEmpty {
        offset: isize,
        checkpoint: usize,
        form: OpCodeId,
    },
    Repeat { offset: usize, count: usize, id: usize },
    FailForks,
    Compare(CompareArgs<'a>),
    CheckBegin,
    CheckEnd,
    CheckBoundary(BoundaryKind),
    Save,
    Restore,
    GoBack(usize),
    Checkpoint(usize),
    SaveLeftCaptureGroup(usize),
    SaveRightCaptureGroup(usize),
    ClearCaptureGroup(usize),
}

/// One decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    /// Index of the opcode unit
    pub ip: usize,
    pub kind: InstructionKind<'a>,
    units: &'a [ByteCodeValue],
}

impl<'a> Instruction<'a> {
    pub fn opcode(&self) -> OpCodeId {
        match self.kind {
            InstructionKind::Jump { .. } => OpCodeId::Jump,
            InstructionKind::ForkJump { .. } => OpCodeId::ForkJump,
            InstructionKind::ForkStay { .. } => OpCodeId::ForkStay,
            InstructionKind::ForkReplaceJump { .. } => OpCodeId::ForkReplaceJump,
            InstructionKind::ForkReplaceStay { .. } => OpCodeId::ForkReplaceStay,
            InstructionKind::JumpNonEmpty { .. } => OpCodeId::JumpNonEmpty,
            InstructionKind::Repeat { .. } => OpCodeId::Repeat,
            InstructionKind::FailForks => OpCodeId::FailForks,
            InstructionKind::Compare(_) => OpCodeId::Compare,
            InstructionKind::CheckBegin => OpCodeId::CheckBegin,
            InstructionKind::CheckEnd => OpCodeId::CheckEnd,
            InstructionKind::CheckBoundary(_) => OpCodeId::CheckBoundary,
            InstructionKind::Save => OpCodeId::Save,
            InstructionKind::Restore => OpCodeId::Restore,
            InstructionKind::GoBack(_) => OpCodeId::GoBack,
            InstructionKind::Checkpoint(_) => OpCodeId::Checkpoint,
            InstructionKind::SaveLeftCaptureGroup(_) => OpCodeId::SaveLeftCaptureGroup,
            InstructionKind::SaveRightCaptureGroup(_) => OpCodeId::SaveRightCaptureGroup,
            InstructionKind::ClearCaptureGroup(_) => OpCodeId::ClearCaptureGroup,
        }
    }

    /// Size in units
    #[inline]
    pub fn size(&self) -> usize {
        self.units.len()
    }

    /// Index just past this instruction
    #[inline]
    pub fn end(&self) -> usize {
        self.ip + self.units.len()
    }

    /// The raw units of this instruction
    #[inline]
    pub fn units(&self) -> &'a [ByteCodeValue] {
        self.units
    }

    /// Relative offset for Jump, JumpNonEmpty and the fork family
    pub fn jump_offset(&self) -> Option<isize> {
        match self.kind {
            InstructionKind::Jump { offset }
            | InstructionKind::ForkJump { offset }
            | InstructionKind::ForkStay { offset }
            | InstructionKind::ForkReplaceJump { offset }
            | InstructionKind::ForkReplaceStay { offset }
            | InstructionKind::JumpNonEmpty { offset, .. } => Some(offset),
            _ => None,
        }
    }

    /// Absolute target of any control-flow instruction, including Repeat
    pub fn jump_target(&self) -> Option<isize> {
        match self.kind {
            InstructionKind::Repeat { offset, .. } => Some(self.ip as isize - offset as isize),
            _ => self.jump_offset().map(|offset| self.end() as isize + offset),
        }
    }

    pub fn compare_args(&self) -> Option<CompareArgs<'a>> {
        match self.kind {
            InstructionKind::Compare(args) => Some(args),
            _ => None,
        }
    }
}

/// Read the unit at `ip` as a signed relative offset
#[inline]
fn signed(value: ByteCodeValue) -> isize {
    value as i64 as isize
}

/// Encode a signed relative offset as a buffer unit
#[inline]
pub fn encode_offset(offset: isize) -> ByteCodeValue {
    offset as i64 as ByteCodeValue
}

fn read_usize(code: &[ByteCodeValue], index: usize, ip: usize) -> DecodeResult<usize> {
    usize::try_from(code[index]).map_err(|_| DecodeError::InvalidOperand {
        ip,
        detail: "operand does not fit in usize",
    })
}

fn read_code_point(value: ByteCodeValue, ip: usize) -> DecodeResult<u32> {
    u32::try_from(value)
        .ok()
        .filter(|cp| *cp <= MAX_CODE_POINT)
        .ok_or(DecodeError::InvalidOperand {
            ip,
            detail: "code point out of range",
        })
}

fn read_range(value: ByteCodeValue, ip: usize) -> DecodeResult<CharRange> {
    let range = CharRange::unpack(value);
    if range.from > range.to || range.to > MAX_CODE_POINT {
        return Err(DecodeError::InvalidOperand {
            ip,
            detail: "malformed character range",
        });
    }
    Ok(range)
}

fn read_u32(value: ByteCodeValue, ip: usize) -> DecodeResult<u32> {
    u32::try_from(value).map_err(|_| DecodeError::InvalidOperand {
        ip,
        detail: "identifier does not fit in 32 bits",
    })
}

/// Sum of declared lengths, rejecting values that overflow
fn operand_extent(parts: &[usize], ip: usize) -> DecodeResult<usize> {
    parts
        .iter()
        .try_fold(0usize, |total, &part| total.checked_add(part))
        .ok_or(DecodeError::InvalidOperand {
            ip,
            detail: "declared length overflows",
        })
}

/// Decode one compare operand at `pos` within `args`.
///
/// `base` is the buffer index of `args[0]`, used for error reporting.
fn decode_operand(
    args: &[ByteCodeValue],
    pos: usize,
    base: usize,
) -> DecodeResult<(CompareOperand<'_>, usize)> {
    let ip = base + pos;
    let need = |needed: usize| -> DecodeResult<()> {
        let available = args.len().saturating_sub(pos);
        if available < needed {
            Err(DecodeError::Truncated { ip, needed, available })
        } else {
            Ok(())
        }
    };

    need(1)?;
    let ty = CharacterCompareType::from_value(args[pos])
        .ok_or(DecodeError::UnknownCompareType { ip, value: args[pos] })?;

    let operand = match ty {
        CharacterCompareType::Undefined | CharacterCompareType::RangeExpressionDummy => {
            return Err(DecodeError::SentinelOperand { ip, ty });
        }
        CharacterCompareType::Inverse => CompareOperand::Inverse,
        CharacterCompareType::TemporaryInverse => CompareOperand::TemporaryInverse,
        CharacterCompareType::AnyChar => CompareOperand::AnyChar,
        CharacterCompareType::Or => CompareOperand::Or,
        CharacterCompareType::And => CompareOperand::And,
        CharacterCompareType::EndAndOr => CompareOperand::EndAndOr,
        CharacterCompareType::String => {
            need(2)?;
            let len = usize::try_from(args[pos + 1]).map_err(|_| DecodeError::InvalidOperand {
                ip,
                detail: "string length does not fit in usize",
            })?;
            need(operand_extent(&[2, len], ip)?)?;
            let cps = &args[pos + 2..pos + 2 + len];
            for &cp in cps {
                read_code_point(cp, ip)?;
            }
            CompareOperand::String(cps)
        }
        CharacterCompareType::LookupTable => {
            need(3)?;
            let sensitive = read_usize(args, pos + 1, ip)?;
            let insensitive = read_usize(args, pos + 2, ip)?;
            need(operand_extent(&[3, sensitive, insensitive], ip)?)?;
            let start = pos + 3;
            let table = &args[start..start + sensitive];
            let shadow = &args[start + sensitive..start + sensitive + insensitive];
            for &packed in table.iter().chain(shadow) {
                read_range(packed, ip)?;
            }
            CompareOperand::LookupTable {
                sensitive: table,
                insensitive: shadow,
            }
        }
        _ => {
            need(2)?;
            let value = args[pos + 1];
            match ty {
                CharacterCompareType::Char => CompareOperand::Char(read_code_point(value, ip)?),
                CharacterCompareType::CharClass => {
                    CompareOperand::CharClass(CharClass::from_value(value).ok_or(
                        DecodeError::InvalidOperand {
                            ip,
                            detail: "unknown character class",
                        },
                    )?)
                }
                CharacterCompareType::CharRange => CompareOperand::CharRange(read_range(value, ip)?),
                CharacterCompareType::Reference => {
                    CompareOperand::Reference(usize::try_from(value).map_err(|_| {
                        DecodeError::InvalidOperand {
                            ip,
                            detail: "group index does not fit in usize",
                        }
                    })?)
                }
                CharacterCompareType::Property => CompareOperand::Property(Property(read_u32(value, ip)?)),
                CharacterCompareType::GeneralCategory => {
                    CompareOperand::GeneralCategory(GeneralCategory(read_u32(value, ip)?))
                }
                CharacterCompareType::Script => CompareOperand::Script(Script(read_u32(value, ip)?)),
                CharacterCompareType::ScriptExtension => {
                    CompareOperand::ScriptExtension(Script(read_u32(value, ip)?))
                }
                _ => unreachable!("value-less compare types handled above"),
            }
        }
    };

    let size = operand.size();
    Ok((operand, size))
}

/// Decode the instruction starting at `ip`.
///
/// Checks that the instruction fits in the buffer, that every operand is
/// well formed and that any jump target lies within `[0, code.len()]`.
/// Whether targets land on instruction starts is checked by
/// [`ByteCode::validate`](super::ByteCode::validate).
pub fn decode(code: &[ByteCodeValue], ip: usize) -> DecodeResult<Instruction<'_>> {
    let available = code.len().saturating_sub(ip);
    if available == 0 {
        return Err(DecodeError::Truncated {
            ip,
            needed: 1,
            available,
        });
    }

    let opcode = OpCodeId::from_value(code[ip])
        .ok_or(DecodeError::UnknownOpcode { ip, value: code[ip] })?;

    let size = match opcode.fixed_size() {
        Some(size) => size,
        None => {
            if available < 3 {
                return Err(DecodeError::Truncated {
                    ip,
                    needed: 3,
                    available,
                });
            }
            operand_extent(&[3, read_usize(code, ip + 2, ip)?], ip)?
        }
    };
    if available < size {
        return Err(DecodeError::Truncated {
            ip,
            needed: size,
            available,
        });
    }

    let units = &code[ip..ip + size];
    let kind = match opcode {
        OpCodeId::Jump => InstructionKind::Jump { offset: signed(units[1]) },
        OpCodeId::ForkJump => InstructionKind::ForkJump { offset: signed(units[1]) },
        OpCodeId::ForkStay => InstructionKind::ForkStay { offset: signed(units[1]) },
        OpCodeId::ForkReplaceJump => InstructionKind::ForkReplaceJump { offset: signed(units[1]) },
        OpCodeId::ForkReplaceStay => InstructionKind::ForkReplaceStay { offset: signed(units[1]) },
        OpCodeId::JumpNonEmpty => {
            let form = OpCodeId::from_value(units[3])
                .filter(|form| *form == OpCodeId::Jump || form.is_fork())
                .ok_or(DecodeError::InvalidOperand {
                    ip,
                    detail: "JumpNonEmpty form must be Jump or a fork",
                })?;
            InstructionKind::JumpNonEmpty {
                offset: signed(units[1]),
                checkpoint: read_usize(units, 2, ip)?,
                form,
            }
        }
        OpCodeId::Repeat => InstructionKind::Repeat {
            offset: read_usize(units, 1, ip)?,
            count: read_usize(units, 2, ip)?,
            id: read_usize(units, 3, ip)?,
        },
        OpCodeId::FailForks => InstructionKind::FailForks,
        OpCodeId::Compare => {
            let count = read_usize(units, 1, ip)?;
            let args = &units[3..];
            let mut pos = 0;
            for _ in 0..count {
                let (_, operand_size) = decode_operand(args, pos, ip + 3)?;
                pos += operand_size;
            }
            if pos != args.len() {
                return Err(DecodeError::CompareSizeMismatch {
                    ip,
                    declared: args.len(),
                    actual: pos,
                });
            }
            InstructionKind::Compare(CompareArgs { count, units: args })
        }
        OpCodeId::CheckBegin => InstructionKind::CheckBegin,
        OpCodeId::CheckEnd => InstructionKind::CheckEnd,
        OpCodeId::CheckBoundary => InstructionKind::CheckBoundary(
            BoundaryKind::from_value(units[1]).ok_or(DecodeError::InvalidOperand {
                ip,
                detail: "unknown boundary kind",
            })?,
        ),
        OpCodeId::Save => InstructionKind::Save,
        OpCodeId::Restore => InstructionKind::Restore,
        OpCodeId::GoBack => InstructionKind::GoBack(read_usize(units, 1, ip)?),
        OpCodeId::Checkpoint => InstructionKind::Checkpoint(read_usize(units, 1, ip)?),
        OpCodeId::SaveLeftCaptureGroup => {
            InstructionKind::SaveLeftCaptureGroup(read_usize(units, 1, ip)?)
        }
        OpCodeId::SaveRightCaptureGroup => {
            InstructionKind::SaveRightCaptureGroup(read_usize(units, 1, ip)?)
        }
        OpCodeId::ClearCaptureGroup => InstructionKind::ClearCaptureGroup(read_usize(units, 1, ip)?),
    };

    let instruction = Instruction { ip, kind, units };
    if let Some(target) = instruction.jump_target() {
        if target < 0 || target > code.len() as isize {
            return Err(DecodeError::InvalidJumpTarget { ip, target });
        }
    }
    Ok(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMP: ByteCodeValue = OpCodeId::Compare as ByteCodeValue;
    const CHAR: ByteCodeValue = CharacterCompareType::Char as ByteCodeValue;

    #[test]
    fn test_decode_jump() {
        let code = [OpCodeId::Jump.to_value(), encode_offset(-2)];
        let instruction = decode(&code, 0).unwrap();
        assert_eq!(instruction.kind, InstructionKind::Jump { offset: -2 });
        assert_eq!(instruction.jump_target(), Some(0));
        assert_eq!(instruction.end(), 2);
    }

    #[test]
    fn test_decode_repeat_target_is_backward_distance() {
        let code = [CMP, 1, 2, CHAR, 'a' as ByteCodeValue, OpCodeId::Repeat.to_value(), 5, 3, 0];
        let instruction = decode(&code, 5).unwrap();
        assert_eq!(instruction.jump_target(), Some(0));
        assert_eq!(instruction.jump_offset(), None);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(&[0xff], 0), Err(DecodeError::UnknownOpcode { ip: 0, value: 0xff }));
        assert_eq!(
            decode(&[OpCodeId::Jump.to_value()], 0),
            Err(DecodeError::Truncated { ip: 0, needed: 2, available: 1 })
        );
        assert_eq!(
            decode(&[CMP, 1, 1, 0], 0),
            Err(DecodeError::SentinelOperand { ip: 3, ty: CharacterCompareType::Undefined })
        );
        assert_eq!(
            decode(&[CMP, 1, 3, CHAR, 'a' as ByteCodeValue, 0], 0),
            Err(DecodeError::CompareSizeMismatch { ip: 0, declared: 3, actual: 2 })
        );
        assert!(matches!(
            decode(&[OpCodeId::Jump.to_value(), encode_offset(5)], 0),
            Err(DecodeError::InvalidJumpTarget { ip: 0, target: 7 })
        ));
        assert!(matches!(
            decode(&[CMP, 1, 2, CharacterCompareType::CharRange.to_value(), CharRange::new(9, 3).pack()], 0),
            Err(DecodeError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_overflowing_lengths() {
        let huge = usize::MAX as ByteCodeValue;
        let overflow = |ip| DecodeError::InvalidOperand {
            ip,
            detail: "declared length overflows",
        };

        assert_eq!(decode(&[CMP, 1, huge], 0), Err(overflow(0)));

        let string = CharacterCompareType::String.to_value();
        assert_eq!(decode(&[CMP, 1, 3, string, huge, 'a' as ByteCodeValue], 0), Err(overflow(3)));

        let table = CharacterCompareType::LookupTable.to_value();
        assert_eq!(decode(&[CMP, 1, 4, table, huge, 1, 0], 0), Err(overflow(3)));
    }

    #[test]
    fn test_error_ip() {
        let err = decode(&[CMP, 1, 1, 0x7f], 0).unwrap_err();
        assert_eq!(err.ip(), 3);
        assert!(err.to_string().contains("Unknown compare type"));
    }

    #[test]
    fn test_flat_compares_expands_tables() {
        let a_to_c = CharRange::new('a' as u32, 'c' as u32).pack();
        let x = CharRange::single('x' as u32).pack();
        let code = [
            CMP,
            3,
            9,
            CharacterCompareType::TemporaryInverse.to_value(),
            CharacterCompareType::LookupTable.to_value(),
            2,
            0,
            a_to_c,
            x,
            CharacterCompareType::String.to_value(),
            1,
            'q' as ByteCodeValue,
        ];

        let args = decode(&code, 0).unwrap().compare_args().unwrap();
        let flat = args.flat_compares();
        assert_eq!(
            flat.as_slice(),
            &[
                CompareTypeAndValuePair::temporary_inverse(),
                CompareTypeAndValuePair::new(CharacterCompareType::CharRange, a_to_c),
                CompareTypeAndValuePair::temporary_inverse(),
                CompareTypeAndValuePair::new(CharacterCompareType::CharRange, x),
                CompareTypeAndValuePair::new(CharacterCompareType::String, 'q' as ByteCodeValue),
            ]
        );
    }
}
