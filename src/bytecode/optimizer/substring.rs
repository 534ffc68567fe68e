//! Pure substring detection.
//!
//! A program that is one straight run of single-character compares matches
//! exactly one literal. The engine can then search for that literal directly.

use tracing::trace;

use crate::bytecode::instruction::{CompareOperand, InstructionKind};
use crate::bytecode::ByteCode;

use super::types::{BasicBlock, PatternFlags};

/// The literal a program reduces to, encoded the way the engine sees input:
/// UTF-8 in Unicode mode, one byte per unit otherwise.
pub fn try_as_substring(code: &ByteCode, blocks: &[BasicBlock], flags: PatternFlags) -> Option<Vec<u8>> {
    if flags.case_insensitive {
        return None;
    }

    let block = match blocks {
        [] => return Some(Vec::new()),
        [block] => *block,
        _ => return None,
    };

    let mut literal = Vec::new();
    for instruction in code.iter_range(block.start, block.end) {
        let InstructionKind::Compare(args) = instruction.kind else {
            trace!(
                target: "rxopt::optimizer::substring",
                ip = instruction.ip,
                opcode = %instruction.opcode(),
                "not a literal"
            );
            return None;
        };
        // Several chars in one Compare are alternatives, not a sequence
        if args.count() != 1 {
            return None;
        }
        let Some(CompareOperand::Char(cp)) = args.operands().next() else {
            return None;
        };
        push_code_point(&mut literal, cp, flags.unicode)?;
    }
    Some(literal)
}

fn push_code_point(literal: &mut Vec<u8>, cp: u32, unicode: bool) -> Option<()> {
    if unicode || cp <= 0x7f {
        let c = char::from_u32(cp)?;
        let mut buf = [0u8; 4];
        literal.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    } else {
        literal.push(u8::try_from(cp).ok()?);
    }
    Some(())
}
