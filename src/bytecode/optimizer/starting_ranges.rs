//! Start-position hints.
//!
//! The first block of a program runs unconditionally. If it reaches a
//! Compare before any branch, every match must begin with a character that
//! Compare accepts, and a CheckBegin on the way pins matches to the start of
//! the input.

use crate::bytecode::instruction::InstructionKind;
use crate::bytecode::opcodes::{ascii_lower, CharRange};
use crate::bytecode::ByteCode;

use super::char_class::insensitive_shadow;
use super::compares::interpret;
use super::types::{BasicBlock, OptimizationData};

/// Fill the starting-range and start-of-line fields of `data`
pub fn extract_starting_ranges(code: &ByteCode, blocks: &[BasicBlock], data: &mut OptimizationData) {
    let Some(first) = blocks.first() else {
        return;
    };

    for instruction in code.iter_range(first.start, first.end) {
        match instruction.kind {
            InstructionKind::Checkpoint(_)
            | InstructionKind::Save
            | InstructionKind::ClearCaptureGroup(_)
            | InstructionKind::SaveLeftCaptureGroup(_) => {}
            InstructionKind::CheckBegin => data.only_start_of_line = true,
            InstructionKind::Compare(args) => {
                let Ok(set) = interpret(&args.flat_compares()) else {
                    return;
                };
                if !set.is_plain_ranges() || set.ranges.is_empty() {
                    return;
                }
                data.starting_ranges = set.ranges.iter().collect();
                data.starting_ranges_insensitive = insensitive_shadow(&set.ranges).iter().collect();
                return;
            }
            _ => return,
        }
    }
}

/// Whether `unit` may begin a match under the extracted ranges
pub fn may_start_with(data: &OptimizationData, unit: u32, case_insensitive: bool) -> bool {
    if data.starting_ranges.is_empty() {
        return true;
    }
    let (ranges, unit) = if case_insensitive {
        (&data.starting_ranges_insensitive, ascii_lower(unit))
    } else {
        (&data.starting_ranges, unit)
    };
    let index = ranges.partition_point(|range: &CharRange| range.to < unit);
    ranges.get(index).is_some_and(|range| range.contains(unit))
}

