//! Basic block splitting.
//!
//! Blocks are cut at every instruction that can transfer control (after it)
//! and at every instruction some jump lands on (before it). The result is a
//! sorted partition of `[0, len)` in which each block's last instruction is
//! its only possible exit besides falling through, and every jump, fork or
//! repeat target starts a block.

use std::collections::BTreeMap;
use std::iter;

use itertools::Itertools;

use crate::bytecode::ByteCode;

use super::helpers::jump_target_index;
use super::types::BasicBlock;

/// Split a validated program into basic blocks
pub fn split_basic_blocks(code: &ByteCode) -> Vec<BasicBlock> {
    if code.is_empty() {
        return Vec::new();
    }

    let mut boundaries: BTreeMap<usize, &'static str> = BTreeMap::new();
    boundaries.insert(0, "entry");

    for instruction in code.iter() {
        if !instruction.opcode().is_control_flow() {
            continue;
        }
        boundaries
            .entry(instruction.end())
            .or_insert("after branch");

        if let Some(target) = jump_target_index(&instruction) {
            let reason = if target <= instruction.ip {
                "loop header"
            } else {
                "jump target"
            };
            boundaries.insert(target, reason);
        }
    }
    boundaries.remove(&code.len());

    boundaries
        .into_iter()
        .chain(iter::once((code.len(), "exit")))
        .tuple_windows()
        .map(|((start, comment), (end, _))| BasicBlock::new(start, end, comment))
        .collect()
}

/// Index of the block starting at `ip`
pub fn block_starting_at(blocks: &[BasicBlock], ip: usize) -> Option<usize> {
    blocks.binary_search_by_key(&ip, |block| block.start).ok()
}
