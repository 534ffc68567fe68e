//! Jump threading.
//!
//! Code generation leaves behind jumps and forks whose offset is zero: they
//! land on the next instruction and do nothing. This pass drops them and
//! renumbers every remaining offset through an old-to-new index map.
//!
//! Removing one no-op can turn another jump into a no-op (a jump over a
//! removed fork now lands on its own successor), so the rewrite repeats
//! until nothing is left to remove.

use tracing::trace;

use crate::bytecode::{ByteCode, ByteCodeValue};

use super::helpers::{is_useless_jump, jump_target_index, retarget};

/// What one threading run removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadingOutcome {
    pub jumps_removed: usize,
    pub units_removed: usize,
}

impl ThreadingOutcome {
    pub fn changed(&self) -> bool {
        self.jumps_removed > 0
    }
}

/// Remove zero-offset jumps until none remain
pub fn thread_jumps(code: &mut ByteCode) -> ThreadingOutcome {
    let mut outcome = ThreadingOutcome::default();
    loop {
        let before = code.len();
        let removed = thread_once(code);
        if removed == 0 {
            break;
        }
        outcome.jumps_removed += removed;
        outcome.units_removed += before - code.len();
        trace!(
            target: "rxopt::optimizer::threading",
            removed,
            units = code.len(),
            "threading round"
        );
    }
    outcome
}

/// One removal round. Returns the number of instructions dropped.
fn thread_once(code: &mut ByteCode) -> usize {
    let len = code.len();

    // old index -> new index; removed instructions map to their successor
    let mut offset_map: Vec<Option<usize>> = vec![None; len + 1];
    let mut kept = 0usize;
    let mut removed = 0usize;
    for instruction in code.iter() {
        offset_map[instruction.ip] = Some(kept);
        if is_useless_jump(&instruction) {
            removed += 1;
        } else {
            kept += instruction.size();
        }
    }
    offset_map[len] = Some(kept);

    if removed == 0 {
        return 0;
    }

    let lookup = |old: usize, ip: usize| -> usize {
        match offset_map.get(old).copied().flatten() {
            Some(new) => new,
            None => panic!(
                "jump at {:04x} targets {:04x}, which is not an instruction start",
                ip, old
            ),
        }
    };

    let mut output: Vec<ByteCodeValue> = Vec::with_capacity(kept);
    for instruction in code.iter() {
        if is_useless_jump(&instruction) {
            continue;
        }
        let new_ip = output.len();
        output.extend_from_slice(instruction.units());

        if let Some(old_target) = jump_target_index(&instruction) {
            let new_target = lookup(old_target, instruction.ip);
            retarget(
                &mut output[new_ip..],
                instruction.opcode(),
                new_ip,
                new_target,
            );
        }
    }

    debug_assert_eq!(output.len(), kept);
    *code = ByteCode::from(output);
    removed
}
