//! Helper functions shared by the rewriting passes.

use crate::bytecode::instruction::{encode_offset, Instruction, InstructionKind};
use crate::bytecode::opcodes::OpCodeId;
use crate::bytecode::ByteCodeValue;

/// Absolute target of a control-flow instruction as a buffer index
///
/// # Panics
///
/// Panics on a negative target, which validation rules out.
pub fn jump_target_index(instruction: &Instruction<'_>) -> Option<usize> {
    instruction.jump_target().map(|target| {
        usize::try_from(target).unwrap_or_else(|_| {
            panic!(
                "{} at {:04x} targets {} before the program start",
                instruction.opcode(),
                instruction.ip,
                target
            )
        })
    })
}

/// A jump or fork that lands on the very next instruction
pub fn is_useless_jump(instruction: &Instruction<'_>) -> bool {
    matches!(instruction.jump_offset(), Some(0))
}

/// The fork opcode an instruction branches with, looking through JumpNonEmpty
pub fn effective_fork(instruction: &Instruction<'_>) -> Option<OpCodeId> {
    match instruction.kind {
        InstructionKind::JumpNonEmpty { form, .. } if form.is_fork() => Some(form),
        _ if instruction.opcode().is_fork() => Some(instruction.opcode()),
        _ => None,
    }
}

/// An unconditional forward Jump (JumpNonEmpty in Jump form does not count)
pub fn is_forward_jump(instruction: &Instruction<'_>) -> bool {
    matches!(instruction.kind, InstructionKind::Jump { offset } if offset >= 0)
}

/// Index of the unit holding the fork opcode to patch for an atomic rewrite
pub fn fork_opcode_slot(instruction: &Instruction<'_>) -> usize {
    match instruction.kind {
        InstructionKind::JumpNonEmpty { .. } => instruction.ip + 3,
        _ => instruction.ip,
    }
}

/// Re-encode the offset operand of a control-flow instruction so that it
/// reaches `new_target` when placed at `new_ip`.
///
/// `units` is the instruction's copy in the output buffer.
pub fn retarget(units: &mut [ByteCodeValue], opcode: OpCodeId, new_ip: usize, new_target: usize) {
    if opcode == OpCodeId::Repeat {
        assert!(
            new_target <= new_ip,
            "Repeat at {:04x} would jump forward to {:04x}",
            new_ip,
            new_target
        );
        units[1] = (new_ip - new_target) as ByteCodeValue;
    } else {
        let end = (new_ip + units.len()) as isize;
        units[1] = encode_offset(new_target as isize - end);
    }
}
