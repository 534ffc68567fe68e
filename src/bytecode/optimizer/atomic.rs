//! Loop to atomic-group rewriting.
//!
//! A greedy loop whose body can never match the first character of what
//! follows it gains nothing from backtracking: giving back an iteration
//! leaves a body character in front of the follower, which then fails. Such
//! loops get their fork promoted to the `ForkReplace*` form, which keeps a
//! single backtrack frame instead of one per iteration.
//!
//! # Recognized shapes
//!
//! | Form | Layout |
//! |------|--------|
//! | DirectLoopWithoutHeader | `bb0: RE0; ForkX bb0; bb1: ...` |
//! | DirectLoopWithoutHeaderAndEmptyFollow | `bb0: RE0; ForkX bb0; bb1: Jump ...` |
//! | DirectLoopWithHeader | `bb0: ForkX bb2; bb1: RE0; Jump bb0; bb2: ...` |
//!
//! The patch only swaps an opcode unit, so no offsets move.

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::bytecode::instruction::{CompareTypeAndValuePair, Instruction, InstructionKind};
use crate::bytecode::opcodes::{CharacterCompareType, OpCodeId};
use crate::bytecode::ByteCode;

use super::helpers::{effective_fork, fork_opcode_slot, is_forward_jump, jump_target_index};
use super::overlap::{has_overlap, OverlapContext};
use super::types::{AtomicRewriteForm, AtomicRewritePrecondition, BasicBlock};

/// A loop whose fork may be promoted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicCandidate {
    pub form: AtomicRewriteForm,
    /// The fork (or JumpNonEmpty) to patch
    pub fork_ip: usize,
    /// Instructions repeated by the loop
    pub body: BasicBlock,
    /// Where execution continues when the loop exits
    pub follow_ip: usize,
}

/// Result of one rewriting pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomicRewriteOutcome {
    /// Patched fork positions, in program order
    pub rewritten: Vec<usize>,
    pub rejected: usize,
}

/// Find every loop of a recognized shape, in block order
pub fn find_atomic_candidates(code: &ByteCode, blocks: &[BasicBlock]) -> Vec<AtomicCandidate> {
    let mut candidates = Vec::new();

    for (i, block) in blocks.iter().enumerate() {
        let Some(last) = last_instruction(code, block) else {
            continue;
        };

        // bb0: RE0; ForkX bb0
        if promotable(&last) && jump_target_index(&last) == Some(block.start) && last.ip > block.start {
            let empty_follow = blocks
                .get(i + 1)
                .is_some_and(|next| is_lone_jump(code, next));
            candidates.push(AtomicCandidate {
                form: if empty_follow {
                    AtomicRewriteForm::DirectLoopWithoutHeaderAndEmptyFollow
                } else {
                    AtomicRewriteForm::DirectLoopWithoutHeader
                },
                fork_ip: last.ip,
                body: BasicBlock::new(block.start, last.ip, "loop body"),
                follow_ip: last.end(),
            });
            continue;
        }

        // bb0: ForkX bb2; bb1: RE0; Jump bb0
        if i == 0 || !matches!(last.kind, InstructionKind::Jump { .. }) || last.ip == block.start {
            continue;
        }
        let header = blocks[i - 1];
        if jump_target_index(&last) != Some(header.start) {
            continue;
        }
        let Some(fork) = last_instruction(code, &header) else {
            continue;
        };
        if fork.ip != header.start
            || !fork.opcode().is_fork()
            || fork.opcode().atomic_form().is_none()
            || jump_target_index(&fork) != Some(block.end)
        {
            continue;
        }
        candidates.push(AtomicCandidate {
            form: AtomicRewriteForm::DirectLoopWithHeader,
            fork_ip: fork.ip,
            body: BasicBlock::new(block.start, last.ip, "loop body"),
            follow_ip: block.end,
        });
    }

    candidates
}

/// Prove that committing to the longest run of the loop cannot lose a match.
///
/// The body may only hold single-character compares and position-neutral
/// bookkeeping. The follower is walked through captures, checkpoints,
/// anchors and forward jumps to its first compare, which must be disjoint
/// from every body compare.
pub fn block_satisfies_atomic_rewrite_precondition(
    code: &ByteCode,
    candidate: &AtomicCandidate,
    ctx: OverlapContext<'_>,
) -> AtomicRewritePrecondition {
    use AtomicRewritePrecondition::*;

    let Some(body) = body_compares(code, &candidate.body) else {
        return NotSatisfied;
    };
    if body.is_empty() {
        return NotSatisfied;
    }

    let mut ip = candidate.follow_ip;
    let mut saw_assertion = false;
    loop {
        if ip >= code.len() {
            // An assertion may pass at an earlier exit and fail at the last one
            return if saw_assertion {
                NotSatisfied
            } else {
                SatisfiedWithEmptyHeader
            };
        }
        let Ok(instruction) = code.decode(ip) else {
            return NotSatisfied;
        };

        match instruction.kind {
            InstructionKind::Compare(args) => {
                let follow = args.flat_compares();
                if follow.iter().any(|pair| unsafe_in_follow(pair.ty)) {
                    return NotSatisfied;
                }
                let overlapping = body
                    .iter()
                    .any(|compares| has_overlap(&follow, compares, ctx));
                return if overlapping {
                    NotSatisfied
                } else {
                    SatisfiedWithProperHeader
                };
            }
            InstructionKind::SaveLeftCaptureGroup(_)
            | InstructionKind::SaveRightCaptureGroup(_)
            | InstructionKind::ClearCaptureGroup(_)
            | InstructionKind::Checkpoint(_)
            | InstructionKind::CheckEnd => ip = instruction.end(),
            InstructionKind::CheckBegin | InstructionKind::CheckBoundary(_) => {
                saw_assertion = true;
                ip = instruction.end();
            }
            InstructionKind::Jump { .. } if is_forward_jump(&instruction) => {
                match jump_target_index(&instruction) {
                    Some(target) => ip = target,
                    None => return NotSatisfied,
                }
            }
            _ => return NotSatisfied,
        }
    }
}

/// Promote every provably safe loop, or only the first one when `single`
pub fn rewrite_loops_as_atomic_groups(
    code: &mut ByteCode,
    blocks: &[BasicBlock],
    ctx: OverlapContext<'_>,
    single: bool,
) -> AtomicRewriteOutcome {
    let mut outcome = AtomicRewriteOutcome::default();

    for candidate in find_atomic_candidates(code, blocks) {
        let precondition = block_satisfies_atomic_rewrite_precondition(code, &candidate, ctx);
        if !precondition.is_satisfied() {
            trace!(
                target: "rxopt::optimizer::atomic",
                ip = candidate.fork_ip,
                form = candidate.form.name(),
                "loop not rewritable"
            );
            outcome.rejected += 1;
            continue;
        }

        let Ok(fork) = code.decode(candidate.fork_ip) else {
            outcome.rejected += 1;
            continue;
        };
        let slot = fork_opcode_slot(&fork);
        let Some(atomic) = effective_fork(&fork).and_then(OpCodeId::atomic_form) else {
            outcome.rejected += 1;
            continue;
        };
        code.set(slot, atomic.to_value());

        debug!(
            target: "rxopt::optimizer::atomic",
            ip = candidate.fork_ip,
            form = candidate.form.name(),
            ?precondition,
            "rewrote loop as atomic group"
        );
        outcome.rewritten.push(candidate.fork_ip);
        if single {
            break;
        }
    }

    outcome
}

fn last_instruction<'a>(code: &'a ByteCode, block: &BasicBlock) -> Option<Instruction<'a>> {
    code.iter_range(block.start, block.end).last()
}

fn is_lone_jump(code: &ByteCode, block: &BasicBlock) -> bool {
    let mut instructions = code.iter_range(block.start, block.end);
    let first = instructions.next();
    instructions.next().is_none()
        && first.is_some_and(|jump| matches!(jump.kind, InstructionKind::Jump { .. }))
}

/// A backtracking fork with an atomic counterpart
fn promotable(instruction: &Instruction<'_>) -> bool {
    effective_fork(instruction).is_some_and(|fork| fork.atomic_form().is_some())
}

fn unsafe_in_follow(ty: CharacterCompareType) -> bool {
    matches!(
        ty,
        CharacterCompareType::AnyChar | CharacterCompareType::Reference | CharacterCompareType::String
    )
}

/// Flat operands of each body compare, or `None` if the body does
/// anything besides consuming exactly one character per compare
fn body_compares(
    code: &ByteCode,
    body: &BasicBlock,
) -> Option<Vec<SmallVec<[CompareTypeAndValuePair; 4]>>> {
    let mut compares = Vec::new();
    for instruction in code.iter_range(body.start, body.end) {
        match instruction.kind {
            InstructionKind::Compare(args) => {
                let flat = args.flat_compares();
                if flat.iter().any(|pair| unsafe_in_follow(pair.ty)) {
                    return None;
                }
                compares.push(flat);
            }
            InstructionKind::SaveLeftCaptureGroup(_)
            | InstructionKind::SaveRightCaptureGroup(_)
            | InstructionKind::ClearCaptureGroup(_)
            | InstructionKind::Checkpoint(_)
            | InstructionKind::CheckBegin
            | InstructionKind::CheckEnd
            | InstructionKind::CheckBoundary(_) => {}
            _ => return None,
        }
    }
    Some(compares)
}
