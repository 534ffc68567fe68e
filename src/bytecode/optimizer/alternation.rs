//! Alternation compilation.
//!
//! Alternatives are compiled separately and then joined either as a chain of
//! forks (one per alternative) or as a prefix trie that runs each shared
//! leading instruction once and fans out where the alternatives diverge.
//!
//! # Trie keys
//!
//! A node is keyed by the units of its instruction followed by the units of
//! every jump in the same alternative that lands on it. Two identical
//! instructions reached through different jumps therefore never merge, so
//! each node has one well-defined set of incoming edges.
//!
//! # Safety checks
//!
//! The trie is only used when all of the following hold, otherwise the chain
//! is emitted:
//!
//! - no shared node branches, apart from forward unconditional jumps
//! - every shared jump resolves to the same node in all its alternatives
//! - a jump never lands on a node shared with alternatives it does not
//!   belong to
//! - wherever children are visited out of alternative order, their first
//!   compares are provably disjoint

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use smallvec::SmallVec;
use tracing::debug;

use crate::bytecode::instruction::{Instruction, InstructionKind};
use crate::bytecode::opcodes::OpCodeId;
use crate::bytecode::{ByteCode, ByteCodeValue};

use super::compares::{interpret, NormalizedCompareSet};
use super::helpers::{is_forward_jump, jump_target_index, retarget};
use super::overlap::sets_overlap;
use super::types::{AlternationStats, AlternationStrategy, PatternFlags};

const ROOT: usize = 0;

/// Where a jump in the merged program lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JumpDestination {
    Node(usize),
    /// Just past the whole alternation
    End,
}

#[derive(Debug, Clone, Default)]
struct TrieNode {
    /// Instruction units followed by incoming jump units
    key: Vec<ByteCodeValue>,
    children: Vec<usize>,
    /// `(alternative, ip)` of every instruction merged into this node
    entries: SmallVec<[(usize, usize); 2]>,
}

impl TrieNode {
    fn alternatives(&self) -> BTreeSet<usize> {
        self.entries.iter().map(|&(alt, _)| alt).collect()
    }

    fn is_shared(&self) -> bool {
        self.entries.len() > 1
    }
}

/// Outcome of the trie order check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderStatus {
    Preserved,
    Violated { violations: usize },
}

/// Prefix trie over the instructions of all alternatives
struct AlternationTrie<'a> {
    alternatives: &'a [ByteCode],
    nodes: Vec<TrieNode>,
    node_of: HashMap<(usize, usize), usize>,
    flags: PatternFlags,
}

impl<'a> AlternationTrie<'a> {
    fn build(alternatives: &'a [ByteCode], flags: PatternFlags) -> Self {
        let mut trie = Self {
            alternatives,
            nodes: vec![TrieNode::default()],
            node_of: HashMap::new(),
            flags,
        };
        for alt in 0..alternatives.len() {
            trie.insert(alt);
        }
        trie
    }

    fn insert(&mut self, alt: usize) {
        let code = &self.alternatives[alt];

        let mut incoming: BTreeMap<usize, Vec<ByteCodeValue>> = BTreeMap::new();
        for instruction in code.iter() {
            if let Some(target) = jump_target_index(&instruction) {
                incoming
                    .entry(target)
                    .or_default()
                    .extend_from_slice(instruction.units());
            }
        }

        let mut parent = ROOT;
        for instruction in code.iter() {
            let mut key = instruction.units().to_vec();
            if let Some(edges) = incoming.get(&instruction.ip) {
                key.extend_from_slice(edges);
            }

            let existing = self.nodes[parent]
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].key == key);
            let node = match existing {
                Some(node) => node,
                None => {
                    self.nodes.push(TrieNode {
                        key,
                        ..TrieNode::default()
                    });
                    let node = self.nodes.len() - 1;
                    self.nodes[parent].children.push(node);
                    node
                }
            };
            self.nodes[node].entries.push((alt, instruction.ip));
            self.node_of.insert((alt, instruction.ip), node);
            parent = node;
        }
    }

    fn instruction(&self, node: usize) -> Instruction<'a> {
        let (alt, ip) = self.nodes[node].entries[0];
        let alternatives = self.alternatives;
        match alternatives[alt].decode(ip) {
            Ok(instruction) => instruction,
            Err(e) => panic!("alternative {} does not decode at {:04x}: {}", alt, ip, e),
        }
    }

    /// Destination of the control-flow instruction at `(alt, ip)`
    fn destination(&self, alt: usize, instruction: &Instruction<'_>) -> Option<JumpDestination> {
        let target = jump_target_index(instruction)?;
        if target == self.alternatives[alt].len() {
            return Some(JumpDestination::End);
        }
        match self.node_of.get(&(alt, target)) {
            Some(&node) => Some(JumpDestination::Node(node)),
            None => panic!(
                "jump at {:04x} in alternative {} targets {:04x}, which is not an instruction start",
                instruction.ip, alt, target
            ),
        }
    }

    /// Why control flow prevents merging, if it does
    fn control_flow_conflict(&self) -> Option<&'static str> {
        for (id, node) in self.nodes.iter().enumerate().skip(1) {
            let instruction = self.instruction(id);
            if !instruction.opcode().is_control_flow() {
                continue;
            }
            if node.is_shared() && !is_forward_jump(&instruction) {
                return Some("shared branch");
            }

            let mut destination = None;
            for &(alt, ip) in &node.entries {
                let Ok(entry) = self.alternatives[alt].decode(ip) else {
                    return Some("undecodable instruction");
                };
                let this = self.destination(alt, &entry);
                if destination.is_some() && destination != this {
                    return Some("inconsistent jump targets");
                }
                destination = this;
            }

            if let Some(JumpDestination::Node(target)) = destination {
                if self.nodes[target].alternatives() != node.alternatives() {
                    return Some("jump into shared node");
                }
            }
        }
        None
    }

    /// First-compare set of a node, when it is an interpretable Compare
    fn first_set(&self, node: usize) -> Option<NormalizedCompareSet> {
        let args = self.instruction(node).compare_args()?;
        interpret(&args.flat_compares()).ok()
    }

    /// Check, breadth first, that every fan-out visits children in
    /// alternative order or that out-of-order children cannot both match.
    fn check_order(&self) -> OrderStatus {
        let mut violations = 0;
        let mut queue = std::collections::VecDeque::from([ROOT]);

        while let Some(id) = queue.pop_front() {
            let children = &self.nodes[id].children;
            queue.extend(children.iter().copied());
            if children.len() < 2 {
                continue;
            }

            for (i, &earlier) in children.iter().enumerate() {
                for &later in &children[i + 1..] {
                    if !self.out_of_order(earlier, later) {
                        continue;
                    }
                    let disjoint = match (self.first_set(earlier), self.first_set(later)) {
                        (Some(a), Some(b)) => !sets_overlap(&a, &b, self.flags.case_insensitive),
                        _ => false,
                    };
                    if !disjoint {
                        violations += 1;
                    }
                }
            }
        }

        if violations == 0 {
            OrderStatus::Preserved
        } else {
            OrderStatus::Violated { violations }
        }
    }

    /// Some alternative under `earlier` ranks after one under `later`
    fn out_of_order(&self, earlier: usize, later: usize) -> bool {
        let max_earlier = self.nodes[earlier].entries.iter().map(|&(alt, _)| alt).max();
        let min_later = self.nodes[later].entries.iter().map(|&(alt, _)| alt).min();
        matches!((max_earlier, min_later), (Some(a), Some(b)) if a > b)
    }

    fn shared_nodes(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_shared()).count()
    }

    /// Units of the merged program
    fn cost(&self) -> usize {
        self.nodes
            .iter()
            .enumerate()
            .map(|(id, node)| {
                let own = if id == ROOT {
                    0
                } else {
                    self.instruction(id).size()
                };
                let fans_out = id == ROOT || !self.is_unconditional_jump(id);
                let forks = if fans_out {
                    2 * node.children.len().saturating_sub(1)
                } else {
                    0
                };
                own + forks
            })
            .sum()
    }

    fn is_unconditional_jump(&self, node: usize) -> bool {
        matches!(self.instruction(node).kind, InstructionKind::Jump { .. })
    }

    /// Lay out the trie breadth first.
    ///
    /// A node with one child falls through to it. A node with several
    /// children forks to all but the last, which follows inline; the forked
    /// children are queued and placed level by level. Children of an
    /// unconditional jump are only reachable through other jumps and join the
    /// queue as well. Ancestors always precede their descendants, so
    /// backward targets are in place before anything refers to them.
    fn emit(&self) -> ByteCode {
        let mut out = ByteCode::new();
        let mut emitted_at: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut patches: Vec<(usize, OpCodeId, JumpDestination)> = Vec::new();
        let mut pending: VecDeque<usize> = VecDeque::new();

        let mut current = self.fan_out(ROOT, &mut out, &mut patches, &mut pending);
        loop {
            while let Some(id) = current {
                emitted_at[id] = Some(out.len());
                let (alt, _) = self.nodes[id].entries[0];
                let instruction = self.instruction(id);
                let ip = out.len();
                out.extend_from_slice(instruction.units());

                if let Some(destination) = self.destination(alt, &instruction) {
                    patches.push((ip, instruction.opcode(), destination));
                }

                if matches!(instruction.kind, InstructionKind::Jump { .. }) {
                    pending.extend(self.nodes[id].children.iter().copied());
                    current = None;
                } else {
                    current = self.fan_out(id, &mut out, &mut patches, &mut pending);
                }
            }
            match pending.pop_front() {
                Some(id) => current = Some(id),
                None => break,
            }
        }

        let end = out.len();
        let mut units = out.into_values();
        for (ip, opcode, destination) in patches {
            let target = match destination {
                JumpDestination::End => end,
                JumpDestination::Node(node) => match emitted_at[node] {
                    Some(target) => target,
                    None => panic!("trie node {} was never emitted", node),
                },
            };
            let size = opcode.fixed_size().unwrap_or(2);
            retarget(&mut units[ip..ip + size], opcode, ip, target);
        }
        ByteCode::from(units)
    }

    /// Emit forks to all children but the last, which is returned
    fn fan_out(
        &self,
        id: usize,
        out: &mut ByteCode,
        patches: &mut Vec<(usize, OpCodeId, JumpDestination)>,
        pending: &mut VecDeque<usize>,
    ) -> Option<usize> {
        let (last, rest) = self.nodes[id].children.split_last()?;
        for &child in rest {
            let ip = out.emit_fork_jump(0);
            patches.push((ip, OpCodeId::ForkJump, JumpDestination::Node(child)));
            pending.push_back(child);
        }
        Some(*last)
    }
}

/// Alternatives laid out as a fork chain:
///
/// ```text
///     ForkJump L0
///     ForkJump L1
///     ...
///     ALT[n-1]; Jump END
/// L1: ALT1; Jump END
/// L0: ALT0
/// END:
/// ```
fn emit_chain(alternatives: &[ByteCode]) -> ByteCode {
    let mut out = ByteCode::new();
    let Some(last) = alternatives.len().checked_sub(1) else {
        return out;
    };

    let forks: Vec<usize> = (0..last).map(|_| out.emit_fork_jump(0)).collect();
    let mut exits = Vec::with_capacity(last);
    for (i, alternative) in alternatives.iter().enumerate().rev() {
        if i < last {
            out.patch_jump_to_end(forks[i]);
        }
        out.extend(alternative);
        if i > 0 {
            exits.push(out.emit_jump(0));
        }
    }
    for ip in exits {
        out.patch_jump_to_end(ip);
    }
    out
}

fn chain_cost(alternatives: &[ByteCode]) -> usize {
    let units: usize = alternatives.iter().map(ByteCode::len).sum();
    units + 4 * alternatives.len().saturating_sub(1)
}

impl ByteCode {
    /// Append `alt0|alt1|...` matching in that preference order.
    ///
    /// Each alternative must be a validated, self-contained program whose
    /// jumps stay within `[0, len]`.
    ///
    /// # Panics
    ///
    /// Panics if an alternative is malformed.
    pub fn append_alternation(
        &mut self,
        alternatives: Vec<ByteCode>,
        strategy: AlternationStrategy,
        flags: PatternFlags,
    ) -> AlternationStats {
        let mut stats = AlternationStats {
            alternatives: alternatives.len(),
            chain_cost: chain_cost(&alternatives),
            ..AlternationStats::default()
        };

        if alternatives.len() < 2 || strategy == AlternationStrategy::Chain {
            self.extend(&emit_chain(&alternatives));
            return stats;
        }

        // Jump 0 sentinels give "fall off the end" a node of its own
        let padded: Vec<ByteCode> = alternatives
            .iter()
            .map(|alternative| {
                let mut padded = alternative.clone();
                padded.emit_jump(0);
                padded
            })
            .collect();
        let trie = AlternationTrie::build(&padded, flags);
        stats.shared_nodes = trie.shared_nodes();
        stats.tree_cost = trie.cost();

        let rejection = if stats.shared_nodes == 0 {
            Some("no shared prefix")
        } else if let Some(conflict) = trie.control_flow_conflict() {
            stats.tree_cost = usize::MAX;
            Some(conflict)
        } else if let OrderStatus::Violated { violations } = trie.check_order() {
            stats.tree_cost = usize::MAX;
            stats.ordering_violations = violations;
            Some("alternative order not preserved")
        } else if strategy == AlternationStrategy::Auto && stats.tree_cost >= stats.chain_cost {
            Some("trie not cheaper")
        } else {
            None
        };

        match rejection {
            Some(reason) => {
                stats.trie_rejected = Some(reason);
                self.extend(&emit_chain(&alternatives));
            }
            None => {
                stats.used_trie = true;
                self.extend(&trie.emit());
            }
        }

        debug!(
            target: "rxopt::optimizer::alternation",
            alternatives = stats.alternatives,
            used_trie = stats.used_trie,
            tree_cost = stats.tree_cost,
            chain_cost = stats.chain_cost,
            shared_nodes = stats.shared_nodes,
            rejected = stats.trie_rejected.unwrap_or("-"),
            "compiled alternation"
        );
        stats
    }
}
