//! Types and statistics for bytecode optimization.

use std::fmt;

use crate::bytecode::opcodes::CharRange;

/// Half-open range `[start, end)` of instructions with no internal branching
/// and no internal jump targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BasicBlock {
    pub start: usize,
    pub end: usize,
    /// Why the block begins where it does (debugging aid only)
    pub comment: &'static str,
}

impl BasicBlock {
    pub fn new(start: usize, end: usize, comment: &'static str) -> Self {
        Self {
            start,
            end,
            comment,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    #[inline]
    pub fn contains(&self, ip: usize) -> bool {
        self.start <= ip && ip < self.end
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:04x}, {:04x}) {}", self.start, self.end, self.comment)
    }
}

/// Pattern metadata supplied by the compiler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternFlags {
    /// Code points are matched as whole units instead of bytes
    pub unicode: bool,
    /// Class set notation was enabled (`v` flag)
    pub unicode_sets: bool,
    /// ASCII letters compare case-insensitively
    pub case_insensitive: bool,
}

/// Derived fast-path hints handed to the matching engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizationData {
    /// The whole pattern is this literal; the engine may search for it
    /// directly instead of running the program
    pub pure_substring_search: Option<Vec<u8>>,
    /// Sorted ranges one of which every match must start with (empty: any)
    pub starting_ranges: Vec<CharRange>,
    /// `starting_ranges` closed under ASCII lowercasing, for
    /// case-insensitive matching against lowercased input
    pub starting_ranges_insensitive: Vec<CharRange>,
    /// Every match starts at the beginning of the input
    pub only_start_of_line: bool,
}

/// Shape of a loop found by the atomic-group rewriter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicRewriteForm {
    /// `bb0: RE0; ForkX bb0`
    DirectLoopWithoutHeader,
    /// `bb0: RE0; ForkX bb0; bb1: Jump ...`
    DirectLoopWithoutHeaderAndEmptyFollow,
    /// `bb0: ForkX bb2; bb1: RE0; Jump bb0`
    DirectLoopWithHeader,
}

impl AtomicRewriteForm {
    pub fn name(self) -> &'static str {
        match self {
            Self::DirectLoopWithoutHeader => "DirectLoopWithoutHeader",
            Self::DirectLoopWithoutHeaderAndEmptyFollow => "DirectLoopWithoutHeaderAndEmptyFollow",
            Self::DirectLoopWithHeader => "DirectLoopWithHeader",
        }
    }
}

/// Outcome of the atomic-rewrite safety proof
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicRewritePrecondition {
    NotSatisfied,
    SatisfiedWithProperHeader,
    SatisfiedWithEmptyHeader,
}

impl AtomicRewritePrecondition {
    pub fn is_satisfied(self) -> bool {
        self != Self::NotSatisfied
    }
}

/// How alternatives are laid out by the alternation compiler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlternationStrategy {
    /// Pick by estimated cost
    #[default]
    Auto,
    /// Always a sequential fork chain
    Chain,
    /// Prefer the prefix trie whenever it is provably order-safe
    Trie,
}

/// Statistics from one alternation compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlternationStats {
    pub alternatives: usize,
    /// Whether the trie layout was emitted
    pub used_trie: bool,
    pub tree_cost: usize,
    pub chain_cost: usize,
    /// Nodes shared by two or more alternatives
    pub shared_nodes: usize,
    /// Child pairs visited out of alternative order with overlapping tests
    pub ordering_violations: usize,
    /// Why the trie was rejected, if it was
    pub trie_rejected: Option<&'static str>,
}

/// Statistics about optimizations performed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizationStats {
    /// Number of zero-offset jumps and forks removed
    pub useless_jumps_removed: usize,
    /// Units removed by jump threading
    pub units_removed: usize,
    /// Basic blocks found by the first split
    pub blocks_found: usize,
    /// Whether the program reduced to a literal
    pub substring_detected: bool,
    /// Forks promoted to their atomic form
    pub loops_rewritten: usize,
    /// Loop candidates whose safety could not be proven
    pub atomic_candidates_rejected: usize,
    /// Ranges extracted as starting-range hints
    pub starting_ranges_found: usize,
}

impl OptimizationStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Get total optimizations performed
    pub fn total_optimizations(&self) -> usize {
        self.useless_jumps_removed
            + self.loops_rewritten
            + usize::from(self.substring_detected)
            + usize::from(self.starting_ranges_found > 0)
    }

    /// Fold another run's counters into this one
    pub fn merge(&mut self, other: &OptimizationStats) {
        self.useless_jumps_removed += other.useless_jumps_removed;
        self.units_removed += other.units_removed;
        self.blocks_found += other.blocks_found;
        self.substring_detected |= other.substring_detected;
        self.loops_rewritten += other.loops_rewritten;
        self.atomic_candidates_rejected += other.atomic_candidates_rejected;
        self.starting_ranges_found += other.starting_ranges_found;
    }
}
