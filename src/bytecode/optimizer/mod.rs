//! Regex Bytecode Optimizer
//!
//! This module rewrites a compiled pattern in place into an equivalent but
//! cheaper program and derives fast-path hints for the matching engine.
//! Every pass fails closed: when a rewrite cannot be proven safe it is
//! skipped and the program is left as the previous pass produced it.
//!
//! # Pipeline
//!
//! | Pass | Effect |
//! |------|--------|
//! | Jump threading | Drops zero-offset jumps/forks and renumbers offsets |
//! | Block splitting | Partitions the program for the passes below |
//! | Substring search | Detects a program that is one literal; later passes are skipped |
//! | Atomic rewrite | Promotes forks of loops disjoint from their follower to `ForkReplace*` |
//! | Starting ranges | Extracts the first-character set and start-of-input anchoring |
//!
//! Alternation compilation and character-class compaction run earlier, while
//! the program is being generated, through
//! [`ByteCode::append_alternation`](crate::bytecode::ByteCode::append_alternation) and
//! [`ByteCode::append_character_class`](crate::bytecode::ByteCode::append_character_class).
//!
//! # Example
//!
//! ```ignore
//! // Before optimization (a*b):
//! // 0000 ForkStay -> 0009
//! // 0002 Compare [Char(97)]
//! // 0007 Jump -> 0000
//! // 0009 Compare [Char(98)]
//!
//! // After optimization:
//! // 0000 ForkReplaceStay -> 0009
//! // ...
//! ```

mod alternation;
mod atomic;
mod blocks;
mod char_class;
mod compares;
mod helpers;
mod observer;
mod overlap;
mod starting_ranges;
mod substring;
mod threading;
mod types;

#[cfg(test)]
mod tests;

// Re-export public types
pub use atomic::{
    block_satisfies_atomic_rewrite_precondition, find_atomic_candidates,
    rewrite_loops_as_atomic_groups, AtomicCandidate, AtomicRewriteOutcome,
};
pub use blocks::{block_starting_at, split_basic_blocks};
pub use char_class::{compile_class, insensitive_shadow};
pub use compares::{clamp, interpret, NormalizedCompareSet, RangeSet, Uninterpretable};
pub use observer::{NoopObserver, OptimizationPass, OptimizerObserver, TracingObserver};
pub use overlap::{has_overlap, sets_overlap, OverlapContext};
pub use starting_ranges::{extract_starting_ranges, may_start_with};
pub use substring::try_as_substring;
pub use threading::{thread_jumps, ThreadingOutcome};
pub use types::{
    AlternationStats, AlternationStrategy, AtomicRewriteForm, AtomicRewritePrecondition,
    BasicBlock, OptimizationData, OptimizationStats, PatternFlags,
};

use tracing::debug;

use crate::bytecode::{ByteCode, DecodeError};
use crate::config::OptimizerConfig;
use crate::unicode::{UnicodeProperties, UnknownUnicodeProperties};

/// Result type for optimization
pub type OptimizeResult<T> = Result<T, OptimizeError>;

/// Errors returned by [`Optimizer::optimize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizeError {
    /// The program failed validation; it was not modified
    MalformedBytecode { ip: usize, source: DecodeError },
}

impl std::fmt::Display for OptimizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedBytecode { ip, source } => {
                write!(f, "Malformed bytecode at {:04x}: {}", ip, source)
            }
        }
    }
}

impl std::error::Error for OptimizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MalformedBytecode { source, .. } => Some(source),
        }
    }
}

static UNKNOWN_UNICODE: UnknownUnicodeProperties = UnknownUnicodeProperties;
static NOOP_OBSERVER: NoopObserver = NoopObserver;

/// Pass pipeline over one program at a time
pub struct Optimizer<'a> {
    config: OptimizerConfig,
    unicode: &'a dyn UnicodeProperties,
    observer: &'a dyn OptimizerObserver,
    /// Statistics accumulated over every program optimized so far
    stats: OptimizationStats,
}

impl Default for Optimizer<'_> {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

impl<'a> Optimizer<'a> {
    /// Create an optimizer without Unicode data and without instrumentation
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            unicode: &UNKNOWN_UNICODE,
            observer: &NOOP_OBSERVER,
            stats: OptimizationStats::new(),
        }
    }

    /// Answer Unicode property questions through `unicode`
    pub fn with_unicode(mut self, unicode: &'a dyn UnicodeProperties) -> Self {
        self.unicode = unicode;
        self
    }

    /// Report pass and rewrite events to `observer`
    pub fn with_observer(mut self, observer: &'a dyn OptimizerObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Get optimization statistics
    pub fn stats(&self) -> &OptimizationStats {
        &self.stats
    }

    /// Optimize `code` in place and derive its fast-path hints.
    ///
    /// The program is validated first; a malformed program is returned as an
    /// error and left untouched.
    pub fn optimize(&mut self, code: &mut ByteCode, flags: PatternFlags) -> OptimizeResult<OptimizationData> {
        code.validate()
            .map_err(|source| OptimizeError::MalformedBytecode {
                ip: source.ip(),
                source,
            })?;

        let mut run = OptimizationStats::new();
        let mut data = OptimizationData::default();

        if self.config.enable_jump_threading {
            self.observer.pass_started(OptimizationPass::JumpThreading);
            let outcome = thread_jumps(code);
            run.useless_jumps_removed = outcome.jumps_removed;
            run.units_removed = outcome.units_removed;
            self.observer
                .pass_finished(OptimizationPass::JumpThreading, outcome.changed());
        }

        self.observer.pass_started(OptimizationPass::BlockSplitting);
        let blocks = split_basic_blocks(code);
        run.blocks_found = blocks.len();
        self.observer.blocks_split(&blocks);
        self.observer
            .pass_finished(OptimizationPass::BlockSplitting, false);

        if self.config.enable_substring_search {
            self.observer.pass_started(OptimizationPass::SubstringSearch);
            let literal = try_as_substring(code, &blocks, flags);
            self.observer
                .pass_finished(OptimizationPass::SubstringSearch, literal.is_some());

            if let Some(literal) = literal {
                run.substring_detected = true;
                data.pure_substring_search = Some(literal);
                self.finish(code, run);
                return Ok(data);
            }
        }

        if self.config.enable_atomic_rewrite {
            self.observer.pass_started(OptimizationPass::AtomicRewrite);
            let ctx = OverlapContext {
                unicode: self.unicode,
                case_insensitive: flags.case_insensitive,
            };
            let outcome =
                rewrite_loops_as_atomic_groups(code, &blocks, ctx, self.config.single_atomic_rewrite);
            for &ip in &outcome.rewritten {
                self.observer
                    .rewrite_applied(OptimizationPass::AtomicRewrite, ip, "fork promoted to atomic form");
            }
            run.loops_rewritten = outcome.rewritten.len();
            run.atomic_candidates_rejected = outcome.rejected;
            self.observer
                .pass_finished(OptimizationPass::AtomicRewrite, !outcome.rewritten.is_empty());
        }

        if self.config.extract_starting_ranges {
            self.observer.pass_started(OptimizationPass::StartingRanges);
            extract_starting_ranges(code, &blocks, &mut data);
            run.starting_ranges_found = data.starting_ranges.len();
            self.observer.pass_finished(
                OptimizationPass::StartingRanges,
                run.starting_ranges_found > 0 || data.only_start_of_line,
            );
        }

        self.finish(code, run);
        Ok(data)
    }

    fn finish(&mut self, code: &ByteCode, run: OptimizationStats) {
        debug_assert!(code.validate().is_ok(), "optimizer produced malformed bytecode");
        debug!(
            target: "rxopt::optimizer",
            units = code.len(),
            blocks = run.blocks_found,
            jumps_removed = run.useless_jumps_removed,
            loops_rewritten = run.loops_rewritten,
            substring = run.substring_detected,
            "optimized program"
        );
        self.stats.merge(&run);
    }
}
