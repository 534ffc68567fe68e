//! Optimizer instrumentation hooks.
//!
//! The pipeline reports pass boundaries, block splits and individual
//! rewrites to an [`OptimizerObserver`]. [`NoopObserver`] ignores them;
//! [`TracingObserver`] forwards them to `tracing` at debug level.

use std::fmt;

use tracing::debug;

use super::types::BasicBlock;

/// Passes of the optimization pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimizationPass {
    JumpThreading,
    BlockSplitting,
    SubstringSearch,
    AtomicRewrite,
    StartingRanges,
}

impl OptimizationPass {
    pub fn name(self) -> &'static str {
        match self {
            Self::JumpThreading => "jump-threading",
            Self::BlockSplitting => "block-splitting",
            Self::SubstringSearch => "substring-search",
            Self::AtomicRewrite => "atomic-rewrite",
            Self::StartingRanges => "starting-ranges",
        }
    }
}

impl fmt::Display for OptimizationPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Hook points of the optimizer. All methods default to doing nothing.
pub trait OptimizerObserver: Send + Sync {
    fn pass_started(&self, _pass: OptimizationPass) {}

    /// `changed` is false when the pass left the program as it was
    fn pass_finished(&self, _pass: OptimizationPass, _changed: bool) {}

    /// One rewrite at `ip`
    fn rewrite_applied(&self, _pass: OptimizationPass, _ip: usize, _detail: &str) {}

    fn blocks_split(&self, _blocks: &[BasicBlock]) {}
}

/// Observer that ignores every hook
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl OptimizerObserver for NoopObserver {}

/// Observer that logs every hook through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl OptimizerObserver for TracingObserver {
    fn pass_started(&self, pass: OptimizationPass) {
        debug!(target: "rxopt::optimizer", pass = pass.name(), "pass started");
    }

    fn pass_finished(&self, pass: OptimizationPass, changed: bool) {
        debug!(target: "rxopt::optimizer", pass = pass.name(), changed, "pass finished");
    }

    fn rewrite_applied(&self, pass: OptimizationPass, ip: usize, detail: &str) {
        debug!(target: "rxopt::optimizer", pass = pass.name(), ip, detail, "rewrite applied");
    }

    fn blocks_split(&self, blocks: &[BasicBlock]) {
        debug!(target: "rxopt::optimizer", blocks = blocks.len(), "blocks split");
        for block in blocks {
            debug!(target: "rxopt::optimizer", %block, "block");
        }
    }
}
