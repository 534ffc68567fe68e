//! Compiled patterns with their derived hints.
//!
//! A [`Program`] owns one bytecode buffer, the flags it was compiled with and
//! the [`OptimizationData`] produced by the last optimization. Searching
//! consults the hints before running the matcher, so a literal program never
//! reaches the interpreter and positions that cannot start a match are
//! skipped.

use memchr::memmem;
use rayon::prelude::*;
use tracing::debug;

use crate::bytecode::matcher::input_units;
use crate::bytecode::optimizer::{
    may_start_with, AlternationStats, OptimizationData, OptimizationStats, OptimizeResult, Optimizer, PatternFlags,
};
use crate::bytecode::{ByteCode, Match, MatchResult, Matcher, MatcherConfig};
use crate::config::OptimizerConfig;
use crate::unicode::BasicUnicodeProperties;

static UNICODE: BasicUnicodeProperties = BasicUnicodeProperties;

/// A compiled pattern
#[derive(Debug, Clone)]
pub struct Program {
    code: ByteCode,
    flags: PatternFlags,
    data: OptimizationData,
}

impl Program {
    pub fn new(code: ByteCode, flags: PatternFlags) -> Self {
        Self {
            code,
            flags,
            data: OptimizationData::default(),
        }
    }

    /// Join separately compiled alternatives into one program, laid out with
    /// the configured alternation strategy
    pub fn from_alternatives(
        alternatives: Vec<ByteCode>,
        flags: PatternFlags,
        config: &OptimizerConfig,
    ) -> (Self, AlternationStats) {
        let mut code = ByteCode::new();
        let stats = code.append_alternation(alternatives, config.alternation_strategy, flags);
        (Self::new(code, flags), stats)
    }

    pub fn code(&self) -> &ByteCode {
        &self.code
    }

    pub fn flags(&self) -> PatternFlags {
        self.flags
    }

    /// Hints from the last optimization (all empty before the first)
    pub fn data(&self) -> &OptimizationData {
        &self.data
    }

    /// Optimize the program in place and keep the derived hints
    pub fn optimize(&mut self, config: &OptimizerConfig) -> OptimizeResult<OptimizationStats> {
        let mut optimizer = Optimizer::new(config.clone()).with_unicode(&UNICODE);
        self.data = optimizer.optimize(&mut self.code, self.flags)?;
        Ok(optimizer.stats().clone())
    }

    /// Matcher over this program with settings taken from the pattern flags
    pub fn matcher(&self) -> Matcher<'_> {
        let config = MatcherConfig {
            case_insensitive: self.flags.case_insensitive,
            ..MatcherConfig::default()
        };
        Matcher::with_config(&self.code, config, &UNICODE)
    }

    /// Leftmost match in `text`.
    ///
    /// Positions are unit indices: code points in Unicode mode, UTF-8 bytes
    /// otherwise.
    pub fn find(&self, text: &str) -> MatchResult<Option<Match>> {
        if let Some(literal) = &self.data.pure_substring_search {
            return Ok(self.find_literal(text, literal));
        }
        self.find_units(&input_units(text, self.flags.unicode))
    }

    /// Leftmost match in pre-split input units
    pub fn find_units(&self, input: &[u32]) -> MatchResult<Option<Match>> {
        let matcher = self.matcher();
        if self.data.only_start_of_line {
            return matcher.match_at(input, 0);
        }

        for start in 0..=input.len() {
            if let Some(&unit) = input.get(start) {
                if !may_start_with(&self.data, unit, self.flags.case_insensitive) {
                    continue;
                }
            } else if !self.data.starting_ranges.is_empty() {
                // A match needs at least one unit from the starting ranges
                break;
            }
            if let Some(m) = matcher.match_at(input, start)? {
                return Ok(Some(m));
            }
        }
        Ok(None)
    }

    fn find_literal(&self, text: &str, literal: &[u8]) -> Option<Match> {
        let byte_start = memmem::find(text.as_bytes(), literal)?;
        let byte_end = byte_start + literal.len();
        let (start, end) = if self.flags.unicode {
            let start = text[..byte_start].chars().count();
            (start, start + text[byte_start..byte_end].chars().count())
        } else {
            (byte_start, byte_end)
        };
        Some(Match {
            start,
            end,
            captures: vec![Some((start, end))],
        })
    }
}

/// Optimize independent programs in parallel.
///
/// Returns the merged statistics, or the first error in program order.
/// Programs that failed are left untouched; the others are optimized.
pub fn optimize_batch(programs: &mut [Program], config: &OptimizerConfig) -> OptimizeResult<OptimizationStats> {
    let results: Vec<OptimizeResult<OptimizationStats>> = programs
        .par_iter_mut()
        .map(|program| program.optimize(config))
        .collect();

    let mut total = OptimizationStats::new();
    for result in results {
        total.merge(&result?);
    }
    debug!(
        target: "rxopt::program",
        programs = programs.len(),
        optimizations = total.total_optimizations(),
        "batch optimized"
    );
    Ok(total)
}
