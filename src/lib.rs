/// rxopt - Regular Expression Bytecode Optimizer
///
/// This library rewrites compiled regular-expression bytecode into cheaper,
/// semantically equivalent bytecode, and derives hints that let a matching
/// engine skip work entirely.
///
/// # Architecture
///
/// The pipeline consists of two stages:
///
/// 1. **Code generation helpers** (`bytecode` module)
///    - Emits instructions into a flat `ByteCode` buffer
///    - Compiles alternations as a fork chain or a prefix trie
///    - Compacts character classes into lookup tables
///
/// 2. **Whole-program optimization** (`bytecode::optimizer` module)
///    - Removes useless jumps and forks
///    - Detects programs that are a single literal
///    - Rewrites loops that can never backtrack usefully into atomic forks
///    - Extracts starting ranges and start-of-input anchoring
///
/// # Example
///
/// ```rust
/// use rxopt::bytecode::ByteCode;
/// use rxopt::{OptimizerConfig, PatternFlags, Program};
///
/// let mut code = ByteCode::new();
/// code.emit_literal("needle");
///
/// let mut program = Program::new(code, PatternFlags::default());
/// program.optimize(&OptimizerConfig::default()).unwrap();
///
/// assert_eq!(program.data().pure_substring_search.as_deref(), Some(&b"needle"[..]));
/// let m = program.find("haystack with a needle").unwrap().unwrap();
/// assert_eq!((m.start, m.end), (16, 22));
/// ```
///
/// # Safety of Rewrites
///
/// - **Fail closed**: a rewrite that cannot be proven safe is not applied
/// - **Validation first**: malformed bytecode is rejected before any pass runs
/// - **Reference matcher**: `bytecode::Matcher` executes programs so that
///   optimized and unoptimized behavior can be compared
pub mod bytecode;
pub mod config;
pub mod program;
pub mod unicode;

pub use bytecode::optimizer::{
    AlternationStats, AlternationStrategy, OptimizationData, OptimizationStats, OptimizeError,
    OptimizeResult, Optimizer, OptimizerObserver, PatternFlags, TracingObserver,
};
pub use bytecode::{ByteCode, ByteCodeValue, DecodeError, Match, Matcher};
pub use config::{ConfigError, OptimizerConfig};
pub use program::{optimize_batch, Program};
pub use unicode::{BasicUnicodeProperties, UnicodeProperties, UnknownUnicodeProperties};
