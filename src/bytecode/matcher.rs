//! Reference backtracking matcher
//!
//! Executes a [`ByteCode`] program against a sequence of code units. It is a
//! straightforward interpreter with explicit choice points, used to check
//! that optimized programs match exactly what their unoptimized originals
//! match, including capture positions.
//!
//! # Compare semantics
//!
//! Operands of one `Compare` are tests on the current code unit. A test is
//! inverted when the sticky `Inverse` flag XOR a preceding `TemporaryInverse`
//! is set. The instruction matches one unit when any non-inverted test hits,
//! or when it contains inverted tests and none of them hit. `Or`/`And`
//! groups fold their members into a single non-inverted test. `String` and
//! `Reference` tests may consume several units; they are only used when no
//! single-unit test succeeded.

use smallvec::SmallVec;

use super::instruction::{CompareArgs, CompareOperand, Instruction, InstructionKind};
use super::opcodes::{ascii_lower, ascii_upper, BoundaryKind, CharClass, CharRange, OpCodeId};
use super::{ByteCode, ByteCodeValue, DecodeError};
use crate::unicode::{UnicodeProperties, UnknownUnicodeProperties};

/// Result of matcher execution
pub type MatchResult<T> = Result<T, MatchError>;

/// Errors that can occur while matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// The step budget ran out before the attempt finished
    StepBudgetExhausted { steps: usize },
    /// A path needed more backtrack frames than allowed
    ChoicePointLimitExceeded { limit: usize },
    /// The program failed to decode
    Decode(DecodeError),
}

impl std::fmt::Display for MatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepBudgetExhausted { steps } => {
                write!(f, "Step budget exhausted after {} steps", steps)
            }
            Self::ChoicePointLimitExceeded { limit } => {
                write!(f, "Choice point limit of {} exceeded", limit)
            }
            Self::Decode(e) => write!(f, "Decode error: {}", e),
        }
    }
}

impl std::error::Error for MatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::StepBudgetExhausted { .. } | Self::ChoicePointLimitExceeded { .. } => None,
        }
    }
}

impl From<DecodeError> for MatchError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

/// Configuration for the matcher
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Compare ASCII letters without regard to case
    pub case_insensitive: bool,
    /// Maximum instructions executed per match attempt
    pub max_steps: usize,
    /// Maximum choice point stack size
    pub max_choice_points: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            max_steps: 1 << 20,
            max_choice_points: 1 << 16,
        }
    }
}

/// A successful match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub start: usize,
    pub end: usize,
    /// Capture spans by group id; group 0 is the whole match
    pub captures: Vec<Option<(usize, usize)>>,
}

/// Per-path execution state, cloned into choice points
#[derive(Debug, Clone, Default)]
struct ThreadState {
    ip: usize,
    pos: usize,
    /// Left/right positions per capture group id
    captures: SmallVec<[(Option<usize>, Option<usize>); 4]>,
    checkpoints: SmallVec<[Option<usize>; 4]>,
    repeat_marks: SmallVec<[usize; 4]>,
    saved_positions: SmallVec<[usize; 2]>,
}

impl ThreadState {
    fn capture_slot(&mut self, id: usize) -> &mut (Option<usize>, Option<usize>) {
        if self.captures.len() <= id {
            self.captures.resize(id + 1, (None, None));
        }
        &mut self.captures[id]
    }

    fn capture(&self, id: usize) -> Option<(usize, usize)> {
        match self.captures.get(id) {
            Some((Some(left), Some(right))) if left <= right => Some((*left, *right)),
            _ => None,
        }
    }
}

/// Choice point for backtracking
#[derive(Debug, Clone)]
struct ChoicePoint {
    /// Instruction that pushed this choice point
    pushed_by: usize,
    state: ThreadState,
}

/// Folded state of an open `Or`/`And` group
#[derive(Debug, Clone, Copy)]
struct GroupState {
    conjunction: bool,
    inverted: bool,
    value: bool,
}

/// The reference matcher
pub struct Matcher<'a> {
    code: &'a ByteCode,
    config: MatcherConfig,
    unicode: &'a dyn UnicodeProperties,
}

static UNKNOWN_UNICODE: UnknownUnicodeProperties = UnknownUnicodeProperties;

impl<'a> Matcher<'a> {
    /// Create a matcher with default configuration and no Unicode data
    pub fn new(code: &'a ByteCode) -> Self {
        Self::with_config(code, MatcherConfig::default(), &UNKNOWN_UNICODE)
    }

    pub fn with_config(
        code: &'a ByteCode,
        config: MatcherConfig,
        unicode: &'a dyn UnicodeProperties,
    ) -> Self {
        Self {
            code,
            config,
            unicode,
        }
    }

    /// Find the leftmost match in `input`
    pub fn find(&self, input: &[u32]) -> MatchResult<Option<Match>> {
        for start in 0..=input.len() {
            if let Some(m) = self.match_at(input, start)? {
                return Ok(Some(m));
            }
        }
        Ok(None)
    }

    /// Run one match attempt anchored at `start`
    pub fn match_at(&self, input: &[u32], start: usize) -> MatchResult<Option<Match>> {
        let mut state = ThreadState {
            pos: start,
            ..ThreadState::default()
        };
        let mut choice_points: Vec<ChoicePoint> = Vec::new();
        let mut steps = 0usize;

        loop {
            steps += 1;
            if steps > self.config.max_steps {
                return Err(MatchError::StepBudgetExhausted { steps });
            }

            if state.ip >= self.code.len() {
                return Ok(Some(self.finish(start, &state)));
            }

            let instruction = self.code.decode(state.ip)?;
            if !self.execute(&instruction, input, &mut state, &mut choice_points)? {
                match choice_points.pop() {
                    Some(cp) => state = cp.state,
                    None => return Ok(None),
                }
            }
        }
    }

    fn finish(&self, start: usize, state: &ThreadState) -> Match {
        let mut captures = Vec::with_capacity(state.captures.len().max(1));
        captures.push(Some((start, state.pos)));
        for id in 1..state.captures.len() {
            captures.push(state.capture(id));
        }
        Match {
            start,
            end: state.pos,
            captures,
        }
    }

    fn push_choice(
        &self,
        choice_points: &mut Vec<ChoicePoint>,
        pushed_by: usize,
        state: ThreadState,
    ) -> MatchResult<()> {
        if choice_points.len() >= self.config.max_choice_points {
            return Err(MatchError::ChoicePointLimitExceeded {
                limit: self.config.max_choice_points,
            });
        }
        choice_points.push(ChoicePoint { pushed_by, state });
        Ok(())
    }

    /// Branch according to a fork opcode. The current path continues in
    /// `state`, the other one is recorded.
    fn fork(
        &self,
        op: OpCodeId,
        ip: usize,
        target: usize,
        next: usize,
        state: &mut ThreadState,
        choice_points: &mut Vec<ChoicePoint>,
    ) -> MatchResult<()> {
        if op == OpCodeId::Jump {
            state.ip = target;
            return Ok(());
        }
        let (now, later) = match op {
            OpCodeId::ForkJump | OpCodeId::ForkReplaceJump => (target, next),
            _ => (next, target),
        };
        if matches!(op, OpCodeId::ForkReplaceJump | OpCodeId::ForkReplaceStay)
            && choice_points.last().is_some_and(|cp| cp.pushed_by == ip)
        {
            choice_points.pop();
        }
        let mut other = state.clone();
        other.ip = later;
        self.push_choice(choice_points, ip, other)?;
        state.ip = now;
        Ok(())
    }

    /// Execute one instruction. Returns `Ok(false)` when the current path fails.
    fn execute(
        &self,
        instruction: &Instruction<'_>,
        input: &[u32],
        state: &mut ThreadState,
        choice_points: &mut Vec<ChoicePoint>,
    ) -> MatchResult<bool> {
        let ip = instruction.ip;
        let next = instruction.end();
        let target = instruction.jump_target().unwrap_or_default().max(0) as usize;

        match instruction.kind {
            InstructionKind::Jump { .. }
            | InstructionKind::ForkJump { .. }
            | InstructionKind::ForkStay { .. }
            | InstructionKind::ForkReplaceJump { .. }
            | InstructionKind::ForkReplaceStay { .. } => {
                self.fork(instruction.opcode(), ip, target, next, state, choice_points)?;
            }
            InstructionKind::JumpNonEmpty { checkpoint, form, .. } => {
                let checkpoint_pos = state.checkpoints.get(checkpoint).copied().flatten();
                if checkpoint_pos == Some(state.pos) {
                    state.ip = next;
                } else {
                    self.fork(form, ip, target, next, state, choice_points)?;
                }
            }
            InstructionKind::Repeat { count, id, .. } => {
                if state.repeat_marks.len() <= id {
                    state.repeat_marks.resize(id + 1, 0);
                }
                if state.repeat_marks[id] + 1 >= count {
                    state.repeat_marks[id] = 0;
                    state.ip = next;
                } else {
                    state.repeat_marks[id] += 1;
                    state.ip = target;
                }
            }
            InstructionKind::FailForks => {
                choice_points.clear();
                return Ok(false);
            }
            InstructionKind::Compare(args) => match self.compare(args, input, state) {
                Some(advance) => {
                    state.pos += advance;
                    state.ip = next;
                }
                None => return Ok(false),
            },
            InstructionKind::CheckBegin => {
                if state.pos != 0 {
                    return Ok(false);
                }
                state.ip = next;
            }
            InstructionKind::CheckEnd => {
                if state.pos != input.len() {
                    return Ok(false);
                }
                state.ip = next;
            }
            InstructionKind::CheckBoundary(kind) => {
                let before = state.pos > 0 && is_word(input[state.pos - 1]);
                let after = state.pos < input.len() && is_word(input[state.pos]);
                let at_boundary = before != after;
                if at_boundary != (kind == BoundaryKind::Word) {
                    return Ok(false);
                }
                state.ip = next;
            }
            InstructionKind::Save => {
                state.saved_positions.push(state.pos);
                state.ip = next;
            }
            InstructionKind::Restore => {
                let Some(pos) = state.saved_positions.pop() else {
                    return Ok(false);
                };
                state.pos = pos;
                state.ip = next;
            }
            InstructionKind::GoBack(count) => {
                if state.pos < count {
                    return Ok(false);
                }
                state.pos -= count;
                state.ip = next;
            }
            InstructionKind::Checkpoint(id) => {
                if state.checkpoints.len() <= id {
                    state.checkpoints.resize(id + 1, None);
                }
                state.checkpoints[id] = Some(state.pos);
                state.ip = next;
            }
            InstructionKind::SaveLeftCaptureGroup(id) => {
                let pos = state.pos;
                state.capture_slot(id).0 = Some(pos);
                state.ip = next;
            }
            InstructionKind::SaveRightCaptureGroup(id) => {
                let pos = state.pos;
                state.capture_slot(id).1 = Some(pos);
                state.ip = next;
            }
            InstructionKind::ClearCaptureGroup(id) => {
                *state.capture_slot(id) = (None, None);
                state.ip = next;
            }
        }
        Ok(true)
    }

    /// Evaluate a Compare at the current position, returning how many units
    /// it consumes on success.
    fn compare(&self, args: CompareArgs<'_>, input: &[u32], state: &ThreadState) -> Option<usize> {
        let current = input.get(state.pos).copied();

        let mut inverse = false;
        let mut pending_temporary = false;
        let mut positive_hit = false;
        let mut saw_inverted = false;
        let mut inverted_hit = false;
        let mut multi_unit: Option<usize> = None;
        let mut groups: SmallVec<[GroupState; 2]> = SmallVec::new();

        for operand in args.operands() {
            if operand == CompareOperand::TemporaryInverse {
                pending_temporary = true;
                continue;
            }
            let temporary = std::mem::take(&mut pending_temporary);
            let inverted = inverse ^ temporary;

            let (hit, width) = match operand {
                CompareOperand::Inverse => {
                    inverse = !inverse;
                    continue;
                }
                CompareOperand::Or | CompareOperand::And => {
                    let conjunction = operand == CompareOperand::And;
                    groups.push(GroupState {
                        conjunction,
                        inverted,
                        value: conjunction,
                    });
                    continue;
                }
                CompareOperand::EndAndOr => match groups.pop() {
                    Some(group) => (group.value ^ group.inverted, None),
                    None => continue,
                },
                CompareOperand::String(cps) => {
                    let matched = self.matches_sequence(input, state.pos, cps.iter().map(|&v| v as u32));
                    (matched, Some(cps.len()))
                }
                CompareOperand::Reference(group) => match state.capture(group) {
                    Some((left, right)) => {
                        let text = input[left..right].iter().copied();
                        (self.matches_sequence(input, state.pos, text), Some(right - left))
                    }
                    // An unset group matches the empty string
                    None => (true, Some(0)),
                },
                single => (
                    current.is_some_and(|c| self.test_unit(&single, c)),
                    None,
                ),
            };
            // Group results already carry their own inversion
            let inverted = inverted && operand != CompareOperand::EndAndOr;

            if let Some(group) = groups.last_mut() {
                let value = hit ^ inverted;
                if group.conjunction {
                    group.value &= value;
                } else {
                    group.value |= value;
                }
            } else if inverted {
                saw_inverted = true;
                inverted_hit |= hit;
            } else if let Some(width) = width {
                if hit && multi_unit.is_none() {
                    multi_unit = Some(width);
                }
            } else {
                positive_hit |= hit;
            }
        }

        if current.is_some() && (positive_hit || (saw_inverted && !inverted_hit)) {
            return Some(1);
        }
        multi_unit
    }

    fn matches_sequence(&self, input: &[u32], pos: usize, expected: impl Iterator<Item = u32>) -> bool {
        let mut offset = pos;
        for cp in expected {
            match input.get(offset) {
                Some(&c) if self.units_equal(c, cp) => offset += 1,
                _ => return false,
            }
        }
        true
    }

    #[inline]
    fn units_equal(&self, c: u32, cp: u32) -> bool {
        c == cp || (self.config.case_insensitive && ascii_lower(c) == ascii_lower(cp))
    }

    fn in_range(&self, range: CharRange, c: u32) -> bool {
        range.contains(c)
            || (self.config.case_insensitive
                && (range.contains(ascii_lower(c)) || range.contains(ascii_upper(c))))
    }

    fn in_class(&self, class: CharClass, c: u32) -> bool {
        class.matches(c)
            || (self.config.case_insensitive
                && (class.matches(ascii_lower(c)) || class.matches(ascii_upper(c))))
    }

    /// Test a single-unit operand against `c`, ignoring inversion
    fn test_unit(&self, operand: &CompareOperand<'_>, c: u32) -> bool {
        match *operand {
            CompareOperand::AnyChar => true,
            CompareOperand::Char(cp) => self.units_equal(c, cp),
            CompareOperand::CharRange(range) => self.in_range(range, c),
            CompareOperand::CharClass(class) => self.in_class(class, c),
            CompareOperand::LookupTable { sensitive, insensitive } => {
                if self.config.case_insensitive && !insensitive.is_empty() {
                    table_contains(insensitive, ascii_lower(c))
                } else if self.config.case_insensitive {
                    sensitive
                        .iter()
                        .any(|&packed| self.in_range(CharRange::unpack(packed), c))
                } else {
                    table_contains(sensitive, c)
                }
            }
            CompareOperand::Property(p) => self.unicode.has_property(c, p).unwrap_or(false),
            CompareOperand::GeneralCategory(gc) => {
                self.unicode.has_general_category(c, gc).unwrap_or(false)
            }
            CompareOperand::Script(s) => self.unicode.has_script(c, s).unwrap_or(false),
            CompareOperand::ScriptExtension(s) => {
                self.unicode.has_script_extension(c, s).unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// Binary search a sorted, non-overlapping table of packed ranges
fn table_contains(table: &[ByteCodeValue], c: u32) -> bool {
    let index = table.partition_point(|&packed| CharRange::unpack(packed).to < c);
    table
        .get(index)
        .is_some_and(|&packed| CharRange::unpack(packed).contains(c))
}

fn is_word(c: u32) -> bool {
    CharClass::Word.matches(c)
}

/// Convert text into matcher input units.
///
/// In Unicode mode every code point is one unit; otherwise the UTF-8 bytes
/// are the units.
pub fn input_units(text: &str, unicode: bool) -> Vec<u32> {
    if unicode {
        text.chars().map(|c| c as u32).collect()
    } else {
        text.bytes().map(u32::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::CompareTypeAndValuePair as Pair;
    use crate::bytecode::opcodes::CharacterCompareType;

    fn find(code: &ByteCode, text: &str) -> Option<Match> {
        Matcher::new(code).find(&input_units(text, false)).unwrap()
    }

    fn span(code: &ByteCode, text: &str) -> Option<(usize, usize)> {
        find(code, text).map(|m| (m.start, m.end))
    }

    #[test]
    fn test_literal_and_captures() {
        let mut code = ByteCode::new();
        code.emit_save_left_capture_group(1);
        code.emit_literal("a");
        code.emit_save_right_capture_group(1);
        code.emit_literal("b");

        let m = find(&code, "xab").unwrap();
        assert_eq!((m.start, m.end), (1, 3));
        assert_eq!(m.captures, vec![Some((1, 3)), Some((1, 2))]);
        assert!(find(&code, "ba").is_none());
    }

    #[test]
    fn test_fork_order_is_preference_order() {
        // a|ab as ForkJump L0; ab; Jump END; L0: a
        let mut code = ByteCode::new();
        let fork = code.emit_fork_jump(0);
        code.emit_literal("ab");
        let exit = code.emit_jump(0);
        code.patch_jump_to_end(fork);
        code.emit_literal("a");
        code.patch_jump_to_end(exit);

        assert_eq!(span(&code, "ab"), Some((0, 1)));
    }

    #[test]
    fn test_jump_non_empty_stops_empty_iterations() {
        // (a?)*b
        let mut code = ByteCode::new();
        code.emit_checkpoint(0);
        let skip = code.emit_fork_stay(0);
        code.emit_literal("a");
        code.patch_jump_to_end(skip);
        let back = code.emit_jump_non_empty(0, 0, OpCodeId::ForkJump);
        code.patch_jump(back, 0);
        code.emit_literal("b");

        assert_eq!(span(&code, "b"), Some((0, 1)));
        assert_eq!(span(&code, "aab"), Some((0, 3)));
    }

    #[test]
    fn test_repeat_counts_iterations() {
        let mut code = ByteCode::new();
        code.emit_literal("a");
        code.emit_repeat(5, 3, 0);

        assert_eq!(span(&code, "aaaa"), Some((0, 3)));
        assert_eq!(span(&code, "aa"), None);
    }

    #[test]
    fn test_step_budget() {
        let mut code = ByteCode::new();
        let fork = code.emit_fork_jump(0);
        code.patch_jump(fork, 0);

        let config = MatcherConfig {
            max_steps: 100,
            ..MatcherConfig::default()
        };
        let result = Matcher::with_config(&code, config, &UNKNOWN_UNICODE).match_at(&[], 0);
        assert!(matches!(result, Err(MatchError::StepBudgetExhausted { steps: 101 })));
    }

    #[test]
    fn test_choice_point_limit() {
        // a*a
        let mut code = ByteCode::new();
        let fork = code.emit_fork_stay(0);
        code.emit_compare(&[Pair::char('a')]);
        let back = code.emit_jump(0);
        code.patch_jump(back, fork);
        code.patch_jump_to_end(fork);
        code.emit_compare(&[Pair::char('a')]);

        let config = MatcherConfig {
            max_choice_points: 8,
            ..MatcherConfig::default()
        };
        let matcher = Matcher::with_config(&code, config, &UNKNOWN_UNICODE);

        let short = matcher.find(&input_units("aaaa", false)).unwrap().unwrap();
        assert_eq!((short.start, short.end), (0, 4));

        let result = matcher.find(&input_units(&"a".repeat(20), false));
        assert_eq!(result, Err(MatchError::ChoicePointLimitExceeded { limit: 8 }));
    }

    #[test]
    fn test_word_boundary() {
        let mut code = ByteCode::new();
        code.emit_check_boundary(BoundaryKind::Word);
        code.emit_literal("ab");
        code.emit_check_boundary(BoundaryKind::Word);

        assert_eq!(span(&code, "xab ab"), Some((4, 6)));
        assert_eq!(span(&code, "abc"), None);
    }

    #[test]
    fn test_back_reference() {
        let mut code = ByteCode::new();
        code.emit_save_left_capture_group(1);
        code.emit_compare(&[Pair::range('a', 'z')]);
        code.emit_save_right_capture_group(1);
        code.emit_compare(&[Pair::reference(1)]);

        assert_eq!(span(&code, "xyzzy"), Some((2, 4)));
        assert_eq!(span(&code, "abc"), None);
    }

    #[test]
    fn test_inverted_and_grouped_operands() {
        // [^a-c]
        let mut code = ByteCode::new();
        code.emit_compare(&[Pair::inverse(), Pair::range('a', 'c')]);
        assert_eq!(span(&code, "abcd"), Some((3, 4)));
        assert_eq!(span(&code, ""), None);

        // [[a-z]&&[^x]]
        let mut code = ByteCode::new();
        code.emit_compare(&[
            Pair::marker(CharacterCompareType::And),
            Pair::range('a', 'z'),
            Pair::temporary_inverse(),
            Pair::char('x'),
            Pair::marker(CharacterCompareType::EndAndOr),
        ]);
        assert_eq!(span(&code, "xxy"), Some((2, 3)));
    }

    #[test]
    fn test_case_insensitive_config() {
        let mut code = ByteCode::new();
        code.emit_literal("ab");
        let config = MatcherConfig {
            case_insensitive: true,
            ..MatcherConfig::default()
        };
        let matcher = Matcher::with_config(&code, config, &UNKNOWN_UNICODE);
        let m = matcher.find(&input_units("xAB", false)).unwrap().unwrap();
        assert_eq!((m.start, m.end), (1, 3));
    }

    #[test]
    fn test_fail_forks_discards_alternatives() {
        // ForkJump L0; b; Jump E; L0: a; E: FailForks
        let mut code = ByteCode::new();
        let fork = code.emit_fork_jump(0);
        code.emit_literal("b");
        let exit = code.emit_jump(0);
        code.patch_jump_to_end(fork);
        code.emit_literal("a");
        code.patch_jump_to_end(exit);
        code.emit_fail_forks();

        assert_eq!(Matcher::new(&code).match_at(&input_units("b", false), 0).unwrap(), None);
    }
}
