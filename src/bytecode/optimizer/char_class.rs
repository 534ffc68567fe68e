//! Character class compaction.
//!
//! A class such as `[a-z0-9_]` compiles to many Char/CharRange operands.
//! The compactor folds them into one sorted `LookupTable` that the engine can
//! binary search, plus a lowercased shadow table for case-insensitive
//! matching when that differs from the table itself.
//!
//! Operands the table cannot express (classes, properties, references,
//! boolean groups) are emitted as they are, in order, with their inversion
//! made explicit.

use tracing::trace;

use crate::bytecode::instruction::{CompareOperand, CompareTypeAndValuePair};
use crate::bytecode::opcodes::{ascii_lower, CharRange, CharacterCompareType};
use crate::bytecode::{ByteCode, ByteCodeValue};

use super::compares::{clamp, RangeSet};

/// What happened to one operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertionResult {
    Successful,
    ReplaceWithAnyChar,
    TemporaryInversionNeeded,
    PermanentInversionNeeded,
    FlushOnInsertion,
    FinishFlushOnInsertion,
    CannotPlaceInTable,
}

/// Working state of the compactor
#[derive(Debug, Default)]
struct ClassCompactor {
    /// Ranges whose test is not inverted
    table: RangeSet,
    /// Ranges whose test is inverted
    inverted_table: RangeSet,
    /// Sticky inversion as already emitted
    inverse: bool,
    temporary_inverse: bool,
    /// Nesting depth of Or/And groups; inside them nothing is tabled
    group_depth: usize,
    saw_any_char: bool,
    count: usize,
    args: Vec<ByteCodeValue>,
}

impl ClassCompactor {
    fn effective_inversion(&self) -> bool {
        self.inverse ^ self.temporary_inverse
    }

    fn push_pair(&mut self, pair: CompareTypeAndValuePair) {
        pair.encode_into(&mut self.args);
        self.count += 1;
    }

    fn push_operand(&mut self, operand: CompareOperand<'_>) {
        operand.encode_into(&mut self.args);
        self.count += 1;
    }

    /// Emit a test with the given inversion relative to the sticky flag
    fn push_with_inversion(&mut self, pair: CompareTypeAndValuePair, inverted: bool) {
        if inverted != self.inverse {
            self.push_pair(CompareTypeAndValuePair::temporary_inverse());
        }
        self.push_pair(pair);
    }

    fn insert(&mut self, pair: CompareTypeAndValuePair) -> InsertionResult {
        use CharacterCompareType as T;

        if pair.ty == T::TemporaryInverse {
            self.temporary_inverse = true;
            return InsertionResult::TemporaryInversionNeeded;
        }
        let inverted = self.effective_inversion();
        self.temporary_inverse = false;

        match pair.ty {
            T::Inverse => {
                self.flush();
                self.push_pair(pair);
                self.inverse = !self.inverse;
                InsertionResult::PermanentInversionNeeded
            }
            T::Char | T::CharRange if self.group_depth == 0 => {
                let Some(range) = pair.char_range() else {
                    self.push_with_inversion(pair, inverted);
                    return InsertionResult::CannotPlaceInTable;
                };
                if self.saw_any_char && !inverted {
                    return InsertionResult::Successful;
                }
                if inverted {
                    self.inverted_table.insert(range);
                } else {
                    self.table.insert(range);
                }
                InsertionResult::Successful
            }
            T::AnyChar if self.group_depth == 0 && !inverted => {
                // Matches every character, so no positive range matters
                self.table = RangeSet::new();
                if !self.saw_any_char {
                    self.saw_any_char = true;
                    self.push_with_inversion(pair, false);
                }
                InsertionResult::ReplaceWithAnyChar
            }
            T::Or | T::And => {
                self.flush();
                self.push_with_inversion(pair, inverted);
                self.group_depth += 1;
                InsertionResult::FlushOnInsertion
            }
            T::EndAndOr => {
                self.push_pair(pair);
                self.group_depth = self.group_depth.saturating_sub(1);
                InsertionResult::FinishFlushOnInsertion
            }
            T::Undefined | T::RangeExpressionDummy => {
                panic!("sentinel compare type {} in class operands", pair.ty)
            }
            _ => {
                self.push_with_inversion(pair, inverted);
                InsertionResult::CannotPlaceInTable
            }
        }
    }

    /// Write out the accumulated tables
    fn flush(&mut self) {
        let table = std::mem::take(&mut self.table);
        let inverted_table = std::mem::take(&mut self.inverted_table);
        self.flush_table(table, false);
        self.flush_table(inverted_table, true);
    }

    fn flush_table(&mut self, table: RangeSet, inverted: bool) {
        if table.is_empty() {
            return;
        }
        if inverted != self.inverse {
            self.push_pair(CompareTypeAndValuePair::temporary_inverse());
        }

        let sensitive: Vec<ByteCodeValue> = table.iter().map(CharRange::pack).collect();
        let shadow = insensitive_shadow(&table);
        let insensitive: Vec<ByteCodeValue> = if shadow == table {
            Vec::new()
        } else {
            shadow.iter().map(CharRange::pack).collect()
        };
        self.push_operand(CompareOperand::LookupTable {
            sensitive: &sensitive,
            insensitive: &insensitive,
        });
    }

    fn finish(mut self) -> (usize, Vec<ByteCodeValue>) {
        self.flush();
        if self.temporary_inverse {
            // A trailing TemporaryInverse applies to nothing but is kept
            self.push_pair(CompareTypeAndValuePair::temporary_inverse());
        }
        (self.count, self.args)
    }
}

/// The table closed under ASCII lowercasing, for lookups of lowercased input
pub fn insensitive_shadow(table: &RangeSet) -> RangeSet {
    let upper = CharRange::new(b'A' as u32, b'Z' as u32);
    let mut shadow = table.clone();
    for range in table.iter() {
        if let Some(part) = clamp(range, upper) {
            shadow.insert(CharRange::new(ascii_lower(part.from), ascii_lower(part.to)));
        }
    }
    shadow
}

/// Compile class operands into Compare arguments: `(operand count, units)`
///
/// # Panics
///
/// Panics on the `Undefined` and `RangeExpressionDummy` sentinels.
pub fn compile_class(pairs: &[CompareTypeAndValuePair]) -> (usize, Vec<ByteCodeValue>) {
    if pairs.len() <= 1 {
        let mut args = Vec::new();
        for pair in pairs {
            pair.encode_into(&mut args);
        }
        return (pairs.len(), args);
    }

    let mut compactor = ClassCompactor::default();
    for pair in pairs {
        let result = compactor.insert(*pair);
        trace!(
            target: "rxopt::optimizer::char_class",
            ty = %pair.ty,
            ?result,
            "class operand"
        );
    }
    compactor.finish()
}

impl ByteCode {
    /// Append a Compare testing the class described by `pairs`
    pub fn append_character_class(&mut self, pairs: &[CompareTypeAndValuePair]) {
        let (count, args) = compile_class(pairs);
        self.emit_compare_units(count, &args);
    }
}
