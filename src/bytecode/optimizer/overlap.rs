//! Overlap analysis between character tests.
//!
//! Both checks answer "may these two tests match a common character?" and
//! answer `true` whenever the question cannot be decided.

use std::collections::BTreeSet;

use crate::bytecode::instruction::CompareTypeAndValuePair;
use crate::bytecode::opcodes::{CharClass, CharRange, CharacterCompareType};
use crate::unicode::UnicodeProperties;

use super::compares::{clamp, interpret, NormalizedCompareSet, RangeSet};

const ASCII: CharRange = CharRange { from: 0, to: 0x7f };

/// Context shared by overlap queries
#[derive(Clone, Copy)]
pub struct OverlapContext<'a> {
    pub unicode: &'a dyn UnicodeProperties,
    pub case_insensitive: bool,
}

impl std::fmt::Debug for OverlapContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlapContext")
            .field("case_insensitive", &self.case_insensitive)
            .finish_non_exhaustive()
    }
}

/// Open `Or` group in the right-hand operand walk
#[derive(Debug, Clone, Copy, Default)]
struct OrGroup {
    matched_in_or: bool,
}

/// Whether `lhs` and `rhs` may both match some character.
///
/// `lhs` is interpreted into a set, then `rhs` is walked operand by operand
/// asking whether each of its positive tests can hit that set.
pub fn has_overlap(
    lhs: &[CompareTypeAndValuePair],
    rhs: &[CompareTypeAndValuePair],
    ctx: OverlapContext<'_>,
) -> bool {
    let Ok(mut lhs_set) = interpret(lhs) else {
        return true;
    };
    if ctx.case_insensitive {
        // Classes have no case-closed form here
        if !lhs_set.char_classes.is_empty() {
            return true;
        }
        lhs_set.fold_ascii_case();
    }

    let mut inverse = false;
    let mut pending_temporary = false;
    let mut or_group: Option<OrGroup> = None;
    let mut inverted_ranges = RangeSet::new();
    let mut saw_inverted = false;

    for pair in rhs {
        if pair.ty == CharacterCompareType::TemporaryInverse {
            pending_temporary = true;
            continue;
        }
        let temporary = std::mem::take(&mut pending_temporary);
        let inverted = inverse ^ temporary;

        let contained = match pair.ty {
            CharacterCompareType::Inverse => {
                inverse = !inverse;
                continue;
            }
            CharacterCompareType::Or => {
                if inverted || or_group.is_some() {
                    return true;
                }
                or_group = Some(OrGroup::default());
                continue;
            }
            CharacterCompareType::EndAndOr => match or_group.take() {
                Some(group) if group.matched_in_or => return true,
                Some(_) => continue,
                None => return true,
            },
            CharacterCompareType::AnyChar => {
                if inverted {
                    // Matches nothing
                    saw_inverted = true;
                    inverted_ranges.insert(CharRange::new(0, u32::MAX));
                    continue;
                }
                true
            }
            CharacterCompareType::Char | CharacterCompareType::CharRange => {
                let Some(range) = pair.char_range() else {
                    return true;
                };
                if inverted {
                    if or_group.is_some() {
                        return true;
                    }
                    saw_inverted = true;
                    inverted_ranges.insert(range);
                    continue;
                }
                range_contained(&lhs_set, range, ctx)
            }
            CharacterCompareType::CharClass => {
                let Some(class) = CharClass::from_value(pair.value) else {
                    return true;
                };
                if inverted {
                    return true;
                }
                class_contained(&lhs_set, class)
            }
            CharacterCompareType::Property
            | CharacterCompareType::GeneralCategory
            | CharacterCompareType::Script
            | CharacterCompareType::ScriptExtension => return true,
            CharacterCompareType::String
            | CharacterCompareType::LookupTable
            | CharacterCompareType::Reference
            | CharacterCompareType::And => return true,
            CharacterCompareType::TemporaryInverse => unreachable!("handled above"),
            CharacterCompareType::Undefined | CharacterCompareType::RangeExpressionDummy => {
                panic!("sentinel compare type {} in operand stream", pair.ty)
            }
        };

        if contained {
            match or_group.as_mut() {
                Some(group) => group.matched_in_or = true,
                None => return true,
            }
        }
    }

    if or_group.is_some() || pending_temporary {
        return true;
    }

    if saw_inverted {
        // rhs also matches everything outside its inverted tests; that is
        // disjoint from lhs only if lhs lies entirely inside them
        if !lhs_set.is_plain_ranges() {
            return true;
        }
        return !lhs_set.ranges.iter().all(|range| inverted_ranges.covers(range));
    }

    false
}

/// Whether `lhs` may match some code point of `range`
fn range_contained(lhs: &NormalizedCompareSet, range: CharRange, ctx: OverlapContext<'_>) -> bool {
    if lhs.has_negations() || lhs.has_reference {
        return true;
    }
    if lhs.ranges.intersects(range) {
        return true;
    }
    if lhs.char_classes.iter().any(|class| class_hits_range(*class, range)) {
        return true;
    }
    if lhs.has_any_unicode_property {
        // Only single code points are checked against the oracle
        if range.from != range.to {
            return true;
        }
        return lhs.any_unicode_property_matches(range.from, ctx.unicode);
    }
    false
}

/// Whether `lhs` may match some member of `class`
fn class_contained(lhs: &NormalizedCompareSet, class: CharClass) -> bool {
    if lhs.has_negations() || lhs.has_reference || lhs.has_any_unicode_property {
        return true;
    }
    if lhs.char_classes.iter().any(|other| other.intersects(class)) {
        return true;
    }
    lhs.ranges.iter().any(|range| class_hits_range(class, range))
}

/// Classes are ASCII-only, so only the ASCII part of the range is scanned
fn class_hits_range(class: CharClass, range: CharRange) -> bool {
    clamp(range, ASCII).is_some_and(|part| (part.from..=part.to).any(|cp| class.matches(cp)))
}

/// Whether two already-interpreted sets may share a character.
///
/// Disjointness is only proven for sets without Unicode properties,
/// negations or back-references.
pub fn sets_overlap(lhs: &NormalizedCompareSet, rhs: &NormalizedCompareSet, case_insensitive: bool) -> bool {
    if !lhs.is_plain_ranges_or_classes() || !rhs.is_plain_ranges_or_classes() {
        return true;
    }

    let mut lhs_ranges = lhs.ranges.clone();
    let mut rhs_ranges = rhs.ranges.clone();
    if case_insensitive {
        // Classes have no case-closed form here
        if !lhs.char_classes.is_empty() || !rhs.char_classes.is_empty() {
            return true;
        }
        lhs_ranges.fold_ascii_case();
        rhs_ranges.fold_ascii_case();
    }

    if lhs_ranges.iter().any(|range| rhs_ranges.intersects(range)) {
        return true;
    }

    let class_hits_ranges = |classes: &BTreeSet<CharClass>, ranges: &RangeSet| {
        classes
            .iter()
            .any(|class| ranges.iter().any(|range| class_hits_range(*class, range)))
    };
    if class_hits_ranges(&lhs.char_classes, &rhs_ranges)
        || class_hits_ranges(&rhs.char_classes, &lhs_ranges)
    {
        return true;
    }

    lhs.char_classes
        .iter()
        .any(|a| rhs.char_classes.iter().any(|b| a.intersects(*b)))
}

impl NormalizedCompareSet {
    /// Positive ranges and classes only
    pub fn is_plain_ranges_or_classes(&self) -> bool {
        !self.has_negations() && !self.has_any_unicode_property && !self.has_reference
    }
}
