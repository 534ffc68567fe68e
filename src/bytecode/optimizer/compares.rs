//! Symbolic interpretation of Compare operands.
//!
//! [`interpret`] folds a sequence of `(type, value)` operand pairs into a
//! [`NormalizedCompareSet`]: positive and negated code point ranges, character
//! classes and Unicode property sets. Operand types that cannot be expressed
//! as a flat union make interpretation fail, and callers must then assume the
//! instruction may match anything.

use std::collections::{BTreeMap, BTreeSet};

use crate::bytecode::instruction::CompareTypeAndValuePair;
use crate::bytecode::opcodes::{ascii_lower, ascii_upper, CharClass, CharRange, CharacterCompareType};
use crate::unicode::{GeneralCategory, Property, Script, UnicodeProperties};

/// The operands defy static range analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uninterpretable {
    pub ty: CharacterCompareType,
}

impl std::fmt::Display for Uninterpretable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} operand cannot be interpreted statically", self.ty)
    }
}

impl std::error::Error for Uninterpretable {}

/// Sorted set of disjoint, non-adjacent code point ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    /// `from -> to`, inclusive
    ranges: BTreeMap<u32, u32>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Insert a range, merging it with any overlapping or adjacent ranges
    pub fn insert(&mut self, range: CharRange) {
        let mut from = range.from;
        let mut to = range.to;

        let touching: Vec<(u32, u32)> = self
            .ranges
            .range(..=to.saturating_add(1))
            .rev()
            .take_while(|(_, &end)| end.saturating_add(1) >= from)
            .map(|(&start, &end)| (start, end))
            .collect();

        for (start, end) in touching {
            self.ranges.remove(&start);
            from = from.min(start);
            to = to.max(end);
        }
        self.ranges.insert(from, to);
    }

    pub fn contains(&self, cp: u32) -> bool {
        self.ranges
            .range(..=cp)
            .next_back()
            .is_some_and(|(_, &to)| cp <= to)
    }

    /// Whether any member lies in `range`
    pub fn intersects(&self, range: CharRange) -> bool {
        self.ranges
            .range(..=range.to)
            .next_back()
            .is_some_and(|(_, &to)| to >= range.from)
    }

    /// Whether every code point of `range` is a member
    pub fn covers(&self, range: CharRange) -> bool {
        self.ranges
            .range(..=range.from)
            .next_back()
            .is_some_and(|(_, &to)| to >= range.to)
    }

    pub fn iter(&self) -> impl Iterator<Item = CharRange> + '_ {
        self.ranges.iter().map(|(&from, &to)| CharRange::new(from, to))
    }

    /// Close the set under ASCII case mapping
    pub fn fold_ascii_case(&mut self) {
        let upper = CharRange::new(b'A' as u32, b'Z' as u32);
        let lower = CharRange::new(b'a' as u32, b'z' as u32);
        let mut extra = Vec::new();
        for range in self.iter() {
            if let Some(part) = clamp(range, upper) {
                extra.push(CharRange::new(ascii_lower(part.from), ascii_lower(part.to)));
            }
            if let Some(part) = clamp(range, lower) {
                extra.push(CharRange::new(ascii_upper(part.from), ascii_upper(part.to)));
            }
        }
        for range in extra {
            self.insert(range);
        }
    }
}

impl FromIterator<CharRange> for RangeSet {
    fn from_iter<I: IntoIterator<Item = CharRange>>(iter: I) -> Self {
        let mut set = RangeSet::new();
        for range in iter {
            set.insert(range);
        }
        set
    }
}

/// Intersection of two ranges
pub fn clamp(range: CharRange, bounds: CharRange) -> Option<CharRange> {
    let from = range.from.max(bounds.from);
    let to = range.to.min(bounds.to);
    (from <= to).then(|| CharRange::new(from, to))
}

/// Range/class/property decomposition of one character test
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedCompareSet {
    pub ranges: RangeSet,
    pub negated_ranges: RangeSet,
    pub char_classes: BTreeSet<CharClass>,
    pub negated_char_classes: BTreeSet<CharClass>,
    pub general_categories: BTreeSet<GeneralCategory>,
    pub negated_general_categories: BTreeSet<GeneralCategory>,
    pub properties: BTreeSet<Property>,
    pub negated_properties: BTreeSet<Property>,
    pub scripts: BTreeSet<Script>,
    pub negated_scripts: BTreeSet<Script>,
    pub script_extensions: BTreeSet<Script>,
    pub negated_script_extensions: BTreeSet<Script>,
    /// Some test can only be decided per code point through the oracle
    pub has_any_unicode_property: bool,
    /// A back-reference was skipped; its characters are unknown
    pub has_reference: bool,
}

impl NormalizedCompareSet {
    pub fn has_negations(&self) -> bool {
        !self.negated_ranges.is_empty()
            || !self.negated_char_classes.is_empty()
            || !self.negated_general_categories.is_empty()
            || !self.negated_properties.is_empty()
            || !self.negated_scripts.is_empty()
            || !self.negated_script_extensions.is_empty()
    }

    /// Only positive ranges, nothing that needs per-code-point checks
    pub fn is_plain_ranges(&self) -> bool {
        !self.has_negations()
            && self.char_classes.is_empty()
            && !self.has_any_unicode_property
            && !self.has_reference
    }

    /// Ask the oracle whether `cp` satisfies any positive property test.
    /// Unknown answers count as a match.
    pub fn any_unicode_property_matches(&self, cp: u32, unicode: &dyn UnicodeProperties) -> bool {
        let known = |answer: Option<bool>| answer.unwrap_or(true);
        self.properties.iter().any(|p| known(unicode.has_property(cp, *p)))
            || self
                .general_categories
                .iter()
                .any(|gc| known(unicode.has_general_category(cp, *gc)))
            || self.scripts.iter().any(|s| known(unicode.has_script(cp, *s)))
            || self
                .script_extensions
                .iter()
                .any(|s| known(unicode.has_script_extension(cp, *s)))
    }

    /// Close ranges under ASCII case mapping, for case-insensitive patterns
    pub fn fold_ascii_case(&mut self) {
        self.ranges.fold_ascii_case();
        self.negated_ranges.fold_ascii_case();
    }
}

/// Interpret operand pairs into a normalized set.
///
/// # Panics
///
/// Panics on the `Undefined` and `RangeExpressionDummy` sentinels, which
/// never appear in a valid program.
pub fn interpret(pairs: &[CompareTypeAndValuePair]) -> Result<NormalizedCompareSet, Uninterpretable> {
    let mut set = NormalizedCompareSet::default();
    let mut inverse = false;
    let mut pending_temporary = false;

    for pair in pairs {
        if pair.ty == CharacterCompareType::TemporaryInverse {
            pending_temporary = true;
            continue;
        }
        let temporary = std::mem::take(&mut pending_temporary);
        let inverted = inverse ^ temporary;
        let fail = Err(Uninterpretable { ty: pair.ty });

        match pair.ty {
            CharacterCompareType::Inverse => inverse = !inverse,
            CharacterCompareType::TemporaryInverse => unreachable!("handled above"),
            CharacterCompareType::AnyChar => {
                // An inverted AnyChar matches nothing and adds nothing
                if !inverted {
                    return fail;
                }
            }
            CharacterCompareType::Char | CharacterCompareType::CharRange => {
                let Some(range) = pair.char_range() else {
                    return fail;
                };
                if inverted {
                    set.negated_ranges.insert(range);
                } else {
                    set.ranges.insert(range);
                }
            }
            CharacterCompareType::CharClass => {
                let Some(class) = CharClass::from_value(pair.value) else {
                    return fail;
                };
                if inverted {
                    set.negated_char_classes.insert(class);
                } else {
                    set.char_classes.insert(class);
                }
            }
            CharacterCompareType::Property => {
                let property = Property(pair.value as u32);
                set.has_any_unicode_property = true;
                if inverted {
                    set.negated_properties.insert(property);
                } else {
                    set.properties.insert(property);
                }
            }
            CharacterCompareType::GeneralCategory => {
                let category = GeneralCategory(pair.value as u32);
                set.has_any_unicode_property = true;
                if inverted {
                    set.negated_general_categories.insert(category);
                } else {
                    set.general_categories.insert(category);
                }
            }
            CharacterCompareType::Script => {
                let script = Script(pair.value as u32);
                set.has_any_unicode_property = true;
                if inverted {
                    set.negated_scripts.insert(script);
                } else {
                    set.scripts.insert(script);
                }
            }
            CharacterCompareType::ScriptExtension => {
                let script = Script(pair.value as u32);
                set.has_any_unicode_property = true;
                if inverted {
                    set.negated_script_extensions.insert(script);
                } else {
                    set.script_extensions.insert(script);
                }
            }
            CharacterCompareType::Reference => set.has_reference = true,
            CharacterCompareType::Or => {
                // An inverted group is the complement of a union
                if inverted {
                    return fail;
                }
            }
            CharacterCompareType::EndAndOr => {}
            CharacterCompareType::String
            | CharacterCompareType::LookupTable
            | CharacterCompareType::And => return fail,
            CharacterCompareType::Undefined | CharacterCompareType::RangeExpressionDummy => {
                panic!("sentinel compare type {} in operand stream", pair.ty)
            }
        }
    }

    Ok(set)
}
