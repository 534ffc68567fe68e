//! Unicode membership queries
//!
//! The optimizer never decides Unicode property membership itself. It asks a
//! [`UnicodeProperties`] implementation, and an answer of `None` means the
//! implementation does not know, which every caller treats as "may match".

/// Identifier of a Unicode binary property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Property(pub u32);

/// Identifier of a Unicode general category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeneralCategory(pub u32);

/// Identifier of a Unicode script (also used for script extensions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Script(pub u32);

impl Property {
    pub const ALPHABETIC: Property = Property(0);
    pub const LOWERCASE: Property = Property(1);
    pub const UPPERCASE: Property = Property(2);
    pub const WHITE_SPACE: Property = Property(3);
    pub const ASCII: Property = Property(4);
}

impl GeneralCategory {
    pub const LETTER: GeneralCategory = GeneralCategory(0);
    pub const DECIMAL_NUMBER: GeneralCategory = GeneralCategory(1);
    pub const CONTROL: GeneralCategory = GeneralCategory(2);
}

impl Script {
    pub const LATIN: Script = Script(0);
    pub const GREEK: Script = Script(1);
}

/// Pure membership predicates over code points
///
/// Implementations must be deterministic; the optimizer may ask the same
/// question several times while proving a rewrite safe.
pub trait UnicodeProperties: Send + Sync {
    fn has_property(&self, cp: u32, property: Property) -> Option<bool>;

    fn has_general_category(&self, cp: u32, category: GeneralCategory) -> Option<bool>;

    fn has_script(&self, cp: u32, script: Script) -> Option<bool>;

    fn has_script_extension(&self, cp: u32, script: Script) -> Option<bool> {
        self.has_script(cp, script)
    }
}

/// Oracle that knows nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownUnicodeProperties;

impl UnicodeProperties for UnknownUnicodeProperties {
    fn has_property(&self, _cp: u32, _property: Property) -> Option<bool> {
        None
    }

    fn has_general_category(&self, _cp: u32, _category: GeneralCategory) -> Option<bool> {
        None
    }

    fn has_script(&self, _cp: u32, _script: Script) -> Option<bool> {
        None
    }
}

/// Oracle backed by the standard library's `char` classification.
///
/// Covers the identifiers defined as associated constants on [`Property`],
/// [`GeneralCategory`] and [`Script`]. Scripts are approximated by block
/// ranges.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicUnicodeProperties;

impl UnicodeProperties for BasicUnicodeProperties {
    fn has_property(&self, cp: u32, property: Property) -> Option<bool> {
        let Some(c) = char::from_u32(cp) else {
            return Some(false);
        };
        match property {
            Property::ALPHABETIC => Some(c.is_alphabetic()),
            Property::LOWERCASE => Some(c.is_lowercase()),
            Property::UPPERCASE => Some(c.is_uppercase()),
            Property::WHITE_SPACE => Some(c.is_whitespace()),
            Property::ASCII => Some(c.is_ascii()),
            _ => None,
        }
    }

    fn has_general_category(&self, cp: u32, category: GeneralCategory) -> Option<bool> {
        let Some(c) = char::from_u32(cp) else {
            return Some(false);
        };
        match category {
            GeneralCategory::LETTER => Some(c.is_alphabetic() && !c.is_numeric()),
            // Non-ASCII digits are not distinguishable from other numerics here
            GeneralCategory::DECIMAL_NUMBER if c.is_ascii() => Some(c.is_ascii_digit()),
            GeneralCategory::DECIMAL_NUMBER if c.is_numeric() => None,
            GeneralCategory::DECIMAL_NUMBER => Some(false),
            GeneralCategory::CONTROL => Some(c.is_control()),
            _ => None,
        }
    }

    fn has_script(&self, cp: u32, script: Script) -> Option<bool> {
        match script {
            Script::LATIN => Some(
                (0x41..=0x5a).contains(&cp)
                    || (0x61..=0x7a).contains(&cp)
                    || (0xc0..=0x24f).contains(&cp) && cp != 0xd7 && cp != 0xf7,
            ),
            Script::GREEK => Some((0x370..=0x3ff).contains(&cp) || (0x1f00..=0x1fff).contains(&cp)),
            _ => None,
        }
    }
}
