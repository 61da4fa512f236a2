use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::{Error, Result};

/// Language-specific rules for string comparison. See the server
/// [documentation](https://www.mongodb.com/docs/manual/reference/collation/) for the meaning of
/// each field.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct Collation {
    /// The ICU locale, e.g. `"en_US"` or `"simple"`.
    #[builder(!default)]
    pub locale: String,

    /// The level of comparison to perform.
    pub strength: Option<CollationStrength>,

    /// Whether to include a separate level for case differences.
    pub case_level: Option<bool>,

    /// The sort order of case differences during tertiary level comparisons.
    pub case_first: Option<CollationCaseFirst>,

    /// Whether to compare numeric strings as numbers.
    pub numeric_ordering: Option<bool>,

    /// Whether whitespace and punctuation are considered base characters.
    pub alternate: Option<CollationAlternate>,

    /// Which characters are ignorable when `alternate` is `shifted`.
    pub max_variable: Option<CollationMaxVariable>,

    /// Whether to check if text requires normalization and to perform it.
    pub normalization: Option<bool>,

    /// Whether strings with diacritics sort from the back of the string.
    pub backwards: Option<bool>,
}

impl Collation {
    /// A collation for the given locale with every other field left to the server.
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            ..Default::default()
        }
    }
}

/// The ICU comparison level. Serialized as its level number, 1 through 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CollationStrength {
    /// Base characters only.
    Primary,
    /// Base characters and accents.
    Secondary,
    /// Base characters, accents and case.
    Tertiary,
    /// Also distinguishes punctuation when it is otherwise ignored.
    Quaternary,
    /// Tie-breaks on code points.
    Identical,
}

impl CollationStrength {
    fn level(self) -> i32 {
        match self {
            Self::Primary => 1,
            Self::Secondary => 2,
            Self::Tertiary => 3,
            Self::Quaternary => 4,
            Self::Identical => 5,
        }
    }

    fn from_level(level: i32) -> Result<Self> {
        Ok(match level {
            1 => Self::Primary,
            2 => Self::Secondary,
            3 => Self::Tertiary,
            4 => Self::Quaternary,
            5 => Self::Identical,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "invalid collation strength: {level}"
                )))
            }
        })
    }
}

impl Serialize for CollationStrength {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.level())
    }
}

impl<'de> Deserialize<'de> for CollationStrength {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let level = i32::deserialize(deserializer)?;
        Self::from_level(level).map_err(serde::de::Error::custom)
    }
}

/// Which case sorts first at the tertiary level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum CollationCaseFirst {
    Upper,
    Lower,
    Off,
}

/// Whether whitespace and punctuation are base characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum CollationAlternate {
    NonIgnorable,
    Shifted,
}

/// Which characters `shifted` treats as ignorable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum CollationMaxVariable {
    Punct,
    Space,
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Collation, CollationAlternate, CollationCaseFirst, CollationStrength};
    use crate::bson::doc;

    #[test]
    fn serializes_set_fields_only() {
        let collation = Collation::builder()
            .locale("en_US")
            .strength(CollationStrength::Secondary)
            .case_first(CollationCaseFirst::Upper)
            .alternate(CollationAlternate::NonIgnorable)
            .build();

        assert_eq!(
            bson::to_document(&collation).unwrap(),
            doc! {
                "locale": "en_US",
                "strength": 2,
                "caseFirst": "upper",
                "alternate": "non-ignorable",
            }
        );
    }

    #[test]
    fn rejects_unknown_strength() {
        let error = bson::from_document::<Collation>(doc! { "locale": "fr", "strength": 9 })
            .unwrap_err();
        assert!(error.to_string().contains("invalid collation strength"));
    }
}
