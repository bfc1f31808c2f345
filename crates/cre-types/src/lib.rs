//! Validated text primitives shared by the CRE crates.
//!
//! Review notes, override reasons and clinician requests all arrive as free text from a UI.
//! These wrappers make "has content" and "safe to embed in an id" explicit in the type system.

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    #[error("text is empty after trimming")]
    Empty,
    #[error("text has no characters usable in a slug")]
    NoSlugCharacters,
}

/// Trimmed free text with at least one visible character.
///
/// Override reasons, review notes and requested items use it once validated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyText(String);

impl NonEmptyText {
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        match input.as_ref().trim() {
            "" => Err(TextError::Empty),
            trimmed => Ok(Self(trimmed.to_owned())),
        }
    }

    /// Trimmed items with content, in input order.
    pub fn collect_non_empty<I, S>(items: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        items
            .into_iter()
            .filter_map(|item| Self::new(item).ok())
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for NonEmptyText {
    type Error = TextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NonEmptyText> for String {
    fn from(value: NonEmptyText) -> Self {
        value.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A lowercase ASCII identifier fragment (`[a-z0-9-]`, no leading/trailing/double dashes).
///
/// Used to derive stable question ids from free text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slug(String);

impl Slug {
    /// Maximum slug length in bytes.
    pub const MAX_LEN: usize = 48;

    /// Builds a slug from arbitrary text.
    ///
    /// Non-alphanumeric runs collapse into a single `-`; the result is cut at [`Slug::MAX_LEN`].
    pub fn from_text(input: impl AsRef<str>) -> Result<Self, TextError> {
        let mut out = String::with_capacity(Self::MAX_LEN);
        let mut pending_dash = false;

        for ch in input.as_ref().chars() {
            if !ch.is_ascii_alphanumeric() {
                pending_dash = true;
                continue;
            }
            let needs_dash = pending_dash && !out.is_empty();
            let needed = if needs_dash { 2 } else { 1 };
            if out.len() + needed > Self::MAX_LEN {
                break;
            }
            if needs_dash {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        }

        if out.is_empty() {
            return Err(TextError::NoSlugCharacters);
        }
        Ok(Self(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
