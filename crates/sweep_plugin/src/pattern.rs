use std::fmt;

use regex::Regex;

/// Glob over an envelope's `kind`, used by intermediate plugins to declare
/// which envelopes they want to see. `*` matches any run of characters;
/// everything else is literal.
#[derive(Clone)]
pub struct InterestPattern {
    glob: String,
    regex: Regex,
}

impl InterestPattern {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let body = glob
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{body}$"))?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    /// Matches every envelope.
    pub fn any() -> Self {
        Self::new("*").expect("`*` is a valid pattern")
    }

    pub fn matches(&self, kind: &str) -> bool {
        self.regex.is_match(kind)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }

    /// Parse a list of globs, e.g. straight from a plugin's config.
    pub fn parse_all<S: AsRef<str>>(globs: &[S]) -> Result<Vec<Self>, regex::Error> {
        globs.iter().map(|g| Self::new(g.as_ref())).collect()
    }
}

impl fmt::Debug for InterestPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InterestPattern").field(&self.glob).finish()
    }
}

impl PartialEq for InterestPattern {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob
    }
}
