// src/filters/unicode_terms.rs - Unicode category / script terms for the `unicode` rule

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// General categories offered to rule authors
pub const UNICODE_CATEGORIES: &[&str] = &[
    "Letter",
    "Cased_Letter",
    "Uppercase_Letter",
    "Lowercase_Letter",
    "Titlecase_Letter",
    "Modifier_Letter",
    "Other_Letter",
    "Mark",
    "Nonspacing_Mark",
    "Spacing_Mark",
    "Enclosing_Mark",
    "Number",
    "Decimal_Number",
    "Letter_Number",
    "Other_Number",
    "Punctuation",
    "Connector_Punctuation",
    "Dash_Punctuation",
    "Open_Punctuation",
    "Close_Punctuation",
    "Initial_Punctuation",
    "Final_Punctuation",
    "Other_Punctuation",
    "Symbol",
    "Math_Symbol",
    "Currency_Symbol",
    "Modifier_Symbol",
    "Other_Symbol",
    "Separator",
    "Space_Separator",
    "Line_Separator",
    "Paragraph_Separator",
    "Other",
    "Control",
    "Format",
    "Surrogate",
    "Private_Use",
    "Unassigned",
];

/// Scripts offered to rule authors
pub const UNICODE_SCRIPTS: &[&str] = &[
    "Common",
    "Inherited",
    "Latin",
    "Greek",
    "Cyrillic",
    "Armenian",
    "Hebrew",
    "Arabic",
    "Syriac",
    "Thaana",
    "Devanagari",
    "Bengali",
    "Gurmukhi",
    "Gujarati",
    "Tamil",
    "Telugu",
    "Kannada",
    "Malayalam",
    "Sinhala",
    "Thai",
    "Lao",
    "Tibetan",
    "Myanmar",
    "Georgian",
    "Hangul",
    "Ethiopic",
    "Cherokee",
    "Khmer",
    "Mongolian",
    "Hiragana",
    "Katakana",
    "Bopomofo",
    "Han",
    "Yi",
    "Braille",
    "Runic",
    "Ogham",
    "Canadian_Aboriginal",
];

/// Whether a term names a general category or a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    #[serde(alias = "category")]
    Cat,
    Script,
}

/// One acceptable-character term as written in a rule: `{t: cat, v: Letter}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnicodeTerm {
    #[serde(rename = "t", alias = "kind")]
    pub kind: TermKind,
    #[serde(rename = "v", alias = "name")]
    pub name: String,
}

impl UnicodeTerm {
    pub fn category(name: &str) -> Self {
        Self { kind: TermKind::Cat, name: name.to_string() }
    }

    pub fn script(name: &str) -> Self {
        Self { kind: TermKind::Script, name: name.to_string() }
    }

    fn class_syntax(kind: TermKind, name: &str) -> String {
        match kind {
            TermKind::Cat => format!(r"\p{{{}}}", name),
            TermKind::Script => format!(r"\p{{Script={}}}", name),
        }
    }
}

/// Names from the offered tables that the regex engine accepts, probed once
#[derive(Debug, Clone)]
pub struct UnicodeTermTable {
    /// Lowercased name -> canonical name, per kind
    supported: HashMap<(TermKind, String), String>,
}

impl UnicodeTermTable {
    /// Probe every offered category and script against the regex engine.
    /// Unsupported names are logged and left out.
    pub fn probe() -> Self {
        let mut supported = HashMap::new();
        let mut unsupported = Vec::new();

        let offered = UNICODE_CATEGORIES
            .iter()
            .map(|n| (TermKind::Cat, *n))
            .chain(UNICODE_SCRIPTS.iter().map(|n| (TermKind::Script, *n)));

        for (kind, name) in offered {
            match Regex::new(&UnicodeTerm::class_syntax(kind, name)) {
                Ok(_) => {
                    supported.insert((kind, name.to_lowercase()), name.to_string());
                }
                Err(e) => {
                    debug!("Unicode term {:?} {} rejected: {}", kind, name, e);
                    unsupported.push(UnicodeTerm { kind, name: name.to_string() });
                }
            }
        }

        let invalid_categories: Vec<&str> = unsupported
            .iter()
            .filter(|t| t.kind == TermKind::Cat)
            .map(|t| t.name.as_str())
            .collect();
        if !invalid_categories.is_empty() {
            warn!("Invalid categories: {}", invalid_categories.join(", "));
        }

        let invalid_scripts: Vec<&str> = unsupported
            .iter()
            .filter(|t| t.kind == TermKind::Script)
            .map(|t| t.name.as_str())
            .collect();
        if !invalid_scripts.is_empty() {
            warn!("Invalid scripts: {}", invalid_scripts.join(", "));
        }

        Self { supported }
    }

    /// Canonical name for a supported term, matched case-insensitively
    pub fn resolve(&self, term: &UnicodeTerm) -> Option<&str> {
        self.supported
            .get(&(term.kind, term.name.to_lowercase()))
            .map(String::as_str)
    }

    /// Build the acceptable-character set for a rule. Unknown or unsupported
    /// terms are excluded with a warning.
    pub fn compile(&self, terms: &[UnicodeTerm]) -> Result<TermSet, regex::Error> {
        let mut classes = Vec::new();
        for term in terms {
            match self.resolve(term) {
                Some(name) => classes.push(UnicodeTerm::class_syntax(term.kind, name)),
                None => warn!(
                    "Excluding unsupported unicode term {:?} '{}' from rule",
                    term.kind, term.name
                ),
            }
        }

        if classes.is_empty() {
            warn!("Unicode rule has no supported terms and will never match");
            return Ok(TermSet { matcher: None });
        }

        let matcher = Regex::new(&format!("[{}]", classes.join("")))?;
        Ok(TermSet { matcher: Some(matcher) })
    }
}

/// Compiled set of acceptable characters
#[derive(Debug, Clone)]
pub struct TermSet {
    matcher: Option<Regex>,
}

impl TermSet {
    pub fn is_empty(&self) -> bool {
        self.matcher.is_none()
    }

    pub fn accepts(&self, c: char) -> bool {
        match &self.matcher {
            Some(re) => {
                let mut buf = [0u8; 4];
                re.is_match(c.encode_utf8(&mut buf))
            }
            None => false,
        }
    }

    /// Share of characters outside the acceptable set; `0.0` for empty text
    /// or an empty set.
    pub fn unacceptable_ratio(&self, text: &str) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        super::text_metrics::category_ratio(text, |c| !self.accepts(c))
    }
}
