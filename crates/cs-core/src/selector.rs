//! Compiled selector descriptors.
//!
//! A [`Descriptor`] is the executable form of one cosmetic filter: a plain
//! CSS prefix plus an ordered chain of [`TaskSpec`] operators, with an
//! optional terminal action. Descriptors serialize to JSON so a filter-list
//! loader can persist them and reconstruct without re-parsing; regexes
//! serialize as their source text and are recompiled on deserialize.

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dom::PseudoElement;

// =============================================================================
// Pattern
// =============================================================================

/// A compiled text pattern. Equality and serialization are defined on the
/// regex source, which is what makes canonicalization idempotent.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(source)?,
        })
    }

    /// Escape a literal string into an equivalent pattern.
    pub fn literal(text: &str) -> Self {
        Self {
            // Escaping cannot produce an invalid regex.
            regex: Regex::new(&regex::escape(text)).unwrap(),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    #[inline]
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Pattern {}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(D::Error::custom)
    }
}

// =============================================================================
// Task specs
// =============================================================================

/// Argument of the `upward` operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpwardArg {
    Levels(u32),
    Selector(String),
}

/// One procedural operator with its validated arguments. A closed set:
/// evaluation is an exhaustive match, never dispatch by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskSpec {
    /// `has`/`if` (hold = true) and `not`/`if-not` (hold = false): keep the
    /// node if the nested descriptor does (or does not) match beneath it.
    Has { hold: bool, inner: Box<Descriptor> },
    /// Keep nodes whose text content matches.
    HasText(Pattern),
    /// Keep nodes whose computed style property matches, optionally on a
    /// pseudo-element.
    MatchesCss {
        pseudo: Option<PseudoElement>,
        prop: String,
        value: Pattern,
    },
    /// Numeric floor on text content length.
    MinTextLength(u32),
    /// Walk up N ancestors, or to the nearest ancestor matching a selector.
    Upward(UpwardArg),
    /// Structural query relative to the node (handles leading combinators).
    Spath(String),
    /// Register an attribute watch, pass the node through unchanged.
    WatchAttr(Vec<String>),
    /// Evaluate an XPath expression rooted at the node.
    Xpath(String),
}

/// Terminal action. Only valid at the descriptor root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Remove,
    Style(String),
}

// =============================================================================
// Descriptor
// =============================================================================

/// A compiled selector descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Plain CSS prefix; possibly empty when the chain starts immediately.
    pub selector: String,
    /// Operator chain, in evaluation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskSpec>,
    /// Terminal action, root position only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Canonical re-serialization, used for display, logging and as the
    /// registry key.
    pub raw: String,
}

impl Descriptor {
    /// A descriptor with no tasks and no action is a plain CSS selector
    /// usable directly in a stylesheet rule.
    pub fn is_plain_css(&self) -> bool {
        self.tasks.is_empty() && self.action.is_none()
    }

    /// Build a plain-CSS descriptor.
    pub fn plain(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            tasks: Vec::new(),
            action: None,
            raw: selector.to_string(),
        }
    }

    /// Canonical textual form. Compiling the result reproduces an
    /// equivalent descriptor.
    pub fn decompile(&self) -> String {
        self.raw.clone()
    }

    /// Recompute `raw` from the structural parts.
    pub fn rebuild_raw(&mut self) {
        let mut out = self.selector.clone();
        for task in &self.tasks {
            out.push_str(&task.canonical());
        }
        match &self.action {
            Some(Action::Remove) => out.push_str(":remove()"),
            Some(Action::Style(decl)) => {
                out.push_str(":style(");
                out.push_str(decl);
                out.push(')');
            }
            None => {}
        }
        self.raw = out;
    }
}

impl TaskSpec {
    /// Canonical source fragment for this task.
    pub fn canonical(&self) -> String {
        match self {
            Self::Has { hold: true, inner } => format!(":has({})", inner.raw),
            Self::Has { hold: false, inner } => format!(":not({})", inner.raw),
            Self::HasText(p) => format!(":has-text(/{}/)", p.as_str()),
            Self::MatchesCss {
                pseudo,
                prop,
                value,
            } => {
                let op = match pseudo {
                    None => "matches-css",
                    Some(PseudoElement::Before) => "matches-css-before",
                    Some(PseudoElement::After) => "matches-css-after",
                };
                format!(":{op}({prop}: /{}/)", value.as_str())
            }
            Self::MinTextLength(n) => format!(":min-text-length({n})"),
            Self::Upward(UpwardArg::Levels(n)) => format!(":upward({n})"),
            Self::Upward(UpwardArg::Selector(s)) => format!(":upward({s})"),
            // Structural descent re-serializes as bare CSS so the canonical
            // form parses back into the same implicit task.
            Self::Spath(s) => s.clone(),
            Self::WatchAttr(attrs) => format!(":watch-attr({})", attrs.join(",")),
            Self::Xpath(expr) => format!(":xpath({expr})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_equality_on_source() {
        let a = Pattern::new("Sponsored").unwrap();
        let b = Pattern::new("Sponsored").unwrap();
        let c = Pattern::literal("Sponsored");
        assert_eq!(a, b);
        assert_eq!(a, c); // no metacharacters, escape is identity
        assert!(a.is_match("Sponsored content"));
    }

    #[test]
    fn test_json_round_trip() {
        let mut desc = Descriptor {
            selector: ".ad".to_string(),
            tasks: vec![
                TaskSpec::HasText(Pattern::new("(?i)sponsored").unwrap()),
                TaskSpec::Upward(UpwardArg::Levels(2)),
            ],
            action: Some(Action::Style("opacity: 0 !important".to_string())),
            raw: String::new(),
        };
        desc.rebuild_raw();

        let json = serde_json::to_string(&desc).unwrap();
        let back: Descriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(desc, back);
    }

    #[test]
    fn test_rebuild_raw() {
        let inner = Descriptor::plain("span.sponsor");
        let mut desc = Descriptor {
            selector: ".ad".to_string(),
            tasks: vec![
                TaskSpec::Has {
                    hold: true,
                    inner: Box::new(inner),
                },
                TaskSpec::Spath(" > .label".to_string()),
            ],
            action: None,
            raw: String::new(),
        };
        desc.rebuild_raw();
        assert_eq!(desc.raw, ".ad:has(span.sponsor) > .label");
    }

    #[test]
    fn test_plain_css_flag() {
        assert!(Descriptor::plain("div.ad").is_plain_css());
        let mut desc = Descriptor::plain("div.ad");
        desc.action = Some(Action::Remove);
        assert!(!desc.is_plain_css());
    }
}
