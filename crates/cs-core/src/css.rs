//! Plain-CSS selector engine.
//!
//! The runtime cannot hand selectors to a host stylesheet, so it evaluates
//! the plain-CSS subset cosmetic filters actually use: compound selectors,
//! the four combinators, attribute operators, and a small pseudo-class set.
//! The parser doubles as the compiler's selectability probe: a fragment that
//! parses here is "plain CSS", one that does not is a candidate operator
//! chain. Unknown pseudo-classes are a parse error, which means rules
//! relying on pseudo-classes this engine cannot evaluate are rejected.

use crate::dom::{Dom, NodeId};

/// Error type for selector parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CssError {
    #[error("empty selector")]
    Empty,
    #[error("unexpected character '{0}' at offset {1}")]
    Unexpected(char, usize),
    #[error("unsupported pseudo-class ':{0}'")]
    UnsupportedPseudo(String),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unbalanced brackets")]
    Unbalanced,
    #[error("invalid attribute selector")]
    InvalidAttr,
    #[error("invalid :nth-child argument")]
    InvalidNth,
}

// =============================================================================
// Selector structure
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Descendant,
    Child,
    NextSibling,
    SubsequentSibling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrOp {
    Exists,
    Equals,
    /// `~=` whitespace-list contains
    Includes,
    /// `|=` exact or dash-prefixed
    DashMatch,
    /// `^=`
    Prefix,
    /// `$=`
    Suffix,
    /// `*=`
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrSelector {
    pub name: String,
    pub op: AttrOp,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoClass {
    Not(SelectorList),
    FirstChild,
    LastChild,
    OnlyChild,
    Empty,
    Root,
    NthChild(usize),
}

/// One compound selector (everything between two combinators).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Compound {
    pub tag: Option<String>,
    /// Explicit `*` universal selector.
    pub universal: bool,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<AttrSelector>,
    pub pseudos: Vec<PseudoClass>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        !self.universal
            && self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.pseudos.is_empty()
    }
}

/// One complex selector: compounds joined by combinators. `parts[0].0` is the
/// anchor combinator relating the leftmost compound to the scope element (if
/// any); it is `Descendant` unless the source began with an explicit
/// combinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Complex {
    pub parts: Vec<(Combinator, Compound)>,
}

/// A comma-separated selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList(pub Vec<Complex>);

impl SelectorList {
    /// True if the source began with an explicit combinator (only meaningful
    /// when evaluated against a scope element).
    pub fn has_anchor_combinator(&self) -> bool {
        self.0
            .iter()
            .any(|c| c.parts.first().map(|p| p.0) != Some(Combinator::Descendant))
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse a comma-separated selector list.
pub fn parse_selector_list(input: &str) -> Result<SelectorList, CssError> {
    let mut complexes = Vec::new();
    for part in split_top_level(input)? {
        let part = part.trim();
        if part.is_empty() {
            return Err(CssError::Empty);
        }
        complexes.push(parse_complex(part)?);
    }
    if complexes.is_empty() {
        return Err(CssError::Empty);
    }
    Ok(SelectorList(complexes))
}

/// Split on commas outside brackets, parentheses and strings.
fn split_top_level(input: &str) -> Result<Vec<&str>, CssError> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(CssError::Unbalanced);
                }
            }
            b'"' | b'\'' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(CssError::UnterminatedString);
                }
            }
            b',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if depth != 0 {
        return Err(CssError::Unbalanced);
    }
    parts.push(&input[start..]);
    Ok(parts)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn ident(&mut self) -> Option<&'a str> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if is_ident_byte(b)) {
            self.pos += 1;
        }
        if self.pos > start {
            Some(&self.input[start..self.pos])
        } else {
            None
        }
    }
}

fn parse_complex(input: &str) -> Result<Complex, CssError> {
    let mut p = Parser { input, pos: 0 };
    let mut parts: Vec<(Combinator, Compound)> = Vec::new();
    let mut next_comb = Combinator::Descendant;

    p.skip_ws();
    loop {
        // Explicit combinator before the compound?
        match p.peek() {
            Some(b'>') => {
                p.bump();
                next_comb = Combinator::Child;
                p.skip_ws();
            }
            Some(b'+') => {
                p.bump();
                next_comb = Combinator::NextSibling;
                p.skip_ws();
            }
            Some(b'~') => {
                p.bump();
                next_comb = Combinator::SubsequentSibling;
                p.skip_ws();
            }
            _ => {}
        }

        let compound = parse_compound(&mut p)?;
        if compound.is_empty() {
            return Err(match p.peek() {
                Some(b) => CssError::Unexpected(b as char, p.pos),
                None => CssError::Empty,
            });
        }
        parts.push((next_comb, compound));

        let had_ws = p.skip_ws();
        match p.peek() {
            None => break,
            Some(b'>') | Some(b'+') | Some(b'~') => {
                next_comb = Combinator::Descendant; // replaced above
            }
            Some(_) if had_ws => {
                next_comb = Combinator::Descendant;
            }
            Some(b) => return Err(CssError::Unexpected(b as char, p.pos)),
        }
    }

    Ok(Complex { parts })
}

fn parse_compound(p: &mut Parser<'_>) -> Result<Compound, CssError> {
    let mut compound = Compound::default();
    loop {
        match p.peek() {
            Some(b'*') => {
                p.bump();
                compound.universal = true;
            }
            Some(b'#') => {
                p.bump();
                let id = p.ident().ok_or(CssError::InvalidAttr)?;
                compound.id = Some(id.to_string());
            }
            Some(b'.') => {
                p.bump();
                let class = p.ident().ok_or(CssError::InvalidAttr)?;
                compound.classes.push(class.to_string());
            }
            Some(b'[') => {
                p.bump();
                compound.attrs.push(parse_attr(p)?);
            }
            Some(b':') => {
                p.bump();
                if p.peek() == Some(b':') {
                    // Pseudo-elements are not selectable by this engine.
                    return Err(CssError::UnsupportedPseudo("::".to_string()));
                }
                compound.pseudos.push(parse_pseudo(p)?);
            }
            Some(b) if is_ident_byte(b) && compound.is_empty() && compound.tag.is_none() => {
                let tag = p.ident().ok_or(CssError::Empty)?;
                compound.tag = Some(tag.to_ascii_lowercase());
            }
            _ => break,
        }
    }
    Ok(compound)
}

fn parse_attr(p: &mut Parser<'_>) -> Result<AttrSelector, CssError> {
    p.skip_ws();
    let name = p.ident().ok_or(CssError::InvalidAttr)?.to_ascii_lowercase();
    p.skip_ws();

    let op = match p.peek() {
        Some(b']') => {
            p.bump();
            return Ok(AttrSelector {
                name,
                op: AttrOp::Exists,
                value: String::new(),
            });
        }
        Some(b'=') => {
            p.bump();
            AttrOp::Equals
        }
        Some(b'~') | Some(b'|') | Some(b'^') | Some(b'$') | Some(b'*') => {
            let c = p.bump().unwrap();
            if p.bump() != Some(b'=') {
                return Err(CssError::InvalidAttr);
            }
            match c {
                b'~' => AttrOp::Includes,
                b'|' => AttrOp::DashMatch,
                b'^' => AttrOp::Prefix,
                b'$' => AttrOp::Suffix,
                _ => AttrOp::Substring,
            }
        }
        _ => return Err(CssError::InvalidAttr),
    };

    p.skip_ws();
    let value = match p.peek() {
        Some(q @ (b'"' | b'\'')) => {
            p.bump();
            let start = p.pos;
            while matches!(p.peek(), Some(b) if b != q) {
                p.pos += 1;
            }
            if p.peek().is_none() {
                return Err(CssError::UnterminatedString);
            }
            let v = p.input[start..p.pos].to_string();
            p.bump();
            v
        }
        _ => {
            let start = p.pos;
            while matches!(p.peek(), Some(b) if b != b']' && !b.is_ascii_whitespace()) {
                p.pos += 1;
            }
            p.input[start..p.pos].to_string()
        }
    };
    p.skip_ws();
    if p.bump() != Some(b']') {
        return Err(CssError::Unbalanced);
    }
    Ok(AttrSelector { name, op, value })
}

fn parse_pseudo(p: &mut Parser<'_>) -> Result<PseudoClass, CssError> {
    let name = p
        .ident()
        .ok_or_else(|| CssError::UnsupportedPseudo(String::new()))?
        .to_ascii_lowercase();

    let arg = if p.peek() == Some(b'(') {
        p.bump();
        let start = p.pos;
        let mut depth = 1i32;
        while let Some(b) = p.peek() {
            match b {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            p.pos += 1;
        }
        if depth != 0 {
            return Err(CssError::Unbalanced);
        }
        let arg = &p.input[start..p.pos];
        p.bump();
        Some(arg)
    } else {
        None
    };

    match (name.as_str(), arg) {
        ("not", Some(inner)) => Ok(PseudoClass::Not(parse_selector_list(inner)?)),
        ("first-child", None) => Ok(PseudoClass::FirstChild),
        ("last-child", None) => Ok(PseudoClass::LastChild),
        ("only-child", None) => Ok(PseudoClass::OnlyChild),
        ("empty", None) => Ok(PseudoClass::Empty),
        ("root", None) => Ok(PseudoClass::Root),
        ("nth-child", Some(n)) => {
            let n: usize = n.trim().parse().map_err(|_| CssError::InvalidNth)?;
            if n == 0 {
                return Err(CssError::InvalidNth);
            }
            Ok(PseudoClass::NthChild(n))
        }
        _ => Err(CssError::UnsupportedPseudo(name)),
    }
}

// =============================================================================
// Matching
// =============================================================================

impl SelectorList {
    /// Match without a scope element.
    pub fn matches(&self, dom: &Dom, el: NodeId) -> bool {
        self.matches_scoped(dom, el, None)
    }

    /// Match with an optional scope element anchoring the leftmost compound.
    pub fn matches_scoped(&self, dom: &Dom, el: NodeId, scope: Option<NodeId>) -> bool {
        self.0
            .iter()
            .any(|complex| match_complex(dom, complex, el, scope))
    }

    /// All attached elements matching the list, in document order.
    pub fn query_all(&self, dom: &Dom, scope: Option<NodeId>) -> Vec<NodeId> {
        dom.all_elements()
            .into_iter()
            .filter(|el| self.matches_scoped(dom, *el, scope))
            .collect()
    }
}

fn match_complex(dom: &Dom, complex: &Complex, el: NodeId, scope: Option<NodeId>) -> bool {
    let last = complex.parts.len() - 1;
    if !match_compound(dom, el, &complex.parts[last].1) {
        return false;
    }
    match_left(dom, &complex.parts, last, el, scope)
}

/// `parts[i].1` matched at `node`; satisfy everything to its left, including
/// the anchor combinator against the scope when `i == 0`.
fn match_left(
    dom: &Dom,
    parts: &[(Combinator, Compound)],
    i: usize,
    node: NodeId,
    scope: Option<NodeId>,
) -> bool {
    let comb = parts[i].0;
    if i == 0 {
        let scope = match scope {
            Some(s) => s,
            None => return true,
        };
        return match comb {
            Combinator::Descendant => is_proper_ancestor(dom, scope, node),
            Combinator::Child => dom.parent(node) == Some(scope),
            Combinator::NextSibling => prev_element_sibling(dom, node) == Some(scope),
            Combinator::SubsequentSibling => earlier_siblings(dom, node).contains(&scope),
        };
    }

    let prev = &parts[i - 1].1;
    match comb {
        Combinator::Child => match dom.parent(node) {
            Some(p) if dom.is_element(p) => {
                match_compound(dom, p, prev) && match_left(dom, parts, i - 1, p, scope)
            }
            _ => false,
        },
        Combinator::Descendant => {
            let mut cur = dom.parent(node);
            while let Some(p) = cur {
                if dom.is_element(p)
                    && match_compound(dom, p, prev)
                    && match_left(dom, parts, i - 1, p, scope)
                {
                    return true;
                }
                cur = dom.parent(p);
            }
            false
        }
        Combinator::NextSibling => match prev_element_sibling(dom, node) {
            Some(s) => match_compound(dom, s, prev) && match_left(dom, parts, i - 1, s, scope),
            None => false,
        },
        Combinator::SubsequentSibling => earlier_siblings(dom, node)
            .into_iter()
            .any(|s| match_compound(dom, s, prev) && match_left(dom, parts, i - 1, s, scope)),
    }
}

fn match_compound(dom: &Dom, el: NodeId, compound: &Compound) -> bool {
    let data = match dom.as_element(el) {
        Some(d) => d,
        None => return false,
    };
    if let Some(tag) = &compound.tag {
        if data.tag != *tag {
            return false;
        }
    }
    if let Some(id) = &compound.id {
        if data.id.as_deref() != Some(id.as_str()) {
            return false;
        }
    }
    for class in &compound.classes {
        if !data.classes.iter().any(|c| c == class) {
            return false;
        }
    }
    for attr in &compound.attrs {
        if !match_attr(dom, el, attr) {
            return false;
        }
    }
    for pseudo in &compound.pseudos {
        if !match_pseudo(dom, el, pseudo) {
            return false;
        }
    }
    true
}

fn match_attr(dom: &Dom, el: NodeId, sel: &AttrSelector) -> bool {
    let value = match dom.attr(el, &sel.name) {
        Some(v) => v,
        None => return false,
    };
    match sel.op {
        AttrOp::Exists => true,
        AttrOp::Equals => value == sel.value,
        AttrOp::Includes => value.split_whitespace().any(|w| w == sel.value),
        AttrOp::DashMatch => {
            value == sel.value
                || value
                    .strip_prefix(sel.value.as_str())
                    .is_some_and(|rest| rest.starts_with('-'))
        }
        AttrOp::Prefix => !sel.value.is_empty() && value.starts_with(&sel.value),
        AttrOp::Suffix => !sel.value.is_empty() && value.ends_with(&sel.value),
        AttrOp::Substring => !sel.value.is_empty() && value.contains(&sel.value),
    }
}

fn match_pseudo(dom: &Dom, el: NodeId, pseudo: &PseudoClass) -> bool {
    match pseudo {
        PseudoClass::Not(list) => !list.matches(dom, el),
        PseudoClass::FirstChild => dom.element_ordinal(el) == 1,
        PseudoClass::LastChild => match dom.parent(el) {
            Some(p) => dom.element_children(p).last() == Some(&el),
            None => true,
        },
        PseudoClass::OnlyChild => match dom.parent(el) {
            Some(p) => dom.element_children(p).len() == 1,
            None => true,
        },
        PseudoClass::Empty => dom.node(el).children.is_empty(),
        PseudoClass::Root => dom.parent(el) == Some(dom.root()),
        PseudoClass::NthChild(n) => dom.element_ordinal(el) == *n,
    }
}

fn is_proper_ancestor(dom: &Dom, anc: NodeId, node: NodeId) -> bool {
    let mut cur = dom.parent(node);
    while let Some(p) = cur {
        if p == anc {
            return true;
        }
        cur = dom.parent(p);
    }
    false
}

fn prev_element_sibling(dom: &Dom, node: NodeId) -> Option<NodeId> {
    let parent = dom.parent(node)?;
    let siblings = dom.element_children(parent);
    let pos = siblings.iter().position(|s| *s == node)?;
    if pos == 0 {
        None
    } else {
        Some(siblings[pos - 1])
    }
}

fn earlier_siblings(dom: &Dom, node: NodeId) -> Vec<NodeId> {
    match dom.parent(node) {
        Some(parent) => {
            let siblings = dom.element_children(parent);
            match siblings.iter().position(|s| *s == node) {
                Some(pos) => siblings[..pos].to_vec(),
                None => Vec::new(),
            }
        }
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Dom;

    fn sample() -> (Dom, NodeId, NodeId, NodeId, NodeId) {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");
        let div = dom.elem(body, "div");
        dom.set_attr(div, "class", "ad banner");
        dom.set_attr(div, "data-src", "https://cdn.example/x.png");
        let span = dom.elem(div, "span");
        dom.set_attr(span, "id", "promo");
        let p = dom.elem(body, "p");
        (dom, body, div, span, p)
    }

    #[test]
    fn test_compound_matching() {
        let (dom, _, div, span, p) = sample();
        let list = parse_selector_list("div.ad.banner").unwrap();
        assert!(list.matches(&dom, div));
        assert!(!list.matches(&dom, span));

        let list = parse_selector_list("#promo").unwrap();
        assert!(list.matches(&dom, span));

        let list = parse_selector_list("[data-src^='https://cdn.']").unwrap();
        assert!(list.matches(&dom, div));
        assert!(!list.matches(&dom, p));
    }

    #[test]
    fn test_combinators() {
        let (dom, body, div, span, p) = sample();
        assert!(parse_selector_list("body > div span").unwrap().matches(&dom, span));
        assert!(parse_selector_list("div + p").unwrap().matches(&dom, p));
        assert!(parse_selector_list("div ~ p").unwrap().matches(&dom, p));
        assert!(!parse_selector_list("p + div").unwrap().matches(&dom, div));
        assert!(!parse_selector_list("span > body").unwrap().matches(&dom, body));
    }

    #[test]
    fn test_pseudo_classes() {
        let (dom, _, div, span, p) = sample();
        assert!(parse_selector_list("div:first-child").unwrap().matches(&dom, div));
        assert!(parse_selector_list("p:last-child").unwrap().matches(&dom, p));
        assert!(parse_selector_list("span:only-child").unwrap().matches(&dom, span));
        assert!(parse_selector_list("div:not(.other)").unwrap().matches(&dom, div));
        assert!(!parse_selector_list("div:not(.ad)").unwrap().matches(&dom, div));
        assert!(parse_selector_list(":nth-child(2)").unwrap().matches(&dom, p));
    }

    #[test]
    fn test_scoped_query() {
        let (dom, body, div, span, p) = sample();
        let list = parse_selector_list("span").unwrap();
        assert_eq!(list.query_all(&dom, Some(div)), vec![span]);
        assert!(list.query_all(&dom, Some(p)).is_empty());

        // Leading combinator anchored at the scope element.
        let list = parse_selector_list("+ p").unwrap();
        assert!(list.has_anchor_combinator());
        assert_eq!(list.query_all(&dom, Some(div)), vec![p]);
        let _ = body;
    }

    #[test]
    fn test_rejects_unknown_pseudo() {
        assert!(matches!(
            parse_selector_list("div:hover"),
            Err(CssError::UnsupportedPseudo(_))
        ));
        assert!(matches!(
            parse_selector_list("div:has(span)"),
            Err(CssError::UnsupportedPseudo(_))
        ));
        assert!(parse_selector_list("div::before").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_selector_list("").is_err());
        assert!(parse_selector_list("div,,p").is_err());
        assert!(parse_selector_list("[data-x").is_err());
        assert!(parse_selector_list("div >").is_err());
    }

    #[test]
    fn test_selector_list() {
        let (dom, _, div, _, p) = sample();
        let list = parse_selector_list("p, div.ad").unwrap();
        assert!(list.matches(&dom, div));
        assert!(list.matches(&dom, p));
    }
}
