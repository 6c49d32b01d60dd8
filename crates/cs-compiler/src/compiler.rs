//! Procedural selector compiler.
//!
//! Turns one raw cosmetic-filter selector into a [`Descriptor`], or nothing
//! when any part fails validation. The bias is CSS-first: text that parses
//! as a plain selector stays plain, even when an operator-shaped substring
//! appears in it; only text the CSS engine rejects is scanned for
//! procedural operators. Genuinely ambiguous spellings therefore resolve
//! toward CSS, and rules leaning on pseudo-classes the engine cannot
//! evaluate fail compilation outright instead of half-working.

use cs_core::css;
use cs_core::dom::PseudoElement;
use cs_core::selector::{Action, Descriptor, Pattern, TaskSpec, UpwardArg};
use cs_core::xpath;

/// Operator vocabulary after alias normalization.
enum Op {
    Has { hold: bool },
    HasText,
    MatchesCss(Option<PseudoElement>),
    MinTextLength,
    Upward,
    WatchAttr,
    Xpath,
    Remove,
    Style,
}

fn lookup_operator(name: &str) -> Option<Op> {
    Some(match name {
        "has" | "if" | "-abp-has" => Op::Has { hold: true },
        "not" | "if-not" => Op::Has { hold: false },
        "has-text" | "contains" | "-abp-contains" => Op::HasText,
        "matches-css" => Op::MatchesCss(None),
        "matches-css-before" => Op::MatchesCss(Some(PseudoElement::Before)),
        "matches-css-after" => Op::MatchesCss(Some(PseudoElement::After)),
        "min-text-length" => Op::MinTextLength,
        "upward" | "nth-ancestor" => Op::Upward,
        "watch-attr" | "watch-attrs" => Op::WatchAttr,
        "xpath" => Op::Xpath,
        "remove" => Op::Remove,
        "style" => Op::Style,
        _ => return None,
    })
}

/// The compiler. Carries a single-entry memo because filter lists re-submit
/// identical raw strings in runs.
#[derive(Default)]
pub struct Compiler {
    cache: Option<(String, Option<Descriptor>)>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile one raw selector. `None` means the rule is discarded; no
    /// partial descriptors are ever produced.
    pub fn compile(&mut self, raw: &str) -> Option<Descriptor> {
        let raw = raw.trim();
        if let Some((cached_raw, cached)) = &self.cache {
            if cached_raw == raw {
                return cached.clone();
            }
        }
        let result = compile_selector(raw, false);
        if result.is_none() {
            log::debug!("selector rejected: {raw}");
        }
        self.cache = Some((raw.to_string(), result.clone()));
        result
    }
}

fn compile_selector(raw: &str, nested: bool) -> Option<Descriptor> {
    if raw.is_empty() || raw.contains('{') || raw.contains('}') {
        return None;
    }
    if css::parse_selector_list(raw).is_ok() {
        return Some(Descriptor::plain(raw));
    }

    let bytes = raw.as_bytes();
    let mut selector = String::new();
    let mut tasks: Vec<TaskSpec> = Vec::new();
    let mut action: Option<Action> = None;
    let mut first_gap = true;
    let mut gap_start = 0usize;
    let mut i = 0usize;
    let mut bracket_depth = 0i32;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
            } else {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => {
                quote = Some(b);
                i += 1;
            }
            b'[' => {
                bracket_depth += 1;
                i += 1;
            }
            b']' => {
                bracket_depth -= 1;
                i += 1;
            }
            b':' if bracket_depth == 0 => {
                let name_end = scan_ident(raw, i + 1);
                let op = match lookup_operator(&raw[i + 1..name_end]) {
                    Some(op) if bytes.get(name_end) == Some(&b'(') => op,
                    _ => {
                        i = name_end.max(i + 1);
                        continue;
                    }
                };
                let close = find_balanced_close(raw, name_end)?;
                // An operator-shaped substring that still reads as plain CSS
                // through its closing paren is ordinary CSS, not an operator.
                if css::parse_selector_list(&raw[gap_start..=close]).is_ok() {
                    i = close + 1;
                    continue;
                }
                if action.is_some() {
                    return None;
                }
                flush_gap(&raw[gap_start..i], &mut first_gap, &mut selector, &mut tasks)?;
                apply_operator(
                    op,
                    &raw[name_end + 1..close],
                    nested,
                    &mut tasks,
                    &mut action,
                )?;
                gap_start = close + 1;
                i = close + 1;
            }
            _ => i += 1,
        }
    }
    if quote.is_some() || bracket_depth != 0 {
        return None;
    }

    let tail = &raw[gap_start..];
    if !tail.trim().is_empty() {
        if action.is_some() {
            return None;
        }
        flush_gap(tail, &mut first_gap, &mut selector, &mut tasks)?;
    }
    if tasks.is_empty() && action.is_none() {
        return None;
    }

    let mut desc = Descriptor {
        selector,
        tasks,
        action,
        raw: String::new(),
    };
    desc.rebuild_raw();
    Some(desc)
}

/// Record one non-operator substring. The first gap becomes the CSS prefix
/// (with the root-scoping rewrite for a leading combinator); later gaps
/// become structural-descent tasks scoped to the preceding match set.
fn flush_gap(
    gap: &str,
    first: &mut bool,
    selector: &mut String,
    tasks: &mut Vec<TaskSpec>,
) -> Option<()> {
    let was_first = *first;
    *first = false;
    let trimmed = gap.trim();
    if trimmed.is_empty() {
        return Some(());
    }
    css::parse_selector_list(trimmed).ok()?;
    if was_first {
        match split_root_scoped(trimmed) {
            Some((prefix, spath)) => {
                selector.push_str(prefix);
                tasks.push(TaskSpec::Spath(spath));
            }
            None => selector.push_str(trimmed),
        }
    } else {
        tasks.push(TaskSpec::Spath(gap.to_string()));
    }
    Some(())
}

/// A leading child/sibling combinator anchors the selector at the document
/// root: the combinator part moves into a structural task under `:root`.
fn split_root_scoped(gap: &str) -> Option<(&'static str, String)> {
    if gap.starts_with(['>', '+', '~']) {
        return Some((":root", format!(" {gap}")));
    }
    let rest = gap.strip_prefix(":root")?;
    if rest.trim_start().starts_with(['>', '+', '~']) {
        return Some((":root", rest.to_string()));
    }
    None
}

fn apply_operator(
    op: Op,
    arg: &str,
    nested: bool,
    tasks: &mut Vec<TaskSpec>,
    action: &mut Option<Action>,
) -> Option<()> {
    match op {
        Op::Has { hold } => {
            let inner = compile_selector(arg.trim(), true)?;
            tasks.push(TaskSpec::Has {
                hold,
                inner: Box::new(inner),
            });
        }
        Op::HasText => tasks.push(TaskSpec::HasText(parse_pattern_arg(arg)?)),
        Op::MatchesCss(pseudo) => {
            let colon = arg.find(':')?;
            let prop = arg[..colon].trim();
            if prop.is_empty() || !prop.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
                return None;
            }
            tasks.push(TaskSpec::MatchesCss {
                pseudo,
                prop: prop.to_string(),
                value: parse_pattern_arg(&arg[colon + 1..])?,
            });
        }
        Op::MinTextLength => {
            let n: u32 = arg.trim().parse().ok()?;
            if n == 0 {
                return None;
            }
            tasks.push(TaskSpec::MinTextLength(n));
        }
        Op::Upward => {
            let arg = arg.trim();
            if !arg.is_empty() && arg.bytes().all(|b| b.is_ascii_digit()) {
                let n: u32 = arg.parse().ok()?;
                if !(1..=256).contains(&n) {
                    return None;
                }
                tasks.push(TaskSpec::Upward(UpwardArg::Levels(n)));
            } else {
                css::parse_selector_list(arg).ok()?;
                tasks.push(TaskSpec::Upward(UpwardArg::Selector(arg.to_string())));
            }
        }
        Op::WatchAttr => {
            let attrs: Vec<String> = arg.split(',').map(|a| a.trim().to_string()).collect();
            let valid = |a: &String| {
                !a.is_empty()
                    && a.bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            };
            if attrs.is_empty() || !attrs.iter().all(valid) {
                return None;
            }
            tasks.push(TaskSpec::WatchAttr(attrs));
        }
        Op::Xpath => {
            let expr = arg.trim();
            xpath::parse(expr).ok()?;
            tasks.push(TaskSpec::Xpath(expr.to_string()));
        }
        Op::Remove => {
            if nested || !arg.trim().is_empty() {
                return None;
            }
            *action = Some(Action::Remove);
        }
        Op::Style => {
            if nested {
                return None;
            }
            let decl = arg.trim();
            if !is_safe_declaration(decl) {
                return None;
            }
            *action = Some(Action::Style(decl.to_string()));
        }
    }
    Some(())
}

/// Text argument: a `/regex/` literal (optionally `/i`-flagged) or a plain
/// string escaped into an equivalent pattern.
fn parse_pattern_arg(arg: &str) -> Option<Pattern> {
    let arg = arg.trim();
    if let Some(stripped) = arg.strip_prefix('/') {
        if let Some(pos) = stripped.rfind('/') {
            let source = &stripped[..pos];
            return match &stripped[pos + 1..] {
                "" => Pattern::new(source).ok(),
                "i" => Pattern::new(&format!("(?i){source}")).ok(),
                _ => None,
            };
        }
    }
    let unescaped = arg.replace("\\(", "(").replace("\\)", ")");
    Some(Pattern::literal(&unescaped))
}

/// Style declarations must not smuggle resources or comment openers into the
/// injected stylesheet.
fn is_safe_declaration(decl: &str) -> bool {
    !decl.is_empty()
        && decl.contains(':')
        && !decl.to_ascii_lowercase().contains("url(")
        && !decl.contains("/*")
        && !decl.contains('\\')
}

fn scan_ident(raw: &str, start: usize) -> usize {
    let bytes = raw.as_bytes();
    let mut i = start;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
        i += 1;
    }
    i
}

/// Closing paren matching the one at `open`, with `\(`/`\)` escape
/// awareness. `None` means unbalanced input.
fn find_balanced_close(raw: &str, open: usize) -> Option<usize> {
    let bytes = raw.as_bytes();
    let mut depth = 0i32;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(raw: &str) -> Option<Descriptor> {
        Compiler::new().compile(raw)
    }

    #[test]
    fn test_plain_css_passes_through() {
        let d = compile("div.ad > span").unwrap();
        assert!(d.is_plain_css());
        assert_eq!(d.raw, "div.ad > span");
    }

    #[test]
    fn test_css_first_bias() {
        // :not with a plain argument is valid CSS and stays CSS.
        let d = compile("div:not(.keep)").unwrap();
        assert!(d.is_plain_css());
        // With a procedural argument it becomes an operator.
        let d = compile("div:not(.x:has-text(ad))").unwrap();
        assert!(!d.is_plain_css());
        assert!(matches!(d.tasks[0], TaskSpec::Has { hold: false, .. }));
    }

    #[test]
    fn test_has_with_nested_descriptor() {
        let d = compile(".ad:has(span:has-text(Sponsored))").unwrap();
        assert_eq!(d.selector, ".ad");
        match &d.tasks[0] {
            TaskSpec::Has { hold: true, inner } => {
                assert_eq!(inner.selector, "span");
                assert!(matches!(inner.tasks[0], TaskSpec::HasText(_)));
            }
            other => panic!("unexpected task: {other:?}"),
        }
        assert_eq!(d.raw, ".ad:has(span:has-text(/Sponsored/))");
    }

    #[test]
    fn test_alias_normalization() {
        let a = compile(".ad:if(span)").unwrap();
        let b = compile(".ad:has(span)").unwrap();
        assert_eq!(a, b);
        let a = compile(".ad:-abp-contains(x)").unwrap();
        let b = compile(".ad:has-text(x)").unwrap();
        assert_eq!(a, b);
        assert_eq!(compile(".a:nth-ancestor(3)").unwrap().raw, ".a:upward(3)");
    }

    #[test]
    fn test_regex_literal_and_flags() {
        let d = compile(".ad:has-text(/spon.ored/)").unwrap();
        match &d.tasks[0] {
            TaskSpec::HasText(p) => assert_eq!(p.as_str(), "spon.ored"),
            other => panic!("unexpected task: {other:?}"),
        }
        let d = compile(".ad:has-text(/ad/i)").unwrap();
        match &d.tasks[0] {
            TaskSpec::HasText(p) => {
                assert_eq!(p.as_str(), "(?i)ad");
                assert!(p.is_match("AD here"));
            }
            other => panic!("unexpected task: {other:?}"),
        }
        assert!(compile(".ad:has-text(/[/)").is_none());
        assert!(compile(".ad:has-text(/x/g)").is_none());
    }

    #[test]
    fn test_literal_text_is_escaped() {
        let d = compile(".ad:has-text(1+1)").unwrap();
        match &d.tasks[0] {
            TaskSpec::HasText(p) => {
                assert!(p.is_match("1+1=2"));
                assert!(!p.is_match("11"));
            }
            other => panic!("unexpected task: {other:?}"),
        }
    }

    #[test]
    fn test_matches_css_variants() {
        let d = compile(".a:matches-css-before(content: /hi/)").unwrap();
        match &d.tasks[0] {
            TaskSpec::MatchesCss { pseudo, prop, .. } => {
                assert_eq!(*pseudo, Some(PseudoElement::Before));
                assert_eq!(prop, "content");
            }
            other => panic!("unexpected task: {other:?}"),
        }
        assert!(compile(".a:matches-css(noproperty)").is_none());
    }

    #[test]
    fn test_numeric_argument_ranges() {
        assert!(compile(".a:min-text-length(0)").is_none());
        assert!(compile(".a:min-text-length(x)").is_none());
        assert!(compile(".a:min-text-length(20)").is_some());
        assert!(compile(".a:upward(0)").is_none());
        assert!(compile(".a:upward(257)").is_none());
        assert!(compile(".a:upward(256)").is_some());
        assert!(compile(".a:upward(div.row)").is_some());
        assert!(compile(".a:upward(:bogus)").is_none());
    }

    #[test]
    fn test_action_position_rules() {
        assert!(compile(".a:has-text(x):remove()").is_some());
        assert!(compile(".a:remove(arg)").is_none());
        assert!(compile(".a:has(span:has-text(x):remove())").is_none());
        assert!(compile(".a:remove():has-text(x)").is_none());
        assert!(compile(".a:has-text(x):remove():remove()").is_none());
        assert!(compile(".a:has-text(x):style(color: red) span").is_none());
    }

    #[test]
    fn test_style_injection_rejected() {
        assert!(compile(".a:has-text(x):style(color: red !important)").is_some());
        assert!(compile(".a:has-text(x):style(background: url(http://x))").is_none());
        assert!(compile(".a:has-text(x):style(color: red /* c */)").is_none());
        assert!(compile(".a:has-text(x):style(red)").is_none());
    }

    #[test]
    fn test_unbalanced_and_unknown() {
        assert!(compile(".ad:has(span").is_none());
        assert!(compile(".ad:has(span))").is_none());
        assert!(compile(".a:foobar(x)").is_none());
        assert!(compile("a:hover:has-text(x)").is_none());
        assert!(compile(".a { color: red }").is_none());
    }

    #[test]
    fn test_escaped_parens_balance() {
        let d = compile(".ad:has-text(a\\(b\\))").unwrap();
        match &d.tasks[0] {
            TaskSpec::HasText(p) => assert!(p.is_match("xa(b)x")),
            other => panic!("unexpected task: {other:?}"),
        }
    }

    #[test]
    fn test_implicit_spath() {
        let d = compile(".ad:has(.x) > .label").unwrap();
        assert_eq!(d.selector, ".ad");
        assert!(matches!(&d.tasks[1], TaskSpec::Spath(s) if s == " > .label"));
    }

    #[test]
    fn test_leading_combinator_is_root_scoped() {
        let d = compile("> .x:has-text(ad)").unwrap();
        assert_eq!(d.selector, ":root");
        assert!(matches!(&d.tasks[0], TaskSpec::Spath(s) if s == " > .x"));
    }

    #[test]
    fn test_watch_attr() {
        let d = compile(".a:watch-attrs(class, style):has-text(x)").unwrap();
        match &d.tasks[0] {
            TaskSpec::WatchAttr(attrs) => assert_eq!(attrs, &["class", "style"]),
            other => panic!("unexpected task: {other:?}"),
        }
        assert!(compile(".a:watch-attr(cl ass)").is_none());
    }

    #[test]
    fn test_xpath_validated() {
        assert!(compile(".a:xpath(//div/span[2])").is_some());
        assert!(compile(".a:xpath(//div[foo])").is_none());
    }

    #[test]
    fn test_canonicalization_idempotent() {
        let rules = [
            ".ad:has(span:contains(Sponsored))",
            "> .x:has-text(a)",
            ".a:upward(2):style(color: red)",
            ".a:matches-css-before(content: /hi/)",
            ".ad:has(.x) > .label",
            ".a:nth-ancestor(4):remove()",
            "div:not(.x:min-text-length(5))",
        ];
        let mut c = Compiler::new();
        for rule in rules {
            let once = c.compile(rule).unwrap();
            let twice = c.compile(&once.decompile()).unwrap();
            assert_eq!(once, twice, "not idempotent: {rule}");
        }
    }

    #[test]
    fn test_memo_returns_same_result() {
        let mut c = Compiler::new();
        let a = c.compile(".ad:has(span)");
        let b = c.compile(".ad:has(span)");
        assert_eq!(a, b);
        assert!(c.compile(".ad:has(").is_none());
        assert!(c.compile(".ad:has(").is_none());
    }
}
