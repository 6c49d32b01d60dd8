//! Cosmetic filter-list rule lines.
//!
//! A cosmetic rule is `hostnames ## body` with the anchor variants `#@#`
//! (exception) and `#?#` (explicitly procedural; compiled the same way).
//! Lines without a cosmetic anchor are network rules and not ours.

use cs_core::selector::Descriptor;

use crate::compiler::Compiler;

#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    /// Hide elements matching the descriptor.
    Hide(Descriptor),
    /// Suppress a hide rule, keyed by its canonical raw form.
    Exception(String),
    /// Scriptlet injection; classified but not executed here.
    Scriptlet(String),
    /// HTML filter applied at response time; classified only.
    Html(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CosmeticRule {
    pub hostnames: Vec<String>,
    pub excluded_hostnames: Vec<String>,
    pub kind: RuleKind,
}

impl CosmeticRule {
    /// Generic rules apply everywhere (subject to exclusions).
    pub fn is_generic(&self) -> bool {
        self.hostnames.is_empty()
    }

    pub fn applies_to(&self, hostname: &str) -> bool {
        if self
            .excluded_hostnames
            .iter()
            .any(|h| hostname_matches(hostname, h))
        {
            return false;
        }
        self.is_generic()
            || self
                .hostnames
                .iter()
                .any(|h| hostname_matches(hostname, h))
    }
}

/// Exact or subdomain match.
fn hostname_matches(hostname: &str, entry: &str) -> bool {
    hostname == entry
        || (hostname.len() > entry.len()
            && hostname.ends_with(entry)
            && hostname.as_bytes()[hostname.len() - entry.len() - 1] == b'.')
}

fn find_anchor(line: &str) -> Option<(usize, usize, bool)> {
    if let Some(pos) = line.find("#@#") {
        return Some((pos, 3, true));
    }
    if let Some(pos) = line.find("#?#") {
        return Some((pos, 3, false));
    }
    line.find("##").map(|pos| (pos, 2, false))
}

fn parse_hostnames(text: &str) -> Option<(Vec<String>, Vec<String>)> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    if text.trim().is_empty() {
        return Some((include, exclude));
    }
    for raw in text.split(',') {
        let entry = raw.trim().to_ascii_lowercase();
        let (negated, host) = match entry.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, entry.as_str()),
        };
        if host.is_empty() || host.contains(char::is_whitespace) {
            return None;
        }
        if negated {
            exclude.push(host.to_string());
        } else {
            include.push(host.to_string());
        }
    }
    Some((include, exclude))
}

/// Parse one line; `None` for anything that is not a valid cosmetic rule.
pub fn parse_rule_line(line: &str, compiler: &mut Compiler) -> Option<CosmeticRule> {
    let line = line.trim();
    let (pos, len, exception) = find_anchor(line)?;
    let body = line[pos + len..].trim();
    if body.is_empty() {
        return None;
    }
    let (hostnames, excluded_hostnames) = parse_hostnames(&line[..pos])?;

    let kind = if exception {
        RuleKind::Exception(compiler.compile(body)?.raw)
    } else if let Some(inner) = body.strip_prefix("+js(") {
        RuleKind::Scriptlet(inner.strip_suffix(')')?.trim().to_string())
    } else if let Some(rest) = body.strip_prefix('^') {
        RuleKind::Html(rest.trim().to_string())
    } else {
        RuleKind::Hide(compiler.compile(body)?)
    };

    Some(CosmeticRule {
        hostnames,
        excluded_hostnames,
        kind,
    })
}

/// Parse a whole list, skipping comments, headers and network rules.
pub fn parse_filter_list(text: &str, compiler: &mut Compiler) -> Vec<CosmeticRule> {
    let mut rules = Vec::new();
    let mut skipped = 0usize;
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
            continue;
        }
        match parse_rule_line(line, compiler) {
            Some(rule) => rules.push(rule),
            None => skipped += 1,
        }
    }
    log::debug!("parsed {} cosmetic rules, skipped {}", rules.len(), skipped);
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Option<CosmeticRule> {
        parse_rule_line(line, &mut Compiler::new())
    }

    #[test]
    fn test_hide_rule_with_hostnames() {
        let rule = parse("example.com,~shop.example.com##.ad:has(span)").unwrap();
        assert_eq!(rule.hostnames, vec!["example.com"]);
        assert_eq!(rule.excluded_hostnames, vec!["shop.example.com"]);
        match &rule.kind {
            RuleKind::Hide(d) => assert_eq!(d.raw, ".ad:has(span)"),
            other => panic!("unexpected kind: {other:?}"),
        }
        assert!(rule.applies_to("example.com"));
        assert!(rule.applies_to("news.example.com"));
        assert!(!rule.applies_to("shop.example.com"));
        assert!(!rule.applies_to("badexample.com"));
    }

    #[test]
    fn test_generic_rule() {
        let rule = parse("###cookie-banner").unwrap();
        assert!(rule.is_generic());
        assert!(rule.applies_to("anything.example"));
    }

    #[test]
    fn test_exception_keyed_by_canonical_form() {
        let rule = parse("example.com#@#.ad:contains(Sponsored)").unwrap();
        match &rule.kind {
            RuleKind::Exception(raw) => assert_eq!(raw, ".ad:has-text(/Sponsored/)"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_scriptlet_and_html_classification() {
        let rule = parse("example.com##+js(set-constant, adsEnabled, false)").unwrap();
        assert!(matches!(
            &rule.kind,
            RuleKind::Scriptlet(s) if s == "set-constant, adsEnabled, false"
        ));
        let rule = parse("example.com##^script:has-text(popunder)").unwrap();
        assert!(matches!(&rule.kind, RuleKind::Html(_)));
    }

    #[test]
    fn test_invalid_lines_rejected() {
        assert!(parse("||ads.example.com^$image").is_none());
        assert!(parse("example.com##").is_none());
        assert!(parse("example.com##.ad:has(").is_none());
        assert!(parse("bad host##.ad").is_none());
    }

    #[test]
    fn test_parse_filter_list_skips_noise() {
        let text = "\
[Adblock Plus 2.0]
! title: test list
||ads.example.com^
example.com##.ad
example.com#?#.ad:has-text(Sponsored)

example.com##.broken:has(
";
        let rules = parse_filter_list(text, &mut Compiler::new());
        assert_eq!(rules.len(), 2);
    }
}
