//! XPath subset for the `xpath` operator.
//!
//! Covers the shapes that actually occur in cosmetic filters: `/` and `//`
//! steps, name tests, `*`, `.`, `..`, and positional predicates (`[2]`).
//! Anything else is a parse error, so unsupported expressions reject the
//! enclosing rule at compile time instead of failing silently at runtime.

use crate::dom::{Dom, NodeId};

/// Error type for XPath parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XpathError {
    #[error("empty expression")]
    Empty,
    #[error("invalid step '{0}'")]
    InvalidStep(String),
    #[error("invalid predicate '{0}'")]
    InvalidPredicate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Name(String),
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    /// `//` step: search descendants at any depth instead of children.
    descendant: bool,
    test: NameTest,
    position: Option<usize>,
}

/// A parsed XPath expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpathExpr {
    absolute: bool,
    steps: Vec<Step>,
}

/// Parse an expression under the supported subset.
pub fn parse(expr: &str) -> Result<XpathExpr, XpathError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(XpathError::Empty);
    }

    let (absolute, mut rest) = if let Some(r) = expr.strip_prefix("//") {
        // Leading `//` is handled as an absolute descendant step below.
        (true, format!("//{r}"))
    } else if let Some(r) = expr.strip_prefix('/') {
        (true, r.to_string())
    } else {
        (false, expr.to_string())
    };
    if absolute && rest.starts_with("//") {
        rest = rest[2..].to_string();
        return parse_steps(&rest, absolute, true);
    }
    parse_steps(&rest, absolute, false)
}

fn parse_steps(text: &str, absolute: bool, first_descendant: bool) -> Result<XpathExpr, XpathError> {
    let mut steps = Vec::new();
    let mut descendant = first_descendant;
    for raw in text.split('/') {
        if raw.is_empty() {
            // Empty segment between two slashes means `//`.
            descendant = true;
            continue;
        }
        steps.push(parse_step(raw, descendant)?);
        descendant = false;
    }
    if steps.is_empty() {
        return Err(XpathError::Empty);
    }
    Ok(XpathExpr { absolute, steps })
}

fn parse_step(raw: &str, descendant: bool) -> Result<Step, XpathError> {
    let (name_part, position) = match raw.find('[') {
        Some(pos) => {
            let pred = raw[pos..]
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| XpathError::InvalidPredicate(raw.to_string()))?;
            let n: usize = pred
                .trim()
                .parse()
                .map_err(|_| XpathError::InvalidPredicate(pred.to_string()))?;
            if n == 0 {
                return Err(XpathError::InvalidPredicate(pred.to_string()));
            }
            (&raw[..pos], Some(n))
        }
        None => (raw, None),
    };

    let test = match name_part {
        "." => NameTest::SelfNode,
        ".." => NameTest::Parent,
        "*" => NameTest::Any,
        name if !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') =>
        {
            NameTest::Name(name.to_ascii_lowercase())
        }
        other => return Err(XpathError::InvalidStep(other.to_string())),
    };

    if position.is_some() && matches!(test, NameTest::SelfNode | NameTest::Parent) {
        return Err(XpathError::InvalidPredicate(raw.to_string()));
    }

    Ok(Step {
        descendant,
        test,
        position,
    })
}

impl XpathExpr {
    /// Evaluate relative to a context node, returning matched elements in
    /// document order.
    pub fn evaluate(&self, dom: &Dom, ctx: NodeId) -> Vec<NodeId> {
        let mut current: Vec<NodeId> = vec![if self.absolute { dom.root() } else { ctx }];
        for step in &self.steps {
            let mut next = Vec::new();
            for &node in &current {
                let mut group = eval_step(dom, node, step);
                if let Some(pos) = step.position {
                    group = match group.into_iter().nth(pos - 1) {
                        Some(n) => vec![n],
                        None => Vec::new(),
                    };
                }
                for n in group {
                    if !next.contains(&n) {
                        next.push(n);
                    }
                }
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }
        current.retain(|n| dom.is_element(*n));
        current
    }
}

fn eval_step(dom: &Dom, node: NodeId, step: &Step) -> Vec<NodeId> {
    match &step.test {
        NameTest::SelfNode => vec![node],
        NameTest::Parent => dom.parent(node).into_iter().collect(),
        test => {
            let candidates = if step.descendant {
                dom.element_descendants(node)
            } else {
                dom.element_children(node)
            };
            candidates
                .into_iter()
                .filter(|c| match test {
                    NameTest::Any => true,
                    NameTest::Name(name) => {
                        dom.as_element(*c).map(|e| e.tag == *name).unwrap_or(false)
                    }
                    _ => unreachable!(),
                })
                .collect()
        }
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
        let span1 = dom.elem(div, "span");
        let span2 = dom.elem(div, "span");
        (dom, body, div, span1, span2)
    }

    #[test]
    fn test_relative_child_steps() {
        let (dom, _, div, span1, span2) = sample();
        let expr = parse("span").unwrap();
        assert_eq!(expr.evaluate(&dom, div), vec![span1, span2]);
    }

    #[test]
    fn test_descendant_and_predicate() {
        let (dom, body, _, _, span2) = sample();
        let expr = parse(".//span[2]").unwrap();
        assert_eq!(expr.evaluate(&dom, body), vec![span2]);
    }

    #[test]
    fn test_absolute_and_parent() {
        let (dom, body, div, span1, _) = sample();
        let expr = parse("//div").unwrap();
        assert_eq!(expr.evaluate(&dom, span1), vec![div]);
        let expr = parse("..").unwrap();
        assert_eq!(expr.evaluate(&dom, div), vec![body]);
    }

    #[test]
    fn test_rejects_unsupported() {
        assert!(parse("").is_err());
        assert!(parse("//div[@id='x']").is_err());
        assert!(parse("div[0]").is_err());
        assert!(parse("ancestor::div").is_err());
    }
}
