//! Arena-backed document tree.
//!
//! All nodes live in a `Vec<Node>` owned by [`Dom`] and are referenced by
//! [`NodeId`]. The runtime treats the tree as read-mostly: the only writes it
//! performs are hide flags (silent, never logged) and `remove`-action
//! detachments (logged, so a follow-up pass observes them).

// =============================================================================
// Node identity
// =============================================================================

/// Index of a node in the arena. Stable for the lifetime of the document;
/// detached nodes keep their id but stop being reachable from the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// Flags
// =============================================================================

bitflags::bitflags! {
    /// Per-node suppression flags. These are plain node state, not attributes:
    /// setting them never appends a mutation record, which is what guarantees
    /// the runtime's own hide/unhide writes cannot re-trigger a scan.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// Hidden by a cosmetic descriptor (display suppressed).
        const HIDDEN_BY_FILTER = 1 << 0;
        /// Hidden by the collapser (blocked resource).
        const HIDDEN_BY_COLLAPSE = 1 << 1;
    }
}

/// Pseudo-element selector for computed-style reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PseudoElement {
    Before,
    After,
}

impl PseudoElement {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

// =============================================================================
// Node payload
// =============================================================================

/// A single attribute on an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: String,
    pub value: String,
}

/// Computed-style tables for an element and its pseudo-elements.
///
/// The embedder's style system is the source of truth; the inline `style`
/// attribute is folded in as a convenience when it is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleSet {
    own: Vec<(String, String)>,
    before: Vec<(String, String)>,
    after: Vec<(String, String)>,
}

impl StyleSet {
    fn table(&self, pseudo: Option<PseudoElement>) -> &Vec<(String, String)> {
        match pseudo {
            None => &self.own,
            Some(PseudoElement::Before) => &self.before,
            Some(PseudoElement::After) => &self.after,
        }
    }

    fn table_mut(&mut self, pseudo: Option<PseudoElement>) -> &mut Vec<(String, String)> {
        match pseudo {
            None => &mut self.own,
            Some(PseudoElement::Before) => &mut self.before,
            Some(PseudoElement::After) => &mut self.after,
        }
    }

    fn set(&mut self, pseudo: Option<PseudoElement>, prop: &str, value: &str) {
        let table = self.table_mut(pseudo);
        let prop = prop.to_ascii_lowercase();
        match table.iter_mut().find(|(p, _)| *p == prop) {
            Some(entry) => entry.1 = value.to_string(),
            None => table.push((prop, value.to_string())),
        }
    }

    fn get(&self, pseudo: Option<PseudoElement>, prop: &str) -> Option<&str> {
        let prop = prop.to_ascii_lowercase();
        self.table(pseudo)
            .iter()
            .find(|(p, _)| *p == prop)
            .map(|(_, v)| v.as_str())
    }
}

/// Data specific to element nodes.
#[derive(Debug, Clone)]
pub struct ElementData {
    /// Lowercased tag name.
    pub tag: String,
    pub attrs: Vec<Attr>,
    /// Cached `id` attribute value.
    pub id: Option<String>,
    /// Cached class list split from the `class` attribute.
    pub classes: Vec<String>,
    pub styles: StyleSet,
}

/// Payload distinguishing node kinds.
#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Element(ElementData),
    Text(String),
}

/// A node in the tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub data: NodeData,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub flags: NodeFlags,
}

// =============================================================================
// Mutation log
// =============================================================================

/// One raw mutation, appended while recording is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    ChildAdded(NodeId),
    ChildRemoved(NodeId),
    AttrChanged { node: NodeId, name: String },
}

// =============================================================================
// Dom
// =============================================================================

/// The document tree.
pub struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
    recording: bool,
    mutations: Vec<MutationRecord>,
}

impl Dom {
    pub fn new() -> Self {
        let root = Node {
            data: NodeData::Document,
            parent: None,
            children: Vec::new(),
            flags: NodeFlags::empty(),
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            recording: false,
            mutations: Vec::new(),
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a detached element node.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            data: NodeData::Element(ElementData {
                tag: tag.to_ascii_lowercase(),
                attrs: Vec::new(),
                id: None,
                classes: Vec::new(),
                styles: StyleSet::default(),
            }),
            parent: None,
            children: Vec::new(),
            flags: NodeFlags::empty(),
        });
        id
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            data: NodeData::Text(text.to_string()),
            parent: None,
            children: Vec::new(),
            flags: NodeFlags::empty(),
        });
        id
    }

    /// Append a detached node under a parent.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(self.node(child).parent.is_none());
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
        self.record(MutationRecord::ChildAdded(child));
    }

    /// Shorthand: create an element and append it.
    pub fn elem(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let id = self.create_element(tag);
        self.append(parent, id);
        id
    }

    /// Shorthand: create a text node and append it.
    pub fn text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let id = self.create_text(text);
        self.append(parent, id);
        id
    }

    /// Detach a node from its parent. The node and its subtree keep their
    /// ids but become unreachable from the root.
    pub fn detach(&mut self, id: NodeId) {
        let parent = match self.node(id).parent {
            Some(p) => p,
            None => return,
        };
        self.node_mut(id).parent = None;
        self.node_mut(parent).children.retain(|c| *c != id);
        self.record(MutationRecord::ChildRemoved(id));
    }

    /// Replace all text beneath a node with nothing.
    pub fn clear_text(&mut self, id: NodeId) {
        let descendants = self.subtree(id);
        for d in descendants {
            if let NodeData::Text(t) = &mut self.node_mut(d).data {
                t.clear();
            }
        }
    }

    /// Replace the contents of a text node. Modeled the way `textContent`
    /// assignment reaches a mutation observer: the old text node leaves, a
    /// new one arrives.
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let NodeData::Text(t) = &mut self.node_mut(id).data {
            *t = text.to_string();
            self.record(MutationRecord::ChildRemoved(id));
            self.record(MutationRecord::ChildAdded(id));
        }
    }

    // -------------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------------

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        let name_lower = name.to_ascii_lowercase();
        if let NodeData::Element(el) = &mut self.node_mut(id).data {
            match el.attrs.iter_mut().find(|a| a.name == name_lower) {
                Some(attr) => attr.value = value.to_string(),
                None => el.attrs.push(Attr {
                    name: name_lower.clone(),
                    value: value.to_string(),
                }),
            }
            match name_lower.as_str() {
                "id" => el.id = Some(value.to_string()),
                "class" => {
                    el.classes = value.split_whitespace().map(str::to_string).collect();
                }
                "style" => {
                    for (prop, val) in parse_style_text(value) {
                        el.styles.set(None, &prop, &val);
                    }
                }
                _ => {}
            }
        }
        self.record(MutationRecord::AttrChanged {
            node: id,
            name: name_lower,
        });
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        let name_lower = name.to_ascii_lowercase();
        if let NodeData::Element(el) = &mut self.node_mut(id).data {
            el.attrs.retain(|a| a.name != name_lower);
            match name_lower.as_str() {
                "id" => el.id = None,
                "class" => el.classes.clear(),
                _ => {}
            }
        }
        self.record(MutationRecord::AttrChanged {
            node: id,
            name: name_lower,
        });
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Element(el) => el
                .attrs
                .iter()
                .find(|a| a.name.eq_ignore_ascii_case(name))
                .map(|a| a.value.as_str()),
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Style
    // -------------------------------------------------------------------------

    /// Set a computed-style property, optionally on a pseudo-element.
    pub fn set_computed_style(
        &mut self,
        id: NodeId,
        pseudo: Option<PseudoElement>,
        prop: &str,
        value: &str,
    ) {
        if let NodeData::Element(el) = &mut self.node_mut(id).data {
            el.styles.set(pseudo, prop, value);
        }
    }

    /// Read a computed-style property.
    pub fn computed_style(
        &self,
        id: NodeId,
        pseudo: Option<PseudoElement>,
        prop: &str,
    ) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Element(el) => el.styles.get(pseudo, prop),
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Hide flags
    // -------------------------------------------------------------------------

    /// Set or clear a suppression flag. Never logged.
    pub fn set_hidden(&mut self, id: NodeId, flag: NodeFlags, on: bool) {
        let node = self.node_mut(id);
        if on {
            node.flags |= flag;
        } else {
            node.flags &= !flag;
        }
    }

    pub fn is_hidden(&self, id: NodeId) -> bool {
        !self.node(id).flags.is_empty()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.node(id).data, NodeData::Element(_))
    }

    pub fn as_element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.node(id).data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    /// True if the node is reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cur = id;
        loop {
            if cur == self.root {
                return true;
            }
            match self.node(cur).parent {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Element children of a node, in order.
    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
            .collect()
    }

    /// Pre-order subtree including the node itself.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            for &c in self.node(cur).children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// All attached elements, document order.
    pub fn all_elements(&self) -> Vec<NodeId> {
        self.subtree(self.root)
            .into_iter()
            .filter(|id| self.is_element(*id))
            .collect()
    }

    /// Element descendants of a node (excluding the node).
    pub fn element_descendants(&self, id: NodeId) -> Vec<NodeId> {
        self.subtree(id)
            .into_iter()
            .filter(|d| *d != id && self.is_element(*d))
            .collect()
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for d in self.subtree(id) {
            if let NodeData::Text(t) = &self.node(d).data {
                out.push_str(t);
            }
        }
        out
    }

    /// 1-based position of an element among its element siblings.
    pub fn element_ordinal(&self, id: NodeId) -> usize {
        match self.node(id).parent {
            Some(p) => {
                self.element_children(p)
                    .iter()
                    .position(|c| *c == id)
                    .map(|i| i + 1)
                    .unwrap_or(1)
            }
            None => 1,
        }
    }

    // -------------------------------------------------------------------------
    // Mutation recording
    // -------------------------------------------------------------------------

    pub fn set_recording(&mut self, on: bool) {
        self.recording = on;
        if !on {
            self.mutations.clear();
        }
    }

    #[inline]
    fn record(&mut self, rec: MutationRecord) {
        if self.recording {
            self.mutations.push(rec);
        }
    }

    pub fn pending_mutation_count(&self) -> usize {
        self.mutations.len()
    }

    /// Drain the accumulated raw mutation batch.
    pub fn take_mutations(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.mutations)
    }
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

/// Split inline style text into (property, value) pairs.
fn parse_style_text(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for decl in text.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        if let Some(pos) = decl.find(':') {
            let prop = decl[..pos].trim().to_ascii_lowercase();
            let value = decl[pos + 1..].trim().to_string();
            if !prop.is_empty() {
                out.push((prop, value));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_query() {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");
        let div = dom.elem(body, "div");
        dom.set_attr(div, "class", "ad banner");
        dom.set_attr(div, "id", "top");
        dom.text(div, "hello");

        let el = dom.as_element(div).unwrap();
        assert_eq!(el.tag, "div");
        assert_eq!(el.id.as_deref(), Some("top"));
        assert_eq!(el.classes, vec!["ad", "banner"]);
        assert_eq!(dom.text_content(div), "hello");
        assert!(dom.is_attached(div));
    }

    #[test]
    fn test_detach_breaks_attachment() {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");
        let div = dom.elem(body, "div");
        let span = dom.elem(div, "span");
        dom.detach(div);
        assert!(!dom.is_attached(div));
        assert!(!dom.is_attached(span));
        assert!(dom.is_attached(body));
    }

    #[test]
    fn test_mutation_log_records_structure_not_flags() {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");
        dom.set_recording(true);
        let div = dom.elem(body, "div");
        dom.set_hidden(div, NodeFlags::HIDDEN_BY_FILTER, true);
        dom.set_attr(div, "data-x", "1");
        dom.detach(div);

        let muts = dom.take_mutations();
        assert_eq!(muts.len(), 3);
        assert_eq!(muts[0], MutationRecord::ChildAdded(div));
        assert!(matches!(muts[1], MutationRecord::AttrChanged { .. }));
        assert_eq!(muts[2], MutationRecord::ChildRemoved(div));
        assert_eq!(dom.pending_mutation_count(), 0);
    }

    #[test]
    fn test_inline_style_feeds_computed() {
        let mut dom = Dom::new();
        let div = dom.elem(dom.root(), "div");
        dom.set_attr(div, "style", "color: rgb(255, 0, 0); Display:none");
        assert_eq!(dom.computed_style(div, None, "color"), Some("rgb(255, 0, 0)"));
        assert_eq!(dom.computed_style(div, None, "display"), Some("none"));
        assert_eq!(dom.computed_style(div, Some(PseudoElement::Before), "color"), None);
    }

    #[test]
    fn test_element_ordinal() {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");
        dom.text(body, "x");
        let a = dom.elem(body, "p");
        let b = dom.elem(body, "p");
        assert_eq!(dom.element_ordinal(a), 1);
        assert_eq!(dom.element_ordinal(b), 2);
    }
}
