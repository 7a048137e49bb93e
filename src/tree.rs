use std::{borrow::Cow, fmt, io};

use ego_tree::{iter::Edge, NodeId, NodeRef};
use html5ever::{
    local_name, ns,
    serialize::{self, Serialize, SerializeOpts, Serializer, TraversalScope},
    tendril::{StrTendril, TendrilSink},
    LocalName, QualName,
};

mod node;
pub use node::{Attributes, Element, Node, QualNameExt};

mod sink;
pub use sink::HtmlTreeSink;

/// An owned, mutable HTML document.
///
/// Nodes are addressed by [`NodeId`]s that are only meaningful for the document that produced
/// them. Removed nodes are detached rather than freed, so ids collected before a mutation stay
/// valid (though they may no longer be reachable from the root).
pub struct Document {
    errors: Vec<Cow<'static, str>>,
    pub tree: ego_tree::Tree<Node>,
}

impl Document {
    fn empty() -> Self {
        Self {
            errors: Vec::new(),
            tree: ego_tree::Tree::new(Node::Document),
        }
    }

    fn parse_opts() -> html5ever::ParseOpts {
        let mut opts = html5ever::ParseOpts::default();
        // If this is enabled (the default) then the contents of <noscript> elements get parsed
        // as text rather than as markup.
        opts.tree_builder.scripting_enabled = false;
        opts
    }

    /// Parses a complete HTML page.
    pub fn parse(html: &str) -> Self {
        let document = html5ever::parse_document(HtmlTreeSink::new(), Self::parse_opts()).one(html);
        document.trace_errors();
        document
    }

    /// Parses markup as if it appeared inside `<body>`.
    ///
    /// The parsed nodes are the children of [`Document::fragment_root`].
    pub fn parse_fragment(html: &str) -> Self {
        let document = html5ever::parse_fragment(
            HtmlTreeSink::new(),
            Self::parse_opts(),
            QualName::new(None, ns!(html), local_name!("body")),
            Vec::new(),
            false,
        )
        .one(html);
        document.trace_errors();
        document
    }

    fn trace_errors(&self) {
        for error in &self.errors {
            tracing::trace!("HTML parse error: {error}");
        }
    }

    pub fn root(&self) -> NodeRef<'_, Node> {
        self.tree.root()
    }

    /// The node holding the nodes of a parsed fragment.
    pub fn fragment_root(&self) -> NodeRef<'_, Node> {
        let root = self.tree.root();
        root.first_child().unwrap_or(root)
    }

    /// # Panics
    ///
    /// If `id` does not belong to this document.
    pub fn node(&self, id: NodeId) -> NodeRef<'_, Node> {
        self.tree.get(id).unwrap()
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.tree.get(id)?.value().as_element()
    }

    /// Applies `f` to the element `id`, if it is one.
    pub fn update_element<R>(&mut self, id: NodeId, f: impl FnOnce(&mut Element) -> R) -> Option<R> {
        let mut node = self.tree.get_mut(id)?;
        node.value().as_element_mut().map(f)
    }

    pub fn rename(&mut self, id: NodeId, local: LocalName) {
        self.update_element(id, |element| element.name.local = local);
    }

    /// All elements named `local`, in document order.
    pub fn elements(&self, local: &LocalName) -> Vec<NodeId> {
        self.tree
            .root()
            .descendants()
            .filter(|node| node.value().is_html(local))
            .map(|node| node.id())
            .collect()
    }

    /// The first element named `local`, in document order.
    pub fn find(&self, local: &LocalName) -> Option<NodeId> {
        self.find_in(self.tree.root().id(), local)
    }

    /// The first descendant of `ancestor` named `local`, in document order.
    pub fn find_in(&self, ancestor: NodeId, local: &LocalName) -> Option<NodeId> {
        self.node(ancestor)
            .descendants()
            .skip(1)
            .find(|node| node.value().is_html(local))
            .map(|node| node.id())
    }

    pub fn head(&self) -> Option<NodeId> {
        self.find(&local_name!("head"))
    }

    pub fn body(&self) -> Option<NodeId> {
        self.find(&local_name!("body"))
    }

    /// The `<title>` text, if any.
    pub fn title(&self) -> Option<String> {
        let title = self.find(&local_name!("title"))?;
        let text = self.text_content(title);
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    }

    /// Concatenation of all text below `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        self.node(id)
            .descendants()
            .filter_map(|node| match node.value() {
                Node::Text(text) => Some(&**text),
                _ => None,
            })
            .collect()
    }

    /// Nodes before `id` in reverse document order: previous siblings (deepest last
    /// descendant first), then ancestors.
    pub fn preceding(&self, id: NodeId) -> Preceding<'_> {
        Preceding {
            current: Some(self.node(id)),
        }
    }

    /// Detaches `id` (and its subtree) from the document.
    pub fn remove(&mut self, id: NodeId) {
        if let Some(mut node) = self.tree.get_mut(id) {
            node.detach();
        }
    }

    /// Is `id` still reachable from the document root?
    pub fn is_attached(&self, id: NodeId) -> bool {
        let root = self.tree.root().id();
        self.tree
            .get(id)
            .is_some_and(|node| node.id() == root || node.ancestors().any(|a| a.id() == root))
    }

    pub fn replace_with_text(&mut self, id: NodeId, text: &str) {
        if let Some(mut node) = self.tree.get_mut(id) {
            node.insert_before(Node::Text(StrTendril::from_slice(text)));
            node.detach();
        }
    }

    /// Replaces the contents of the text node `id`.
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let Some(mut node) = self.tree.get_mut(id) {
            if let Node::Text(contents) = node.value() {
                *contents = StrTendril::from_slice(text);
            }
        }
    }

    /// Replaces `id` with a copy of the nodes of a parsed fragment.
    pub fn replace_with_fragment(&mut self, id: NodeId, fragment: &Document) {
        for child in fragment.fragment_root().children() {
            self.insert_copy_before(id, child);
        }
        self.remove(id);
    }

    fn insert_copy_before(&mut self, sibling: NodeId, src: NodeRef<'_, Node>) {
        let Some(mut sibling) = self.tree.get_mut(sibling) else {
            return;
        };
        let id = sibling.insert_before(src.value().clone()).id();
        self.append_copies(id, src);
    }

    fn append_copies(&mut self, parent: NodeId, src: NodeRef<'_, Node>) {
        for child in src.children() {
            let Some(mut parent) = self.tree.get_mut(parent) else {
                return;
            };
            let id = parent.append(child.value().clone()).id();
            self.append_copies(id, child);
        }
    }

    pub fn append(&mut self, parent: NodeId, node: Node) -> Option<NodeId> {
        Some(self.tree.get_mut(parent)?.append(node).id())
    }

    pub fn prepend(&mut self, parent: NodeId, node: Node) -> Option<NodeId> {
        Some(self.tree.get_mut(parent)?.prepend(node).id())
    }

    /// Serializes the document as HTML.
    pub fn to_html(&self) -> io::Result<String> {
        let mut out = Vec::new();
        serialize::serialize(&mut out, self, SerializeOpts::default())?;
        String::from_utf8(out).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Serializes `id` and its subtree as HTML.
    pub fn node_to_html(&self, id: NodeId) -> io::Result<String> {
        let mut out = Vec::new();
        serialize::serialize(&mut out, &Subtree(self.node(id)), SerializeOpts::default())?;
        String::from_utf8(out).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

pub struct Preceding<'a> {
    current: Option<NodeRef<'a, Node>>,
}

impl<'a> Iterator for Preceding<'a> {
    type Item = NodeRef<'a, Node>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        let next = match current.prev_sibling() {
            Some(mut prev) => {
                while let Some(last) = prev.last_child() {
                    prev = last;
                }
                Some(prev)
            }
            None => current.parent(),
        };
        self.current = next;
        next
    }
}

struct Subtree<'a>(NodeRef<'a, Node>);

fn serialize_edges<'a, S: Serializer>(
    edges: impl Iterator<Item = Edge<'a, Node>>,
    serializer: &mut S,
) -> io::Result<()> {
    for edge in edges {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Document => {}
                Node::Doctype { name, .. } => serializer.write_doctype(name)?,
                Node::Comment(comment) => serializer.write_comment(comment)?,
                Node::Text(text) => serializer.write_text(text)?,
                Node::Element(element) => serializer.start_elem(
                    element.name.clone(),
                    element.attrs.iter().map(|(name, value)| (name, &**value)),
                )?,
            },
            Edge::Close(node) => {
                if let Node::Element(element) = node.value() {
                    serializer.end_elem(element.name.clone())?;
                }
            }
        }
    }
    Ok(())
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: &mut S, _: TraversalScope) -> io::Result<()> {
        serialize_edges(self.tree.root().traverse(), serializer)
    }
}

impl Serialize for Subtree<'_> {
    fn serialize<S: Serializer>(&self, serializer: &mut S, _: TraversalScope) -> io::Result<()> {
        serialize_edges(self.0.traverse(), serializer)
    }
}

struct DebugChildren<'a> {
    parent: NodeRef<'a, Node>,
}

struct DebugNodeAndDescendants<'a> {
    node: NodeRef<'a, Node>,
}

impl fmt::Debug for DebugChildren<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_list();
        for child in self.parent.children() {
            f.entry(&DebugNodeAndDescendants { node: child });
        }
        f.finish()
    }
}

impl fmt::Debug for DebugNodeAndDescendants<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.node.value().fmt(f)?;
        if self.node.has_children() {
            write!(f, " => ")?;
            DebugChildren { parent: self.node }.fmt(f)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DebugChildren {
            parent: self.tree.root(),
        }
        .fmt(f)
    }
}
