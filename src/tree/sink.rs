use std::{
    borrow::Cow,
    cell::{Ref, RefCell},
};

use ego_tree::{NodeId, NodeMut, Tree};
use html5ever::{
    tendril::{format_tendril, StrTendril},
    tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink},
    Attribute, QualName,
};

use super::{
    node::{Element, Node},
    Document,
};

/// Receives html5ever's tree construction callbacks and builds a [`Document`].
#[derive(Debug)]
pub struct HtmlTreeSink {
    document: RefCell<Document>,
}

impl Default for HtmlTreeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlTreeSink {
    pub fn new() -> Self {
        Self {
            document: RefCell::new(Document::empty()),
        }
    }

    fn with_tree<R>(&self, f: impl FnOnce(&mut Tree<Node>) -> R) -> R {
        f(&mut self.document.borrow_mut().tree)
    }

    fn orphan(&self, node: Node) -> NodeId {
        self.with_tree(|tree| tree.orphan(node).id())
    }

    /// Runs `f` on a node created by this sink.
    fn with_node<R>(&self, id: NodeId, f: impl FnOnce(NodeMut<'_, Node>) -> R) -> R {
        self.with_tree(|tree| f(tree.get_mut(id).unwrap()))
    }
}

/// Merges `text` into `node` if it is a text node, which keeps adjacent text in one node.
fn extend_text(node: Option<NodeMut<'_, Node>>, text: &StrTendril) -> bool {
    let Some(mut node) = node else {
        return false;
    };
    match node.value() {
        Node::Text(existing) => {
            existing.push_tendril(text);
            true
        }
        _ => false,
    }
}

impl TreeSink for HtmlTreeSink {
    type Handle = NodeId;
    type Output = Document;
    type ElemName<'a>
        = Ref<'a, QualName>
    where
        Self: 'a;

    fn finish(self) -> Document {
        self.document.into_inner()
    }

    fn parse_error(&self, msg: Cow<'static, str>) {
        self.document.borrow_mut().errors.push(msg);
    }

    fn get_document(&self) -> NodeId {
        self.document.borrow().tree.root().id()
    }

    fn elem_name<'a>(&'a self, target: &'a NodeId) -> Ref<'a, QualName> {
        Ref::map(self.document.borrow(), |document| {
            match document.tree.get(*target).map(|node| node.value()) {
                Some(Node::Element(element)) => &element.name,
                _ => unreachable!("{target:?} is not an element"),
            }
        })
    }

    fn create_element(&self, name: QualName, attrs: Vec<Attribute>, flags: ElementFlags) -> NodeId {
        self.with_tree(|tree| {
            let mut element = tree.orphan(Node::Element(Element::new(name, attrs)));
            if flags.template {
                // the parser appends template contents here, never to the template itself
                element.append(Node::Document);
            }
            element.id()
        })
    }

    fn create_comment(&self, text: StrTendril) -> NodeId {
        self.orphan(Node::Comment(text))
    }

    /// Processing instructions are bogus comments in HTML.
    fn create_pi(&self, target: StrTendril, data: StrTendril) -> NodeId {
        self.orphan(Node::Comment(format_tendril!("?{target} {data}?")))
    }

    fn append(&self, parent: &NodeId, child: NodeOrText<NodeId>) {
        self.with_node(*parent, |mut parent| match child {
            NodeOrText::AppendNode(id) => {
                parent.append_id(id);
            }
            NodeOrText::AppendText(text) => {
                if !extend_text(parent.last_child(), &text) {
                    parent.append(Node::Text(text));
                }
            }
        })
    }

    fn append_before_sibling(&self, sibling: &NodeId, child: NodeOrText<NodeId>) {
        self.with_node(*sibling, |mut sibling| match child {
            NodeOrText::AppendNode(id) => {
                sibling.insert_id_before(id);
            }
            NodeOrText::AppendText(text) => {
                if !extend_text(sibling.prev_sibling(), &text) {
                    sibling.insert_before(Node::Text(text));
                }
            }
        })
    }

    fn append_based_on_parent_node(
        &self,
        element: &NodeId,
        prev_element: &NodeId,
        child: NodeOrText<NodeId>,
    ) {
        let attached = self.with_tree(|tree| {
            tree.get(*element)
                .is_some_and(|element| element.parent().is_some())
        });
        if attached {
            self.append_before_sibling(element, child)
        } else {
            self.append(prev_element, child)
        }
    }

    fn append_doctype_to_document(
        &self,
        name: StrTendril,
        public_id: StrTendril,
        system_id: StrTendril,
    ) {
        self.with_tree(|tree| {
            tree.root_mut().append(Node::Doctype {
                name,
                public_id,
                system_id,
            });
        })
    }

    /// The contents node created with the template.
    fn get_template_contents(&self, target: &NodeId) -> NodeId {
        self.with_tree(|tree| {
            let template = tree.get(*target).unwrap();
            match template.first_child() {
                Some(contents) if matches!(contents.value(), Node::Document) => contents.id(),
                _ => unreachable!("{target:?} is not a template"),
            }
        })
    }

    fn same_node(&self, x: &NodeId, y: &NodeId) -> bool {
        x == y
    }

    fn set_quirks_mode(&self, _: QuirksMode) {}

    fn add_attrs_if_missing(&self, target: &NodeId, attrs: Vec<Attribute>) {
        self.with_node(*target, |mut node| {
            if let Some(element) = node.value().as_element_mut() {
                for attr in attrs {
                    element.attrs.insert_if_missing(attr);
                }
            }
        })
    }

    fn remove_from_parent(&self, target: &NodeId) {
        self.with_node(*target, |mut node| {
            node.detach();
        })
    }

    fn reparent_children(&self, node: &NodeId, new_parent: &NodeId) {
        self.with_node(*new_parent, |mut new_parent| {
            new_parent.reparent_from_id_append(*node);
        })
    }
}
