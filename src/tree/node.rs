use std::fmt;

use html5ever::{local_name, ns, tendril::StrTendril, Attribute, LocalName, QualName};
use indexmap::IndexMap;
use once_cell::sync::Lazy;

/// A node in the tree.
#[derive(Clone)]
pub enum Node {
    /// The document root, or the contents of a `<template>`.
    Document,

    /// The `<!DOCTYPE>` declaration.
    Doctype {
        name: StrTendril,
        public_id: StrTendril,
        system_id: StrTendril,
    },

    /// An HTML comment.
    Comment(StrTendril),

    /// Text.
    Text(StrTendril),

    /// An element.
    Element(Element),
}

#[derive(Clone, Default)]
pub struct Attributes {
    pub id: Option<StrTendril>,
    pub classes: StrTendril,
    pub rest: IndexMap<QualName, StrTendril>,
}

/// An HTML element.
#[derive(Clone)]
pub struct Element {
    /// The element name.
    pub name: QualName,
    /// The element attributes.
    pub attrs: Attributes,
}

pub trait QualNameExt {
    /// Is this the HTML element `local`?
    fn is_html(&self, local: &LocalName) -> bool;
}

impl QualNameExt for QualName {
    fn is_html(&self, local: &LocalName) -> bool {
        self.ns == ns!(html) && self.local == *local
    }
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Is this the HTML element `local`?
    pub fn is_html(&self, local: &LocalName) -> bool {
        self.as_element()
            .is_some_and(|element| element.name.is_html(local))
    }
}

impl Element {
    pub fn new(name: QualName, attributes: Vec<Attribute>) -> Self {
        let mut attrs = Attributes::default();
        attrs.rest.reserve(attributes.len());
        for attr in attributes {
            attrs.insert_if_missing(attr);
        }
        Element { name, attrs }
    }

    /// Creates an HTML element with the given attributes, in order.
    pub fn html<'a>(
        local: LocalName,
        attributes: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let attributes = attributes
            .into_iter()
            .map(|(name, value)| Attribute {
                name: QualName::new(None, ns!(), LocalName::from(name)),
                value: value.into(),
            })
            .collect();
        Self::new(QualName::new(None, ns!(html), local), attributes)
    }

    pub fn is(&self, local: &LocalName) -> bool {
        self.name.is_html(local)
    }

    /// Looks up a non-`id`, non-`class` attribute by local name.
    pub fn attr(&self, local: &str) -> Option<&StrTendril> {
        self.attrs
            .rest
            .iter()
            .find_map(|(name, value)| (&*name.local == local).then_some(value))
    }

    /// Removes a non-`id`, non-`class` attribute by local name, returning its value.
    pub fn remove_attr(&mut self, local: &str) -> Option<StrTendril> {
        let idx = self
            .attrs
            .rest
            .keys()
            .position(|name| &*name.local == local)?;
        self.attrs
            .rest
            .shift_remove_index(idx)
            .map(|(_, value)| value)
    }

    pub fn add_class(&mut self, class: &str) {
        if !self.attrs.classes.is_empty() {
            self.attrs.classes.push_char(' ');
        }
        self.attrs.classes.push_slice(class);
    }
}

impl Attributes {
    /// Adds `attr` unless an attribute with the same name is already set.
    pub fn insert_if_missing(&mut self, attr: Attribute) {
        match attr.name.local {
            local_name!("id") => {
                self.id.get_or_insert(attr.value);
            }
            local_name!("class") => {
                if self.classes.is_empty() {
                    self.classes = attr.value;
                }
            }
            _ => {
                self.rest.entry(attr.name).or_insert(attr.value);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QualName, &StrTendril)> {
        static ID: Lazy<QualName> = Lazy::new(|| QualName::new(None, ns!(), local_name!("id")));
        static CLASS: Lazy<QualName> =
            Lazy::new(|| QualName::new(None, ns!(), local_name!("class")));
        (self.id.as_ref().map(|id| (&*ID, id)).into_iter())
            .chain((!self.classes.is_empty()).then_some((&*CLASS, &self.classes)))
            .chain(&self.rest)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Document => write!(f, "Document"),
            Node::Doctype { name, .. } => write!(f, "<!DOCTYPE {name}>"),
            Node::Comment(comment) => write!(f, "<!-- {comment} -->"),
            Node::Text(text) => write!(f, "Text({text})"),
            Node::Element(element) => write!(f, "{element:?}"),
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "<{}", self.name.local)?;
        if let Some(id) = &self.attrs.id {
            write!(f, r#" id="{id}""#)?;
        }
        if !self.attrs.classes.is_empty() {
            write!(f, r#" class="{}""#, self.attrs.classes)?;
        }
        for (name, value) in &self.attrs.rest {
            write!(f, r#" {}="{value}""#, name.local)?;
        }
        write!(f, ">")
    }
}
