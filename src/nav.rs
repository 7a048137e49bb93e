//! Navigation tree for the book, extracted from the contents page.

use std::{collections::HashSet, fmt};

use ego_tree::NodeId;
use html5ever::local_name;

use crate::{tree::Document, OutputDocument};

/// An entry of the table of contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavPoint {
    pub id: String,
    /// Position of the entry in a preorder walk of the whole tree, starting at 1.
    pub play_order: usize,
    pub label: String,
    /// Link to the entry's page, possibly with a fragment.
    pub target: String,
    pub children: Vec<NavPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavMap {
    pub points: Vec<NavPoint>,
}

/// Book-level metadata written to the NCX head.
#[derive(Debug, Clone)]
pub struct BookInfo {
    pub uid: String,
    pub title: String,
    pub author: String,
    /// Prepended to every target, for the directory the packager puts pages in.
    pub content_prefix: String,
}

impl Default for BookInfo {
    fn default() -> Self {
        Self {
            uid: "urn:uuid:12644d5f-5e07-4d28-8d05-035a063edd31".into(),
            title: "Introduction to Information Retrieval".into(),
            author: "Christopher D. Manning, Prabhakar Raghavan, and Hinrich Sch\u{FC}tze".into(),
            content_prefix: "Text/".into(),
        }
    }
}

struct Extractor<'a> {
    contents: &'a Document,
    next_play_order: usize,
}

impl Extractor<'_> {
    fn point(&mut self, label: String, target: String) -> NavPoint {
        let play_order = self.next_play_order;
        self.next_play_order += 1;
        NavPoint {
            id: format!("navpoint{play_order}"),
            play_order,
            label,
            target,
            children: Vec::new(),
        }
    }

    fn list(&mut self, ul: NodeId) -> Vec<NavPoint> {
        let items: Vec<NodeId> = self
            .contents
            .node(ul)
            .children()
            .filter(|node| node.value().is_html(&local_name!("li")))
            .map(|node| node.id())
            .collect();
        let mut points = Vec::new();
        for li in items {
            self.item(li, &mut points);
        }
        points
    }

    fn item(&mut self, li: NodeId, points: &mut Vec<NavPoint>) {
        let nested = self.contents.find_in(li, &local_name!("ul"));
        match self.link(li) {
            Some((label, target)) => {
                let mut point = self.point(label, target);
                if let Some(ul) = nested {
                    point.children = self.list(ul);
                }
                points.push(point);
            }
            None => {
                // nothing to point at, so the item's children take its place
                if let Some(ul) = nested {
                    points.extend(self.list(ul));
                }
            }
        }
    }

    /// Label and target of the first link of `li` that is not part of a nested list.
    fn link(&self, li: NodeId) -> Option<(String, String)> {
        let a = self
            .contents
            .node(li)
            .descendants()
            .skip(1)
            .filter(|node| node.value().is_html(&local_name!("a")))
            .find(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|a| a.attr("href").is_some())
                    && !a
                        .ancestors()
                        .take_while(|ancestor| ancestor.id() != li)
                        .any(|ancestor| ancestor.value().is_html(&local_name!("ul")))
            })?;
        let target = a.value().as_element()?.attr("href")?.to_string();
        let label = self
            .contents
            .text_content(a.id())
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Some((label, target))
    }
}

impl NavMap {
    /// Builds the navigation tree.
    ///
    /// The tree starts with `root`, followed by the first list of the contents page. Documents
    /// the contents page never links to are appended at the end in file name order, so every
    /// page is reachable.
    pub fn extract(contents: &Document, root: &OutputDocument, documents: &[OutputDocument]) -> Self {
        let mut extractor = Extractor {
            contents,
            next_play_order: 1,
        };
        let mut points = vec![extractor.point(root.label(), root.file_name.clone())];
        match contents.find(&local_name!("ul")) {
            Some(ul) => points.extend(extractor.list(ul)),
            None => log::warn!("Contents page has no list of chapters"),
        }

        let referenced: HashSet<String> = Self::preorder_of(&points)
            .map(|point| strip_fragment(&point.target).to_owned())
            .collect();
        let mut unreferenced: Vec<&OutputDocument> = documents
            .iter()
            .filter(|document| !referenced.contains(&document.file_name))
            .collect();
        unreferenced.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        for document in unreferenced {
            log::debug!("Adding {} to the navigation: not in the contents page", document.file_name);
            points.push(extractor.point(document.label(), document.file_name.clone()));
        }

        Self { points }
    }

    fn preorder_of(points: &[NavPoint]) -> impl Iterator<Item = &NavPoint> {
        let mut stack: Vec<&NavPoint> = points.iter().rev().collect();
        std::iter::from_fn(move || {
            let point = stack.pop()?;
            stack.extend(point.children.iter().rev());
            Some(point)
        })
    }

    /// All points, parents before their children.
    pub fn preorder(&self) -> impl Iterator<Item = &NavPoint> {
        Self::preorder_of(&self.points)
    }

    pub fn depth(&self) -> usize {
        fn depth(points: &[NavPoint]) -> usize {
            points
                .iter()
                .map(|point| 1 + depth(&point.children))
                .max()
                .unwrap_or(0)
        }
        depth(&self.points)
    }

    /// Renders the map as an NCX document.
    pub fn to_ncx(&self, book: &BookInfo) -> String {
        let mut ncx = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
    <meta name="dtb:depth" content="{depth}"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle>
    <text>{title}</text>
  </docTitle>
  <docAuthor>
    <text>{author}</text>
  </docAuthor>
  <navMap>
"#,
            uid = escape_xml(&book.uid),
            depth = self.depth(),
            title = escape_xml(&book.title),
            author = escape_xml(&book.author),
        );
        for point in &self.points {
            write_nav_point(&mut ncx, point, &book.content_prefix, 2);
        }
        ncx.push_str("  </navMap>\n</ncx>\n");
        ncx
    }
}

fn write_nav_point(ncx: &mut String, point: &NavPoint, prefix: &str, indent: usize) {
    let indent_str = "  ".repeat(indent);
    ncx.push_str(&format!(
        "{indent_str}<navPoint id=\"{}\" playOrder=\"{}\">\n",
        point.id, point.play_order
    ));
    ncx.push_str(&format!(
        "{indent_str}  <navLabel>\n{indent_str}    <text>{}</text>\n{indent_str}  </navLabel>\n",
        escape_xml(&point.label),
    ));
    ncx.push_str(&format!(
        "{indent_str}  <content src=\"{}\"/>\n",
        escape_xml(&format!("{prefix}{}", point.target)),
    ));
    for child in &point.children {
        write_nav_point(ncx, child, prefix, indent + 1);
    }
    ncx.push_str(&format!("{indent_str}</navPoint>\n"));
}

fn strip_fragment(target: &str) -> &str {
    target.split_once('#').map_or(target, |(page, _)| page)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

impl fmt::Display for NavMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_points(f: &mut fmt::Formatter<'_>, points: &[NavPoint], depth: usize) -> fmt::Result {
            for point in points {
                writeln!(
                    f,
                    "{}{}. {} ({})",
                    "  ".repeat(depth),
                    point.play_order,
                    point.label,
                    point.target
                )?;
                write_points(f, &point.children, depth + 1)?;
            }
            Ok(())
        }
        write_points(f, &self.points, 0)
    }
}
