//! Recovery of formulas whose `alt` text was truncated to an ellipsis.
//!
//! LaTeX2HTML keeps the full source of a displayed formula in a comment just before the table
//! that lays it out, but cuts long sources short in the image's `alt`. The comment is only
//! trusted if it looks like the same formula as the truncated text.

use ego_tree::NodeId;
use html5ever::local_name;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::tree::{Document, Node};

pub const ELLIPSIS: &str = "...";

const MATH_MARKER: &str = "MATH";
pub(crate) const CONVERTER_SIGNATURE: &str = "Converted with LaTeX2HTML";

static ENV_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\\begin\{[a-zA-Z]+\*?\}\s*").unwrap());

/// Finds the untruncated source of the formula image `img`, consuming the comment it came from.
///
/// Returns `None` if the image is not laid out the way the converter lays out displayed
/// formulas, or if no trustworthy comment precedes it.
pub fn recover(doc: &mut Document, img: NodeId) -> Option<String> {
    let alt = doc.element(img)?.attr("alt")?.to_string();
    let table = formula_table(doc, img)?;

    let (comment, text) = doc.preceding(table).find_map(|node| match node.value() {
        Node::Comment(text) => Some((node.id(), text.to_string())),
        _ => None,
    })?;

    let mut source = text.trim();
    if let Some(rest) = source.strip_prefix(MATH_MARKER) {
        if rest.starts_with('\n') {
            source = rest.trim();
        }
    }
    if source.starts_with(CONVERTER_SIGNATURE) {
        tracing::trace!("Comment before {alt:?} is the converter signature");
        return None;
    }
    if !is_sameish(source, &alt) {
        log::debug!("Comment {source:?} does not match truncated formula {alt:?}");
        return None;
    }

    let source = source.to_owned();
    doc.remove(comment);
    Some(source)
}

/// The `<table>` holding `img` as `table > tr > td > img`, ignoring an implied `<tbody>`.
fn formula_table(doc: &Document, img: NodeId) -> Option<NodeId> {
    let mut ancestors = doc
        .node(img)
        .ancestors()
        .filter(|node| !node.value().is_html(&local_name!("tbody")));
    for expected in [local_name!("td"), local_name!("tr"), local_name!("table")] {
        let ancestor = ancestors.next()?;
        if !ancestor.value().is_html(&expected) {
            return None;
        }
        if expected == local_name!("table") {
            return Some(ancestor.id());
        }
    }
    None
}

/// Does `candidate` look like the source that `truncated` was cut from?
///
/// Leading `\begin{...}` markers are ignored on both sides. The candidate is accepted if its
/// longest common substring with the text before the ellipsis covers at least 80% of that text.
pub fn is_sameish(candidate: &str, truncated: &str) -> bool {
    let candidate: Vec<char> = strip_env_starts(candidate).chars().collect();
    let truncated = strip_env_starts(truncated);
    let Some(ellipsis) = truncated.find(ELLIPSIS) else {
        return false;
    };
    let prefix: Vec<char> = truncated[..ellipsis].chars().collect();
    if prefix.is_empty() {
        return false;
    }
    let candidate = &candidate[..candidate.len().min(prefix.len())];

    5 * longest_common_substring(candidate, &prefix) >= 4 * prefix.len()
}

fn strip_env_starts(mut tex: &str) -> &str {
    while let Some(found) = ENV_START.find(tex) {
        tex = &tex[found.end()..];
    }
    tex
}

fn longest_common_substring(a: &[char], b: &[char]) -> usize {
    let mut longest = 0;
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb { prev[j] + 1 } else { 0 };
            longest = longest.max(row[j + 1]);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    longest
}
