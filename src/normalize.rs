use std::borrow::Cow;

use anyhow::Context as _;
use ego_tree::NodeId;
use html5ever::{local_name, ns, tendril::StrTendril};

use crate::{
    mathml::{Engine, MathRenderer, RenderError},
    recover::{self, ELLIPSIS},
    tree::{Document, Element, Node},
};

pub const NAVPANEL_START: &str = "<!--Navigation Panel-->";
pub const NAVPANEL_END: &str = "<!--End of Navigation Panel-->";
pub const CHILD_LINKS_START: &str = "<!--Table of Child-Links-->";
pub const CHILD_LINKS_END: &str = "<!--End of Table of Child-Links-->";

/// Present only in the raw markup of the book's introduction page, whose child links are its
/// table of contents.
pub const ROOT_PAGE_MARKER: &str =
    "\n<BODY >\n<H1>Introduction to Information Retrieval</H1>\n";

/// Stylesheet link that every page carries but that no longer resolves.
pub const DEAD_STYLESHEET: &str = "https://nlp.stanford.edu/IR-book/html/htmledition/irbook.css";

/// The `alt` text of the image used to mark cross references.
pub const CROSS_REFERENCE_MARKER: &str = "[*]";

/// Nonstandard attribute found on a link to Wikipedia; its presence makes the page invalid.
pub const WIKIPEDIA_ATTRIBUTE: &str = "wikipedia:general";

/// Presentational attributes that are turned into classes, in the order the classes are added.
pub const LAYOUT_ATTRIBUTES: [&str; 7] = [
    "align",
    "valign",
    "cellpadding",
    "border",
    "nowrap",
    "compact",
    "width",
];

const NAVIGATION_RELS: [&str; 6] = ["next", "previous", "prev", "up", "contents", "index"];

/// A normalized chapter.
#[derive(Debug)]
pub struct Normalized {
    pub document: Document,
    /// `alt` texts of truncated formulas whose source could not be recovered. Their images are
    /// left in the page.
    pub unrecovered: Vec<String>,
}

/// Turns LaTeX2HTML chapter pages into clean HTML with MathML formulas.
pub struct Normalizer<'r, E> {
    renderer: &'r MathRenderer<E>,
    stylesheet: String,
}

impl<'r, E: Engine> Normalizer<'r, E> {
    /// `stylesheet` is linked from every normalized page.
    pub fn new(renderer: &'r MathRenderer<E>, stylesheet: impl Into<String>) -> Self {
        Self {
            renderer,
            stylesheet: stylesheet.into(),
        }
    }

    /// Normalizes the raw markup of a chapter.
    ///
    /// Fails if a delimited chunk is unterminated, or on the first formula that cannot be
    /// rendered, in which case the error is a [`RenderError`] carrying the formula's
    /// surroundings.
    pub fn normalize(&self, chapter: &str) -> anyhow::Result<Normalized> {
        let mut chapter = remove_chunks(chapter, NAVPANEL_START, NAVPANEL_END)?;
        if !chapter.contains(ROOT_PAGE_MARKER) {
            let without_links = remove_chunks(&chapter, CHILD_LINKS_START, CHILD_LINKS_END)?;
            chapter = Cow::Owned(without_links.into_owned());
        }

        let mut doc = Document::parse(&chapter);
        remove_metadata(&mut doc);
        if let Some(address) = doc.find(&local_name!("address")) {
            doc.remove(address);
        }
        remove_dead_stylesheet(&mut doc);
        remove_heading_break(&mut doc);
        typeset_quotes(&mut doc);
        let unrecovered = self.render_formulas(&mut doc)?;
        trim_trailing_decoration(&mut doc);
        remove_wikipedia_attribute(&mut doc);
        layout_attributes_to_classes(&mut doc);
        for br in doc.elements(&local_name!("br")) {
            doc.update_element(br, |br| br.remove_attr("clear"));
        }
        for tt in doc.elements(&local_name!("tt")) {
            doc.rename(tt, local_name!("code"));
        }
        self.complete_head(&mut doc)?;
        set_doctype(&mut doc);
        remove_converter_comment(&mut doc);

        Ok(Normalized {
            document: doc,
            unrecovered,
        })
    }

    fn render_formulas(&self, doc: &mut Document) -> anyhow::Result<Vec<String>> {
        let mut unrecovered = Vec::new();
        for img in doc.elements(&local_name!("img")) {
            let Some(alt) = doc.element(img).and_then(|img| img.attr("alt")) else {
                continue;
            };
            let alt = alt.to_string();

            let tex = if alt.contains(ELLIPSIS) {
                match recover::recover(doc, img) {
                    Some(tex) => tex,
                    None => {
                        log::warn!("Unable to recover truncated formula, leaving image as is: {alt}");
                        unrecovered.push(alt);
                        continue;
                    }
                }
            } else {
                alt
            };

            if tex.ends_with(".html") || tex.contains(r"\includegraphics") {
                log::debug!("Not a formula: {tex:?}");
                continue;
            }
            if tex == CROSS_REFERENCE_MARKER {
                doc.replace_with_text(img, "\u{2021}");
                continue;
            }

            let mathml = match self.renderer.render(&tex) {
                Ok(mathml) => mathml,
                Err(err) => return Err(attach_context(doc, img, err)),
            };
            let fragment = Document::parse_fragment(&mathml);
            doc.replace_with_fragment(img, &fragment);
        }
        Ok(unrecovered)
    }

    fn complete_head(&self, doc: &mut Document) -> anyhow::Result<()> {
        let head = doc.head().context("Page has no <head>")?;
        let charset = Element::html(local_name!("meta"), [("charset", "utf-8")]);
        let stylesheet = Element::html(
            local_name!("link"),
            [
                ("rel", "stylesheet"),
                ("type", "text/css"),
                ("href", self.stylesheet.as_str()),
            ],
        );
        doc.append(head, Node::Element(charset));
        doc.append(head, Node::Element(stylesheet));
        Ok(())
    }
}

fn attach_context(doc: &Document, img: NodeId, err: anyhow::Error) -> anyhow::Error {
    match err.downcast::<RenderError>() {
        Ok(mut err) => {
            err.context = doc
                .node(img)
                .parent()
                .and_then(|parent| doc.node_to_html(parent.id()).ok());
            err.into()
        }
        Err(err) => err.context("Unable to render formula"),
    }
}

/// Removes every `start ... end` chunk from raw markup, markers included.
pub fn remove_chunks<'a>(text: &'a str, start: &str, end: &str) -> anyhow::Result<Cow<'a, str>> {
    let mut text = Cow::Borrowed(text);
    while let Some(chunk_start) = text.find(start) {
        let chunk_end = text[chunk_start + start.len()..]
            .find(end)
            .map(|idx| chunk_start + start.len() + idx + end.len())
            .with_context(|| format!("Found {start} without a matching {end}"))?;
        text.to_mut().replace_range(chunk_start..chunk_end, "");
    }
    Ok(text)
}

/// Drops `<meta>` and navigation `<link>`s, which point at pages of the online edition.
fn remove_metadata(doc: &mut Document) {
    for meta in doc.elements(&local_name!("meta")) {
        doc.remove(meta);
    }
    for link in doc.elements(&local_name!("link")) {
        let is_navigation = doc
            .element(link)
            .and_then(|link| link.attr("rel"))
            .is_some_and(|rel| {
                NAVIGATION_RELS
                    .iter()
                    .any(|nav| rel.trim().eq_ignore_ascii_case(nav))
            });
        if is_navigation {
            doc.remove(link);
        }
    }
}

fn remove_dead_stylesheet(doc: &mut Document) {
    let dead = doc.elements(&local_name!("link")).into_iter().find(|&link| {
        doc.element(link)
            .and_then(|link| link.attr("href"))
            .is_some_and(|href| &**href == DEAD_STYLESHEET)
    });
    if let Some(link) = dead {
        doc.remove(link);
    }
}

fn remove_heading_break(doc: &mut Document) {
    let br = doc
        .find(&local_name!("h1"))
        .and_then(|h1| doc.find_in(h1, &local_name!("br")));
    if let Some(br) = br {
        doc.remove(br);
    }
}

/// Replaces TeX-style ASCII quotes with typographic ones.
pub fn typographic_quotes(text: &str) -> Cow<'_, str> {
    if !text.contains(['`', '\'']) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.replace("``", "\u{201C}")
            .replace("''", "\u{201D}")
            .replace('\'', "\u{2019}")
            .replace('`', "\u{2018}"),
    )
}

fn typeset_quotes(doc: &mut Document) {
    let rewrites: Vec<(NodeId, String)> = doc
        .root()
        .descendants()
        .filter(|node| {
            !node.parent().is_some_and(|parent| {
                parent.value().is_html(&local_name!("script"))
                    || parent.value().is_html(&local_name!("style"))
            })
        })
        .filter_map(|node| match node.value() {
            Node::Text(text) => match typographic_quotes(text) {
                Cow::Owned(typeset) => Some((node.id(), typeset)),
                Cow::Borrowed(_) => None,
            },
            _ => None,
        })
        .collect();
    for (id, text) in rewrites {
        doc.set_text(id, &text);
    }
}

/// Drops rules, breaks and empty paragraphs from the end of the body.
fn trim_trailing_decoration(doc: &mut Document) {
    let Some(body) = doc.body() else {
        return;
    };
    let elements: Vec<NodeId> = doc
        .node(body)
        .descendants()
        .skip(1)
        .filter(|node| node.value().as_element().is_some())
        .map(|node| node.id())
        .collect();
    for id in elements.into_iter().rev() {
        let Some(element) = doc.element(id) else {
            break;
        };
        if element.is(&local_name!("hr")) || element.is(&local_name!("br")) {
            doc.remove(id);
        } else if element.is(&local_name!("p")) && is_blank(doc, id) {
            doc.remove(id);
        } else {
            break;
        }
    }
}

fn is_blank(doc: &Document, id: NodeId) -> bool {
    doc.node(id)
        .descendants()
        .skip(1)
        .all(|node| match node.value() {
            Node::Text(text) => text.trim().is_empty(),
            Node::Element(_) => false,
            _ => true,
        })
}

fn remove_wikipedia_attribute(doc: &mut Document) {
    for a in doc.elements(&local_name!("a")) {
        if doc
            .update_element(a, |a| a.remove_attr(WIKIPEDIA_ATTRIBUTE))
            .flatten()
            .is_some()
        {
            break;
        }
    }
}

/// The class that replaces the layout attribute `attr="value"`.
pub fn layout_class(attr: &str, value: &str) -> String {
    let value = value.trim();
    if attr == "width" && value == "100%" {
        return "full-width".to_owned();
    }
    if value.is_empty() {
        return attr.to_owned();
    }
    let value = value.split_whitespace().collect::<Vec<_>>().join("-");
    format!("{attr}-{}", value.to_ascii_lowercase())
}

fn layout_attributes_to_classes(doc: &mut Document) {
    let elements: Vec<NodeId> = doc
        .root()
        .descendants()
        .filter(|node| {
            node.value()
                .as_element()
                .is_some_and(|element| element.name.ns == ns!(html))
        })
        .map(|node| node.id())
        .collect();
    for id in elements {
        doc.update_element(id, |element| {
            for attr in LAYOUT_ATTRIBUTES {
                if let Some(value) = element.remove_attr(attr) {
                    element.add_class(&layout_class(attr, &value));
                }
            }
        });
    }
}

fn set_doctype(doc: &mut Document) {
    let doctypes: Vec<NodeId> = doc
        .root()
        .children()
        .filter(|node| matches!(node.value(), Node::Doctype { .. }))
        .map(|node| node.id())
        .collect();
    for doctype in doctypes {
        doc.remove(doctype);
    }
    let root = doc.root().id();
    doc.prepend(
        root,
        Node::Doctype {
            name: StrTendril::from_slice("html"),
            public_id: StrTendril::new(),
            system_id: StrTendril::new(),
        },
    );
}

fn remove_converter_comment(doc: &mut Document) {
    let comment = doc.root().children().find_map(|node| match node.value() {
        Node::Comment(text) if text.trim_start().starts_with(recover::CONVERTER_SIGNATURE) => {
            Some(node.id())
        }
        _ => None,
    });
    if let Some(comment) = comment {
        doc.remove(comment);
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        cache::Cache,
        mathml::{tests::StubEngine, EngineOutput},
    };

    struct Harness {
        renderer: MathRenderer<StubEngine>,
        _cache: TempDir,
    }

    impl Harness {
        fn new(engine: StubEngine) -> Self {
            let dir = TempDir::new().unwrap();
            let cache = Cache::open(dir.path()).unwrap();
            Self {
                renderer: MathRenderer::new(engine, cache),
                _cache: dir,
            }
        }

        fn normalize(&self, chapter: &str) -> anyhow::Result<Normalized> {
            Normalizer::new(&self.renderer, "Styles/book.css").normalize(chapter)
        }

        fn body(&self, chapter: &str) -> String {
            let normalized = self.normalize(chapter).unwrap();
            let body = normalized.document.body().unwrap();
            normalized.document.node_to_html(body).unwrap()
        }
    }

    fn harness() -> Harness {
        Harness::new(StubEngine::default())
    }

    #[test]
    fn chunks_are_removed_repeatedly() {
        let text = format!("a{NAVPANEL_START}x{NAVPANEL_END}b{NAVPANEL_START}y{NAVPANEL_END}c");
        assert_eq!(remove_chunks(&text, NAVPANEL_START, NAVPANEL_END).unwrap(), "abc");
        assert!(matches!(
            remove_chunks("abc", NAVPANEL_START, NAVPANEL_END).unwrap(),
            Cow::Borrowed("abc")
        ));
        let err = remove_chunks(&format!("a{NAVPANEL_START}b"), NAVPANEL_START, NAVPANEL_END)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Found <!--Navigation Panel--> without a matching <!--End of Navigation Panel-->"
        );
    }

    #[test]
    fn child_links_are_kept_on_the_root_page() {
        let page = |heading: &str| {
            format!(
                "<HTML>\n<BODY >\n<H1>{heading}</H1>\n{CHILD_LINKS_START}\n<UL><LI>x</LI></UL>\n{CHILD_LINKS_END}\n<P>end</P></BODY></HTML>"
            )
        };
        let harness = harness();
        assert!(harness
            .body(&page("Introduction to Information Retrieval"))
            .contains("<ul><li>x</li></ul>"));
        assert!(!harness.body(&page("Boolean retrieval")).contains("<ul>"));
    }

    #[test]
    fn quotes_are_typeset_once() {
        let typeset = typographic_quotes("``Hello'' isn't `quoted'");
        assert_eq!(typeset, "\u{201C}Hello\u{201D} isn\u{2019}t \u{2018}quoted\u{2019}");
        assert!(matches!(typographic_quotes(&typeset), Cow::Borrowed(_)));
    }

    #[test]
    fn quotes_skip_comments_and_scripts() {
        let body = harness().body(indoc! {r#"
            <p>it's</p><!-- don't --><script>var a = 'x';</script>
        "#});
        assert_eq!(
            body,
            "<body><p>it\u{2019}s</p><!-- don't --><script>var a = 'x';</script>\n</body>"
        );
    }

    #[test]
    fn layout_attributes_become_classes() {
        assert_eq!(layout_class("align", "CENTER"), "align-center");
        assert_eq!(layout_class("width", "100%"), "full-width");
        assert_eq!(layout_class("width", "50%"), "width-50%");
        assert_eq!(layout_class("nowrap", ""), "nowrap");

        let body = harness().body(concat!(
            r#"<table align="CENTER" width="100%" border="1" cellpadding="3">"#,
            r#"<tr><td valign="TOP" nowrap="" class="x">x</td></tr></table>"#,
            r#"<ul compact><li>a</li></ul>"#,
        ));
        assert_eq!(
            body,
            concat!(
                r#"<body><table class="align-center cellpadding-3 border-1 full-width"><tbody>"#,
                r#"<tr><td class="x valign-top nowrap">x</td></tr></tbody></table>"#,
                r#"<ul class="compact"><li>a</li></ul></body>"#,
            )
        );
    }

    #[test]
    fn mathml_attributes_are_left_alone() {
        let engine = StubEngine::default().with(
            r"$a\,b$",
            EngineOutput::success(r#"<math><mi>a</mi><mspace width="0.167em"/><mi>b</mi></math>"#),
        );
        let body = Harness::new(engine).body(r#"<p><img alt="$a\,b$" align="MIDDLE"></p>"#);
        assert_eq!(
            body,
            r#"<body><p><math><mi>a</mi><mspace width="0.167em"></mspace><mi>b</mi></math></p></body>"#
        );
    }

    #[test]
    fn trailing_decoration_is_trimmed() {
        let body = harness().body("<p>text</p><p> </p><br><hr>\n<p><br></p>");
        assert_eq!(body, "<body><p>text</p>\n</body>");
        let body = harness().body("<p>one</p><div>two</div><hr>");
        assert_eq!(body, "<body><p>one</p><div>two</div></body>");
    }

    #[test]
    fn images_are_rendered_or_left_alone() {
        let engine = StubEngine::default()
            .with(r"$\alpha$", EngineOutput::success("<math><mi>\u{3B1}</mi></math>"));
        let harness = Harness::new(engine);
        let normalized = harness
            .normalize(concat!(
                r#"<p>Let <img alt="$\alpha$" src="img1.png"> be <img alt="[*]" src="crossref.png">"#,
                r#" see <img alt="other.html" src="x.png"> and <img alt="\includegraphics{fig.eps}">"#,
                r#" and <img alt="\l"> and <img alt="$\beta + ...$"> and <img src="noalt.png">.</p>"#,
            ))
            .unwrap();
        let body = normalized.document.body().unwrap();
        assert_eq!(
            normalized.document.node_to_html(body).unwrap(),
            concat!(
                "<body><p>Let <math><mi>\u{3B1}</mi></math> be \u{2021}",
                r#" see <img alt="other.html" src="x.png"> and <img alt="\includegraphics{fig.eps}">"#,
                " and \u{142} and ",
                r#"<img alt="$\beta + ...$"> and <img src="noalt.png">.</p></body>"#,
            )
        );
        assert_eq!(normalized.unrecovered, [r"$\beta + ...$"]);
        assert_eq!(harness.renderer.engine().calls(), 1);
    }

    #[test]
    fn truncated_formulas_are_recovered() {
        let engine = StubEngine::default().with(
            r"\begin{displaymath}x_1 + x_2 + x_3 + x_4\end{displaymath}",
            EngineOutput::success("<math><mi>x</mi></math>"),
        );
        let normalized = Harness::new(engine)
            .normalize(indoc! {r#"
                <p>Sum:</p>
                <!-- MATH
                 \begin{displaymath}x_1 + x_2 + x_3 + x_4\end{displaymath}
                 -->
                <table><tr><td><img alt="\begin{displaymath}x_1 + x_2 + ...\end{displaymath}"></td></tr></table>
            "#})
            .unwrap();
        assert!(normalized.unrecovered.is_empty());
        let html = normalized.document.to_html().unwrap();
        assert!(html.contains("<td><math><mi>x</mi></math></td>"));
        assert!(!html.contains("MATH"));
    }

    #[test]
    fn render_errors_carry_the_surrounding_markup() {
        let err = harness()
            .normalize(r#"<p>see <img alt="$\nonsense$"></p>"#)
            .unwrap_err();
        let err = err.downcast::<RenderError>().unwrap();
        assert_eq!(err.tex, r"$\nonsense$");
        assert_eq!(
            err.context.as_deref(),
            Some(r#"<p>see <img alt="$\nonsense$"></p>"#)
        );
    }

    #[test]
    fn only_the_first_wikipedia_attribute_is_removed() {
        let body = harness().body(concat!(
            r#"<p><a href="a.html">a</a><a href="https://en.wikipedia.org/wiki/X" wikipedia:general="">x</a>"#,
            r#"<a href="y" wikipedia:general="">y</a></p>"#,
        ));
        assert_eq!(
            body,
            concat!(
                r#"<body><p><a href="a.html">a</a><a href="https://en.wikipedia.org/wiki/X">x</a>"#,
                r#"<a href="y" wikipedia:general="">y</a></p></body>"#,
            )
        );
    }

    const CHAPTER: &str = indoc! {r#"
        <!DOCTYPE HTML PUBLIC "-//W3C//DTD HTML 3.2 Final//EN">

        <!--Converted with LaTeX2HTML 2002-2-1 (1.71)
        original version by:  Nikos Drakos, CBLU, University of Leeds-->
        <HTML>
        <HEAD>
        <TITLE>Boolean retrieval</TITLE>
        <META NAME="description" CONTENT="Boolean retrieval">
        <META HTTP-EQUIV="Content-Type" CONTENT="text/html; charset=utf-8">
        <LINK REL="next" HREF="node2.html">
        <LINK REL="STYLESHEET" HREF="https://nlp.stanford.edu/IR-book/html/htmledition/irbook.css">
        </HEAD>
        <BODY >
        <H1><A NAME="SECTION001"></A><BR>
        Boolean retrieval</H1>
        <P>
        The <BR CLEAR="ALL"><TT>grep</TT> ``tool'' isn't bad.
        <P>
        <BR><HR>
        <ADDRESS>
        Generated by the converter
        </ADDRESS>
        </BODY>
        </HTML>
    "#};

    #[test]
    fn page_is_cleaned_up() {
        let html = harness().normalize(CHAPTER).unwrap().document.to_html().unwrap();
        assert!(html.starts_with("<!DOCTYPE html><html><head>\n<title>Boolean retrieval</title>"));
        assert!(html.contains(concat!(
            r#"<meta charset="utf-8">"#,
            r#"<link rel="stylesheet" type="text/css" href="Styles/book.css"></head>"#,
        )));
        assert!(html.contains("<h1><a name=\"SECTION001\"></a>\nBoolean retrieval</h1>"));
        assert!(html.contains(
            "<p>\nThe <br><code>grep</code> \u{201C}tool\u{201D} isn\u{2019}t bad.\n</p>"
        ));
        for gone in [
            "LaTeX2HTML",
            "description",
            "node2.html",
            "irbook.css",
            "<address",
            "<hr>",
            "clear",
            "<tt>",
        ] {
            assert!(!html.contains(gone), "{gone} should be gone from {html}");
        }
    }
}
