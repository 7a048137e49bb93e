use std::borrow::Cow;

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use regex::Regex;

/// Placeholder emitted for `\lfloor`; SnuggleTeX has no floor brackets.
pub const LFLOOR_MARKER: &str = "L2HLFLOORMARK";
/// Placeholder emitted for `\rfloor`.
pub const RFLOOR_MARKER: &str = "L2HRFLOORMARK";

/// Macros used by the book but defined in its LaTeX sources, keyed by the invocation that
/// requires the definition.
///
/// Matching is by plain substring, so no invocation may be a prefix of another one.
pub static MACROS: &[(&str, &str)] = &[
    (r"\langle", r"\newcommand\langle{\left<}"),
    (r"\rangle", r"\newcommand\rangle{\right>}"),
    (r"\weestrut", r"\newcommand\weestrut{}"),
    (r"\medstrut", r"\newcommand\medstrut{}"),
    (r"\begin{equation}", r"\newenvironment{equation}{\[}{\]}"),
    (r"\framebox", r"\newcommand\framebox[1]{\fbox{#1}}"),
    (r"\termf", r"\newcommand\termf{\mathrm{tf}}"),
    (r"\tcjclass", r"\newcommand\tcjclass{c}"),
    (r"\tcposindex", r"\newcommand\tcposindex{k}"),
    (r"\unicode", r"\newcommand\unicode[2]{#2}"),
    (r"\mthatwask", r"\newcommand\mthatwask{m}"),
    (r"\nthatwasell", r"\newcommand\nthatwasell{n}"),
    (r"\lsimatrix", r"\newcommand\lsimatrix{C}"),
    (r"\query", r"\newcommand\query[1]{\textsf{#1}}"),
    (r"\onedoc", r"\newcommand\onedoc{d}"),
    (r"\argmin", r"\newcommand\argmin{\mathrm{arg min}}"),
    (r"\dlenmax", r"\newcommand\dlenmax{L_{\max}}"),
    (r"\tcword", r"\newcommand\tcword{t}"),
    (r"\observationo", r"\newcommand\observationo{N}"),
    (r"\lfloor", r"\newcommand\lfloor{\mbox{L2HLFLOORMARK}}"),
    (r"\rfloor", r"\newcommand\rfloor{\mbox{L2HRFLOORMARK}}"),
];

/// Formulas the renderer gets wrong, with their output.
pub static TRIVIAL: &[(&str, &str)] = &[(r"\l", "ł")];

static MACRO_INVOCATIONS: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::new(MACROS.iter().map(|(invocation, _)| invocation))
        .expect("macro invocations are valid patterns")
});

/// Kerning has no effect in MathML and `\mkern` is unsupported. `\\` is matched so that a
/// line break followed by `!` is left alone.
static KERNING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\\\|\\!|\\m?kern\s*-?(?:\d+\.?\d*|\.\d+)\s*(?:pt|em|ex|mu)").unwrap()
});

static NOLIMITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\nolimits([^a-zA-Z]|$)").unwrap());

static FLOORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"<(?:mi|mo|mtext)\b[^>]*>\s*(?P<marker>{LFLOOR_MARKER}|{RFLOOR_MARKER})\s*</(?:mi|mo|mtext)>"
    ))
    .unwrap()
});

pub fn trivial(tex: &str) -> Option<&'static str> {
    TRIVIAL
        .iter()
        .find_map(|&(src, output)| (src == tex).then_some(output))
}

/// Rewrites corpus-specific TeX into a form the renderer accepts.
///
/// The result is the cache key for the formula.
pub fn normalize(tex: &str) -> String {
    let mut tex = Cow::Borrowed(tex);

    if let Some(inner) = tex
        .strip_prefix(r"$\displaystyle")
        .and_then(|tex| tex.strip_suffix('$'))
    {
        tex = format!(r"\[{inner}\]").into();
    }
    if let Some(rest) = tex.strip_prefix(r"$\textstyle") {
        tex = format!("${rest}").into();
    }

    let edge_case = match tex.as_ref() {
        r"$\langle$" => Some(r"$\left<\right.$"),
        r"$\rangle$" => Some(r"$\left.\right>$"),
        r"$\ldots\rangle$" => Some(r"$\ldots\left.\right>$"),
        _ => None,
    };
    if let Some(rewritten) = edge_case {
        tex = rewritten.into();
    }

    let tex = KERNING.replace_all(&tex, |caps: &regex::Captures| match &caps[0] {
        r"\\" => r"\\".to_owned(),
        _ => String::new(),
    });
    let tex = unwrap_command(&tex, r"\bm");
    let tex = NOLIMITS.replace_all(&tex, "$1");

    tex.replace(r"\begin{tabular}", r"\begin{array}")
        .replace(r"\end{tabular}", r"\end{array}")
        .replace(r"\Bigl(", r"\left(")
        .replace(r"\Bigr)", r"\right)")
}

/// Definitions for every macro in [`MACROS`] that `tex` invokes, in table order.
pub fn preamble(tex: &str) -> String {
    let mut needed = vec![false; MACROS.len()];
    for found in MACRO_INVOCATIONS.find_overlapping_iter(tex) {
        needed[found.pattern().as_usize()] = true;
    }
    MACROS
        .iter()
        .zip(needed)
        .filter_map(|((_, definition), needed)| needed.then_some(*definition))
        .collect()
}

/// Replaces floor placeholders in rendered MathML with the real brackets.
pub fn patch_floors(mathml: &str) -> Cow<'_, str> {
    let patched = FLOORS.replace_all(mathml, |caps: &regex::Captures| {
        match &caps["marker"] {
            LFLOOR_MARKER => "<mo>\u{230A}</mo>",
            _ => "<mo>\u{230B}</mo>",
        }
    });
    if !patched.contains(LFLOOR_MARKER) && !patched.contains(RFLOOR_MARKER) {
        return patched;
    }
    Cow::Owned(
        patched
            .replace(LFLOOR_MARKER, "\u{230A}")
            .replace(RFLOOR_MARKER, "\u{230B}"),
    )
}

/// Replaces `\name{arg}` with `{arg}`, honouring nested and escaped braces.
fn unwrap_command<'a>(tex: &'a str, name: &str) -> Cow<'a, str> {
    if !tex.contains(name) {
        return Cow::Borrowed(tex);
    }

    let mut out = String::with_capacity(tex.len());
    let mut rest = tex;
    while let Some(idx) = rest.find(name) {
        let (before, after) = rest.split_at(idx);
        out.push_str(before);
        let after_name = &after[name.len()..];
        let is_whole_name = !after_name.starts_with(|c: char| c.is_ascii_alphabetic());
        let arg = after_name.trim_start();
        match (is_whole_name, arg.strip_prefix('{').and_then(group_len)) {
            (true, Some(len)) => {
                out.push('{');
                out.push_str(&arg[1..=len]);
                rest = &arg[len + 1..];
            }
            _ => {
                out.push_str(name);
                rest = after_name;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Length of a brace group up to and including its closing brace, given the text after the
/// opening brace.
fn group_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut escaped = false;
    for (idx, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' if depth == 0 => return Some(idx + 1),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}
