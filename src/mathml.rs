use std::{
    fmt, io,
    io::Write as _,
    process::{Command, Stdio},
};

use anyhow::Context as _;

use crate::{cache::Cache, latex};

/// Something that turns a TeX document into MathML.
pub trait Engine {
    /// Runs the engine on `input` to completion.
    ///
    /// An `Err` means the engine could not be run at all; a failed render is reported through
    /// [`EngineOutput`].
    fn run(&self, input: &str) -> io::Result<EngineOutput>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Exit code, if the process exited normally.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl EngineOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A render succeeded only if the engine exited cleanly *and* printed no diagnostics.
    pub fn is_success(&self) -> bool {
        self.status == Some(0) && self.stderr.trim().is_empty()
    }
}

/// Runs [SnuggleTeX](https://www2.ph.ed.ac.uk/snuggletex/) (or a compatible command), feeding
/// the TeX on stdin and reading MathML from stdout.
///
/// There is no timeout: a hung engine hangs the run.
#[derive(Debug, Clone)]
pub struct SnuggleTex {
    program: String,
    args: Vec<String>,
}

impl SnuggleTex {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl Engine for SnuggleTex {
    fn run(&self, input: &str) -> io::Result<EngineOutput> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(input.as_bytes()) {
                // the engine quit without reading its input; its status and stderr say why
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
                result => result?,
            }
        }
        let output = child.wait_with_output()?;
        Ok(EngineOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// The engine rejected a formula.
#[derive(Debug, thiserror::Error)]
pub struct RenderError {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The formula as given to the renderer, before the macro preamble was added.
    pub tex: String,
    /// The exact engine input.
    pub input: String,
    /// Markup surrounding the formula in its page, when known.
    pub context: Option<String>,
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "formula renderer exited with status {code}")?,
            None => write!(f, "formula renderer was terminated by a signal")?,
        }
        write!(f, " while rendering {:?}", self.tex)
    }
}

impl RenderError {
    /// Everything needed to reproduce the failure by hand.
    pub fn diagnostics(&self) -> String {
        let mut out = format!("{self}\nTeX source: {}\nRenderer input: {}\n", self.tex, self.input);
        if !self.stdout.trim().is_empty() {
            out.push_str(&format!("stdout:\n{}\n", self.stdout.trim_end()));
        }
        if !self.stderr.trim().is_empty() {
            out.push_str(&format!("stderr:\n{}\n", self.stderr.trim_end()));
        }
        if let Some(context) = &self.context {
            out.push_str(&format!("Page context: {context}\n"));
        }
        out
    }
}

/// Renders formulas to MathML through an [`Engine`], memoizing results in a [`Cache`].
pub struct MathRenderer<E> {
    engine: E,
    cache: Cache,
}

impl<E: Engine> MathRenderer<E> {
    pub fn new(engine: E, cache: Cache) -> Self {
        Self { engine, cache }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Renders `tex` to MathML.
    ///
    /// Errors are either a [`RenderError`] or an I/O failure (running the engine, or reading and
    /// writing the cache).
    pub fn render(&self, tex: &str) -> anyhow::Result<String> {
        if let Some(mathml) = latex::trivial(tex) {
            return Ok(mathml.to_owned());
        }
        let tex = latex::normalize(tex);
        self.cache
            .ensure(&tex, |tex| render_uncached(&self.engine, tex))
    }
}

fn render_uncached(engine: &impl Engine, tex: &str) -> anyhow::Result<String> {
    let input = latex::preamble(tex) + tex;
    log::debug!("Rendering {input:?}");
    let output = engine
        .run(&input)
        .context("Unable to run the formula renderer")?;
    if !output.is_success() {
        return Err(RenderError {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
            tex: tex.to_owned(),
            input,
            context: None,
        }
        .into());
    }
    Ok(latex::patch_floors(&output.stdout).into_owned())
}
