use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

pub mod cache;
use cache::Cache;

mod latex;

pub mod mathml;
use mathml::{Engine, MathRenderer, RenderError, SnuggleTex};

pub mod nav;
use nav::{BookInfo, NavMap};

pub mod normalize;
use normalize::Normalizer;

pub mod recover;

pub mod tree;
use tree::Document;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Directory holding the LaTeX2HTML pages and their images.
    #[serde(default = "defaults::source_dir")]
    pub source_dir: PathBuf,
    #[serde(default = "defaults::output_dir")]
    pub output_dir: PathBuf,
    /// Where rendered formulas are kept between runs.
    #[serde(default = "defaults::cache_dir")]
    pub cache_dir: PathBuf,
    /// The contents page, relative to `source-dir`.
    #[serde(default = "defaults::contents")]
    pub contents: PathBuf,
    /// File name of the book's introduction page, the first entry of the navigation.
    #[serde(default = "defaults::root_page")]
    pub root_page: String,
    #[serde(default = "defaults::title")]
    pub title: String,
    /// Stylesheet linked from every page, relative to the pages.
    #[serde(default = "defaults::stylesheet")]
    pub stylesheet: String,
    /// Base URL of the online edition, used to point at the page behind an error.
    #[serde(default = "defaults::online_source")]
    pub online_source: String,
    /// Resume a previous run at this chapter: earlier chapters are not reprocessed.
    pub skip_until: Option<String>,
    #[serde(default)]
    pub renderer: RendererConfig,
    /// Whether to write a `toc.ncx` next to the pages.
    #[serde(default = "defaults::enabled")]
    pub ncx: bool,
}

/// The command that turns TeX into MathML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RendererConfig {
    #[serde(default = "defaults::renderer_command")]
    pub command: String,
    #[serde(default = "defaults::renderer_args")]
    pub args: Vec<String>,
}

mod defaults {
    use std::path::PathBuf;

    pub fn source_dir() -> PathBuf {
        "book-src".into()
    }

    pub fn output_dir() -> PathBuf {
        "output".into()
    }

    pub fn cache_dir() -> PathBuf {
        ".cache".into()
    }

    pub fn contents() -> PathBuf {
        "contents-1.html".into()
    }

    pub fn root_page() -> String {
        "irbook.html".into()
    }

    pub fn title() -> String {
        "Introduction to Information Retrieval".into()
    }

    pub fn stylesheet() -> String {
        "Styles/book.css".into()
    }

    pub fn online_source() -> String {
        "https://nlp.stanford.edu/IR-book/html/htmledition/".into()
    }

    pub fn renderer_command() -> String {
        "snuggletex".into()
    }

    pub fn renderer_args() -> Vec<String> {
        vec!["-".into()]
    }

    pub fn enabled() -> bool {
        true
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: defaults::source_dir(),
            output_dir: defaults::output_dir(),
            cache_dir: defaults::cache_dir(),
            contents: defaults::contents(),
            root_page: defaults::root_page(),
            title: defaults::title(),
            stylesheet: defaults::stylesheet(),
            online_source: defaults::online_source(),
            skip_until: None,
            renderer: RendererConfig::default(),
            ncx: defaults::enabled(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            command: defaults::renderer_command(),
            args: defaults::renderer_args(),
        }
    }
}

impl Config {
    /// Reads the configuration from a TOML file, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let config = fs::read_to_string(path)
            .with_context(|| format!("Unable to read configuration file: {}", path.display()))?;
        toml::from_str(&config)
            .with_context(|| format!("Unable to parse configuration file: {}", path.display()))
    }
}

/// A page written to the output directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputDocument {
    pub file_name: String,
    /// Contents of the page's `<title>`.
    pub title: Option<String>,
    /// Truncated formulas left as images.
    pub unrecovered: Vec<String>,
}

impl OutputDocument {
    pub fn label(&self) -> String {
        self.title.clone().unwrap_or_else(|| self.file_name.clone())
    }
}

/// Everything the e-book packager needs, in order.
#[derive(Debug)]
pub struct Book {
    pub documents: Vec<OutputDocument>,
    /// Images copied unchanged from the source directory, relative to the output directory.
    pub images: Vec<PathBuf>,
    pub nav: NavMap,
}

/// Converts a directory of LaTeX2HTML pages.
pub struct Converter<E> {
    config: Config,
    renderer: MathRenderer<E>,
}

impl Converter<SnuggleTex> {
    /// Creates a converter that renders formulas with the configured command.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let engine = SnuggleTex::new(
            config.renderer.command.clone(),
            config.renderer.args.iter().cloned(),
        );
        Self::with_engine(config, engine)
    }
}

impl<E: Engine> Converter<E> {
    pub fn with_engine(config: Config, engine: E) -> anyhow::Result<Self> {
        let cache = Cache::open(&config.cache_dir).with_context(|| {
            format!("Unable to open cache directory: {}", config.cache_dir.display())
        })?;
        Ok(Self {
            config,
            renderer: MathRenderer::new(engine, cache),
        })
    }

    pub fn renderer(&self) -> &MathRenderer<E> {
        &self.renderer
    }

    /// Converts every page in the source directory.
    ///
    /// Stops at the first chapter that fails to convert. Chapters written before it are left
    /// in place.
    pub fn convert(&self) -> anyhow::Result<Book> {
        let source_dir = &self.config.source_dir;
        let output_dir = &self.config.output_dir;
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Unable to create directory: {}", output_dir.display()))?;

        let mut chapters = Vec::new();
        let mut files = Vec::new();
        for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| {
                format!("Unable to read source directory: {}", source_dir.display())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_chapter = entry.depth() == 1
                && entry.path().extension().is_some_and(|ext| ext == "html");
            if is_chapter {
                chapters.push(entry.into_path());
            } else if is_image(entry.path()) {
                files.push(entry.into_path());
            } else {
                log::debug!("Ignoring {}", entry.path().display());
            }
        }

        let normalizer = Normalizer::new(&self.renderer, self.config.stylesheet.as_str());
        let mut documents = Vec::with_capacity(chapters.len());
        let mut skipping = self.config.skip_until.is_some();
        for chapter in &chapters {
            let file_name = chapter_name(chapter)?;
            if self.config.skip_until.as_deref() == Some(file_name.as_str()) {
                skipping = false;
            }
            let output = output_dir.join(&file_name);
            if skipping {
                if let Some(document) = previously_written(&output, file_name)? {
                    documents.push(document);
                }
                continue;
            }
            documents.push(self.convert_chapter(&normalizer, chapter, &output, file_name)?);
        }
        if skipping {
            if let Some(name) = &self.config.skip_until {
                log::warn!("No chapter named {name} to resume at; every chapter was skipped");
            }
        }

        let mut images = Vec::with_capacity(files.len());
        for src in files {
            let relative = src.strip_prefix(source_dir)?.to_path_buf();
            let dest = output_dir.join(&relative);
            if !dest.exists() {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("Unable to create directory: {}", parent.display())
                    })?;
                }
                fs::copy(&src, &dest).with_context(|| {
                    format!("Unable to copy '{}' => '{}'", src.display(), dest.display())
                })?;
            }
            images.push(relative);
        }

        let unrecovered: usize = documents.iter().map(|doc| doc.unrecovered.len()).sum();
        if unrecovered > 0 {
            log::warn!("{unrecovered} truncated formulas could not be recovered and remain images");
        }

        let nav = self.navigation(&documents)?;
        Ok(Book {
            documents,
            images,
            nav,
        })
    }

    fn convert_chapter(
        &self,
        normalizer: &Normalizer<'_, E>,
        chapter: &Path,
        output: &Path,
        file_name: String,
    ) -> anyhow::Result<OutputDocument> {
        let raw = fs::read_to_string(chapter)
            .with_context(|| format!("Unable to read chapter: {}", chapter.display()))?;
        let normalized = match normalizer.normalize(&raw) {
            Ok(normalized) => normalized,
            Err(err) => {
                if let Some(err) = err.downcast_ref::<RenderError>() {
                    log::error!(
                        "{}Check the chapter online: {}{file_name}",
                        err.diagnostics(),
                        self.config.online_source,
                    );
                }
                return Err(err.context(format!("Unable to convert chapter: {file_name}")));
            }
        };
        let html = normalized
            .document
            .to_html()
            .with_context(|| format!("Unable to serialize chapter: {file_name}"))?;
        fs::write(output, html)
            .with_context(|| format!("Unable to write file: {}", output.display()))?;
        log::info!("Wrote {}", output.display());

        Ok(OutputDocument {
            title: normalized.document.title(),
            file_name,
            unrecovered: normalized.unrecovered,
        })
    }

    fn navigation(&self, documents: &[OutputDocument]) -> anyhow::Result<NavMap> {
        let path = self.config.source_dir.join(&self.config.contents);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Unable to read contents page: {}", path.display()))?;
        let root = OutputDocument {
            file_name: self.config.root_page.clone(),
            title: Some(self.config.title.clone()),
            ..Default::default()
        };
        let nav = NavMap::extract(&Document::parse(&contents), &root, documents);

        if self.config.ncx {
            let book = BookInfo {
                title: self.config.title.clone(),
                ..BookInfo::default()
            };
            let path = self.config.output_dir.join("toc.ncx");
            fs::write(&path, nav.to_ncx(&book))
                .with_context(|| format!("Unable to write file: {}", path.display()))?;
            log::info!("Wrote {}", path.display());
        }
        Ok(nav)
    }
}

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "gif", "jpg", "jpeg", "svg"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|image| ext.eq_ignore_ascii_case(image)))
}

fn chapter_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(ToOwned::to_owned)
        .with_context(|| format!("Invalid file name: {}", path.display()))
}

/// The output of an earlier run for a chapter that is being skipped.
fn previously_written(output: &Path, file_name: String) -> anyhow::Result<Option<OutputDocument>> {
    if !output.exists() {
        log::debug!("Skipping {file_name}, which has no previous output");
        return Ok(None);
    }
    log::debug!("Skipping {file_name}, reusing {}", output.display());
    let html = fs::read_to_string(output)
        .with_context(|| format!("Unable to read file: {}", output.display()))?;
    Ok(Some(OutputDocument {
        title: Document::parse(&html).title(),
        file_name,
        unrecovered: Vec::new(),
    }))
}
