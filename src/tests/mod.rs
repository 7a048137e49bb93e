use std::{
    fmt::{self, Write},
    fs,
    io::{self, Read, Seek},
    path::{Path, PathBuf},
};

use anyhow::Context;
use tempfile::{tempfile, TempDir};
use tracing_subscriber::layer::SubscriberExt;

use crate::{
    cache::Cache,
    mathml::{tests::StubEngine, EngineOutput},
    Book, Config, Converter,
};

/// A source directory, output directory and cache in a scratch directory.
pub struct Workspace {
    root: TempDir,
    config: Config,
    engine: StubEngine,
    max_log_level: tracing::level_filters::LevelFilter,
}

impl Workspace {
    pub fn init() -> Self {
        let root = TempDir::new().unwrap();
        let config = Config {
            source_dir: root.path().join("book-src"),
            output_dir: root.path().join("output"),
            cache_dir: root.path().join(".cache"),
            contents: root.path().join("contents.html"),
            ncx: false,
            ..Config::default()
        };
        fs::create_dir_all(&config.source_dir).unwrap();
        fs::write(&config.contents, "<ul></ul>").unwrap();
        Self {
            root,
            config,
            engine: StubEngine::default(),
            max_log_level: tracing::Level::INFO.into(),
        }
    }

    pub fn config(mut self, configure: impl FnOnce(&mut Config)) -> Self {
        configure(&mut self.config);
        self
    }

    pub fn max_log_level(mut self, level: impl Into<tracing::level_filters::LevelFilter>) -> Self {
        self.max_log_level = level.into();
        self
    }

    pub fn chapter(self, name: &str, html: &str) -> Self {
        self.file_in_src(name, html)
    }

    pub fn contents(self, html: &str) -> Self {
        fs::write(&self.config.contents, html).unwrap();
        self
    }

    pub fn file_in_src(self, path: impl AsRef<Path>, contents: &str) -> Self {
        let path = self.config.source_dir.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
        self
    }

    pub fn file_in_output(self, path: impl AsRef<Path>, contents: &str) -> Self {
        let path = self.config.output_dir.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
        self
    }

    /// Stores a rendering as if an earlier run had produced it.
    pub fn cached(self, tex: &str, mathml: &str) -> Self {
        Cache::open(&self.config.cache_dir)
            .unwrap()
            .write(tex, mathml)
            .unwrap();
        self
    }

    /// Teaches the stub renderer to render `input`.
    pub fn renders(mut self, input: &str, mathml: &str) -> Self {
        self.engine = self.engine.with(input, EngineOutput::success(mathml));
        self
    }

    pub fn build(self) -> BuildOutput {
        // Capture `log` output in a tempfile
        let _ = tracing_log::LogTracer::init();
        let logfile = tempfile().unwrap();
        let logger = tracing::subscriber::set_default(
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .without_time()
                        .with_ansi(false)
                        .with_writer({
                            let logfile = logfile.try_clone().unwrap();
                            move || logfile.try_clone().unwrap()
                        }),
                )
                .with(
                    tracing_subscriber::filter::Targets::new()
                        .with_default(self.max_log_level)
                        .with_target("html5ever", tracing::Level::WARN),
                ),
        );

        let converter = Converter::with_engine(self.config.clone(), self.engine).unwrap();
        let result = converter.convert();
        let engine_calls = converter.renderer().engine().calls();
        drop(logger);

        let mut logs = String::new();
        let mut logfile = logfile;
        logfile.seek(io::SeekFrom::Start(0)).unwrap();
        logfile.read_to_string(&mut logs).unwrap();
        if let Err(err) = &result {
            writeln!(&mut logs, "{err:#}").unwrap();
        }
        let logs = logs.replace(&self.root.path().display().to_string(), "$ROOT");

        BuildOutput {
            logs,
            dir: self.config.output_dir,
            result,
            engine_calls,
            _root: self.root,
        }
    }
}

fn visualize_directory(dir: impl AsRef<Path>, mut writer: impl fmt::Write) -> anyhow::Result<()> {
    fn visualize_directory(
        root: &Path,
        dir: &Path,
        writer: &mut dyn fmt::Write,
    ) -> anyhow::Result<()> {
        let mut entries = fs::read_dir(dir)
            .with_context(|| format!("Unable to read directory: {}", dir.display()))?
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.path());
        for entry in entries {
            let path = entry.path();
            match entry.file_type()? {
                ty if ty.is_dir() => visualize_directory(root, path.as_ref(), writer)?,
                ty if ty.is_file() => {
                    writeln!(writer, "├─ {}", path.strip_prefix(root)?.display())?;
                    match fs::read_to_string(path) {
                        Ok(contents) => {
                            for line in contents.lines() {
                                writeln!(writer, "{}", format!("│ {line}").trim_end())?;
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                            writeln!(writer, "│ <INVALID UTF8>")?;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    visualize_directory(dir.as_ref(), dir.as_ref(), &mut writer)
}

pub struct BuildOutput {
    logs: String,
    dir: PathBuf,
    result: anyhow::Result<Book>,
    engine_calls: usize,
    _root: TempDir,
}

impl BuildOutput {
    pub fn book(&self) -> &Book {
        self.result.as_ref().unwrap()
    }

    pub fn error(&self) -> &anyhow::Error {
        self.result.as_ref().err().unwrap()
    }

    pub fn logs(&self) -> &str {
        &self.logs
    }

    pub fn engine_calls(&self) -> usize {
        self.engine_calls
    }

    pub fn read(&self, path: impl AsRef<Path>) -> Option<String> {
        fs::read_to_string(self.dir.join(path)).ok()
    }
}

impl fmt::Display for BuildOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.logs.is_empty() {
            writeln!(f, "├─ log output")?;
            for line in self.logs.lines() {
                writeln!(f, "│ {}", line.trim_end())?;
            }
        }
        visualize_directory(&self.dir, f).expect("`visualize_directory` should succeed");
        Ok(())
    }
}

/// A minimal LaTeX2HTML page.
pub fn page(title: &str, body: &str) -> String {
    format!("<HTML>\n<HEAD>\n<TITLE>{title}</TITLE>\n</HEAD>\n<BODY >\n{body}</BODY></HTML>")
}

mod config;
