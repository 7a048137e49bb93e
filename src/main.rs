use std::{path::PathBuf, process};

use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use l2h_epub::{Config, Converter};

const LOG_ENV: &str = "L2H_EPUB_LOG";

/// Normalizes LaTeX2HTML book chapters for e-book packaging, rendering formula images to MathML.
#[derive(Parser)]
#[command(name = "l2h-epub", version, long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults are used if it does not exist.
    #[arg(short, long, value_name = "FILE", default_value = "l2h-epub.toml")]
    config: PathBuf,

    /// Resume at this chapter; earlier chapters keep their previous output
    #[arg(long, value_name = "NAME")]
    skip_until: Option<String>,

    /// Log debug output, such as cache hits and skipped images
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let mut config = Config::load(&cli.config)?;
    if let Some(chapter) = cli.skip_until {
        config.skip_until = Some(chapter);
    }

    let book = Converter::new(config)?.convert()?;
    log::info!(
        "Converted {} chapters, {} images, {} navigation entries",
        book.documents.len(),
        book.images.len(),
        book.nav.preorder().count(),
    );
    Ok(())
}

fn init_logger(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let mut filter = EnvFilter::builder()
        .with_env_var(LOG_ENV)
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let log_env = std::env::var(LOG_ENV).ok();
    let names_target = |target: &str| {
        log_env
            .as_deref()
            .is_some_and(|env| env.split(',').any(|directive| directive.starts_with(target)))
    };
    // html5ever is noisy below `warn`
    if !names_target("html5ever") {
        filter = filter.add_directive("html5ever=warn".parse().unwrap());
    }

    tracing_subscriber::fmt()
        .without_time()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        // targets only help when the filter was customized
        .with_target(log_env.is_some() || verbose)
        .init();
}
