use std::{fs, path::Path};

use indoc::indoc;
use tempfile::TempDir;

use crate::Config;

#[test]
fn defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.source_dir, Path::new("book-src"));
    assert_eq!(config.contents, Path::new("contents-1.html"));
    assert_eq!(config.root_page, "irbook.html");
    assert_eq!(config.stylesheet, "Styles/book.css");
    assert_eq!(config.renderer.command, "snuggletex");
    assert_eq!(config.renderer.args, ["-"]);
    assert_eq!(config.skip_until, None);
    assert!(config.ncx);
}

#[test]
fn kebab_case_keys() {
    let config: Config = toml::from_str(indoc! {r#"
        source-dir = "html"
        cache-dir = "/var/cache/l2h"
        root-page = "index.html"
        online-source = "https://example.org/book/"
        skip-until = "node42.html"
        ncx = false

        [renderer]
        command = "java"
    "#})
    .unwrap();
    assert_eq!(config.source_dir, Path::new("html"));
    assert_eq!(config.cache_dir, Path::new("/var/cache/l2h"));
    assert_eq!(config.output_dir, Path::new("output"));
    assert_eq!(config.root_page, "index.html");
    assert_eq!(config.online_source, "https://example.org/book/");
    assert_eq!(config.skip_until.as_deref(), Some("node42.html"));
    assert!(!config.ncx);
    assert_eq!(config.renderer.command, "java");
    // unset keys of a table still get their defaults
    assert_eq!(config.renderer.args, ["-"]);
}

#[test]
fn missing_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load(&dir.path().join("l2h-epub.toml")).unwrap();
    assert_eq!(config.title, "Introduction to Information Retrieval");
}

#[test]
fn invalid_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("l2h-epub.toml");
    fs::write(&path, "ncx = \"sometimes\"").unwrap();
    let err = Config::load(&path).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Unable to parse configuration file: {}", path.display())
    );
}
