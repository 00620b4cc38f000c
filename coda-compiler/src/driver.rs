//! Shared front-end driving for the command-line tools: read files, parse
//! them, and chase the transitive import closure.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use crate::ast;
use crate::errors::ErrorReporter;
use crate::parser::Parser;

/// Parsed command-line inputs plus their transitive imports, with the raw
/// sources retained for diagnostic rendering.
#[derive(Default)]
pub struct ParsedFiles {
    pub asts: Vec<ast::File>,
    pub imports: Vec<ast::File>,
    pub sources: HashMap<String, String>,
}

fn join_import(base_path: &str, relative: &str) -> String {
    match base_path.rfind('/') {
        Some(slash) => format!("{}/{}", &base_path[..slash], relative),
        None => relative.to_owned(),
    }
}

fn read_source(path: &str) -> io::Result<String> {
    std::fs::read_to_string(Path::new(path))
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path, e)))
}

/// Reads and parses the named files and, transitively, every file they
/// import. Parse errors accumulate in the reporter; I/O failures are
/// returned immediately.
pub fn parse_files(paths: &[String], reporter: &mut ErrorReporter) -> io::Result<ParsedFiles> {
    let mut result = ParsedFiles::default();
    let mut pending_imports: Vec<String> = Vec::new();

    for path in paths {
        if result.sources.contains_key(path) {
            continue;
        }
        let source = read_source(path)?;
        if let Some(file) = Parser::new(reporter).parse(&source, path) {
            for import in &file.imports {
                pending_imports.push(join_import(path, &import.path));
            }
            result.asts.push(file);
        }
        result.sources.insert(path.clone(), source);
    }

    while let Some(path) = pending_imports.pop() {
        if result.sources.contains_key(&path) {
            continue;
        }
        let source = read_source(&path)?;
        if let Some(file) = Parser::new(reporter).parse(&source, &path) {
            for import in &file.imports {
                pending_imports.push(join_import(&path, &import.path));
            }
            result.imports.push(file);
        }
        result.sources.insert(path, source);
    }
    Ok(result)
}

/// Renders accumulated diagnostics to stderr with source excerpts.
pub fn report_errors(reporter: &ErrorReporter, sources: &HashMap<String, String>) {
    let mut stderr = io::stderr().lock();
    let _ = reporter.render(|path| sources.get(path).cloned(), &mut stderr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_paths_resolve_relative_to_importer() {
        assert_eq!(join_import("idl/app.coda", "base.coda"), "idl/base.coda");
        assert_eq!(join_import("app.coda", "base.coda"), "base.coda");
        assert_eq!(
            join_import("a/b/app.coda", "common/base.coda"),
            "a/b/common/base.coda"
        );
    }
}
