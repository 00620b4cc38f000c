//! Diagnostic collection for the compiler front end.
//!
//! User errors never unwind: the lexer, parser and analyzer report into an
//! [`ErrorReporter`] and keep going where they can. The driver checks the
//! error count at each phase boundary. After [`MAX_ERRORS`] diagnostics the
//! reporter asks its callers to abort.

use std::io;
use std::rc::Rc;

/// Number of accumulated errors after which parsing gives up.
pub const MAX_ERRORS: usize = 8;

/// A position in IDL source: path, 1-based line and column, byte offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub path: Rc<str>,
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

impl Location {
    pub fn new(path: Rc<str>, line: u32, column: u32, offset: usize) -> Location {
        Location {
            path,
            line,
            column,
            offset,
        }
    }
}

/// One reported error, with or without a source position.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub location: Option<Location>,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ErrorReporter {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorReporter {
    pub fn new() -> ErrorReporter {
        ErrorReporter::default()
    }

    /// Reports an error with no source position.
    pub fn error(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            location: None,
            message: message.into(),
        });
    }

    /// Reports an error at a source position.
    pub fn error_at(&mut self, location: &Location, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            location: Some(location.clone()),
            message: message.into(),
        });
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.len()
    }

    /// True once enough errors have accumulated that parsing should stop.
    pub fn should_abort(&self) -> bool {
        self.diagnostics.len() >= MAX_ERRORS
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Renders every diagnostic, with a caret-marked source excerpt when the
    /// source text for the file is available through `source_of`.
    pub fn render(
        &self,
        mut source_of: impl FnMut(&str) -> Option<String>,
        out: &mut impl io::Write,
    ) -> io::Result<()> {
        for diag in &self.diagnostics {
            match &diag.location {
                Some(loc) => {
                    writeln!(
                        out,
                        "{}:{}:{}: error: {}",
                        loc.path, loc.line, loc.column, diag.message
                    )?;
                    if let Some(source) = source_of(&loc.path) {
                        if let Some(line) = source.lines().nth(loc.line as usize - 1) {
                            writeln!(out, "{}", line)?;
                            let pad = line
                                .chars()
                                .take(loc.column as usize - 1)
                                .map(|c| if c == '\t' { '\t' } else { ' ' })
                                .collect::<String>();
                            writeln!(out, "{}^", pad)?;
                        }
                    }
                }
                None => writeln!(out, "error: {}", diag.message)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_rendering() {
        let mut reporter = ErrorReporter::new();
        let path: Rc<str> = Rc::from("dummy.coda");
        reporter.error_at(
            &Location::new(path, 2, 7, 8),
            "Unexpected token: NUMBER",
        );
        let mut out = Vec::new();
        reporter
            .render(|_| Some("\n      23\n".to_owned()), &mut out)
            .unwrap();
        let rendered = String::from_utf8(out).unwrap();
        assert_eq!(
            rendered,
            "dummy.coda:2:7: error: Unexpected token: NUMBER\n      23\n      ^\n"
        );
    }

    #[test]
    fn abort_threshold() {
        let mut reporter = ErrorReporter::new();
        for n in 0..MAX_ERRORS {
            assert!(!reporter.should_abort());
            reporter.error(format!("error {}", n));
        }
        assert!(reporter.should_abort());
    }
}
