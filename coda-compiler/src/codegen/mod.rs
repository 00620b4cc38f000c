//! Code-generation framework.
//!
//! A [`Backend`] subscribes to an option scope (e.g. `rust`) and emits, per
//! input file, source text that preserves the runtime contract: field
//! accessors with presence tracking, merge/freeze hooks, enum value
//! mappings, and a registration function that rebuilds the file's
//! descriptors into a pool at load time. Backends are replaceable; the
//! framework owns option plumbing, field filtering and output placement.

pub mod rust;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use coda::descriptor::{DescriptorPool, FieldDescriptor, FileId, StructId};
use coda::registry::TypeRegistry;
use coda::types::Type;

/// Everything a backend needs to generate code for a set of files.
pub struct CodegenRequest<'a> {
    pub pool: &'a DescriptorPool,
    pub registry: &'a TypeRegistry,
    pub files: &'a [FileId],
    pub output_dir: PathBuf,
    /// Split header output for backends that distinguish; backends that do
    /// not may ignore it.
    pub header_output_dir: Option<PathBuf>,
}

/// One file of generated output.
pub struct GeneratedFile {
    /// Relative to the backend's output directory.
    pub path: PathBuf,
    pub content: String,
}

pub trait Backend {
    /// The option scope this backend reads (`package:rust = ...`).
    fn name(&self) -> &'static str;

    fn generate(&mut self, request: &CodegenRequest<'_>) -> Result<Vec<GeneratedFile>, String>;
}

/// Backend options parsed from a `--opt LANG:k1=v1;k2=v2` argument.
#[derive(Debug, Default)]
pub struct BackendOptions {
    values: HashMap<String, String>,
    used: bool,
}

impl BackendOptions {
    /// Parses `k1=v1;k2=v2`. A repeated key is an error.
    pub fn parse(&mut self, options: &str) -> Result<(), String> {
        for item in options.split(';') {
            let Some((key, value)) = item.split_once('=') else {
                return Err(format!("Malformed option '{}'", item));
            };
            if self
                .values
                .insert(key.to_owned(), value.to_owned())
                .is_some()
            {
                return Err(format!("Option key {} was already set.", key));
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set_used(&mut self) {
        self.used = true;
    }

    pub fn was_used(&self) -> bool {
        self.used
    }
}

/// An indentation-tracking emission buffer.
pub struct CodeBuffer {
    buf: String,
    depth: usize,
}

impl CodeBuffer {
    pub fn new() -> CodeBuffer {
        CodeBuffer {
            buf: String::new(),
            depth: 0,
        }
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn unindent(&mut self) {
        debug_assert!(self.depth > 0);
        self.depth -= 1;
    }

    /// Writes one line at the current indentation.
    pub fn line(&mut self, s: &str) {
        if !s.is_empty() {
            for _ in 0..self.depth {
                self.buf.push_str("    ");
            }
            self.buf.push_str(s);
        }
        self.buf.push('\n');
    }

    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

impl Default for CodeBuffer {
    fn default() -> CodeBuffer {
        CodeBuffer::new()
    }
}

/// Fields that appear on the wire: everything but `transient` and
/// `deprecated` fields and those the backend's `ignore` scope excludes.
pub fn writeable_fields<'p>(
    pool: &'p DescriptorPool,
    sid: StructId,
    scope: &str,
) -> Vec<&'p FieldDescriptor> {
    pool.struct_(sid)
        .fields
        .iter()
        .filter(|field| {
            !field.options.transient && !field.options.deprecated && !ignored(field, scope)
        })
        .collect()
}

/// Fields that carry a presence bit: everything non-collection.
pub fn presentable_fields<'p>(
    pool: &'p DescriptorPool,
    sid: StructId,
    scope: &str,
) -> Vec<&'p FieldDescriptor> {
    pool.struct_(sid)
        .fields
        .iter()
        .filter(|field| {
            !pool.type_(pool.unmodified(field.ty)).is_collection() && !ignored(field, scope)
        })
        .collect()
}

fn ignored(field: &FieldDescriptor, scope: &str) -> bool {
    coda::descriptor::scoped_option(&field.options.ignore, scope)
        .copied()
        .unwrap_or(false)
}

/// Whether a field's value type has mutable-view accessors (collections and
/// structs).
pub fn is_mutable_type(pool: &DescriptorPool, field: &FieldDescriptor) -> bool {
    matches!(
        pool.type_(pool.unmodified(field.ty)),
        Type::List { .. } | Type::Set { .. } | Type::Map { .. } | Type::Struct(_)
    )
}

/// Writes generated files below `dir`, creating directories as needed.
pub fn write_output(dir: &Path, files: &[GeneratedFile]) -> std::io::Result<()> {
    for file in files {
        let path = dir.join(&file.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        log::debug!("writing {}", path.display());
        std::fs::write(&path, &file.content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_options_parse() {
        let mut options = BackendOptions::default();
        options.parse("a=1;b=two").unwrap();
        assert_eq!(options.get("a"), Some("1"));
        assert_eq!(options.get("b"), Some("two"));
        assert!(options.parse("a=3").is_err());
        assert!(options.parse("malformed").is_err());
    }

    #[test]
    fn code_buffer_indents() {
        let mut buf = CodeBuffer::new();
        buf.line("fn main() {");
        buf.indent();
        buf.line("body();");
        buf.unindent();
        buf.line("}");
        assert_eq!(buf.finish(), "fn main() {\n    body();\n}\n");
    }
}
