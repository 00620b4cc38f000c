//! Rust-backend output: structure of the generated module and output
//! placement.

use coda_compiler::analyzer::{Analysis, Analyzer};
use coda_compiler::codegen::{
    rust::RustBackend, write_output, Backend, BackendOptions, CodegenRequest,
};
use coda_compiler::errors::ErrorReporter;
use coda_compiler::parser::Parser;

const SCHEMA: &str = r#"
package store;

enum Status {
  OPEN = 1,
  CLOSED
}

struct Item = 1 {
  title : string = 1;
  count : i32 = 2;
  status : Status = 3;
  tags : list[string] = 4;
  flagged : bool = 5;

  struct Note {
    body : string = 1;
  }
}

struct Order (Item) = 2 {
  note : Item.Note = 1;
}
"#;

fn compile() -> Analysis {
    let mut reporter = ErrorReporter::new();
    let file = Parser::new(&mut reporter)
        .parse(SCHEMA, "store.coda")
        .expect("schema parses");
    let analysis = Analyzer::new(&mut reporter).run(&[file], &[]);
    assert_eq!(
        reporter.error_count(),
        0,
        "unexpected errors: {:?}",
        reporter.diagnostics()
    );
    analysis
}

fn generate(analysis: &Analysis, options: BackendOptions) -> Vec<coda_compiler::codegen::GeneratedFile> {
    let mut backend = RustBackend::new(options);
    let request = CodegenRequest {
        pool: &analysis.pool,
        registry: &analysis.registry,
        files: &analysis.files,
        output_dir: std::path::PathBuf::from("."),
        header_output_dir: None,
    };
    backend.generate(&request).unwrap()
}

#[test]
fn generated_module_covers_the_contract() {
    let analysis = compile();
    let generated = generate(&analysis, BackendOptions::default());
    assert_eq!(generated.len(), 1);
    assert_eq!(generated[0].path.to_str(), Some("store.rs"));
    let content = &generated[0].content;

    // Registration rebuilds the descriptor graph.
    assert!(content.contains("pub fn register(pool: &mut DescriptorPool, registry: &mut TypeRegistry) -> Schema {"));
    assert!(content.contains("registry.add_file(pool, file);"));
    assert!(content.contains("pool.struct_mut(order).type_id = Some(2);"));
    assert!(content.contains("pool.struct_mut(order).base_type = Some(item);"));
    assert!(content.contains("pool.struct_mut(item_note).enclosing = Some(item);"));

    // Enum mapping both ways.
    assert!(content.contains("pub enum Status {"));
    assert!(content.contains("Open = 1,"));
    assert!(content.contains("pub fn from_value(value: i32) -> Option<Self> {"));

    // Accessor families per the runtime contract.
    for needle in [
        "pub fn get_title(&self, schema: &Schema) -> String {",
        "pub fn set_title(&self, schema: &Schema, value: String) {",
        "pub fn has_title(&self, schema: &Schema) -> bool {",
        "pub fn clear_title(&self, schema: &Schema) {",
        "pub fn is_flagged(&self, schema: &Schema) -> bool {",
        "pub fn get_status(&self, schema: &Schema) -> Option<Status> {",
        "pub fn update_tags(&self, pool: &DescriptorPool, schema: &Schema, f: impl FnOnce(&mut Value)) {",
        "pub fn merge(&self, src: &Self) {",
        "pub fn freeze(&self, deep: bool) {",
        "pub fn hash_value(&self) -> u64 {",
    ] {
        assert!(content.contains(needle), "missing: {}", needle);
    }

    // The nested struct flattens with its path name.
    assert!(content.contains("pub struct ItemNote {"));
}

#[test]
fn single_option_concatenates_output() {
    let analysis = compile();
    let mut options = BackendOptions::default();
    options.parse("single=all.rs").unwrap();
    let generated = generate(&analysis, options);
    assert_eq!(generated.len(), 1);
    assert_eq!(generated[0].path.to_str(), Some("all.rs"));
}

#[test]
fn output_is_written_to_disk() {
    let analysis = compile();
    let generated = generate(&analysis, BackendOptions::default());
    let dir = tempfile::tempdir().unwrap();
    write_output(dir.path(), &generated).unwrap();
    let written = std::fs::read_to_string(dir.path().join("store.rs")).unwrap();
    assert_eq!(written, generated[0].content);
}
