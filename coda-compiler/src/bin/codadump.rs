//! `codadump` — prints the contents of binary-encoded CODA files as text.
//!
//! The schema of the encoded data is supplied as IDL (`--schema`, compiled
//! in-process) together with the fully-qualified name of the top-level
//! struct (`--root`).

use std::io::Write;
use std::process;

use clap::Parser as ClapParser;

use coda::binary::BinaryDecoder;
use coda::text::TextEncoder;
use coda_compiler::analyzer::Analyzer;
use coda_compiler::driver::{parse_files, report_errors};
use coda_compiler::errors::ErrorReporter;

#[derive(ClapParser)]
#[command(
    name = "codadump",
    version,
    about = "Print contents of binary-encoded CODA files"
)]
struct Args {
    /// Input files.
    #[arg(required = true, value_name = "FILE")]
    input: Vec<String>,

    /// Number of initial bytes to skip.
    #[arg(short = 's', long = "skip", value_name = "NUM", default_value_t = 0)]
    skip: u64,

    /// Dump decoder trace information while reading the input stream.
    #[arg(long)]
    debug: bool,

    /// IDL files describing the encoded data.
    #[arg(long = "schema", required = true, value_name = "FILE")]
    schema: Vec<String>,

    /// Fully-qualified struct name of the top-level value.
    #[arg(long = "root", required = true, value_name = "NAME")]
    root: String,
}

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let args = Args::parse();
    let mut logger = env_logger::Builder::from_default_env();
    if args.debug {
        logger.filter_module("coda::binary", log::LevelFilter::Trace);
    }
    let _ = logger.try_init();

    let mut reporter = ErrorReporter::new();
    let parsed = match parse_files(&args.schema, &mut reporter) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("codadump: {}", e);
            return -1;
        }
    };
    if reporter.error_count() > 0 {
        report_errors(&reporter, &parsed.sources);
        return -1;
    }
    let analysis = Analyzer::new(&mut reporter).run(&parsed.asts, &parsed.imports);
    if reporter.error_count() > 0 {
        report_errors(&reporter, &parsed.sources);
        return -1;
    }

    let Some(root) = analysis.pool.find_struct(&args.root) else {
        eprintln!("codadump: Unknown struct '{}'", args.root);
        return -1;
    };

    for path in &args.input {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(_) => {
                eprintln!("Error: file '{}' not found.", path);
                return -1;
            }
        };
        let skip = (args.skip as usize).min(bytes.len());
        let mut decoder = BinaryDecoder::new(&analysis.pool, &analysis.registry, &bytes[skip..]);
        let value = match decoder.decode(root) {
            Ok(value) => value,
            Err(e) => {
                eprintln!("codadump: {}: {}", path, e);
                return -1;
            }
        };

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if let Err(e) = TextEncoder::new(&analysis.pool, &mut out).encode(&value) {
            eprintln!("codadump: {}", e);
            return 2;
        }
        let _ = writeln!(out);
    }
    0
}
