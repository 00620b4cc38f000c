//! `codagen` — compiler and code generator for CODA.
//!
//! Exit codes: 0 on success, -1 for user errors (missing or invalid output,
//! unknown file, analysis errors), 2 for internal failures.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;

use coda_compiler::analyzer::Analyzer;
use coda_compiler::codegen::{
    rust::RustBackend, write_output, Backend, BackendOptions, CodegenRequest,
};
use coda_compiler::driver::{parse_files, report_errors};
use coda_compiler::errors::ErrorReporter;

#[derive(ClapParser)]
#[command(
    name = "codagen",
    version,
    about = "Compiler and code generator for CODA interface definitions"
)]
struct Args {
    /// Input IDL files.
    #[arg(required = true, value_name = "FILE")]
    inputs: Vec<String>,

    /// Output directory for language LANG.
    #[arg(short = 'o', long = "out", value_name = "LANG:DIR")]
    out: Vec<String>,

    /// Header output directory for language LANG.
    #[arg(long = "headerout", value_name = "LANG:DIR")]
    headerout: Vec<String>,

    /// Backend options for language LANG; OPT is `k1=v1;k2=v2`.
    #[arg(long = "opt", value_name = "LANG:OPT")]
    opt: Vec<String>,

    /// Print additional status information.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let args = Args::parse();
    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    let _ = logger.try_init();

    if args.out.is_empty() {
        eprintln!("codagen: No output specified.");
        return -1;
    }

    // Parsing phase.
    let mut reporter = ErrorReporter::new();
    let parsed = match parse_files(&args.inputs, &mut reporter) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("codagen: {}", e);
            return -1;
        }
    };
    if reporter.error_count() > 0 {
        report_errors(&reporter, &parsed.sources);
        return -1;
    }

    // Analysis phase.
    let analysis = Analyzer::new(&mut reporter).run(&parsed.asts, &parsed.imports);
    if reporter.error_count() > 0 {
        report_errors(&reporter, &parsed.sources);
        return -1;
    }

    // Code generation phase.
    let mut backend_options: HashMap<String, BackendOptions> = HashMap::new();
    for opt in &args.opt {
        let Some((lang, value)) = opt.split_once(':') else {
            eprintln!("codagen: Invalid option specification: {}", opt);
            return -1;
        };
        if let Err(e) = backend_options.entry(lang.to_owned()).or_default().parse(value) {
            eprintln!("codagen: {}", e);
            return 2;
        }
    }
    let mut header_dirs: HashMap<String, PathBuf> = HashMap::new();
    for spec in &args.headerout {
        let Some((lang, dir)) = spec.split_once(':') else {
            eprintln!("codagen: Invalid output specification: {}", spec);
            return -1;
        };
        header_dirs.insert(lang.to_owned(), PathBuf::from(dir));
    }

    for spec in &args.out {
        let Some((lang, dir)) = spec.split_once(':') else {
            eprintln!("codagen: Invalid output specification: {}", spec);
            return -1;
        };
        let dir = PathBuf::from(dir);
        if !dir.is_dir() {
            eprintln!("codagen: Not a directory: {}", dir.display());
            return -1;
        }

        let options = backend_options.remove(lang).unwrap_or_default();
        let mut backend = match lang {
            "rust" => RustBackend::new(options),
            _ => {
                eprintln!("codagen: Unknown backend '{}'", lang);
                return -1;
            }
        };
        let request = CodegenRequest {
            pool: &analysis.pool,
            registry: &analysis.registry,
            files: &analysis.files,
            output_dir: dir.clone(),
            header_output_dir: header_dirs.get(lang).cloned(),
        };
        let generated = match backend.generate(&request) {
            Ok(generated) => generated,
            Err(e) => {
                eprintln!("codagen: {}", e);
                return 2;
            }
        };
        if let Err(e) = write_output(&dir, &generated) {
            eprintln!("codagen: {}", e);
            return 2;
        }
    }

    // A `--opt` for a backend that never ran is a usage bug worth failing
    // loudly on.
    for lang in backend_options.keys() {
        eprintln!("codagen: Unused options: {}", lang);
        return 2;
    }
    0
}
