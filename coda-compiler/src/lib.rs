//! The CODA schema compiler: IDL front end (lexer, parser, semantic
//! analyzer) and the code-generation framework with its Rust backend.
//!
//! The pipeline is: source text → [`parser::Parser`] (AST) →
//! [`analyzer::Analyzer`] (frozen [`coda::descriptor::DescriptorPool`] plus
//! [`coda::registry::TypeRegistry`]) → [`codegen`] backends. User errors
//! accumulate in an [`errors::ErrorReporter`]; the driver checks the count at
//! each phase boundary.

pub mod analyzer;
pub mod ast;
pub mod codegen;
pub mod driver;
pub mod errors;
pub mod lexer;
pub mod parser;
