#![doc(html_root_url = "https://docs.rs/coda/0.1.0")]

//! CODA is an interface-description system: a schema language describing
//! structured records, and a pair of wire codecs — a compact binary encoding
//! and a human-readable text encoding — that serialize instances of those
//! schemas with support for inheritance, shared references and
//! forward-compatible extensions.
//!
//! This crate is the runtime: the reflective descriptor graph
//! ([`descriptor::DescriptorPool`]), the object model ([`object::ObjectRef`]),
//! the subtype/extension registry ([`registry::TypeRegistry`]) and the two
//! codecs ([`binary`], [`text`]). The schema compiler and code generators
//! live in the companion `coda-compiler` crate.

pub mod binary;
pub mod descriptor;
pub mod encoding;
mod error;
pub mod object;
pub mod registry;
pub mod testing;
pub mod text;
pub mod types;

pub use crate::error::{DecodeError, DecodePos, EncodeError};
