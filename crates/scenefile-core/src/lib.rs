//! Scenefile Core -- reading and writing a legacy chunk-based scene format.
//!
//! This crate turns an untrusted binary scene file into a typed object graph
//! held by a [`session::Session`], and flattens a graph back into a file.
//! Objects reference each other by integer ID only, so forward references
//! and cycles need no special handling beyond two-pass loading.
//!
//! # Load Pipeline
//!
//! A [`load::FileLoader`] advances one stage per call:
//!
//! 1. **Header** -- Signature and version checks.
//! 2. **Header-1** -- Checksum, decompression and the object directory.
//! 3. **Objects** -- Dependency checks and hooks, then:
//!    - pass A creates one runtime object per directory entry,
//!    - pass B freezes the file-ID to runtime-ID table,
//!    - pass C rewrites every chunk's ID list in place,
//!    - pass D runs the object pipeline over each chunk,
//!    - finalizers drop references that still dangle.
//! 4. **Completed** -- Summary and post-load hooks.
//!
//! # Key Types
//!
//! - [`chunk::Chunk`] -- DWORD payload plus ID, sub-chunk and manager lists.
//! - [`cursor::ChunkReader`] / [`cursor::ChunkWriter`] -- Identifier-tagged
//!   sections, sequences and sub-chunks over a chunk.
//! - [`registry::SchemaRegistry`] -- Versioned schema types, frozen after
//!   building, with class-ID and parameter-GUID lookup.
//! - [`class::ClassHierarchy`] -- The fixed legacy class tree.
//! - [`pipeline::ObjectPipeline`] -- Class-chain dispatch between chunks and
//!   [`state::ObjectState`].
//! - [`remap::LoadRemapTable`] / [`remap::SaveRemapPlan`] -- ID translation.
//! - [`save::FileSaver`] -- Collects objects and writes a file.

pub mod builtin;
pub mod chunk;
pub mod class;
pub mod compression;
pub mod cursor;
pub mod error;
pub mod format;
pub mod id;
pub mod load;
pub mod manager;
pub mod marshal;
pub mod math;
pub mod object;
#[cfg(feature = "parallel")]
pub mod parallel;
pub mod pipeline;
pub mod registry;
pub mod remap;
pub mod repository;
pub mod save;
pub mod schema;
pub mod session;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
