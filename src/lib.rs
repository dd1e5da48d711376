//! casevault-core
//!
//! Disk-image traversal and cataloguing engine for forensic cases. An ingest
//! walks image → volume system → volumes → file systems → directories →
//! files → attributes, persists every level into a relational case database,
//! and sweeps unallocated space into virtual files — all inside one
//! savepoint that either commits or reverts as a unit.
//!
//! On-disk decoders are external: the engine consumes them through the
//! capability traits in [`readers`]. The bundled [`readers::raw`] resolver
//! handles plain and split raw images; [`readers::memory`] scripts whole
//! layouts for tests.

pub mod case;
pub mod domain;
pub mod infrastructure;
pub mod ingest;
pub mod known;
pub mod readers;
pub mod shared;

pub use case::{Case, CaseError, CaseLocation};
pub use ingest::{IngestDriver, IngestOptions, IngestStatus};
