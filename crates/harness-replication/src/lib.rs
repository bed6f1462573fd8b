//! Change-journal capture via logical replication (spec.md §4.5). A single
//! global slot is decoded by one background worker and fanned out to
//! whichever run owns the schema a change belongs to.

pub mod decode;
pub mod registry;
pub mod worker;

pub use decode::{decode_wal2json, DecodedChange};
pub use registry::InMemoryReplicationRegistry;
pub use worker::ReplicationWorker;
