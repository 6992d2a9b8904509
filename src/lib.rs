//! hivesync: bidirectional project synchronization between a MSSQL ERP
//! and Supabase, plus table-level database cloning for dev/test use.
//!
//! The interesting machinery is schema-driven: table metadata is read from
//! the live catalog at runtime ([`catalog`]), payloads are reconciled
//! against it ([`mapper`], [`coerce`]) and the insert/copy workflows are
//! built on top ([`address`], [`project`], [`bulk_copy`]).

pub mod address;
pub mod bulk_copy;
pub mod catalog;
pub mod coerce;
pub mod config;
pub mod db_types;
pub mod error;
pub mod mapper;
pub mod mssql;
pub mod payload;
pub mod project;
pub mod push;
pub mod queue;
pub mod supabase;
