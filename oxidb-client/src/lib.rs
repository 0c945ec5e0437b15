//! # oxidb-client
//!
//! Client library for OxiDB.
//!
//! This crate provides:
//! - One persistent TCP (optionally TLS) connection per client, with strictly
//!   serialized request/response cycles
//! - Classification of server errors, with optimistic-concurrency conflicts
//!   kept apart from ordinary failures
//! - Transaction control, including a scoped helper that rolls back on error
//! - A typed API over collections, documents, indexes, aggregation and blob storage
//! - Configuration from YAML files and `OXIDB_*` environment variables

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod stream;
pub mod tls;
pub mod transaction;

pub use client::{Client, FindOptions, PutObjectOptions, StoredObject};
pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, ConnectionConfig, Credentials, TlsClientConfig};
pub use error::ClientError;
pub use transaction::TransactionState;

pub use oxidb_protocol::{AuthResult, BeginTxResult, CompactResult, ObjectMeta, SearchHit, Value};
