//! JSON message types for OxiDB requests and responses.

use crate::error::ProtocolError;
use crate::value::{Map, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Command verbs understood by oxidb-server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Ping,

    // Collections
    CreateCollection,
    ListCollections,
    DropCollection,

    // Documents
    Insert,
    InsertMany,
    Find,
    FindOne,
    Update,
    UpdateOne,
    Delete,
    DeleteOne,
    Count,

    // Indexes
    CreateIndex,
    CreateUniqueIndex,
    CreateCompositeIndex,
    CreateTextIndex,
    ListIndexes,
    DropIndex,
    TextSearch,

    // Aggregation and maintenance
    Aggregate,
    Compact,
    Sql,

    // Transactions
    BeginTx,
    CommitTx,
    RollbackTx,

    // Blob storage
    CreateBucket,
    ListBuckets,
    DeleteBucket,
    PutObject,
    GetObject,
    HeadObject,
    DeleteObject,
    ListObjects,
    Search,

    // Session
    AuthSimple,
}

impl Command {
    /// Every command verb, in declaration order.
    pub const ALL: &'static [Command] = &[
        Command::Ping,
        Command::CreateCollection,
        Command::ListCollections,
        Command::DropCollection,
        Command::Insert,
        Command::InsertMany,
        Command::Find,
        Command::FindOne,
        Command::Update,
        Command::UpdateOne,
        Command::Delete,
        Command::DeleteOne,
        Command::Count,
        Command::CreateIndex,
        Command::CreateUniqueIndex,
        Command::CreateCompositeIndex,
        Command::CreateTextIndex,
        Command::ListIndexes,
        Command::DropIndex,
        Command::TextSearch,
        Command::Aggregate,
        Command::Compact,
        Command::Sql,
        Command::BeginTx,
        Command::CommitTx,
        Command::RollbackTx,
        Command::CreateBucket,
        Command::ListBuckets,
        Command::DeleteBucket,
        Command::PutObject,
        Command::GetObject,
        Command::HeadObject,
        Command::DeleteObject,
        Command::ListObjects,
        Command::Search,
        Command::AuthSimple,
    ];

    /// Returns the verb as sent in the `cmd` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::CreateCollection => "create_collection",
            Command::ListCollections => "list_collections",
            Command::DropCollection => "drop_collection",
            Command::Insert => "insert",
            Command::InsertMany => "insert_many",
            Command::Find => "find",
            Command::FindOne => "find_one",
            Command::Update => "update",
            Command::UpdateOne => "update_one",
            Command::Delete => "delete",
            Command::DeleteOne => "delete_one",
            Command::Count => "count",
            Command::CreateIndex => "create_index",
            Command::CreateUniqueIndex => "create_unique_index",
            Command::CreateCompositeIndex => "create_composite_index",
            Command::CreateTextIndex => "create_text_index",
            Command::ListIndexes => "list_indexes",
            Command::DropIndex => "drop_index",
            Command::TextSearch => "text_search",
            Command::Aggregate => "aggregate",
            Command::Compact => "compact",
            Command::Sql => "sql",
            Command::BeginTx => "begin_tx",
            Command::CommitTx => "commit_tx",
            Command::RollbackTx => "rollback_tx",
            Command::CreateBucket => "create_bucket",
            Command::ListBuckets => "list_buckets",
            Command::DeleteBucket => "delete_bucket",
            Command::PutObject => "put_object",
            Command::GetObject => "get_object",
            Command::HeadObject => "head_object",
            Command::DeleteObject => "delete_object",
            Command::ListObjects => "list_objects",
            Command::Search => "search",
            Command::AuthSimple => "auth_simple",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request message: a `cmd` verb plus operation-specific fields, flattened
/// into one JSON object.
///
/// Optional fields the caller did not supply are simply absent; they are
/// never serialized as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Operation to perform.
    pub cmd: Command,

    /// Operation-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Request {
    pub fn new(cmd: Command) -> Self {
        Self {
            cmd,
            fields: Map::new(),
        }
    }

    /// Adds a field. The `cmd` key is reserved and ignored here.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if key != "cmd" {
            self.fields.insert(key.to_string(), value.into());
        }
        self
    }

    /// Adds a field only when a value is present.
    pub fn with_opt<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    /// Returns a field by name.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Response envelope: `{"ok": true, "data": ...}` or `{"ok": false, "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Whether the command succeeded.
    pub ok: bool,

    /// Result payload. `None` for a bare acknowledgement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Human-readable failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            ok: true,
            data: Some(data.into()),
            error: None,
        }
    }

    /// A successful response without payload.
    pub fn ack() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn is_error(&self) -> bool {
        !self.ok
    }

    /// Decodes an envelope from frame payload text.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_value(crate::value::from_wire(payload)?)
    }

    /// Interprets a parsed JSON value as a response envelope.
    ///
    /// `ok` must be a boolean. A `null` `data` is treated the same as an
    /// absent one, and an `error` that is not a string is ignored.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut obj) = value else {
            return Err(ProtocolError::InvalidEnvelope(
                "expected a JSON object".to_string(),
            ));
        };

        let ok = obj.get("ok").and_then(Value::as_bool).ok_or_else(|| {
            ProtocolError::InvalidEnvelope("missing boolean 'ok'".to_string())
        })?;

        let data = obj.remove("data").filter(|v| !v.is_null());
        let error = match obj.remove("error") {
            Some(Value::String(msg)) => Some(msg),
            _ => None,
        };

        Ok(Self { ok, data, error })
    }
}

// ============================================================================
// Typed result shapes
// ============================================================================

/// Result for BEGIN_TX.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginTxResult {
    pub tx_id: u64,
}

/// Result for COUNT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountResult {
    pub count: u64,
}

/// Result for COMPACT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactResult {
    /// Collection file size before compaction, in bytes.
    pub old_size: u64,
    /// Collection file size after compaction, in bytes.
    pub new_size: u64,
    /// Number of live documents rewritten.
    pub docs_kept: u64,
}

/// Blob object metadata, as returned by PUT_OBJECT, HEAD_OBJECT and LIST_OBJECTS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: String,
    pub bucket: String,
    /// Content length in bytes.
    pub size: u64,
    pub content_type: String,
    /// Opaque content tag computed by the server.
    #[serde(default)]
    pub etag: String,
    pub created_at: DateTime<Utc>,
    /// User-supplied string metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Result for GET_OBJECT. `content` is still base64 here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetObjectResult {
    pub content: String,
    pub metadata: ObjectMeta,
}

/// One full-text search match over blob content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub bucket: String,
    pub key: String,
    pub score: f64,
}

/// Result for AUTH_SIMPLE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    #[serde(default)]
    pub role: Option<String>,
    pub done: bool,
}
