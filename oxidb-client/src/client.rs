//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use oxidb_protocol::value::{decode_binary, encode_binary};
use oxidb_protocol::{
    AuthResult, Command, CompactResult, CountResult, GetObjectResult, Map, ObjectMeta, Request,
    SearchHit, Value, DEFAULT_CONTENT_TYPE,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Result limit sent with `search` when the caller gives none.
pub const DEFAULT_SEARCH_LIMIT: u64 = 10;

/// High-level client for OxiDB.
///
/// Cloning is cheap; clones share one connection and therefore one
/// transaction.
#[derive(Clone)]
pub struct Client {
    conn: Arc<Connection>,
}

/// Optional modifiers for [`Client::find`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort specification, e.g. `{"age": -1}`.
    pub sort: Option<Value>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Optional attributes for [`Client::put_object`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutObjectOptions {
    /// Defaults to `application/octet-stream`.
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl PutObjectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A blob fetched with [`Client::get_object`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub metadata: ObjectMeta,
}

impl Client {
    /// Opens a connection and wraps it in a client.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        Ok(Self::from_connection(Connection::open(config).await?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(conn),
        }
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns whether the connection can still carry requests.
    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    /// Closes the connection for every clone of this client.
    pub async fn close(&self) {
        self.conn.close().await
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    /// Dispatches a request and classifies a failed envelope.
    pub(crate) async fn call(&self, request: Request) -> Result<Option<Value>, ClientError> {
        tracing::debug!(cmd = %request.cmd, "request");
        let response = self.conn.request(&request).await?;
        if response.is_error() {
            return Err(ClientError::from_response(response));
        }
        Ok(response.data)
    }

    async fn call_value(&self, request: Request) -> Result<Value, ClientError> {
        Ok(self.call(request).await?.unwrap_or(Value::Null))
    }

    pub(crate) async fn call_as<T: DeserializeOwned>(
        &self,
        request: Request,
    ) -> Result<T, ClientError> {
        let cmd = request.cmd;
        let data = self.call_value(request).await?;
        serde_json::from_value(data)
            .map_err(|e| ClientError::UnexpectedResponse(format!("{}: {}", cmd, e)))
    }

    fn collection_request(cmd: Command, collection: &str) -> Request {
        Request::new(cmd).with("collection", collection)
    }

    // =========================================================================
    // System operations
    // =========================================================================

    /// Pings the server. Returns `"pong"`.
    pub async fn ping(&self) -> Result<String, ClientError> {
        self.call_as(Request::new(Command::Ping)).await
    }

    /// Authenticates the session with a username and password.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthResult, ClientError> {
        let request = Request::new(Command::AuthSimple)
            .with("username", username)
            .with("password", password);
        self.call_as(request).await
    }

    /// Sends an arbitrary request object and returns the `data` payload.
    ///
    /// The object must carry a string `cmd`; it is otherwise sent unchanged.
    pub async fn raw(&self, request: Value) -> Result<Value, ClientError> {
        let cmd = match request.get("cmd") {
            Some(Value::String(cmd)) => cmd.clone(),
            _ => {
                return Err(ClientError::InvalidRequest(
                    "request must be an object with a string 'cmd'".to_string(),
                ))
            }
        };

        tracing::debug!(%cmd, "raw request");
        let response = self.conn.request(&request).await?;
        if response.is_error() {
            return Err(ClientError::from_response(response));
        }
        Ok(response.data.unwrap_or(Value::Null))
    }

    // =========================================================================
    // Collections
    // =========================================================================

    pub async fn create_collection(&self, name: &str) -> Result<Value, ClientError> {
        self.call_value(Self::collection_request(Command::CreateCollection, name))
            .await
    }

    pub async fn list_collections(&self) -> Result<Vec<String>, ClientError> {
        self.call_as(Request::new(Command::ListCollections)).await
    }

    pub async fn drop_collection(&self, name: &str) -> Result<Value, ClientError> {
        self.call_value(Self::collection_request(Command::DropCollection, name))
            .await
    }

    /// Compacts a collection's storage file.
    pub async fn compact(&self, collection: &str) -> Result<CompactResult, ClientError> {
        self.call_as(Self::collection_request(Command::Compact, collection))
            .await
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Inserts one document.
    ///
    /// Returns `{"id": n}`, or `"buffered"` while a transaction is active.
    pub async fn insert(&self, collection: &str, doc: Value) -> Result<Value, ClientError> {
        let request = Self::collection_request(Command::Insert, collection).with("doc", doc);
        self.call_value(request).await
    }

    pub async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Value>,
    ) -> Result<Value, ClientError> {
        let request = Self::collection_request(Command::InsertMany, collection).with("docs", docs);
        self.call_value(request).await
    }

    /// Finds documents matching `query`. A `null` query matches everything.
    pub async fn find(
        &self,
        collection: &str,
        query: Value,
        options: FindOptions,
    ) -> Result<Vec<Value>, ClientError> {
        let request = Self::collection_request(Command::Find, collection)
            .with("query", or_empty(query))
            .with_opt("sort", options.sort)
            .with_opt("skip", options.skip)
            .with_opt("limit", options.limit);
        self.call_as(request).await
    }

    /// Finds the first document matching `query`, if any.
    pub async fn find_one(
        &self,
        collection: &str,
        query: Value,
    ) -> Result<Option<Value>, ClientError> {
        let request =
            Self::collection_request(Command::FindOne, collection).with("query", or_empty(query));
        self.call(request).await
    }

    /// Applies `update` to every document matching `query`.
    pub async fn update(
        &self,
        collection: &str,
        query: Value,
        update: Value,
    ) -> Result<Value, ClientError> {
        self.call_value(Self::update_request(Command::Update, collection, query, update))
            .await
    }

    /// Applies `update` to the first document matching `query`.
    pub async fn update_one(
        &self,
        collection: &str,
        query: Value,
        update: Value,
    ) -> Result<Value, ClientError> {
        self.call_value(Self::update_request(Command::UpdateOne, collection, query, update))
            .await
    }

    fn update_request(cmd: Command, collection: &str, query: Value, update: Value) -> Request {
        Self::collection_request(cmd, collection)
            .with("query", query)
            .with("update", update)
    }

    pub async fn delete(&self, collection: &str, query: Value) -> Result<Value, ClientError> {
        let request = Self::collection_request(Command::Delete, collection).with("query", query);
        self.call_value(request).await
    }

    pub async fn delete_one(&self, collection: &str, query: Value) -> Result<Value, ClientError> {
        let request = Self::collection_request(Command::DeleteOne, collection).with("query", query);
        self.call_value(request).await
    }

    /// Counts documents matching `query`.
    pub async fn count(&self, collection: &str, query: Value) -> Result<u64, ClientError> {
        let request =
            Self::collection_request(Command::Count, collection).with("query", or_empty(query));
        let result: CountResult = self.call_as(request).await?;
        Ok(result.count)
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    pub async fn create_index(&self, collection: &str, field: &str) -> Result<Value, ClientError> {
        let request =
            Self::collection_request(Command::CreateIndex, collection).with("field", field);
        self.call_value(request).await
    }

    pub async fn create_unique_index(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<Value, ClientError> {
        let request =
            Self::collection_request(Command::CreateUniqueIndex, collection).with("field", field);
        self.call_value(request).await
    }

    /// Creates an index over several fields. Returns `{"index": name}`.
    pub async fn create_composite_index(
        &self,
        collection: &str,
        fields: &[&str],
    ) -> Result<Value, ClientError> {
        let request = Self::collection_request(Command::CreateCompositeIndex, collection)
            .with("fields", fields.to_vec());
        self.call_value(request).await
    }

    pub async fn create_text_index(
        &self,
        collection: &str,
        fields: &[&str],
    ) -> Result<Value, ClientError> {
        let request = Self::collection_request(Command::CreateTextIndex, collection)
            .with("fields", fields.to_vec());
        self.call_value(request).await
    }

    pub async fn list_indexes(&self, collection: &str) -> Result<Vec<Value>, ClientError> {
        self.call_as(Self::collection_request(Command::ListIndexes, collection))
            .await
    }

    pub async fn drop_index(&self, collection: &str, index: &str) -> Result<Value, ClientError> {
        let request = Self::collection_request(Command::DropIndex, collection).with("index", index);
        self.call_value(request).await
    }

    /// Full-text search over a collection's text index.
    pub async fn text_search(
        &self,
        collection: &str,
        query: &str,
        limit: u64,
    ) -> Result<Vec<Value>, ClientError> {
        let request = Self::collection_request(Command::TextSearch, collection)
            .with("query", query)
            .with("limit", limit);
        self.call_as(request).await
    }

    // =========================================================================
    // Aggregation and SQL
    // =========================================================================

    /// Runs an aggregation pipeline. Stages are passed through unchanged.
    pub async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Value>,
    ) -> Result<Vec<Value>, ClientError> {
        let request =
            Self::collection_request(Command::Aggregate, collection).with("pipeline", pipeline);
        self.call_as(request).await
    }

    pub async fn sql(&self, query: &str) -> Result<Value, ClientError> {
        self.call_value(Request::new(Command::Sql).with("query", query))
            .await
    }

    // =========================================================================
    // Blob storage
    // =========================================================================

    pub async fn create_bucket(&self, bucket: &str) -> Result<Value, ClientError> {
        self.call_value(Request::new(Command::CreateBucket).with("bucket", bucket))
            .await
    }

    pub async fn list_buckets(&self) -> Result<Vec<String>, ClientError> {
        self.call_as(Request::new(Command::ListBuckets)).await
    }

    pub async fn delete_bucket(&self, bucket: &str) -> Result<Value, ClientError> {
        self.call_value(Request::new(Command::DeleteBucket).with("bucket", bucket))
            .await
    }

    /// Stores `data` under `bucket/key`, replacing any existing object.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        options: PutObjectOptions,
    ) -> Result<ObjectMeta, ClientError> {
        let content_type = options
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let mut request = Request::new(Command::PutObject)
            .with("bucket", bucket)
            .with("key", key)
            .with("data", encode_binary(data))
            .with("content_type", content_type);
        if !options.metadata.is_empty() {
            let metadata: Map<String, Value> = options
                .metadata
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            request = request.with("metadata", metadata);
        }

        self.call_as(request).await
    }

    /// Fetches an object's content and metadata.
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, ClientError> {
        let result: GetObjectResult = self
            .call_as(Self::object_request(Command::GetObject, bucket, key))
            .await?;
        let content = decode_binary(&result.content)
            .map_err(|e| ClientError::UnexpectedResponse(format!("get_object: {}", e)))?;

        Ok(StoredObject {
            content,
            metadata: result.metadata,
        })
    }

    /// Fetches an object's metadata without its content.
    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, ClientError> {
        self.call_as(Self::object_request(Command::HeadObject, bucket, key))
            .await
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<Value, ClientError> {
        self.call_value(Self::object_request(Command::DeleteObject, bucket, key))
            .await
    }

    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<ObjectMeta>, ClientError> {
        let request = Request::new(Command::ListObjects)
            .with("bucket", bucket)
            .with_opt("prefix", prefix)
            .with_opt("limit", limit);
        self.call_as(request).await
    }

    /// Full-text search over blob content, optionally within one bucket.
    pub async fn search(
        &self,
        query: &str,
        bucket: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<SearchHit>, ClientError> {
        let request = Request::new(Command::Search)
            .with("query", query)
            .with_opt("bucket", bucket)
            .with("limit", limit.unwrap_or(DEFAULT_SEARCH_LIMIT));
        self.call_as(request).await
    }

    fn object_request(cmd: Command, bucket: &str, key: &str) -> Request {
        Request::new(cmd).with("bucket", bucket).with("key", key)
    }
}

fn or_empty(query: Value) -> Value {
    if query.is_null() {
        json!({})
    } else {
        query
    }
}
