//! In-process mock OxiDB server for integration tests.
//!
//! Speaks the real framing and envelope format over TCP. Keeps a small
//! in-memory document store, a blob store and one transaction buffer per
//! connection. A transaction records the version of every collection it
//! touches and fails to commit with a conflict if any of them changed.
//!
//! Extra commands understood only here:
//! - `echo`: returns the request's `tag` after `delay_ms` milliseconds
//! - `hangup`: closes the connection without replying
//! - `garbage`: replies with a frame that is not JSON

#![allow(dead_code)]

use oxidb_client::{Client, ConnectionConfig};
use oxidb_protocol::value::{decode_binary, encode_binary, from_wire, to_wire};
use oxidb_protocol::{read_frame, write_frame, Map, Response, Value};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "secret";
pub const CREATED_AT: &str = "2026-01-15T08:30:00Z";

#[derive(Default)]
struct Collection {
    docs: Vec<Value>,
    version: u64,
}

#[derive(Default)]
struct Store {
    collections: BTreeMap<String, Collection>,
    buckets: BTreeMap<String, BTreeMap<String, (Vec<u8>, Value)>>,
    next_id: u64,
    next_tx: u64,
    overrides: HashMap<String, Value>,
    requests: Vec<Value>,
}

enum TxOp {
    Insert(String, Value),
    Update(String, Value, Value),
    Delete(String, Value),
}

struct Tx {
    id: u64,
    ops: Vec<TxOp>,
    read_versions: HashMap<String, u64>,
}

pub struct MockServer {
    pub port: u16,
    store: Arc<Mutex<Store>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let store = Arc::new(Mutex::new(Store {
            next_id: 1,
            next_tx: 1,
            ..Default::default()
        }));

        let shared = store.clone();
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, shared.clone()));
            }
        });

        Self {
            port,
            store,
            handle,
        }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.port)
    }

    pub async fn client(&self) -> Client {
        Client::connect(self.config()).await.unwrap()
    }

    /// Makes every `cmd` request answer with `envelope` verbatim.
    pub fn override_response(&self, cmd: &str, envelope: Value) {
        self.store.lock().overrides.insert(cmd.to_string(), envelope);
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<Value> {
        self.store.lock().requests.clone()
    }

    /// Committed documents in `collection`.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.store
            .lock()
            .collections
            .get(collection)
            .map(|c| c.docs.clone())
            .unwrap_or_default()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut socket: TcpStream, store: Arc<Mutex<Store>>) {
    let mut tx: Option<Tx> = None;

    while let Ok(payload) = read_frame(&mut socket).await {
        let request: Value = match from_wire(&payload) {
            Ok(v) => v,
            Err(_) => return,
        };
        let cmd = request["cmd"].as_str().unwrap_or_default().to_string();

        match cmd.as_str() {
            "hangup" => return,
            "garbage" => {
                let _ = write_frame(&mut socket, b"<html>").await;
                continue;
            }
            "echo" => {
                let delay = request["delay_ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            _ => {}
        }

        let reply = {
            let mut store = store.lock();
            store.requests.push(request.clone());
            let overridden = store.overrides.get(&cmd).cloned();
            match overridden {
                Some(envelope) => envelope,
                None => {
                    let response = match handle(&mut store, &mut tx, &cmd, &request) {
                        Ok(data) => Response::ok(data),
                        Err(msg) => Response::error(msg),
                    };
                    serde_json::to_value(response).unwrap()
                }
            }
        };

        if write_frame(&mut socket, &to_wire(&reply).unwrap()).await.is_err() {
            return;
        }
    }
}

fn handle(
    store: &mut Store,
    tx: &mut Option<Tx>,
    cmd: &str,
    req: &Value,
) -> Result<Value, String> {
    let col = req["collection"].as_str().map(str::to_string);
    let need_col = || col.clone().ok_or_else(|| "missing 'collection'".to_string());
    let query = || req.get("query").cloned().unwrap_or_else(|| json!({}));

    match cmd {
        "ping" => Ok(json!("pong")),
        "echo" => Ok(req["tag"].clone()),

        "auth_simple" => {
            if req["username"] == USERNAME && req["password"] == PASSWORD {
                Ok(json!({"role": "admin", "done": true}))
            } else {
                Err("authentication failed".to_string())
            }
        }

        "create_collection" => {
            store.collections.entry(need_col()?).or_default();
            Ok(json!("collection created"))
        }
        "list_collections" => Ok(json!(store.collections.keys().collect::<Vec<_>>())),
        "drop_collection" => {
            store.collections.remove(&need_col()?);
            Ok(json!("collection dropped"))
        }

        "begin_tx" => {
            if tx.is_some() {
                return Err("transaction already active".to_string());
            }
            let id = store.next_tx;
            store.next_tx += 1;
            *tx = Some(Tx {
                id,
                ops: Vec::new(),
                read_versions: HashMap::new(),
            });
            Ok(json!({"tx_id": id}))
        }
        "commit_tx" => {
            let t = tx.take().ok_or_else(|| "no active transaction".to_string())?;
            for (name, seen) in &t.read_versions {
                let current = store.collections.get(name).map_or(0, |c| c.version);
                if current != *seen {
                    return Err(format!(
                        "transaction {} conflict: collection '{}' was modified",
                        t.id, name
                    ));
                }
            }
            for op in t.ops {
                match op {
                    TxOp::Insert(c, doc) => {
                        insert(store, &c, doc);
                    }
                    TxOp::Update(c, q, u) => {
                        update(store, &c, &q, &u, false)?;
                    }
                    TxOp::Delete(c, q) => {
                        delete(store, &c, &q, false);
                    }
                }
            }
            Ok(json!("committed"))
        }
        "rollback_tx" => {
            tx.take().ok_or_else(|| "no active transaction".to_string())?;
            Ok(json!("rolled back"))
        }

        "insert" => {
            let c = need_col()?;
            let doc = req.get("doc").cloned().ok_or("missing 'doc'")?;
            if let Some(t) = tx {
                touch(store, t, &c);
                t.ops.push(TxOp::Insert(c, doc));
                return Ok(json!("buffered"));
            }
            Ok(json!({"id": insert(store, &c, doc)}))
        }
        "insert_many" => {
            let c = need_col()?;
            let docs = req["docs"]
                .as_array()
                .cloned()
                .ok_or("missing or invalid 'docs' array")?;
            if let Some(t) = tx {
                touch(store, t, &c);
                t.ops.extend(docs.into_iter().map(|d| TxOp::Insert(c.clone(), d)));
                return Ok(json!("buffered"));
            }
            let ids: Vec<u64> = docs.into_iter().map(|d| insert(store, &c, d)).collect();
            Ok(json!(ids))
        }
        "find" => {
            let c = need_col()?;
            if let Some(t) = tx {
                touch(store, t, &c);
            }
            let mut docs = matching(store, &c, &query());
            if let Some(sort) = req["sort"].as_object() {
                if let Some((field, dir)) = sort.iter().next() {
                    docs.sort_by(|a, b| compare(&a[field], &b[field]));
                    if dir.as_i64() == Some(-1) {
                        docs.reverse();
                    }
                }
            }
            let skip = req["skip"].as_u64().unwrap_or(0) as usize;
            let limit = req["limit"].as_u64().map_or(usize::MAX, |n| n as usize);
            Ok(json!(docs.into_iter().skip(skip).take(limit).collect::<Vec<_>>()))
        }
        "find_one" => {
            let c = need_col()?;
            Ok(matching(store, &c, &query())
                .into_iter()
                .next()
                .unwrap_or(Value::Null))
        }
        "update" | "update_one" => {
            let c = need_col()?;
            let q = req.get("query").cloned().ok_or("missing 'query'")?;
            let u = req.get("update").cloned().ok_or("missing 'update'")?;
            if let Some(t) = tx {
                touch(store, t, &c);
                t.ops.push(TxOp::Update(c, q, u));
                return Ok(json!("buffered"));
            }
            let modified = update(store, &c, &q, &u, cmd == "update_one")?;
            Ok(json!({"modified": modified}))
        }
        "delete" | "delete_one" => {
            let c = need_col()?;
            let q = req.get("query").cloned().ok_or("missing 'query'")?;
            if let Some(t) = tx {
                touch(store, t, &c);
                t.ops.push(TxOp::Delete(c, q));
                return Ok(json!("buffered"));
            }
            Ok(json!({"deleted": delete(store, &c, &q, cmd == "delete_one")}))
        }
        "count" => {
            let c = need_col()?;
            Ok(json!({"count": matching(store, &c, &query()).len()}))
        }
        "create_index" | "create_unique_index" => {
            need_col()?;
            req["field"].as_str().ok_or("missing 'field'")?;
            Ok(json!("index created"))
        }
        "create_composite_index" => {
            need_col()?;
            let fields = req["fields"].as_array().ok_or("missing 'fields'")?;
            let names: Vec<&str> = fields.iter().filter_map(Value::as_str).collect();
            Ok(json!({"index": names.join("_")}))
        }
        "compact" => {
            let c = need_col()?;
            let kept = store.collections.get(&c).map_or(0, |c| c.docs.len());
            Ok(json!({"old_size": 4096, "new_size": 1024, "docs_kept": kept}))
        }
        "aggregate" => {
            let c = need_col()?;
            let pipeline = req["pipeline"].as_array().ok_or("missing 'pipeline'")?;
            let mut docs = store.collections.get(&c).map(|c| c.docs.clone()).unwrap_or_default();
            for stage in pipeline {
                if let Some(m) = stage.get("$match") {
                    docs.retain(|d| matches(d, m));
                } else if stage.get("$count").is_some() {
                    docs = vec![json!({"count": docs.len()})];
                }
            }
            Ok(json!(docs))
        }

        "create_bucket" => {
            let b = bucket(req)?;
            store.buckets.entry(b).or_default();
            Ok(json!("bucket created"))
        }
        "list_buckets" => Ok(json!(store.buckets.keys().collect::<Vec<_>>())),
        "delete_bucket" => {
            store
                .buckets
                .remove(&bucket(req)?)
                .ok_or("bucket not found")?;
            Ok(json!("bucket deleted"))
        }
        "put_object" => {
            let b = bucket(req)?;
            let key = req["key"].as_str().ok_or("missing 'key'")?.to_string();
            let data = decode_binary(req["data"].as_str().ok_or("missing 'data' (base64)")?)
                .map_err(|e| format!("invalid base64: {e}"))?;
            let content_type = req["content_type"]
                .as_str()
                .unwrap_or("application/octet-stream");
            let metadata = req
                .get("metadata")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            let objects = store
                .buckets
                .get_mut(&b)
                .ok_or_else(|| format!("bucket not found: {b}"))?;
            let meta = json!({
                "key": key,
                "bucket": b,
                "size": data.len(),
                "content_type": content_type,
                "etag": format!("{:08x}", etag(&data)),
                "created_at": CREATED_AT,
                "metadata": metadata,
            });
            objects.insert(key, (data, meta.clone()));
            Ok(meta)
        }
        "get_object" | "head_object" | "delete_object" => {
            let b = bucket(req)?;
            let key = req["key"].as_str().ok_or("missing 'key'")?;
            let objects = store
                .buckets
                .get_mut(&b)
                .ok_or_else(|| format!("bucket not found: {b}"))?;
            let not_found = || format!("object not found: {b}/{key}");
            match cmd {
                "get_object" => {
                    let (data, meta) = objects.get(key).ok_or_else(not_found)?;
                    Ok(json!({"content": encode_binary(data), "metadata": meta}))
                }
                "head_object" => Ok(objects.get(key).ok_or_else(not_found)?.1.clone()),
                _ => {
                    objects.remove(key).ok_or_else(not_found)?;
                    Ok(json!("object deleted"))
                }
            }
        }
        "list_objects" => {
            let b = bucket(req)?;
            let prefix = req["prefix"].as_str().unwrap_or("");
            let limit = req["limit"].as_u64().map_or(usize::MAX, |n| n as usize);
            let objects = store
                .buckets
                .get(&b)
                .ok_or_else(|| format!("bucket not found: {b}"))?;
            let metas: Vec<Value> = objects
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .take(limit)
                .map(|(_, (_, meta))| meta.clone())
                .collect();
            Ok(json!(metas))
        }
        "search" => {
            let needle = req["query"].as_str().ok_or("missing 'query'")?.to_lowercase();
            let only = req["bucket"].as_str();
            let limit = req["limit"].as_u64().unwrap_or(10) as usize;
            let mut hits = Vec::new();
            for (b, objects) in &store.buckets {
                if only.is_some_and(|o| o != b.as_str()) {
                    continue;
                }
                for (key, (data, _)) in objects {
                    let text = String::from_utf8_lossy(data).to_lowercase();
                    let score = text.matches(&needle).count();
                    if score > 0 {
                        hits.push(json!({"bucket": b, "key": key, "score": score as f64}));
                    }
                }
            }
            hits.truncate(limit);
            Ok(json!(hits))
        }

        other => Err(format!("unknown command: {other}")),
    }
}

fn bucket(req: &Value) -> Result<String, String> {
    req["bucket"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| "missing 'bucket'".to_string())
}

fn touch(store: &Store, tx: &mut Tx, collection: &str) {
    let version = store.collections.get(collection).map_or(0, |c| c.version);
    tx.read_versions
        .entry(collection.to_string())
        .or_insert(version);
}

fn insert(store: &mut Store, collection: &str, mut doc: Value) -> u64 {
    let id = store.next_id;
    store.next_id += 1;
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("_id".to_string(), json!(id));
    }
    let c = store.collections.entry(collection.to_string()).or_default();
    c.docs.push(doc);
    c.version += 1;
    id
}

fn update(
    store: &mut Store,
    collection: &str,
    query: &Value,
    update: &Value,
    first_only: bool,
) -> Result<u64, String> {
    let set = update
        .get("$set")
        .and_then(Value::as_object)
        .ok_or("unsupported update operator")?;
    let Some(c) = store.collections.get_mut(collection) else {
        return Ok(0);
    };
    let mut modified = 0;
    for doc in c.docs.iter_mut().filter(|d| matches(d, query)) {
        if let Some(obj) = doc.as_object_mut() {
            for (k, v) in set {
                obj.insert(k.clone(), v.clone());
            }
        }
        modified += 1;
        if first_only {
            break;
        }
    }
    if modified > 0 {
        c.version += 1;
    }
    Ok(modified)
}

fn delete(store: &mut Store, collection: &str, query: &Value, first_only: bool) -> u64 {
    let Some(c) = store.collections.get_mut(collection) else {
        return 0;
    };
    let before = c.docs.len();
    if first_only {
        if let Some(pos) = c.docs.iter().position(|d| matches(d, query)) {
            c.docs.remove(pos);
        }
    } else {
        c.docs.retain(|d| !matches(d, query));
    }
    let deleted = (before - c.docs.len()) as u64;
    if deleted > 0 {
        c.version += 1;
    }
    deleted
}

fn matching(store: &Store, collection: &str, query: &Value) -> Vec<Value> {
    store
        .collections
        .get(collection)
        .map(|c| c.docs.iter().filter(|d| matches(d, query)).cloned().collect())
        .unwrap_or_default()
}

/// Top-level field equality only.
fn matches(doc: &Value, query: &Value) -> bool {
    match query.as_object() {
        Some(fields) => fields.iter().all(|(k, v)| doc.get(k) == Some(v)),
        None => true,
    }
}

fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn etag(data: &[u8]) -> u32 {
    data.iter()
        .fold(0x811c_9dc5u32, |h, b| (h ^ u32::from(*b)).wrapping_mul(0x0100_0193))
}
