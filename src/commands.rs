//! Command execution.

use crate::Commands;
use colored::Colorize;
use oxidb_client::{Client, ClientError, FindOptions, ObjectMeta, PutObjectOptions, SearchHit};
use serde_json::Value;
use std::io::Write;

/// Executes a command and returns the formatted output.
///
/// With `json` set, results are printed as compact JSON instead of the
/// human-readable summaries.
pub async fn execute(
    client: &Client,
    cmd: Commands,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl => unreachable!(),

        Commands::Ping => {
            let reply = client.ping().await?;
            if json {
                Ok(Value::String(reply).to_string())
            } else {
                Ok(reply.to_uppercase().green().to_string())
            }
        }

        Commands::Collections => {
            let names = client.list_collections().await?;
            if json {
                return Ok(serde_json::to_string(&names)?);
            }
            if names.is_empty() {
                return Ok("No collections".yellow().to_string());
            }
            Ok(format_list(&names))
        }

        Commands::CreateCollection { name } => {
            let result = client.create_collection(&name).await?;
            Ok(status(&result, json, "Created", "collection", &name))
        }

        Commands::DropCollection { name } => {
            let result = client.drop_collection(&name).await?;
            Ok(status(&result, json, "Dropped", "collection", &name))
        }

        Commands::Insert { collection, doc } => {
            let result = match parse_json_arg(&doc)? {
                Value::Array(docs) => client.insert_many(&collection, docs).await?,
                doc => client.insert(&collection, doc).await?,
            };
            Ok(render(&result, json))
        }

        Commands::Find {
            collection,
            query,
            sort,
            skip,
            limit,
        } => {
            let mut options = FindOptions::new();
            if let Some(sort) = sort {
                options = options.sort(parse_json_arg(&sort)?);
            }
            if let Some(skip) = skip {
                options = options.skip(skip);
            }
            if let Some(limit) = limit {
                options = options.limit(limit);
            }

            let docs = client
                .find(&collection, parse_query(query.as_deref())?, options)
                .await?;
            if json {
                return Ok(serde_json::to_string(&docs)?);
            }
            if docs.is_empty() {
                return Ok("No documents".yellow().to_string());
            }
            let mut output = String::new();
            for doc in &docs {
                output.push_str(&format_json(doc));
                output.push('\n');
            }
            output.push_str(&format!("{} document(s)", docs.len()).dimmed().to_string());
            Ok(output)
        }

        Commands::FindOne { collection, query } => {
            match client
                .find_one(&collection, parse_query(query.as_deref())?)
                .await?
            {
                Some(doc) => Ok(render(&doc, json)),
                None if json => Ok("null".to_string()),
                None => Ok("No document".yellow().to_string()),
            }
        }

        Commands::Update {
            collection,
            query,
            update,
            one,
        } => {
            let query = parse_json_arg(&query)?;
            let update = parse_json_arg(&update)?;
            let result = if one {
                client.update_one(&collection, query, update).await?
            } else {
                client.update(&collection, query, update).await?
            };
            Ok(render(&result, json))
        }

        Commands::Delete {
            collection,
            query,
            one,
        } => {
            let query = parse_json_arg(&query)?;
            let result = if one {
                client.delete_one(&collection, query).await?
            } else {
                client.delete(&collection, query).await?
            };
            Ok(render(&result, json))
        }

        Commands::Count { collection, query } => {
            let count = client
                .count(&collection, parse_query(query.as_deref())?)
                .await?;
            Ok(count.to_string())
        }

        Commands::CreateIndex {
            collection,
            fields,
            unique,
            text,
        } => {
            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
            let kind = IndexKind::select(fields.len(), unique, text)?;
            let result = create_index(client, &collection, &fields, kind).await?;
            Ok(render(&result, json))
        }

        Commands::Indexes { collection } => {
            let indexes = client.list_indexes(&collection).await?;
            if json {
                return Ok(serde_json::to_string(&indexes)?);
            }
            if indexes.is_empty() {
                return Ok("No indexes".yellow().to_string());
            }
            Ok(format_json(&Value::Array(indexes)))
        }

        Commands::DropIndex { collection, index } => {
            let result = client.drop_index(&collection, &index).await?;
            Ok(status(&result, json, "Dropped", "index", &index))
        }

        Commands::Aggregate {
            collection,
            pipeline,
        } => {
            let stages = match parse_json_arg(&pipeline)? {
                Value::Array(stages) => stages,
                _ => return Err("pipeline must be a JSON array".into()),
            };
            let result = client.aggregate(&collection, stages).await?;
            Ok(render(&Value::Array(result), json))
        }

        Commands::Compact { collection } => {
            let result = client.compact(&collection).await?;
            if json {
                return Ok(serde_json::to_string(&result)?);
            }
            Ok(format!(
                "{} {}\n  Size: {} -> {}\n  Documents kept: {}",
                "Compacted".green(),
                collection.cyan(),
                format_bytes(result.old_size),
                format_bytes(result.new_size),
                result.docs_kept
            ))
        }

        Commands::Buckets => {
            let names = client.list_buckets().await?;
            if json {
                return Ok(serde_json::to_string(&names)?);
            }
            if names.is_empty() {
                return Ok("No buckets".yellow().to_string());
            }
            Ok(format_list(&names))
        }

        Commands::CreateBucket { bucket } => {
            let result = client.create_bucket(&bucket).await?;
            Ok(status(&result, json, "Created", "bucket", &bucket))
        }

        Commands::DeleteBucket { bucket } => {
            let result = client.delete_bucket(&bucket).await?;
            Ok(status(&result, json, "Deleted", "bucket", &bucket))
        }

        Commands::PutObject {
            bucket,
            key,
            file,
            content_type,
            metadata,
        } => {
            let data = std::fs::read(&file)?;
            let mut options = PutObjectOptions::new();
            if let Some(content_type) = content_type {
                options = options.content_type(content_type);
            }
            for entry in &metadata {
                let (k, v) = parse_metadata(entry)?;
                options = options.metadata(k, v);
            }

            let meta = client.put_object(&bucket, &key, &data, options).await?;
            if json {
                return Ok(serde_json::to_string(&meta)?);
            }
            Ok(format!("{} {}", "Stored".green(), format_object(&meta)))
        }

        Commands::GetObject {
            bucket,
            key,
            output,
        } => {
            let object = client.get_object(&bucket, &key).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &object.content)?;
                    Ok(format!(
                        "{} {} to {}",
                        "Wrote".green(),
                        format_bytes(object.content.len() as u64),
                        path.display()
                    ))
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&object.content)?;
                    stdout.flush()?;
                    Ok(String::new())
                }
            }
        }

        Commands::HeadObject { bucket, key } => {
            let meta = client.head_object(&bucket, &key).await?;
            if json {
                return Ok(serde_json::to_string(&meta)?);
            }
            Ok(format_object_details(&meta))
        }

        Commands::DeleteObject { bucket, key } => {
            let result = client.delete_object(&bucket, &key).await?;
            Ok(status(&result, json, "Deleted", "object", &key))
        }

        Commands::ListObjects {
            bucket,
            prefix,
            limit,
        } => {
            let objects = client
                .list_objects(&bucket, prefix.as_deref(), limit)
                .await?;
            if json {
                return Ok(serde_json::to_string(&objects)?);
            }
            if objects.is_empty() {
                return Ok("No objects".yellow().to_string());
            }
            let mut output = String::new();
            for meta in &objects {
                output.push_str(&format!("  {}\n", format_object(meta)));
            }
            Ok(output)
        }

        Commands::Search {
            query,
            bucket,
            limit,
        } => {
            let hits = client.search(&query, bucket.as_deref(), limit).await?;
            if json {
                return Ok(serde_json::to_string(&hits)?);
            }
            if hits.is_empty() {
                return Ok("No matches".yellow().to_string());
            }
            Ok(format_hits(&hits))
        }

        Commands::Sql { query } => {
            let result = client.sql(&query).await?;
            Ok(render(&result, json))
        }

        Commands::Raw { request } => {
            let result = client.raw(parse_json_arg(&request)?).await?;
            Ok(render(&result, json))
        }
    }
}

/// Parses an optional query argument; a missing query matches everything.
pub(crate) fn parse_query(arg: Option<&str>) -> Result<Value, Box<dyn std::error::Error>> {
    match arg {
        Some(arg) => parse_json_arg(arg),
        None => Ok(Value::Null),
    }
}

/// Parses a JSON argument (either inline JSON or @file.json).
pub(crate) fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Splits a `key=value` metadata argument.
pub(crate) fn parse_metadata(entry: &str) -> Result<(String, String), Box<dyn std::error::Error>> {
    match entry.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("invalid metadata '{}', expected key=value", entry).into()),
    }
}

/// The index request issued for a field list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexKind {
    Single,
    Unique,
    Composite,
    Text,
}

impl IndexKind {
    /// Picks the kind from the number of fields and the unique/text switches.
    /// A text index may span several fields; a unique index takes one.
    pub(crate) fn select(fields: usize, unique: bool, text: bool) -> Result<Self, String> {
        match (fields, unique, text) {
            (0, _, _) => Err("at least one field is required".to_string()),
            (_, true, true) => Err("an index cannot be both unique and text".to_string()),
            (_, false, true) => Ok(IndexKind::Text),
            (1, true, false) => Ok(IndexKind::Unique),
            (1, false, false) => Ok(IndexKind::Single),
            (_, true, false) => Err("a unique index takes exactly one field".to_string()),
            (_, false, false) => Ok(IndexKind::Composite),
        }
    }
}

pub(crate) async fn create_index(
    client: &Client,
    collection: &str,
    fields: &[&str],
    kind: IndexKind,
) -> Result<Value, ClientError> {
    match (kind, fields) {
        (IndexKind::Unique, [field, ..]) => client.create_unique_index(collection, field).await,
        (IndexKind::Single, [field, ..]) => client.create_index(collection, field).await,
        (IndexKind::Text, _) => client.create_text_index(collection, fields).await,
        _ => client.create_composite_index(collection, fields).await,
    }
}

/// Renders a status-style result: a confirmation line naming the target, or
/// the server's result as compact JSON.
fn status(result: &Value, json: bool, verb: &str, kind: &str, name: &str) -> String {
    if json {
        return result.to_string();
    }
    format!("{} {} {}", verb.green(), kind, name.cyan())
}

/// Renders a result as compact or pretty JSON.
pub(crate) fn render(value: &Value, json: bool) -> String {
    if json {
        value.to_string()
    } else {
        format_json(value)
    }
}

pub(crate) fn format_list(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("  {}", name.cyan()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn format_object(meta: &ObjectMeta) -> String {
    format!(
        "{}/{} ({}, {})",
        meta.bucket,
        meta.key.cyan(),
        format_bytes(meta.size),
        meta.content_type
    )
}

fn format_object_details(meta: &ObjectMeta) -> String {
    let mut output = format!(
        "{}\n  Size: {}\n  Content type: {}\n  ETag: {}\n  Created: {}",
        format!("Object {}/{}", meta.bucket, meta.key.cyan()).bold(),
        format_bytes(meta.size),
        meta.content_type,
        meta.etag,
        meta.created_at.to_rfc3339()
    );
    let mut entries: Vec<_> = meta.metadata.iter().collect();
    entries.sort();
    for (k, v) in entries {
        output.push_str(&format!("\n  {}: {}", k.dimmed(), v));
    }
    output
}

pub(crate) fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "  {:>8.3}  {}/{}",
                hit.score,
                hit.bucket,
                hit.key.cyan()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Formats bytes as human-readable string.
pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Formats JSON for display.
pub(crate) fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
