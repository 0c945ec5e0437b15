//! Interactive REPL.

use crate::commands::{
    create_index, format_bytes, format_hits, format_json, format_list, format_object,
    parse_json_arg, parse_metadata, parse_query, IndexKind,
};
use colored::Colorize;
use oxidb_client::{Client, FindOptions, PutObjectOptions};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use serde_json::Value;
use std::path::PathBuf;

const HISTORY_FILE: &str = ".oxidb_history";

const HELP_TEXT: &str = r#"
Available commands:
  help                                 Show this help
  ping                                 Ping the server

  collections                          List collections
  create-collection <name>             Create a collection
  drop-collection <name>               Drop a collection

  insert <col> <doc|[docs]>            Insert one or many documents
  find <col> [query] [limit]           Find documents
       [--sort <json>] [--skip <n>] [--limit <n>]
  find-one <col> [query]               Find the first matching document
  update <col> <query> <update> [--one]
                                       Update matching documents
  delete <col> <query> [--one]         Delete matching documents
  count <col> [query]                  Count documents

  create-index <col> <field>... [--unique|--text]
                                       Create an index (several fields: composite)
  indexes <col>                        List indexes
  drop-index <col> <index>             Drop an index
  aggregate <col> <pipeline>           Run an aggregation pipeline
  compact <col>                        Compact a collection

  begin | commit | rollback            Transaction control

  buckets                              List buckets
  create-bucket <bucket>               Create a bucket
  delete-bucket <bucket>               Delete a bucket
  put-object <bucket> <key> <file>     Upload a file
       [--content-type <type>] [--meta <key=value>]...
  get-object <bucket> <key> <file>     Download an object to a file
  head-object <bucket> <key>           Show object metadata
  delete-object <bucket> <key>         Delete an object
  list-objects <bucket> [prefix] [--limit <n>]
                                       List objects
  search <text...> [--bucket <b>] [--limit <n>]
                                       Full-text search over objects

  sql <query...>                       Run a SQL query
  raw <request>                        Send a raw request object

  quit, exit                           Exit the REPL

JSON arguments may contain spaces; @file.json reads from a file.
"#;

pub async fn run(client: Client, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "OxiDB shell".bold().cyan());
    println!("{} {}", "Connected to".green(), addr);

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = home::home_dir()
        .map(|h| h.join(HISTORY_FILE))
        .unwrap_or_else(|| PathBuf::from(HISTORY_FILE));
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = if client.in_transaction() {
            format!("{} ", "oxidb(tx)>".yellow())
        } else {
            format!("{} ", "oxidb>".cyan())
        };

        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }

                if !client.is_open() {
                    println!("{}", "Connection lost.".red());
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    if client.in_transaction() {
        if let Err(e) = client.rollback_transaction().await {
            tracing::warn!(error = %e, "rollback on exit failed");
        }
    }
    client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    client: &Client,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts = split_args(line);
    let Some((cmd, args)) = parts.split_first() else {
        return Ok(Some(String::new()));
    };
    let cmd = cmd.to_lowercase();
    let mut args: Vec<&str> = args.iter().map(String::as_str).collect();

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "ping" => {
            let reply = client.ping().await?;
            Ok(Some(reply.to_uppercase().green().to_string()))
        }

        "begin" => {
            let result = client.begin_transaction().await?;
            Ok(Some(format!(
                "{} transaction {}",
                "Started".green(),
                result.tx_id
            )))
        }

        "commit" => {
            client.commit_transaction().await?;
            Ok(Some("Committed".green().to_string()))
        }

        "rollback" => {
            client.rollback_transaction().await?;
            Ok(Some("Rolled back".yellow().to_string()))
        }

        "collections" | "ls" => {
            let names = client.list_collections().await?;
            if names.is_empty() {
                return Ok(Some("No collections".yellow().to_string()));
            }
            Ok(Some(format_list(&names)))
        }

        "create-collection" => {
            let [name] = args[..] else {
                return Ok(Some("Usage: create-collection <name>".to_string()));
            };
            client.create_collection(name).await?;
            Ok(Some(format!("{} {}", "Created".green(), name.cyan())))
        }

        "drop-collection" => {
            let [name] = args[..] else {
                return Ok(Some("Usage: drop-collection <name>".to_string()));
            };
            client.drop_collection(name).await?;
            Ok(Some(format!("{} {}", "Dropped".green(), name.cyan())))
        }

        "insert" | "i" => {
            let [col, doc] = args[..] else {
                return Ok(Some("Usage: insert <collection> <doc_json>".to_string()));
            };
            let result = match parse_json_arg(doc)? {
                Value::Array(docs) => client.insert_many(col, docs).await?,
                doc => client.insert(col, doc).await?,
            };
            Ok(Some(format_json(&result)))
        }

        "find" | "f" => {
            let mut options = find_options(&mut args)?;
            let (col, query) = match args[..] {
                [col] => (col, None),
                [col, query] => (col, Some(query)),
                [col, query, limit] => {
                    options = options.limit(limit.parse::<u64>()?);
                    (col, Some(query))
                }
                _ => {
                    return Ok(Some(
                        "Usage: find <collection> [query_json] [limit] [--sort <json>] [--skip <n>] [--limit <n>]"
                            .to_string(),
                    ))
                }
            };
            let docs = client.find(col, parse_query(query)?, options).await?;
            if docs.is_empty() {
                return Ok(Some("No documents".yellow().to_string()));
            }
            let count = docs.len();
            Ok(Some(format!(
                "{}\n{}",
                format_json(&Value::Array(docs)),
                format!("{} document(s)", count).dimmed()
            )))
        }

        "find-one" => {
            let (col, query) = match args[..] {
                [col] => (col, None),
                [col, query] => (col, Some(query)),
                _ => return Ok(Some("Usage: find-one <collection> [query_json]".to_string())),
            };
            match client.find_one(col, parse_query(query)?).await? {
                Some(doc) => Ok(Some(format_json(&doc))),
                None => Ok(Some("No document".yellow().to_string())),
            }
        }

        "update" | "u" => {
            let one = take_flag(&mut args, "--one");
            let [col, query, update] = args[..] else {
                return Ok(Some(
                    "Usage: update <collection> <query_json> <update_json> [--one]".to_string(),
                ));
            };
            let (query, update) = (parse_json_arg(query)?, parse_json_arg(update)?);
            let result = if one {
                client.update_one(col, query, update).await?
            } else {
                client.update(col, query, update).await?
            };
            Ok(Some(format_json(&result)))
        }

        "delete" | "d" => {
            let one = take_flag(&mut args, "--one");
            let [col, query] = args[..] else {
                return Ok(Some(
                    "Usage: delete <collection> <query_json> [--one]".to_string(),
                ));
            };
            let query = parse_json_arg(query)?;
            let result = if one {
                client.delete_one(col, query).await?
            } else {
                client.delete(col, query).await?
            };
            Ok(Some(format_json(&result)))
        }

        "count" => {
            let (col, query) = match args[..] {
                [col] => (col, None),
                [col, query] => (col, Some(query)),
                _ => return Ok(Some("Usage: count <collection> [query_json]".to_string())),
            };
            let count = client.count(col, parse_query(query)?).await?;
            Ok(Some(count.to_string()))
        }

        "create-index" => {
            let unique = take_flag(&mut args, "--unique");
            let text = take_flag(&mut args, "--text");
            let Some((col, fields)) = args.split_first() else {
                return Ok(Some(
                    "Usage: create-index <collection> <field>... [--unique|--text]".to_string(),
                ));
            };
            let kind = IndexKind::select(fields.len(), unique, text)?;
            let result = create_index(client, col, fields, kind).await?;
            Ok(Some(format_json(&result)))
        }

        "drop-index" => {
            let [col, index] = args[..] else {
                return Ok(Some("Usage: drop-index <collection> <index>".to_string()));
            };
            client.drop_index(col, index).await?;
            Ok(Some(format!("{} index {}", "Dropped".green(), index.cyan())))
        }

        "indexes" => {
            let [col] = args[..] else {
                return Ok(Some("Usage: indexes <collection>".to_string()));
            };
            let indexes = client.list_indexes(col).await?;
            Ok(Some(format_json(&Value::Array(indexes))))
        }

        "aggregate" | "agg" => {
            let [col, pipeline] = args[..] else {
                return Ok(Some(
                    "Usage: aggregate <collection> <pipeline_json>".to_string(),
                ));
            };
            let Value::Array(stages) = parse_json_arg(pipeline)? else {
                return Err("pipeline must be a JSON array".into());
            };
            let result = client.aggregate(col, stages).await?;
            Ok(Some(format_json(&Value::Array(result))))
        }

        "compact" => {
            let [col] = args[..] else {
                return Ok(Some("Usage: compact <collection>".to_string()));
            };
            let result = client.compact(col).await?;
            Ok(Some(format!(
                "{} {} ({} -> {}, {} documents kept)",
                "Compacted".green(),
                col.cyan(),
                format_bytes(result.old_size),
                format_bytes(result.new_size),
                result.docs_kept
            )))
        }

        "buckets" => {
            let names = client.list_buckets().await?;
            if names.is_empty() {
                return Ok(Some("No buckets".yellow().to_string()));
            }
            Ok(Some(format_list(&names)))
        }

        "create-bucket" => {
            let [bucket] = args[..] else {
                return Ok(Some("Usage: create-bucket <bucket>".to_string()));
            };
            client.create_bucket(bucket).await?;
            Ok(Some(format!("{} {}", "Created".green(), bucket.cyan())))
        }

        "delete-bucket" => {
            let [bucket] = args[..] else {
                return Ok(Some("Usage: delete-bucket <bucket>".to_string()));
            };
            client.delete_bucket(bucket).await?;
            Ok(Some(format!("{} {}", "Deleted".green(), bucket.cyan())))
        }

        "put-object" | "put" => {
            let options = put_options(&mut args)?;
            let [bucket, key, file] = args[..] else {
                return Ok(Some(
                    "Usage: put-object <bucket> <key> <file> [--content-type <type>] [--meta <key=value>]..."
                        .to_string(),
                ));
            };
            let data = std::fs::read(file)?;
            let meta = client.put_object(bucket, key, &data, options).await?;
            Ok(Some(format!("{} {}", "Stored".green(), format_object(&meta))))
        }

        "get-object" | "get" => {
            let [bucket, key, file] = args[..] else {
                return Ok(Some("Usage: get-object <bucket> <key> <file>".to_string()));
            };
            let object = client.get_object(bucket, key).await?;
            std::fs::write(file, &object.content)?;
            Ok(Some(format!(
                "{} {} to {}",
                "Wrote".green(),
                format_bytes(object.content.len() as u64),
                file
            )))
        }

        "head-object" | "head" => {
            let [bucket, key] = args[..] else {
                return Ok(Some("Usage: head-object <bucket> <key>".to_string()));
            };
            let meta = client.head_object(bucket, key).await?;
            Ok(Some(format_object(&meta)))
        }

        "delete-object" => {
            let [bucket, key] = args[..] else {
                return Ok(Some("Usage: delete-object <bucket> <key>".to_string()));
            };
            client.delete_object(bucket, key).await?;
            Ok(Some(format!("{} {}", "Deleted".green(), key.cyan())))
        }

        "list-objects" => {
            let limit = take_option(&mut args, "--limit")?
                .map(str::parse::<u64>)
                .transpose()?;
            let (bucket, prefix) = match args[..] {
                [bucket] => (bucket, None),
                [bucket, prefix] => (bucket, Some(prefix)),
                _ => {
                    return Ok(Some(
                        "Usage: list-objects <bucket> [prefix] [--limit <n>]".to_string(),
                    ))
                }
            };
            let objects = client.list_objects(bucket, prefix, limit).await?;
            if objects.is_empty() {
                return Ok(Some("No objects".yellow().to_string()));
            }
            Ok(Some(
                objects
                    .iter()
                    .map(|meta| format!("  {}", format_object(meta)))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ))
        }

        "search" => {
            let bucket = take_option(&mut args, "--bucket")?;
            let limit = take_option(&mut args, "--limit")?
                .map(str::parse::<u64>)
                .transpose()?;
            if args.is_empty() {
                return Ok(Some(
                    "Usage: search <text...> [--bucket <bucket>] [--limit <n>]".to_string(),
                ));
            }
            let hits = client.search(&args.join(" "), bucket, limit).await?;
            if hits.is_empty() {
                return Ok(Some("No matches".yellow().to_string()));
            }
            Ok(Some(format_hits(&hits)))
        }

        "sql" => {
            if args.is_empty() {
                return Ok(Some("Usage: sql <query...>".to_string()));
            }
            let result = client.sql(&args.join(" ")).await?;
            Ok(Some(format_json(&result)))
        }

        "raw" => {
            if args.is_empty() {
                return Ok(Some("Usage: raw <request_json>".to_string()));
            }
            let result = client.raw(parse_json_arg(&args.join(" "))?).await?;
            Ok(Some(format_json(&result)))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}

/// Removes every occurrence of `flag` from `args`; returns whether it was present.
fn take_flag(args: &mut Vec<&str>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|arg| *arg != flag);
    args.len() != before
}

/// Removes the first `flag <value>` pair from `args` and returns the value.
fn take_option<'a>(args: &mut Vec<&'a str>, flag: &str) -> Result<Option<&'a str>, String> {
    let Some(pos) = args.iter().position(|arg| *arg == flag) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        return Err(format!("{} requires a value", flag));
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn find_options(args: &mut Vec<&str>) -> Result<FindOptions, Box<dyn std::error::Error>> {
    let mut options = FindOptions::new();
    if let Some(sort) = take_option(args, "--sort")? {
        options = options.sort(parse_json_arg(sort)?);
    }
    if let Some(skip) = take_option(args, "--skip")? {
        options = options.skip(skip.parse()?);
    }
    if let Some(limit) = take_option(args, "--limit")? {
        options = options.limit(limit.parse()?);
    }
    Ok(options)
}

fn put_options(args: &mut Vec<&str>) -> Result<PutObjectOptions, Box<dyn std::error::Error>> {
    let mut options = PutObjectOptions::new();
    if let Some(content_type) = take_option(args, "--content-type")? {
        options = options.content_type(content_type);
    }
    while let Some(entry) = take_option(args, "--meta")? {
        let (k, v) = parse_metadata(entry)?;
        options = options.metadata(k, v);
    }
    Ok(options)
}

/// Splits a REPL line on whitespace, keeping JSON objects, arrays and
/// quoted strings together.
fn split_args(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for c in line.chars() {
        if in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            '{' | '[' => {
                depth += 1;
                current.push(c);
            }
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
