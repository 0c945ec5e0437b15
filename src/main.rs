//! oxidb - Command-line shell for the OxiDB document database
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use oxidb_client::{Client, ClientConfig, ConnectionConfig, Credentials};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oxidb")]
#[command(about = "Command-line shell for the OxiDB document database")]
#[command(version)]
struct Cli {
    /// YAML config file (flags and OXIDB_* variables override it)
    #[arg(long, env = "OXIDB_CONFIG")]
    config: Option<PathBuf>,

    /// Server host [default: 127.0.0.1]
    #[arg(long)]
    host: Option<String>,

    /// Server port [default: 4444]
    #[arg(short, long)]
    port: Option<u16>,

    /// TCP connect timeout in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Per-request read timeout in milliseconds (none by default)
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    /// Username for authentication
    #[arg(short, long)]
    user: Option<String>,

    /// Password for authentication
    #[arg(long)]
    password: Option<String>,

    // ===== TLS Options =====
    /// Enable TLS connection
    #[arg(long)]
    tls: bool,

    /// Path to CA certificate for server verification
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (for mTLS)
    #[arg(long)]
    client_cert: Option<PathBuf>,

    /// Path to client private key (for mTLS)
    #[arg(long)]
    client_key: Option<PathBuf>,

    /// Skip server certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    /// Server name for TLS SNI (defaults to the host)
    #[arg(long)]
    server_name: Option<String>,

    /// Print responses as compact JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// Ping the server
    Ping,

    /// List collections
    Collections,

    /// Create a collection
    CreateCollection {
        /// Collection name
        name: String,
    },

    /// Drop a collection and its documents
    DropCollection {
        /// Collection name
        name: String,
    },

    /// Insert a document (a JSON array inserts many)
    Insert {
        /// Collection name
        collection: String,

        /// Document JSON (or @file.json to read from file)
        doc: String,
    },

    /// Find documents
    Find {
        /// Collection name
        collection: String,

        /// Query JSON (matches everything when omitted)
        query: Option<String>,

        /// Sort JSON, e.g. '{"age": -1}'
        #[arg(long)]
        sort: Option<String>,

        /// Number of documents to skip
        #[arg(long)]
        skip: Option<u64>,

        /// Maximum number of documents
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Find the first matching document
    FindOne {
        /// Collection name
        collection: String,

        /// Query JSON (matches everything when omitted)
        query: Option<String>,
    },

    /// Update matching documents
    Update {
        /// Collection name
        collection: String,

        /// Query JSON
        query: String,

        /// Update JSON, e.g. '{"$set": {"age": 31}}'
        update: String,

        /// Only update the first match
        #[arg(long)]
        one: bool,
    },

    /// Delete matching documents
    Delete {
        /// Collection name
        collection: String,

        /// Query JSON
        query: String,

        /// Only delete the first match
        #[arg(long)]
        one: bool,
    },

    /// Count matching documents
    Count {
        /// Collection name
        collection: String,

        /// Query JSON (counts everything when omitted)
        query: Option<String>,
    },

    /// Create an index (several fields create a composite index)
    CreateIndex {
        /// Collection name
        collection: String,

        /// Indexed field(s)
        #[arg(required = true)]
        fields: Vec<String>,

        /// Reject duplicate values
        #[arg(long, conflicts_with = "text")]
        unique: bool,

        /// Create a full-text index
        #[arg(long)]
        text: bool,
    },

    /// List indexes of a collection
    Indexes {
        /// Collection name
        collection: String,
    },

    /// Drop an index
    DropIndex {
        /// Collection name
        collection: String,

        /// Index name
        index: String,
    },

    /// Run an aggregation pipeline
    Aggregate {
        /// Collection name
        collection: String,

        /// Pipeline JSON array (or @file.json to read from file)
        pipeline: String,
    },

    /// Compact a collection's storage
    Compact {
        /// Collection name
        collection: String,
    },

    /// List buckets
    Buckets,

    /// Create a bucket
    CreateBucket {
        /// Bucket name
        bucket: String,
    },

    /// Delete a bucket
    DeleteBucket {
        /// Bucket name
        bucket: String,
    },

    /// Upload a file as an object
    PutObject {
        /// Bucket name
        bucket: String,

        /// Object key
        key: String,

        /// File to upload
        file: PathBuf,

        /// Content type [default: application/octet-stream]
        #[arg(short, long)]
        content_type: Option<String>,

        /// Metadata entry as key=value (repeatable)
        #[arg(short, long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
    },

    /// Download an object
    GetObject {
        /// Bucket name
        bucket: String,

        /// Object key
        key: String,

        /// Write content to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show object metadata
    HeadObject {
        /// Bucket name
        bucket: String,

        /// Object key
        key: String,
    },

    /// Delete an object
    DeleteObject {
        /// Bucket name
        bucket: String,

        /// Object key
        key: String,
    },

    /// List objects in a bucket
    ListObjects {
        /// Bucket name
        bucket: String,

        /// Only keys starting with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Maximum number of objects
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Full-text search over object content
    Search {
        /// Search terms
        query: String,

        /// Restrict to one bucket
        #[arg(short, long)]
        bucket: Option<String>,

        /// Maximum number of hits [default: 10]
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Run a SQL query
    Sql {
        /// SQL text
        query: String,
    },

    /// Send a raw request object, e.g. '{"cmd": "ping"}'
    Raw {
        /// Request JSON (or @file.json to read from file)
        request: String,
    },
}

impl Cli {
    /// Layers command-line flags over the file and environment configuration.
    fn connection_config(&self) -> Result<ConnectionConfig, Box<dyn std::error::Error>> {
        let mut config = ClientConfig::load_from(self.config.as_deref())?;

        if let Some(ref host) = self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.read_timeout_ms {
            config.read_timeout_ms = Some(ms);
        }

        if let Some(ref user) = self.user {
            let password = self
                .password
                .clone()
                .or_else(|| config.auth.as_ref().map(|a| a.password.clone()))
                .unwrap_or_default();
            config.auth = Some(Credentials::new(user.clone(), password));
        } else if let (Some(auth), Some(password)) = (config.auth.as_mut(), &self.password) {
            auth.password = password.clone();
        }

        if self.tls || self.ca_cert.is_some() || self.client_cert.is_some() || self.insecure {
            config.tls.enabled = true;
        }
        if let Some(ref path) = self.ca_cert {
            config.tls.ca_cert = Some(path.clone());
        }
        if let Some(ref path) = self.client_cert {
            config.tls.client_cert = Some(path.clone());
        }
        if let Some(ref path) = self.client_key {
            config.tls.client_key = Some(path.clone());
        }
        if self.insecure {
            config.tls.insecure = true;
        }
        if let Some(ref name) = self.server_name {
            config.tls.server_name = Some(name.clone());
        }

        Ok(config.into_connection_config()?)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.connection_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };
    let addr = config.addr();

    let client = Client::connect(config).await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, &addr).await?;
        }
        Some(cmd) => {
            let result = commands::execute(&client, cmd, cli.json).await;
            client.close().await;

            match result {
                Ok(output) => {
                    if !output.is_empty() {
                        println!("{}", output);
                    }
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
