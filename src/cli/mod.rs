pub mod daemon;
pub mod jobs;
pub mod tools;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

/// mcp-finnhub - Finnhub market data tools with token-aware output and background jobs
#[derive(Parser, Debug)]
#[command(
    name = "mcp-finnhub",
    version,
    about = "mcp-finnhub - Finnhub market data tools with token-aware output and background jobs"
)]
pub struct Cli {
    /// Server host
    #[arg(long, default_value = "127.0.0.1", global = true)]
    pub host: String,

    /// Server port
    #[arg(long, default_value_t = 8378, global = true)]
    pub port: u16,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP tool server in the foreground
    Serve {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short = 'p', long = "listen-port")]
        listen_port: Option<u16>,

        /// Storage directory (overrides config)
        #[arg(long = "storage-dir")]
        storage_dir: Option<String>,
    },

    /// Call a data tool on the running server
    Call {
        /// Tool name (see `mcp-finnhub tools`)
        tool: String,

        /// Tool parameters
        #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Project that receives spilled results
        #[arg(long)]
        project: Option<String>,

        /// Export format for spilled results (json or csv)
        #[arg(long)]
        format: Option<String>,
    },

    /// List the available data tools
    Tools,

    /// Manage background jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },

    /// Manage project workspaces
    Projects {
        #[command(subcommand)]
        command: ProjectsCommand,
    },

    /// Print the resolved configuration
    Config {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// Submit a tool call as a background job
    Submit {
        /// Operation (tool) name
        operation: String,

        /// Operation parameters
        #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Job timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// List jobs, newest first
    List {
        /// Only show jobs with this status
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of jobs to show
        #[arg(long)]
        limit: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a job's status, result and error
    Status {
        /// Job ID
        id: String,
    },

    /// Cancel a pending or running job
    Cancel {
        /// Job ID
        id: String,
    },

    /// Delete finished jobs older than the retention period
    Cleanup {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,

        /// Storage directory (overrides config)
        #[arg(long = "storage-dir")]
        storage_dir: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProjectsCommand {
    /// List projects
    List,

    /// Create a project workspace
    Create {
        /// Project name (letters, numbers, hyphens, underscores)
        name: String,
    },
}

/// Build the base URL for the server HTTP API.
pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

/// Parse `KEY=VALUE` arguments. Values that parse as JSON scalars keep their
/// type, anything else is a string.
pub fn parse_params(args: &[String]) -> Result<Map<String, Value>, String> {
    let mut map = Map::new();
    for arg in args {
        let Some((key, raw)) = arg.split_once('=') else {
            return Err(format!(
                "Invalid parameter format: '{}'. Expected KEY=VALUE",
                arg
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid parameter: '{}'", arg));
        }
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
            _ => Value::String(raw.to_string()),
        };
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

/// Format a connection error message for when the server is not reachable.
pub fn connection_error_message(host: &str, port: u16) -> String {
    format!(
        "Could not connect to server at {}:{}. Is it running? (try: mcp-finnhub serve)",
        host, port
    )
}

/// Convert reqwest errors into a user-facing message.
pub(crate) fn handle_request_error(err: reqwest::Error, host: &str, port: u16) -> anyhow::Error {
    if err.is_connect() || err.is_timeout() {
        anyhow::anyhow!("{}", connection_error_message(host, port))
    } else {
        anyhow::anyhow!("Request failed: {}", err)
    }
}

/// Send a request to the server and return its JSON body, turning error
/// payloads into an `Err` carrying the error code and message.
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
    host: &str,
    port: u16,
) -> anyhow::Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    if !status.is_success() {
        let code = body["error"]["code"].as_str().unwrap_or("ERROR");
        let message = body["error"]["message"].as_str().unwrap_or("Unknown error");
        anyhow::bail!("[{}] {}", code, message);
    }
    Ok(body)
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    let (host, port) = (cli.host.as_str(), cli.port);

    match &cli.command {
        Some(Commands::Serve {
            config,
            listen_port,
            storage_dir,
        }) => {
            daemon::cmd_serve(config.as_deref(), *listen_port, storage_dir.as_deref()).await
        }
        Some(Commands::Call {
            tool,
            params,
            project,
            format,
        }) => {
            tools::cmd_call(
                host,
                port,
                tool,
                params,
                project.as_deref(),
                format.as_deref(),
            )
            .await
        }
        Some(Commands::Tools) => tools::cmd_tools(),
        Some(Commands::Jobs { command }) => match command {
            JobsCommand::Submit {
                operation,
                params,
                timeout,
            } => jobs::cmd_submit(host, port, operation, params, *timeout).await,
            JobsCommand::List {
                status,
                limit,
                json,
            } => jobs::cmd_list(host, port, status.as_deref(), *limit, *json).await,
            JobsCommand::Status { id } => jobs::cmd_status(host, port, id).await,
            JobsCommand::Cancel { id } => jobs::cmd_cancel(host, port, id).await,
            JobsCommand::Cleanup {
                config,
                storage_dir,
            } => daemon::cmd_cleanup(config.as_deref(), storage_dir.as_deref()).await,
        },
        Some(Commands::Projects { command }) => match command {
            ProjectsCommand::List => tools::cmd_projects_list(host, port).await,
            ProjectsCommand::Create { name } => tools::cmd_projects_create(host, port, name).await,
        },
        Some(Commands::Config { config }) => daemon::cmd_config(config.as_deref()),
        None => {
            println!("mcp-finnhub - use --help for usage information");
            Ok(())
        }
    }
}
