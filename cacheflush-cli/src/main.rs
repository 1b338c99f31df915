use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::{Value, json};
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cacheflush-cli")]
#[command(about = "Cacheflush CLI - cache layer administration", long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short = 'p', long, default_value = "15600")]
    port: u16,

    /// Command to execute (if not in interactive mode)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

struct CacheflushClient {
    base_url: String,
    client: reqwest::Client,
}

impl CacheflushClient {
    fn new(host: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{}:{}", host, port),
            client: reqwest::Client::new(),
        }
    }

    async fn execute_command(&self, command: &str, args: &[String]) -> Result<String> {
        let start = Instant::now();

        let response = match command.to_uppercase().as_str() {
            "LAYERS" => self.cmd_layers(args).await?,
            "LAYER" => self.cmd_layer(args).await?,
            "FLUSH" => self.cmd_flush(args).await?,
            "OPS" | "OPERATIONS" => self.cmd_operations(args).await?,
            "OP" | "OPERATION" => self.cmd_operation(args).await?,
            "RUNNING" => self.cmd_running().await?,
            "ENABLE" => self.cmd_set_active(args, true).await?,
            "DISABLE" => self.cmd_set_active(args, false).await?,
            "SET" => self.cmd_set(args).await?,
            "PURGE" => self.cmd_purge(args).await?,
            "PING" | "HEALTH" => self.cmd_ping().await?,
            "HELP" => self.help_text()?,
            _ => return Err(anyhow::anyhow!("Unknown command: {}", command)),
        };

        let elapsed = start.elapsed();
        Ok(format!(
            "{}\n{}",
            response,
            format!("({:.2?})", elapsed).dimmed()
        ))
    }

    /// Send a request and decode the JSON body, turning error statuses into errors
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let res = request.send().await.context("request failed")?;
        let status = res.status();
        let body = res.json::<Value>().await.unwrap_or(Value::Null);

        if status.is_success() {
            Ok(body)
        } else {
            Err(anyhow::anyhow!(
                "{} {}",
                status.as_u16(),
                body["error"].as_str().unwrap_or("Unknown")
            ))
        }
    }

    async fn cmd_layers(&self, args: &[String]) -> Result<String> {
        let active_only = args
            .first()
            .is_some_and(|a| a.eq_ignore_ascii_case("active"));

        let res = self
            .send(
                self.client
                    .get(format!("{}/cache/layers", self.base_url))
                    .query(&[("active_only", active_only)]),
            )
            .await?;

        let layers = res.as_array().cloned().unwrap_or_default();
        if layers.is_empty() {
            return Ok("(empty list)".dimmed().to_string());
        }

        Ok(layers
            .iter()
            .enumerate()
            .map(|(i, layer)| format!("{}) {}", i + 1, format_layer(layer)))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn cmd_layer(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: LAYER layer_id"));
        }

        let res = self
            .send(
                self.client
                    .get(format!("{}/cache/layers/{}", self.base_url, args[0])),
            )
            .await?;

        Ok(serde_json::to_string_pretty(&res)?)
    }

    async fn cmd_flush(&self, args: &[String]) -> Result<String> {
        let force = args.iter().any(|a| a == "--force");
        let layers: Vec<&String> = args.iter().filter(|a| *a != "--force").collect();
        if layers.is_empty() {
            return Err(anyhow::anyhow!("Usage: FLUSH [--force] layer [layer ...]"));
        }

        let res = self
            .send(
                self.client
                    .post(format!("{}/cache/flush", self.base_url))
                    .json(&json!({
                        "cache_layers": layers,
                        "operation_type": "manual",
                        "force": force
                    })),
            )
            .await?;

        Ok(format_operation(&res))
    }

    async fn cmd_operations(&self, args: &[String]) -> Result<String> {
        let limit = match args.first() {
            Some(s) => s
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("Usage: OPS [limit]"))?,
            None => 10,
        };

        let res = self
            .send(
                self.client
                    .get(format!("{}/cache/operations", self.base_url))
                    .query(&[("limit", limit)]),
            )
            .await?;

        let ops = res.as_array().cloned().unwrap_or_default();
        if ops.is_empty() {
            return Ok("(empty list)".dimmed().to_string());
        }

        Ok(ops
            .iter()
            .map(format_operation_line)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn cmd_operation(&self, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Usage: OP operation_id"));
        }

        let res = self
            .send(
                self.client
                    .get(format!("{}/cache/operations/{}", self.base_url, args[0])),
            )
            .await?;

        Ok(format_operation(&res))
    }

    async fn cmd_running(&self) -> Result<String> {
        let res = self
            .send(
                self.client
                    .get(format!("{}/cache/operations/running", self.base_url)),
            )
            .await?;

        let ops = res.as_array().cloned().unwrap_or_default();
        if ops.is_empty() {
            return Ok("(none running)".dimmed().to_string());
        }

        Ok(ops
            .iter()
            .map(format_operation_line)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn cmd_set_active(&self, args: &[String], active: bool) -> Result<String> {
        if args.is_empty() {
            return Err(anyhow::anyhow!(
                "Usage: {} layer_id",
                if active { "ENABLE" } else { "DISABLE" }
            ));
        }

        let res = self
            .send(
                self.client
                    .patch(format!("{}/cache/layers/{}", self.base_url, args[0]))
                    .json(&json!({ "is_active": active })),
            )
            .await?;

        Ok(format_layer(&res))
    }

    async fn cmd_set(&self, args: &[String]) -> Result<String> {
        if args.len() < 3 {
            return Err(anyhow::anyhow!("Usage: SET layer_id field value"));
        }

        let update = parse_update(&args[1], &args[2])?;
        let res = self
            .send(
                self.client
                    .patch(format!("{}/cache/layers/{}", self.base_url, args[0]))
                    .json(&update),
            )
            .await?;

        Ok(format_layer(&res))
    }

    async fn cmd_purge(&self, args: &[String]) -> Result<String> {
        let hours = args
            .first()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| anyhow::anyhow!("Usage: PURGE older_than_hours"))?;

        let res = self
            .send(
                self.client
                    .delete(format!("{}/cache/operations", self.base_url))
                    .query(&[("older_than_hours", hours)]),
            )
            .await?;

        Ok(format!(
            "(integer) {} purged, {} remaining",
            res["purged"].as_u64().unwrap_or(0),
            res["remaining"].as_u64().unwrap_or(0)
        ))
    }

    async fn cmd_ping(&self) -> Result<String> {
        let res = self
            .send(self.client.get(format!("{}/health", self.base_url)))
            .await?;

        if res["status"] == "healthy" {
            Ok("PONG".green().to_string())
        } else {
            Err(anyhow::anyhow!("Server unhealthy: {}", res))
        }
    }

    fn help_text(&self) -> Result<String> {
        Ok(format!(
            r#"{}

{}
  LAYERS [active]            List layers by flush priority
  LAYER layer_id             Show one layer config
  ENABLE layer_id            Mark a layer active
  DISABLE layer_id           Mark a layer inactive
  SET layer_id field value   Update one field (priority, interval, max_size, retention, auto, name, icon)

{}
  FLUSH [--force] layer ...  Flush the given layers

{}
  OPS [limit]                Recent operations, newest first
  OP operation_id            Show one operation
  RUNNING                    Operations in progress
  PURGE hours                Drop operations older than the given hours

{}
  PING                       Ping the server
  HELP                       Show this help message
  QUIT                       Exit the CLI
"#,
            "Cacheflush CLI - Available Commands".bold().cyan(),
            "Layer Commands:".bold(),
            "Flush Commands:".bold(),
            "Operation History:".bold(),
            "Server Commands:".bold(),
        ))
    }
}

/// Map a `SET` field alias and raw value to a PATCH body
fn parse_update(field: &str, value: &str) -> Result<Value> {
    let int = || {
        value
            .parse::<i64>()
            .map_err(|_| anyhow::anyhow!("'{}' is not an integer", value))
    };
    let flag = || match value.to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(anyhow::anyhow!("'{}' is not a boolean", value)),
    };

    let update = match field.to_lowercase().as_str() {
        "priority" | "flush_priority" => json!({ "flush_priority": int()? }),
        "interval" | "auto_flush_interval_hours" => {
            json!({ "auto_flush_interval_hours": int()? })
        }
        "max_size" | "max_size_mb" => json!({ "max_size_mb": int()? }),
        "retention" | "retention_hours" => json!({ "retention_hours": int()? }),
        "auto" | "auto_flush_enabled" => json!({ "auto_flush_enabled": flag()? }),
        "active" | "is_active" => json!({ "is_active": flag()? }),
        "name" | "display_name" => json!({ "display_name": value }),
        "icon" | "icon_ref" => json!({ "icon_ref": value }),
        _ => return Err(anyhow::anyhow!("Unknown field: {}", field)),
    };
    Ok(update)
}

fn format_layer(layer: &Value) -> String {
    let id = layer["layer_id"].as_str().unwrap_or("?");
    let active = if layer["is_active"].as_bool().unwrap_or(false) {
        "active".green()
    } else {
        "inactive".dimmed()
    };
    let auto = if layer["auto_flush_enabled"].as_bool().unwrap_or(false) {
        format!("every {}h", layer["auto_flush_interval_hours"])
    } else {
        "manual".to_string()
    };

    format!(
        "{} [{}] priority={} auto={} max={}MB",
        id.bold(),
        active,
        layer["flush_priority"],
        auto,
        layer["max_size_mb"]
    )
}

fn colored_status(status: &str) -> String {
    match status {
        "completed" | "success" => status.green().to_string(),
        "partial" => status.yellow().to_string(),
        "failed" | "error" => status.red().to_string(),
        _ => status.cyan().to_string(),
    }
}

fn format_operation_line(op: &Value) -> String {
    let layers = op["results"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .filter_map(|r| r["layer_id"].as_str())
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();

    format!(
        "{} {} {} {} [{}]",
        op["started_at"].as_str().unwrap_or("?").dimmed(),
        op["operation_id"].as_str().unwrap_or("?"),
        op["operation_type"].as_str().unwrap_or("?"),
        colored_status(op["status"].as_str().unwrap_or("?")),
        layers
    )
}

fn format_operation(op: &Value) -> String {
    let mut lines = vec![format_operation_line(op)];

    if let Some(results) = op["results"].as_array() {
        for r in results {
            let status = r["status"].as_str().unwrap_or("?");
            let detail = match r["error_message"].as_str() {
                Some(msg) => msg.red().to_string(),
                None => format!(
                    "{} items, {:.2} MB",
                    r["items_cleared"].as_u64().unwrap_or(0),
                    r["size_cleared_mb"].as_f64().unwrap_or(0.0)
                ),
            };
            lines.push(format!(
                "  {} {} {} ({}ms)",
                r["layer_id"].as_str().unwrap_or("?"),
                colored_status(status),
                detail,
                r["duration_ms"].as_u64().unwrap_or(0)
            ));
        }
    }

    if let Some(skipped) = op["skipped_layers"].as_array() {
        for layer in skipped.iter().filter_map(|l| l.as_str()) {
            lines.push(format!("  {} {}", layer, "skipped (busy)".yellow()));
        }
    }

    lines.join("\n")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for CLI output
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let args = Args::parse();
    let client = CacheflushClient::new(&args.host, args.port);

    if !args.command.is_empty() {
        // Command mode: execute single command and exit
        let cmd = &args.command[0];
        let cmd_args: Vec<String> = args.command[1..].to_vec();

        match client.execute_command(cmd, &cmd_args).await {
            Ok(output) => {
                info!("{}", output);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
    } else {
        run_interactive(client, &args.host, args.port).await
    }
}

async fn run_interactive(client: CacheflushClient, host: &str, port: u16) -> Result<()> {
    info!(
        "{}",
        format!("Cacheflush CLI v{}", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    info!("Connected to {}:{}", host, port);
    info!("Type {} for available commands\n", "HELP".bold());

    let mut rl = DefaultEditor::new()?;

    loop {
        let prompt = format!("{}> ", format!("cacheflush {}:{}", host, port).green());

        match rl.readline(&prompt) {
            Ok(line) => {
                let parts: Vec<String> = line.split_whitespace().map(String::from).collect();
                if parts.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line)?;

                let cmd = &parts[0];
                if cmd.eq_ignore_ascii_case("QUIT") || cmd.eq_ignore_ascii_case("EXIT") {
                    info!("Goodbye!");
                    break;
                }

                match client.execute_command(cmd, &parts[1..]).await {
                    Ok(output) => info!("{}", output),
                    Err(e) => {
                        error!(error = %e, "{}", format!("Error: {}", e).red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                info!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("Goodbye!");
                break;
            }
            Err(err) => {
                error!(error = ?err, "Readline error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
