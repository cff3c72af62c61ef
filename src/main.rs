//! FlashKV Bench - A Pipelined Load Generator
//!
//! This is the main entry point for the flashkv-bench tool.
//! It opens a pooled client, drives batches of commands from concurrent
//! workers and reports throughput.

use anyhow::{bail, Context};
use flashkv_client::{Client, ClientConfig, Command, Reply};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Benchmark configuration
struct Config {
    /// Host to connect to
    host: String,
    /// Port to connect to
    port: u16,
    /// Password for AUTH
    password: Option<String>,
    /// Total requests across all workers
    requests: u64,
    /// Concurrent workers, each on its own pooled connection
    connections: usize,
    /// Commands per batch
    pipeline: usize,
    /// Command to run
    command: BenchCommand,
}

#[derive(Clone, Copy)]
enum BenchCommand {
    Ping,
    Incr,
}

impl BenchCommand {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PING" => Some(Self::Ping),
            "INCR" => Some(Self::Incr),
            _ => None,
        }
    }

    fn build(self) -> Command {
        match self {
            Self::Ping => Command::new("PING"),
            Self::Incr => Command::new("INCR").arg("flashkv-bench:counter"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: flashkv_client::DEFAULT_HOST.to_string(),
            port: flashkv_client::DEFAULT_PORT,
            password: None,
            requests: 100_000,
            connections: 4,
            pipeline: 64,
            command: BenchCommand::Ping,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            if flag == "--help" {
                print_help();
                std::process::exit(0);
            }
            if flag == "--version" || flag == "-v" {
                println!("flashkv-bench version {}", flashkv_client::VERSION);
                std::process::exit(0);
            }

            let Some(value) = args.get(i + 1) else {
                eprintln!("Error: {} requires a value", flag);
                std::process::exit(1);
            };
            match flag {
                "--host" | "-h" => config.host = value.clone(),
                "--port" | "-p" => config.port = parse_or_exit(value, "port number"),
                "--password" | "-a" => config.password = Some(value.clone()),
                "--requests" | "-n" => config.requests = parse_or_exit(value, "request count"),
                "--connections" | "-c" => {
                    config.connections = parse_or_exit(value, "connection count")
                }
                "--pipeline" | "-P" => config.pipeline = parse_or_exit(value, "pipeline depth"),
                "--command" | "-t" => {
                    config.command = BenchCommand::parse(value).unwrap_or_else(|| {
                        eprintln!("Error: unsupported command '{}'", value);
                        std::process::exit(1);
                    })
                }
                _ => {
                    eprintln!("Unknown argument: {}", flag);
                    print_help();
                    std::process::exit(1);
                }
            }
            i += 2;
        }

        config.connections = config.connections.max(1);
        config.pipeline = config.pipeline.max(1);
        config
    }

    fn client_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new(self.host.clone(), self.port);
        client.password = self.password.clone();
        client.pool.max_idle_per_key = self.connections;
        client
    }
}

fn parse_or_exit<T: std::str::FromStr>(value: &str, what: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid {}", what);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
FlashKV Bench - A Pipelined Load Generator

USAGE:
    flashkv-bench [OPTIONS]

OPTIONS:
    -h, --host <HOST>           Host to connect to (default: 127.0.0.1)
    -p, --port <PORT>           Port to connect to (default: 6379)
    -a, --password <PASSWORD>   Password sent with AUTH
    -n, --requests <N>          Total requests (default: 100000)
    -c, --connections <N>       Concurrent connections (default: 4)
    -P, --pipeline <N>          Commands per batch (default: 64)
    -t, --command <CMD>         PING or INCR (default: PING)
    -v, --version               Print version information
        --help                  Print this help message

EXAMPLES:
    flashkv-bench                          # 100k PINGs against 127.0.0.1:6379
    flashkv-bench -t INCR -P 256           # Deep pipelines of INCR
    flashkv-bench -c 16 -n 1000000         # More connections, more requests
"#
    );
}

/// Counters shared by all workers
#[derive(Default)]
struct Totals {
    ok: AtomicU64,
    server_errors: AtomicU64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let client = Arc::new(Client::new(config.client_config()));

    // Fail early if the server is unreachable
    let pong = client
        .execute(&Command::new("PING"))
        .await
        .with_context(|| format!("cannot reach {}:{}", config.host, config.port))?;
    if pong != Reply::status("PONG") {
        bail!("unexpected PING reply: {:?}", pong);
    }

    info!(
        requests = config.requests,
        connections = config.connections,
        pipeline = config.pipeline,
        "Starting benchmark"
    );

    let totals = Arc::new(Totals::default());
    let started = Instant::now();

    tokio::select! {
        result = run_workers(&config, Arc::clone(&client), Arc::clone(&totals)) => result?,
        _ = signal::ctrl_c() => warn!("Interrupted, reporting partial results"),
    }

    report(&totals, started.elapsed());
    client.dispose().await;
    Ok(())
}

/// Splits the requests over the workers and waits for all of them
async fn run_workers(config: &Config, client: Arc<Client>, totals: Arc<Totals>) -> anyhow::Result<()> {
    let per_worker = config.requests / config.connections as u64;
    let remainder = config.requests % config.connections as u64;

    let mut workers = Vec::with_capacity(config.connections);
    for worker in 0..config.connections {
        let quota = per_worker + u64::from((worker as u64) < remainder);
        let client = Arc::clone(&client);
        let totals = Arc::clone(&totals);
        let batch: Vec<Command> = (0..config.pipeline).map(|_| config.command.build()).collect();
        workers.push(tokio::spawn(async move {
            run_worker(&client, &batch, quota, &totals).await
        }));
    }

    for worker in workers {
        if let Err(e) = worker.await.context("worker panicked")? {
            error!("Worker failed: {}", e);
            return Err(e.into());
        }
    }
    Ok(())
}

async fn run_worker(
    client: &Client,
    batch: &[Command],
    quota: u64,
    totals: &Totals,
) -> flashkv_client::ClientResult<()> {
    let conn = client.connection().await?;
    let mut remaining = quota;

    while remaining > 0 {
        let take = remaining.min(batch.len() as u64) as usize;
        let replies = match conn.execute_batch(&batch[..take]).await {
            Ok(replies) => replies,
            Err(e) => {
                client.release(conn);
                return Err(e);
            }
        };
        for reply in replies {
            match reply {
                Ok(reply) if reply.is_error() => {
                    totals.server_errors.fetch_add(1, Ordering::Relaxed);
                }
                Ok(_) => {
                    totals.ok.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    client.release(conn);
                    return Err(e);
                }
            }
        }
        remaining -= take as u64;
    }

    client.release(conn);
    Ok(())
}

fn report(totals: &Totals, elapsed: Duration) {
    let ok = totals.ok.load(Ordering::Relaxed);
    let errors = totals.server_errors.load(Ordering::Relaxed);
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);

    println!();
    println!("──────────────────────────────────────────────────────────────");
    println!("  completed      {}", ok + errors);
    println!("  server errors  {}", errors);
    println!("  elapsed        {:.3}s", secs);
    println!("  throughput     {:.0} req/s", (ok + errors) as f64 / secs);
    println!("──────────────────────────────────────────────────────────────");
}
