use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use transferd::api::{StatsResponse, SubmitJobRequest, SubmitJobResponse};
use transferd::config::{ExecutorConfig, NodeConfig, RetryConfig, StoreConfig};
use transferd::node::Node;
use transferd::scheduler::{JobRecord, RecoveryPolicy};
use transferd::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "transferd")]
#[command(version)]
#[command(about = "Durable transfer job queue with retrying workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the job server: store, worker pool, retry scanner and HTTP endpoint
    Server(ServerArgs),

    /// Talk to a running server
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to bind the submission endpoint to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port for the submission endpoint
    #[arg(long, default_value = "15000")]
    port: u16,

    /// Path of the SQLite job database
    #[arg(long, default_value = "jobs.db")]
    db: PathBuf,

    /// Number of parallel workers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Retries a failed job gets before it is abandoned
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Seconds between retry scans
    #[arg(long, default_value = "60")]
    retry_interval_secs: u64,

    /// Transfer executable; invoked as `<program> [program-args...] <id> <src> <dst>`
    #[arg(long, default_value = "bash")]
    program: PathBuf,

    /// Fixed argument passed before the job arguments (repeatable)
    #[arg(
        long = "program-arg",
        allow_hyphen_values = true,
        default_values_t = vec!["./dummy_rsync.sh".to_string()]
    )]
    program_args: Vec<String>,

    /// Kill a transfer after this many seconds (0 = never)
    #[arg(long, default_value = "3600")]
    exec_timeout_secs: u64,

    /// How long an idle worker waits on the queue before heartbeating (min 10)
    #[arg(long, default_value = "3000")]
    dequeue_timeout_ms: u64,

    /// Attempts for a store call made by a worker or the retry scanner
    #[arg(long, default_value = "3")]
    store_retry_attempts: u32,

    /// Reset jobs found `running` at startup to `pending` and run them again.
    /// Without this they are left for manual review.
    #[arg(long)]
    requeue_running: bool,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:15000")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a transfer job (replaces any job with the same id)
    Submit {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        src: String,
        #[arg(long)]
        dst: String,
    },
    /// Show one job
    Status { id: i64 },
    /// List jobs
    List {
        /// Only jobs in this status (pending, running, failed, retrying, abandoned)
        #[arg(long)]
        status: Option<String>,
    },
    /// Queue depth, per-status counts and worker outcome counters
    Stats,
}

// =============================================================================
// Server Implementation
// =============================================================================

fn build_config(args: ServerArgs) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let timeout = match args.exec_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let config = NodeConfig {
        listen_addr,
        worker_count: args.workers.max(1),
        dequeue_timeout: Duration::from_millis(args.dequeue_timeout_ms),
        executor: ExecutorConfig {
            program: args.program,
            args: args.program_args,
            timeout,
        },
        retry: RetryConfig {
            max_retries: args.max_retries,
            scan_interval: Duration::from_secs(args.retry_interval_secs),
        },
        store: StoreConfig {
            path: args.db,
            retry_attempts: args.store_retry_attempts,
            ..StoreConfig::default()
        },
        recovery: if args.requeue_running {
            RecoveryPolicy::Requeue
        } else {
            RecoveryPolicy::LeaveRunning
        },
    };
    // 0 would make idle workers spin.
    Ok(config.with_dequeue_timeout(Duration::from_millis(args.dequeue_timeout_ms)))
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = build_config(args)?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        db = %config.store.path.display(),
        workers = config.worker_count,
        max_retries = config.retry.max_retries,
        retry_interval_secs = config.retry.scan_interval.as_secs(),
        program = %config.executor.program.display(),
        recovery = ?config.recovery,
        "Starting transferd"
    );

    let shutdown = CancellationToken::new();
    install_shutdown_handler(shutdown.clone())?;

    let node = Node::open(config).await?;
    node.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn check(
    response: reqwest::Response,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(format!("server returned {}: {}", status, body).into())
}

fn print_jobs_table(jobs: &[JobRecord]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }
    println!("{:<10} {:<10} {:<8} {:<28} DST", "ID", "STATUS", "RETRIES", "SRC");
    println!("{}", "-".repeat(78));
    for job in jobs {
        println!(
            "{:<10} {:<10} {:<8} {:<28} {}",
            job.id, job.status, job.retries, job.src, job.dst
        );
    }
}

async fn handle_job_command(
    client: &ClientArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let http = reqwest::Client::new();
    let base = client.addr.trim_end_matches('/');

    match command {
        JobCommands::Submit { id, src, dst } => {
            let response = http
                .post(format!("{}/add_job", base))
                .json(&SubmitJobRequest::encode(id, &src, &dst))
                .send()
                .await?;
            let resp: SubmitJobResponse = check(response).await?.json().await?;
            match client.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&resp)?),
                OutputFormat::Table => {
                    println!("Job {} {}", resp.id, resp.status);
                }
            }
        }
        JobCommands::Status { id } => {
            let response = http.get(format!("{}/api/jobs/{}", base, id)).send().await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                // Successful jobs are deleted, so absence is the normal end state.
                println!("Job {} not found (completed or never submitted)", id);
                return Ok(());
            }
            let job: JobRecord = check(response).await?.json().await?;
            match client.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&job)?),
                OutputFormat::Table => {
                    println!("Job ID:   {}", job.id);
                    println!("Status:   {}", job.status);
                    println!("Retries:  {}", job.retries);
                    println!("Source:   {}", job.src);
                    println!("Dest:     {}", job.dst);
                    println!("Created:  {}", job.created_at);
                    println!("Updated:  {}", job.updated_at);
                }
            }
        }
        JobCommands::List { status } => {
            let mut request = http.get(format!("{}/api/jobs", base));
            if let Some(status) = &status {
                request = request.query(&[("status", status)]);
            }
            let jobs: Vec<JobRecord> = check(request.send().await?).await?.json().await?;
            match client.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
                OutputFormat::Table => print_jobs_table(&jobs),
            }
        }
        JobCommands::Stats => {
            let response = http.get(format!("{}/api/stats", base)).send().await?;
            let stats: StatsResponse = check(response).await?.json().await?;
            match client.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Table => {
                    println!("Queue depth: {}", stats.queue_depth);
                    println!();
                    println!("{:<12} COUNT", "STATUS");
                    for (status, count) in &stats.jobs {
                        println!("{:<12} {}", status, count);
                    }
                    println!();
                    println!("Succeeded:    {}", stats.pool.succeeded);
                    println!("Failed:       {}", stats.pool.failed);
                    println!("Timed out:    {}", stats.pool.timed_out);
                    println!("Spawn failed: {}", stats.pool.spawn_failed);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Job { client, command } => handle_job_command(&client, command).await?,
    }

    Ok(())
}
