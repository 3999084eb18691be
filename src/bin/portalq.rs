//! portalq CLI — operator interface to the portal automation queue.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use portalq::artifacts::FsArtifactSink;
use portalq::config::{Config, Tuning};
use portalq::dispatcher::Dispatcher;
use portalq::error::Error;
use portalq::executor::TaskExecutor;
use portalq::model::{NewWorkItem, Status, TaskPayload, WorkItemId};
use portalq::portal::bridge::{BridgeCredentials, BridgePortal};
use portalq::session::SessionManager;
use portalq::store::WorkStore;
use portalq::store::pg::PgStore;
use portalq::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "portalq", about = "Durable task orchestrator for payer-portal automation")]
struct Cli {
    /// Optional TOML file with retry/dispatcher/session tunables
    #[arg(long, global = true)]
    tuning: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatcher daemon
    Serve,
    /// Work item operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Return stuck IN_PROGRESS items to the queue
    Reclaim {
        /// Staleness threshold in seconds
        #[arg(long, default_value_t = 900)]
        stuck_for: u64,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Enqueue a new work item from a JSON payload file
    Submit {
        /// Path to the payload JSON (tagged with "kind")
        #[arg(long)]
        payload: PathBuf,
        /// Caller-defined uniqueness key
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Show a work item, its last error, and its outcome if present
    Show {
        /// Work item ID (full UUID or prefix)
        id: String,
    },
    /// List work items
    List {
        /// Filter by status (e.g. PENDING, FAILED_TECH)
        #[arg(long)]
        status: Option<String>,
        /// Maximum items to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Claim and process a single item, then exit
    RunOnce,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let tuning = match cli.tuning {
        Some(ref path) => Tuning::load(path)?,
        None => Tuning::default(),
    };

    match cli.command {
        Command::Serve => cmd_serve(tuning).await,
        Command::Task { action } => match action {
            TaskAction::Submit {
                payload,
                idempotency_key,
            } => {
                let store = connect_store().await?;
                cmd_task_submit(&store, payload, idempotency_key).await
            }
            TaskAction::Show { id } => {
                let store = connect_store().await?;
                cmd_task_show(&store, id).await
            }
            TaskAction::List { status, limit } => {
                let store = connect_store().await?;
                cmd_task_list(&store, status, limit).await
            }
            TaskAction::RunOnce => cmd_run_once(tuning).await,
        },
        Command::Reclaim { stuck_for } => {
            let store = connect_store().await?;
            cmd_reclaim(&store, stuck_for).await
        }
    }
}

async fn connect_store() -> anyhow::Result<PgStore> {
    let config = Config::from_env()?;
    let store = PgStore::connect(config.database_url.expose_secret()).await?;
    store.migrate().await?;
    Ok(store)
}

fn build_dispatcher(config: &Config, tuning: Tuning, store: Arc<dyn WorkStore>) -> anyhow::Result<Dispatcher<BridgePortal>> {
    let portal = Arc::new(
        BridgePortal::new(
            config.bridge_url.clone(),
            BridgeCredentials {
                username: config.portal_username.clone(),
                password: config.portal_password.clone(),
            },
        )
        .map_err(|e| anyhow::anyhow!("cannot build portal bridge: {e}"))?,
    );
    let sessions = Arc::new(SessionManager::new(Arc::clone(&portal), tuning.session));
    let artifacts = Arc::new(FsArtifactSink::new(&config.artifacts_dir));
    let executor = Arc::new(TaskExecutor::new(portal, sessions, artifacts));
    Ok(Dispatcher::new(store, executor, tuning.retry, tuning.dispatcher))
}

async fn cmd_serve(tuning: Tuning) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "portalq".to_string(),
        log_filter: config.log_level.clone(),
    })?;

    let store = PgStore::connect(config.database_url.expose_secret()).await?;
    store.migrate().await?;

    let dispatcher = build_dispatcher(&config, tuning, Arc::new(store))?;

    let shutdown = dispatcher.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.shutdown();
    });

    dispatcher.run().await?;
    Ok(())
}

async fn cmd_run_once(tuning: Tuning) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "portalq".to_string(),
        log_filter: config.log_level.clone(),
    })?;

    let store = PgStore::connect(config.database_url.expose_secret()).await?;
    store.migrate().await?;

    let dispatcher = build_dispatcher(&config, tuning, Arc::new(store))?;

    match dispatcher.run_once().await? {
        Some((id, status)) => println!("Processed: {id} (status: {status})"),
        None => println!("No claimable work items."),
    }
    Ok(())
}

async fn cmd_task_submit(
    store: &PgStore,
    payload_path: PathBuf,
    idempotency_key: Option<String>,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&payload_path)?;
    let payload: TaskPayload = serde_json::from_str(&content)?;

    let mut new = NewWorkItem::new(payload);
    if let Some(key) = idempotency_key {
        new = new.idempotency_key(key);
    }

    match store.enqueue(new).await {
        Ok(item) => {
            println!("Created: {} (kind: {}, status: {})", item.id, item.payload.label(), item.status);
            Ok(())
        }
        Err(Error::Duplicate(key)) => {
            println!("Rejected: an item with idempotency key {key:?} already exists");
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_task_show(store: &PgStore, id_str: String) -> anyhow::Result<()> {
    // Support prefix matching — find the work item whose ID starts with the given string
    let id = if id_str.len() < 36 {
        let items = store.list(None, 100).await?;
        let matches: Vec<_> = items
            .iter()
            .filter(|item| item.id.to_string().starts_with(&id_str))
            .collect();
        match matches.len() {
            0 => anyhow::bail!("no work item matching prefix '{id_str}'"),
            1 => matches[0].id,
            n => anyhow::bail!("{n} work items match prefix '{id_str}' — be more specific"),
        }
    } else {
        WorkItemId(uuid::Uuid::parse_str(&id_str)?)
    };

    let item = store.get(id).await?;

    println!("ID:        {}", item.id);
    println!("Kind:      {}", item.payload.label());
    println!("Status:    {}", item.status);
    println!("Attempts:  {}", item.attempts);
    println!(
        "Dedup Key: {}",
        item.idempotency_key.as_deref().unwrap_or("-")
    );
    println!(
        "Payload:   {}",
        serde_json::to_string_pretty(&item.payload)?
    );
    if let Some(ref err) = item.last_error {
        println!("Error:     [{}] {}", err.kind, err.message);
    }
    if let Some(nb) = item.not_before {
        println!("Not Before: {nb}");
    }
    println!("Created:   {}", item.created_at);
    println!("Updated:   {}", item.updated_at);

    if let Some(outcome) = store.get_outcome(id).await? {
        println!("---");
        println!("Outcome:   {}", serde_json::to_string_pretty(&outcome.data)?);
        for line in &outcome.lines {
            println!(
                "  [{}] {}: {}",
                line.position,
                line.label,
                serde_json::to_string(&line.data)?
            );
        }
        println!("Duration:  {}ms", outcome.duration_ms);
    }

    Ok(())
}

async fn cmd_task_list(
    store: &PgStore,
    status: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let status_filter: Option<Status> = match status {
        Some(s) => Some(
            s.parse()
                .map_err(|_| anyhow::anyhow!("invalid status: {s}"))?,
        ),
        None => None,
    };

    let items = store.list(status_filter, limit).await?;

    if items.is_empty() {
        println!("No work items found.");
        return Ok(());
    }

    // Header
    println!(
        "{:<8}  {:<12}  {:<18}  {:<8}  CREATED",
        "ID", "KIND", "STATUS", "ATTEMPTS"
    );
    println!("{}", "-".repeat(72));

    for item in &items {
        let short_id = &item.id.to_string()[..8];
        println!(
            "{:<8}  {:<12}  {:<18}  {:<8}  {}",
            short_id,
            item.payload.label(),
            item.status.to_string(),
            item.attempts,
            item.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} item(s)", items.len());
    Ok(())
}

async fn cmd_reclaim(store: &PgStore, stuck_for: u64) -> anyhow::Result<()> {
    let reclaimed = store
        .reclaim_stale(std::time::Duration::from_secs(stuck_for))
        .await?;

    if reclaimed.is_empty() {
        println!("Nothing to reclaim.");
    } else {
        for id in &reclaimed {
            println!("Reclaimed: {id}");
        }
        println!("\n{} item(s) returned to the queue", reclaimed.len());
    }
    Ok(())
}
