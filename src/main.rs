//! twopc_ledger node
//!
//! Usage:
//!   twopc_ledger --id coordinator
//!   twopc_ledger --id A [--balance 500] [--port 8001] [--env dev]

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use rust_decimal::Decimal;
use tracing::{info, warn};

use twopc_ledger::config::AppConfig;
use twopc_ledger::rpc::HttpRpcClient;
use twopc_ledger::server::{self, AppState};
use twopc_ledger::{
    ClusterConfig, Coordinator, FileEventLog, FileLedger, Participant, ParticipantOptions,
    TimeoutMonitor,
};

fn get_arg(name: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == name && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg("--env")
        .or_else(|| get_arg("-e"))
        .unwrap_or_else(|| "dev".to_string())
}

fn get_server_id() -> Option<String> {
    get_arg("--id").or_else(|| get_arg("--server-id"))
}

fn get_port_override() -> Option<u16> {
    get_arg("--port").and_then(|p| p.parse().ok())
}

fn get_initial_balance() -> anyhow::Result<Option<Decimal>> {
    get_arg("--balance")
        .map(|b| b.parse::<Decimal>().with_context(|| format!("Invalid --balance: {}", b)))
        .transpose()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = twopc_ledger::logging::init_logging(&app_config);

    let Some(server_id) = get_server_id() else {
        bail!("Missing --id <server_id>");
    };

    let cluster = ClusterConfig::load(&app_config.cluster_file)?;
    let Some(me) = cluster.entry(&server_id).cloned() else {
        bail!("Server '{}' is not listed in {}", server_id, app_config.cluster_file);
    };
    let port = get_port_override().unwrap_or(me.port);

    info!(
        server_id = %server_id,
        env = %env,
        build = env!("GIT_HASH"),
        "Starting node"
    );

    let data_dir = Path::new(&app_config.data_dir).join(&server_id);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    let log = Arc::new(FileEventLog::open(data_dir.join("events.jsonl"))?);
    let rpc = Arc::new(HttpRpcClient::new(app_config.rpc.timeout())?);
    let address_book = cluster.address_book_for(&server_id);
    let sweep_interval = app_config.timeout.sweep_interval();

    let state = if server_id == cluster.coordinator {
        let coordinator = Arc::new(Coordinator::new(
            server_id.clone(),
            address_book,
            rpc,
            log,
            app_config.timeout.threshold(),
        )?);
        TimeoutMonitor::new(coordinator.clone(), sweep_interval).spawn();
        AppState::new(server_id, "coordinator", coordinator)
    } else {
        let Some(account_id) = me.account_id.clone() else {
            bail!("Participant '{}' has no account_id", server_id);
        };
        let ledger = Arc::new(FileLedger::open(data_dir.join("account.json"))?);
        let initial_balance =
            get_initial_balance()?.unwrap_or(app_config.participant.initial_balance);
        let participant = Arc::new(Participant::new(
            account_id,
            ledger,
            log,
            rpc,
            address_book,
            initial_balance,
            ParticipantOptions {
                vote_timeout: app_config.timeout.threshold(),
                exclusive_prepare: app_config.participant.exclusive_prepare,
            },
        )?);

        if app_config.participant.recover_on_start {
            if let Err(e) = participant.recover().await {
                warn!(error = %e, "Recovery on start failed");
            }
        }

        TimeoutMonitor::new(participant.clone(), sweep_interval).spawn();
        AppState::new(server_id, "participant", participant)
    };

    server::run_server(&me.ip, port, state).await
}
