//! WAGERCHAT keeper daemon.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores chain state from disk (or creates a fresh one), serves the
//! read API, and runs the keeper loop (price push, auto-resolution,
//! persistence) until Ctrl+C.

use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use wagerchat::config::{self, AppConfig};
use wagerchat::dashboard::{self, ApiState};
use wagerchat::engine::betting::BettingService;
use wagerchat::engine::keeper::{Keeper, KeeperConfig, TickReport};
use wagerchat::escrow::{Chain, Escrow};
use wagerchat::messaging::{InMemoryConnector, InMemoryNetwork};
use wagerchat::oracle::{HermesClient, LocalPriceFeed};
use wagerchat::session::SessionManager;
use wagerchat::storage;
use wagerchat::types::{format_ether, parse_ether};

const BANNER: &str = r#"
 __        ___    ____ _____ ____   ____ _   _    _  _____
 \ \      / / \  / ___| ____|  _ \ / ___| | | |  / \|_   _|
  \ \ /\ / / _ \| |  _|  _| | |_) | |   | |_| | / _ \ | |
   \ V  V / ___ \ |_| | |___|  _ <| |___|  _  |/ ___ \| |
    \_/\_/_/   \_\____|_____|_| \_\\____|_| |_/_/   \_\_|

  Wallet chat with oracle-settled price bets
  v0.1.0 keeper
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        name = %cfg.app.name,
        keeper_interval_secs = cfg.app.keeper_interval_secs,
        auto_resolve = cfg.app.auto_resolve,
        messaging_env = %cfg.messaging.environment,
        "WAGERCHAT starting up"
    );

    // -- Restore or create state -----------------------------------------

    let chain = match storage::load_state::<LocalPriceFeed>(Some(&cfg.app.state_file))? {
        Some(c) => {
            info!(
                bets = c.bet_counter(),
                contract_balance = %format_ether(c.contract_balance()),
                "Resumed from saved state"
            );
            c
        }
        None => genesis(&cfg)?,
    };
    let chain = Arc::new(Mutex::new(chain));

    // -- Initialise components -------------------------------------------

    let api_key = cfg
        .oracle
        .api_key_env
        .as_deref()
        .and_then(|env| match AppConfig::resolve_env(env) {
            Ok(key) => Some(SecretString::new(key)),
            Err(e) => {
                warn!(error = %e, "Push-service API key not available, using public endpoint");
                None
            }
        });
    let hermes = HermesClient::new(
        cfg.oracle.hermes_url.clone(),
        api_key,
        Duration::from_secs(cfg.oracle.request_timeout_secs),
    )?;

    let betting = Arc::new(
        BettingService::new(chain.clone(), Arc::new(hermes), cfg.escrow.limits()?).following_wall_clock(),
    );
    let mut keeper = Keeper::new(
        betting.clone(),
        KeeperConfig {
            account: cfg.app.keeper_account,
            auto_resolve: cfg.app.auto_resolve,
        },
    );

    // Local messaging network; wallets register as they connect.
    let network = InMemoryNetwork::from_config(&cfg.messaging)?;
    network.register(cfg.app.keeper_account);
    let sessions = SessionManager::from_config(
        Arc::new(InMemoryConnector::new(network.clone())),
        &cfg.messaging,
    );
    info!(
        environment = %cfg.messaging.environment,
        groups_enabled = network.groups_enabled(),
        group_fallback = ?sessions.group_fallback(),
        "Messaging network ready"
    );

    if cfg.api.enabled {
        dashboard::spawn_api(Arc::new(ApiState::new(cfg.app.name.clone(), chain.clone())), cfg.api.port);
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.app.keeper_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.app.keeper_interval_secs,
        "Entering keeper loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = keeper.tick().await;
                log_tick_report(&report);
                // Encode under the lock, write after releasing it.
                let encoded = storage::encode_state(&*chain.lock().await);
                let saved = match encoded {
                    Ok(json) => storage::write_state_async(json, cfg.app.state_file.clone()).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = saved {
                    error!(error = %format!("{e:#}"), "Failed to save state");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let chain = chain.lock().await;
    storage::save_state(&*chain, Some(&cfg.app.state_file))?;
    info!(
        ticks = keeper.ticks(),
        bets = chain.bet_counter(),
        contract_balance = %format_ether(chain.contract_balance()),
        "WAGERCHAT shut down cleanly."
    );

    Ok(())
}

/// Fresh chain: empty escrow, registered feed, keeper float, and the
/// house deposit paid into the contract from the keeper account.
fn genesis(cfg: &AppConfig) -> Result<Chain<LocalPriceFeed>> {
    let feed = cfg.oracle.price_feed_id;
    let oracle = LocalPriceFeed::new(cfg.oracle.oracle_address, cfg.oracle.update_fee(), [feed]);
    let escrow = Escrow::new(cfg.escrow.contract_address, feed, cfg.escrow.params()?);
    let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
    let mut chain = Chain::new(escrow, oracle, now);

    let keeper = cfg.app.keeper_account;
    let float = parse_ether(&cfg.app.keeper_float_eth)?;
    let house = cfg.escrow.house_seed()?;
    chain.mint(keeper, float.saturating_add(house));
    chain.fund(keeper, house)?;

    info!(
        contract = %cfg.escrow.contract_address,
        feed = %feed,
        house = %format_ether(house),
        keeper_float = %format_ether(float),
        "Fresh chain created"
    );
    Ok(chain)
}

/// Log a human-readable tick summary.
fn log_tick_report(report: &TickReport) {
    info!(
        tick = report.tick_number,
        price = %report.price.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
        resolved = report.resolution.resolved.len(),
        failed = report.resolution.failed.len(),
        paid = %format_ether(report.resolution.total_paid()),
        keeper_balance = %format_ether(report.keeper_balance),
        contract_balance = %format_ether(report.contract_balance),
        "Tick complete"
    );
    if let Some(e) = &report.price_error {
        warn!(error = %e, "Price refresh failed this tick");
    }
    if let Some(e) = &report.resolution_error {
        warn!(error = %e, "Resolution pass failed this tick");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wagerchat=info"));

    let json_logging = std::env::var("WAGERCHAT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
