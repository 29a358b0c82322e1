use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use clap::Parser;
use futures_util::future::try_join_all;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod app_config;
mod app_dirs;
mod cli;
mod core;
mod errors;
mod health_check;
mod jsonrpc_event;
mod net_utils;
mod prom;
#[cfg(test)]
mod tests;
mod tracing_setup;

use app_config::BridgeConfig;
use cli::{Cli, apply_cli_overrides};
use core::kaspaapi::KaspaApi;
use core::log_colors::LogColors;
use core::stratum_server::{BridgeConfig as CoreBridgeConfig, listen_and_serve_with_shutdown};

static CONFIG_LOADED_FROM: OnceLock<Option<PathBuf>> = OnceLock::new();
static REQUESTED_CONFIG_PATH: OnceLock<PathBuf> = OnceLock::new();

fn initialize_config() -> BridgeConfig {
    let config_path = REQUESTED_CONFIG_PATH.get().map(PathBuf::as_path).unwrap_or_else(|| Path::new("config.yaml"));
    let exe_base = std::env::current_exe().ok().and_then(|p| p.parent().map(|p| p.to_path_buf()));
    let exe_root = exe_base.as_ref().and_then(|p| p.parent()).map(|p| p.to_path_buf());

    let mut candidates: Vec<PathBuf> = vec![config_path.to_path_buf()];
    if config_path.is_relative() {
        if let Some(exe_base) = exe_base.as_ref() {
            candidates.push(exe_base.join(config_path));
        }
        if let Some(exe_root) = exe_root.as_ref() {
            candidates.push(exe_root.join(config_path));
        }
    }

    let mut loaded_from: Option<PathBuf> = None;
    let mut config: Option<BridgeConfig> = None;
    for path in candidates.iter() {
        if path.exists() {
            let content = std::fs::read_to_string(path).unwrap_or_else(|e| {
                eprintln!("failed to read config file {}: {}", path.display(), e);
                std::process::exit(1);
            });
            let parsed = BridgeConfig::from_yaml(&content).unwrap_or_else(|e| {
                eprintln!("failed to parse config file {}: {}", path.display(), e);
                std::process::exit(1);
            });
            config = Some(parsed);
            loaded_from = Some(path.clone());
            break;
        }
    }

    let _ = CONFIG_LOADED_FROM.set(loaded_from);
    config.unwrap_or_default()
}

fn log_bridge_configuration(config: &BridgeConfig) {
    let instance_count = config.instances.len();
    tracing::info!("----------------------------------");
    tracing::info!("initializing bridge ({} instance{})", instance_count, if instance_count > 1 { "s" } else { "" });
    tracing::info!("\tkaspad:          {} (shared)", config.global.kaspad_address);
    tracing::info!("\tblock wait:      {:?}", config.global.block_wait_time);
    tracing::info!("\tprint stats:     {}", config.global.print_stats);
    tracing::info!("\tvar diff:        {}", config.global.var_diff);
    tracing::info!("\tshares per min:  {}", config.global.shares_per_min);
    tracing::info!("\tvar diff stats:  {}", config.global.var_diff_stats);
    tracing::info!("\tpow2 clamp:      {}", config.global.pow2_clamp);
    tracing::info!("\thealth check:    {}", config.global.health_check_port);

    for (idx, instance) in config.instances.iter().enumerate() {
        tracing::info!("\t--- Instance {} ---", idx + 1);
        tracing::info!("\t  stratum:       {}", instance.stratum_port);
        tracing::info!("\t  min diff:      {}", instance.min_share_diff);
        if let Some(ref prom_port) = instance.prom_port {
            tracing::info!("\t  prom:          {}", prom_port);
        }
    }
    tracing::info!("----------------------------------");
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let requested_config = cli.config.clone().unwrap_or_else(|| PathBuf::from("config.yaml"));
    let _ = REQUESTED_CONFIG_PATH.set(requested_config.clone());

    let mut config = initialize_config();
    apply_cli_overrides(&mut config, &cli)?;

    LogColors::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,kaspa_stratum_bridge=info"));

    static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
    if let Some(guard) = tracing_setup::init_tracing(&config, filter, false) {
        let _ = FILE_GUARD.set(guard);
    }

    if CONFIG_LOADED_FROM.get().and_then(|p| p.as_ref()).is_none() {
        tracing::warn!("config.yaml not found, using defaults (requested: {:?})", requested_config);
    }

    log_bridge_configuration(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if !config.global.health_check_port.is_empty() {
        health_check::spawn_health_check_server(config.global.health_check_port.clone());
    }

    let kaspa_api = KaspaApi::new_with_shutdown(
        config.global.kaspad_address.clone(),
        config.global.block_wait_time,
        config.global.coinbase_tag_suffix.clone(),
        Some(shutdown_rx.clone()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to create Kaspa API client: {}", e))?;

    tracing::info!("waiting for node to fully sync before starting stratum listeners");
    kaspa_api
        .wait_for_sync_with_shutdown(true, shutdown_rx.clone())
        .await
        .map_err(|e| anyhow::anyhow!("failed while waiting for node sync: {}", e))?;
    tracing::info!("node is synced, starting stratum listeners");

    let mut instance_handles = Vec::new();
    for (idx, instance_config) in config.instances.iter().enumerate() {
        let instance_num = idx + 1;
        let instance = instance_config.clone();
        let global = config.global.clone();
        let kaspa_api_clone = Arc::clone(&kaspa_api);
        let instance_shutdown_rx = shutdown_rx.clone();
        let is_first_instance = idx == 0;
        let instance_id_str = LogColors::format_instance_id(instance_num);

        if let Some(ref prom_port) = instance.prom_port {
            let prom_port = prom_port.clone();
            let instance_id_prom = instance_id_str.clone();
            tokio::spawn(async move {
                if let Err(e) = prom::start_prom_server(&prom_port, &instance_id_prom).await {
                    tracing::error!("[Instance {}] Prometheus server error: {}", instance_num, e);
                }
            });
        }

        let handle = tokio::spawn(async move {
            tracing_setup::register_instance(instance_id_str.clone(), instance_num);

            let colored_instance_id = LogColors::format_instance_id(instance_num);
            tracing::info!("{} Starting on stratum port {}", colored_instance_id, instance.stratum_port);

            let bridge_config = CoreBridgeConfig {
                instance_id: instance_id_str.clone(),
                stratum_port: instance.stratum_port.clone(),
                kaspad_address: global.kaspad_address.clone(),
                prom_port: String::new(),
                print_stats: global.print_stats,
                log_to_file: instance.log_to_file.unwrap_or(global.log_to_file),
                health_check_port: String::new(),
                block_wait_time: instance.block_wait_time.unwrap_or(global.block_wait_time),
                min_share_diff: instance.min_share_diff,
                var_diff: instance.var_diff.unwrap_or(global.var_diff),
                shares_per_min: instance.shares_per_min.unwrap_or(global.shares_per_min),
                var_diff_stats: instance.var_diff_stats.unwrap_or(global.var_diff_stats),
                extranonce_size: instance.extranonce_size.unwrap_or(global.extranonce_size),
                pow2_clamp: instance.pow2_clamp.unwrap_or(global.pow2_clamp),
            };

            listen_and_serve_with_shutdown(
                bridge_config,
                Arc::clone(&kaspa_api_clone),
                if is_first_instance { Some(kaspa_api_clone) } else { None },
                instance_shutdown_rx,
            )
            .await
            .map_err(|e| format!("[Instance {}] Bridge server error: {}", instance_num, e))
        });
        instance_handles.push(handle);
    }

    tracing::info!("all {} instance(s) started, waiting for completion...", config.instances.len());

    let bridge_fut = async {
        match try_join_all(instance_handles).await {
            Ok(_) => {
                tracing::info!("all instances completed successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!("one or more instances failed: {:?}", e);
                Err(anyhow::anyhow!("instance error: {:?}", e))
            }
        }
    };
    tokio::pin!(bridge_fut);

    tokio::select! {
        res = &mut bridge_fut => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, starting shutdown");
            let _ = shutdown_tx.send(true);

            let res = tokio::select! {
                res = &mut bridge_fut => res,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("second Ctrl+C received, forcing exit");
                    std::process::exit(130);
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
                    tracing::warn!("shutdown drain window elapsed, exiting");
                    Ok(())
                }
            };

            if let Err(e) = &res {
                tracing::warn!("shutdown completed with error: {e}");
            }
            res
        }
    }
}
