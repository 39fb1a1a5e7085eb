//! sentineld - Sentinel Monitoring Core daemon
//!
//! This daemon:
//! 1. Derives the store key from the operator passphrase
//! 2. Starts a monitoring session (camera + optional audio)
//! 3. Serves the local monitor API for the surrounding web layer
//! 4. Logs session health periodically until interrupted

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sentinel_core::api::{ApiConfig, ApiServer};
use sentinel_core::{
    AudioChannel, EncryptionCodec, MonitoringSupervisor, SecureStore, SentinelConfig,
    StartOutcome, StopOutcome,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera device index override (maps to /dev/video<N>).
    #[arg(long)]
    camera_index: Option<u32>,
    /// Disable audio capture and transcription for this session.
    #[arg(long)]
    no_audio: bool,
    /// Print the derived store key (hex) on startup. Handle securely.
    #[arg(long)]
    print_key: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = SentinelConfig::load()?;

    let passphrase = std::env::var("SENTINEL_PASSPHRASE")
        .map_err(|_| anyhow!("SENTINEL_PASSPHRASE must be set"))?;
    if passphrase.trim().is_empty() || passphrase.trim() == "change-me" {
        return Err(anyhow!("SENTINEL_PASSPHRASE must not use the placeholder value"));
    }

    let codec = EncryptionCodec::from_password(&passphrase);
    if args.print_key {
        log::warn!("store key (handle securely): {}", codec.key_hex());
    }
    let store = Arc::new(SecureStore::new(codec));

    let inference = cfg.build_inference();
    log::info!(
        "inference backend: {} ({} / {})",
        cfg.inference.provider,
        cfg.inference.url,
        cfg.inference.model
    );
    let audio = AudioChannel::new(cfg.audio.clone(), cfg.build_transcriber())?;

    let supervisor = Arc::new(MonitoringSupervisor::new(
        cfg.monitor_config(),
        cfg.camera.clone(),
        audio,
        Arc::clone(&store),
        inference,
    )?);

    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
        token_path: cfg.api_token_path.clone(),
    };
    let api_handle = ApiServer::new(api_config, Arc::clone(&supervisor)).spawn()?;
    log::info!("monitor api listening on {}", api_handle.addr);
    if let Some(path) = &api_handle.token_path {
        log::info!("monitor api capability token written to {}", path.display());
    } else {
        log::warn!(
            "monitor api capability token (handle securely): {}",
            api_handle.token
        );
    }

    match supervisor.start_monitoring(args.camera_index, !args.no_audio) {
        StartOutcome::Started {
            camera,
            audio_enabled,
        } => {
            log::info!(
                "monitoring {} ({}x{} @ {} fps), audio={}",
                camera.device,
                camera.width,
                camera.height,
                camera.fps,
                audio_enabled
            );
        }
        StartOutcome::CameraUnavailable {
            error,
            troubleshooting,
        } => {
            log::error!("camera unavailable: {}", error);
            for hint in troubleshooting {
                log::error!("  hint: {}", hint);
            }
            return Err(anyhow!("failed to start monitoring"));
        }
        StartOutcome::AlreadyMonitoring => {
            log::warn!("monitoring already active");
        }
        StartOutcome::Error { reason } => return Err(anyhow!(reason)),
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_signal.store(true, Ordering::SeqCst);
    })?;

    let mut ticks = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));
        ticks += 1;
        if ticks % 5 == 0 {
            let stats = supervisor.statistics();
            log::info!(
                "health: frames={} movements={} analyses={} transcriptions={} audio_level={:.1}",
                stats.frames_total,
                stats.movements_detected,
                stats.analyses_run,
                stats.transcriptions_run,
                stats.audio_level
            );
        }
    }

    log::info!("shutting down");
    match supervisor.stop_monitoring() {
        StopOutcome::Stopped {
            stats,
            forced_release,
        } => {
            if forced_release {
                log::warn!("worker resources were force-released");
            }
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        StopOutcome::NotMonitoring => {}
    }
    api_handle.stop()?;
    Ok(())
}
