//! demo - end-to-end synthetic run of the monitoring pipeline
//!
//! Runs a short session against the synthetic camera and microphone with the
//! stub inference backend, then prints the statistics and the decrypted
//! analysis records.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use sentinel_core::{
    AnalysisEntry, AudioChannel, AudioConfig, CameraConfig, EncryptionCodec, MonitorConfig,
    MonitoringSupervisor, SecureStore, StartOutcome, StopOutcome, StubInference, StubTranscriber,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Session length in seconds.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Spacing between inference calls in milliseconds.
    #[arg(long, default_value_t = 1000)]
    analysis_interval_ms: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let store = Arc::new(SecureStore::new(EncryptionCodec::from_password(
        "demo-passphrase",
    )));
    let inference = Arc::new(StubInference::new(
        "Single moving object, steady pace; consistent with routine foot traffic.",
    ));
    let audio = AudioChannel::new(
        AudioConfig::default(),
        Arc::new(StubTranscriber::with_text("hello from the demo microphone")),
    )?;

    let config = MonitorConfig {
        analysis_interval: Duration::from_millis(args.analysis_interval_ms),
        transcription_interval: Duration::from_millis(args.analysis_interval_ms),
        ..MonitorConfig::default()
    };
    let supervisor = MonitoringSupervisor::new(
        config,
        CameraConfig::default(),
        audio,
        Arc::clone(&store),
        inference,
    )?;

    match supervisor.start_monitoring(None, true) {
        StartOutcome::Started { camera, .. } => {
            log::info!("demo session running against {}", camera.device)
        }
        other => {
            log::error!("failed to start demo session: {:?}", other);
            return Ok(());
        }
    }

    std::thread::sleep(Duration::from_secs(args.seconds));

    let StopOutcome::Stopped { stats, .. } = supervisor.stop_monitoring() else {
        return Ok(());
    };

    println!("--- statistics ---");
    println!("{}", serde_json::to_string_pretty(&stats)?);

    println!("--- decrypted analysis records ---");
    for entry in supervisor.movement_analysis(10, true) {
        if let AnalysisEntry::Decrypted { key, record } = entry {
            println!("{}: {}", key, record);
        }
    }

    println!("--- stored keys ---");
    for key in store.list_keys() {
        println!("{}", key);
    }
    Ok(())
}
