use std::sync::Arc;

use anyhow::Context;
use serde_json::json;

use setup_wizard::config::WizardConfig;
use setup_wizard::flow::{CompletionCode, ExternalResult};
use setup_wizard::platform::SimulatedPlatform;
use setup_wizard::provisioning::ProvisioningQueryResult;
use setup_wizard::script::StepGraph;
use setup_wizard::session::{LaunchOutcome, WizardDeps, WizardSession};
use setup_wizard::store::{FileStore, MemoryStore, SettingsStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WizardConfig::from_env()?;
    let graph = StepGraph::from_file(&config.script_path)
        .with_context(|| format!("loading script {}", config.script_path.display()))?;

    eprintln!("Setup Wizard v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Script: {} ({} steps)", graph.origin(), graph.len());
    eprintln!("   State:  {}", config.state_dir.display());

    // ── Stores ──────────────────────────────────────────────────────────
    let durable: Arc<dyn SettingsStore> = Arc::new(
        FileStore::open(&config.state_dir)
            .await
            .with_context(|| format!("opening state dir {}", config.state_dir.display()))?,
    );
    let process: Arc<dyn SettingsStore> = Arc::new(MemoryStore::new());

    // ── Simulated platform ──────────────────────────────────────────────
    let platform = Arc::new(SimulatedPlatform::new());
    platform.set_auto_progress(true);

    if let Ok(steps) = std::env::var("SETUP_WIZARD_SIM_UNAVAILABLE") {
        for step in steps.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            platform.set_available(step, false);
        }
    }

    if let Ok(profile) = std::env::var("SETUP_WIZARD_SIM_PROFILE") {
        platform.queue_reply(
            "security_level",
            ExternalResult::Returned {
                code: CompletionCode::OK,
                data: Some(json!({ "settings": { "security_profile": profile } })),
            },
        );
        platform.set_provisioning_state(ProvisioningQueryResult::Pending);
    }

    let deps = WizardDeps::from_platform(Arc::clone(&platform), durable, process);
    let mut session = WizardSession::new(config, Arc::new(graph), deps);
    platform.connect(session.events());

    match session.launch().await? {
        LaunchOutcome::AlreadyComplete => {
            eprintln!("Setup already complete, nothing to do.");
            return Ok(());
        }
        LaunchOutcome::WipeRequired => {
            eprintln!("Device must be reset before setup can run again.");
            return Ok(());
        }
        LaunchOutcome::Started(status) | LaunchOutcome::Resumed(status) => {
            tracing::info!(?status, "Wizard running");
        }
    }

    let status = session.run().await?;
    eprintln!("Setup finished: {status:?}");
    for call in platform.calls() {
        eprintln!("   {call}");
    }

    Ok(())
}
