//! End-to-end tests of the wizard session over the simulated platform.
//!
//! Each test builds a session from an inline script, drives it with the
//! events the platform would post, and checks the durable outcome.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use setup_wizard::config::WizardConfig;
use setup_wizard::flow::{CompletionCode, ExternalResult};
use setup_wizard::platform::{DeviceControl, SimulatedPlatform};
use setup_wizard::provisioning::{ProvisioningPhase, ProvisioningQueryResult};
use setup_wizard::script::StepGraph;
use setup_wizard::session::{LaunchOutcome, SessionStatus, WizardDeps, WizardEvent, WizardSession};
use setup_wizard::store::{FileStore, MemoryStore, Scope, SettingsStore, settings_keys};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const CHAIN: &str = r#"{
    "steps": [
        { "id": "a", "action": "setup.a", "transitions": [ { "next": "b" } ] },
        { "id": "b", "action": "setup.b", "transitions": [ { "next": "c" } ] },
        { "id": "c", "action": "setup.c", "transitions": [ { "next": null } ] }
    ]
}"#;

const SECURITY: &str = r#"{
    "steps": [
        { "id": "security_level", "action": "setup.SECURITY_LEVEL" }
    ]
}"#;

struct Harness {
    sim: Arc<SimulatedPlatform>,
    durable: Arc<dyn SettingsStore>,
    process: Arc<dyn SettingsStore>,
    session: WizardSession,
}

fn config() -> WizardConfig {
    WizardConfig {
        relaunch_check_delay: Duration::from_millis(1000),
        max_relaunch_checks: 3,
        permission_packages: vec!["org.example.store".into()],
        ..Default::default()
    }
}

fn harness_with(
    script: &str,
    sim: Arc<SimulatedPlatform>,
    durable: Arc<dyn SettingsStore>,
    process: Arc<dyn SettingsStore>,
) -> Harness {
    let graph = Arc::new(StepGraph::from_json(script).unwrap());
    let deps = WizardDeps::from_platform(sim.clone(), durable.clone(), process.clone());
    let session = WizardSession::new(config(), graph, deps);
    Harness {
        sim,
        durable,
        process,
        session,
    }
}

fn harness(script: &str) -> Harness {
    harness_with(
        script,
        Arc::new(SimulatedPlatform::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new()),
    )
}

fn ok(step: &str) -> WizardEvent {
    WizardEvent::ExternalResult {
        step: step.to_string(),
        result: ExternalResult::ok(),
    }
}

fn choose_profile(profile: &str) -> WizardEvent {
    WizardEvent::ExternalResult {
        step: "security_level".to_string(),
        result: ExternalResult::Returned {
            code: CompletionCode::OK,
            data: Some(json!({ "settings": { "security_profile": profile } })),
        },
    }
}

fn in_flow(step: &str) -> SessionStatus {
    SessionStatus::InFlow {
        step: step.to_string(),
    }
}

async fn setup_complete(store: &dyn SettingsStore) -> bool {
    store
        .get_bool(Scope::Device, settings_keys::USER_SETUP_COMPLETE)
        .await
        .unwrap()
}

#[tokio::test]
async fn missing_target_after_ok_ends_flow_exactly_once() {
    // b only routes OK; NOT_FOUND has no SKIP entry and no default.
    let mut h = harness(
        r#"{ "steps": [
            { "id": "a", "action": "setup.a", "transitions": [ { "code": "ok", "next": "b" } ] },
            { "id": "b", "action": "setup.b", "transitions": [ { "code": "ok", "next": "c" } ] },
            { "id": "c", "action": "setup.c" }
        ] }"#,
    );
    h.sim.set_unresolvable("setup.b");

    assert_eq!(
        h.session.launch().await.unwrap(),
        LaunchOutcome::Started(in_flow("a"))
    );
    assert_eq!(h.session.handle(ok("a")).await.unwrap(), SessionStatus::Animating);
    assert_eq!(h.sim.count("animation_start"), 1);
    assert_eq!(h.sim.count("launch:c"), 0);

    // Stray results after the end change nothing.
    assert_eq!(h.session.handle(ok("b")).await.unwrap(), SessionStatus::Animating);
    assert_eq!(h.sim.count("animation_start"), 1);

    let instance = h.session.host_id();
    assert_eq!(
        h.session
            .handle(WizardEvent::AnimationEnded { instance })
            .await
            .unwrap(),
        SessionStatus::Complete
    );
    assert!(setup_complete(h.durable.as_ref()).await);
}

#[tokio::test]
async fn unavailable_step_is_never_launched() {
    let mut h = harness(CHAIN);
    h.sim.set_available("b", false);

    h.session.launch().await.unwrap();
    assert_eq!(h.session.handle(ok("a")).await.unwrap(), in_flow("c"));
    assert_eq!(h.sim.count("launch:b"), 0);
}

#[tokio::test]
async fn back_request_crosses_step_that_became_unavailable() {
    let mut h = harness(CHAIN);
    h.session.launch().await.unwrap();
    h.session.handle(ok("a")).await.unwrap();
    h.session.handle(ok("b")).await.unwrap();

    h.sim.set_available("b", false);
    assert_eq!(
        h.session.handle(WizardEvent::BackRequest).await.unwrap(),
        in_flow("a")
    );
    assert_eq!(h.sim.count("launch:a"), 2);
    assert_eq!(h.sim.count("launch:b"), 1);
}

#[tokio::test]
async fn setup_complete_flag_prevents_reentry() {
    let h = harness(CHAIN);
    h.durable
        .put_bool(Scope::Device, settings_keys::USER_SETUP_COMPLETE, true)
        .await
        .unwrap();
    let mut session = h.session;

    assert_eq!(session.launch().await.unwrap(), LaunchOutcome::AlreadyComplete);
    assert!(h.sim.launched().is_empty());
}

#[tokio::test]
async fn disabled_entry_point_prevents_reentry() {
    let mut h = harness(CHAIN);
    h.sim.set_entry_point_enabled(false);

    assert_eq!(h.session.launch().await.unwrap(), LaunchOutcome::AlreadyComplete);
    assert!(h.sim.launched().is_empty());
}

#[tokio::test]
async fn unsupported_provisioning_skips_enrollment() {
    let mut h = harness(SECURITY);
    h.sim
        .set_provisioning_state(ProvisioningQueryResult::Unsupported);

    h.session.launch().await.unwrap();
    assert_eq!(
        h.session.handle(choose_profile("safer")).await.unwrap(),
        SessionStatus::Animating
    );
    assert_eq!(h.sim.count("start_enrollment"), 0);
    assert_eq!(h.sim.count("start_finalization"), 0);
    assert_eq!(h.sim.count("install_companion_apps"), 0);
}

/// Launch with the safest profile and stop inside enrollment.
async fn enrolling(h: &mut Harness) {
    h.sim.set_auto_progress(true);
    h.sim.set_provisioning_state(ProvisioningQueryResult::Pending);

    h.session.launch().await.unwrap();
    assert_eq!(
        h.session.handle(choose_profile("safest")).await.unwrap(),
        SessionStatus::Provisioning
    );
}

#[tokio::test(start_paused = true)]
async fn provisioning_resumes_across_host_recreation() {
    let mut h = harness(SECURITY);
    enrolling(&mut h).await;

    // Enrollment recreates the host mid-flight: resume, do not restart.
    assert_eq!(
        h.session.recreate_host().await.unwrap(),
        SessionStatus::Provisioning
    );
    assert_eq!(h.sim.count("start_enrollment"), 1);

    assert_eq!(
        h.session.handle(WizardEvent::EnrollmentReturned).await.unwrap(),
        SessionStatus::Provisioning
    );
    assert_eq!(
        h.session
            .handle(WizardEvent::FinalizationReturned)
            .await
            .unwrap(),
        SessionStatus::AwaitingRelaunch
    );

    // Finalization makes the platform relaunch the host.
    assert_eq!(
        h.session.recreate_host().await.unwrap(),
        SessionStatus::AwaitingRelaunch
    );
    let status = timeout(TEST_TIMEOUT, h.session.next_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, SessionStatus::Animating);

    let instance = h.session.host_id();
    assert_eq!(
        h.session
            .handle(WizardEvent::AnimationEnded { instance })
            .await
            .unwrap(),
        SessionStatus::Complete
    );
    assert!(setup_complete(h.durable.as_ref()).await);
    assert_eq!(
        h.session.sequencer().coordinator().phase().await.unwrap(),
        ProvisioningPhase::Done
    );
}

#[tokio::test(start_paused = true)]
async fn recreation_during_enrollment_does_not_end_relaunch_wait() {
    let mut h = harness(SECURITY);
    enrolling(&mut h).await;
    h.session.recreate_host().await.unwrap();

    h.session.handle(WizardEvent::EnrollmentReturned).await.unwrap();
    assert_eq!(
        h.session
            .handle(WizardEvent::FinalizationReturned)
            .await
            .unwrap(),
        SessionStatus::AwaitingRelaunch
    );

    // No recreation since finalization: keep waiting.
    let status = timeout(TEST_TIMEOUT, h.session.next_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, SessionStatus::AwaitingRelaunch);
    assert_eq!(
        h.session.sequencer().coordinator().phase().await.unwrap(),
        ProvisioningPhase::AwaitingSystemRelaunch
    );
    assert_eq!(h.sim.count("animation_start"), 0);
}

#[tokio::test]
async fn wipe_flag_is_represented_on_every_launch() {
    let tmp = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimulatedPlatform::new());
    sim.set_provisioning_state(ProvisioningQueryResult::Complete);
    sim.fail_companion_install(true);

    {
        let durable: Arc<dyn SettingsStore> = Arc::new(FileStore::open(tmp.path()).await.unwrap());
        let mut h = harness_with(SECURITY, sim.clone(), durable, Arc::new(MemoryStore::new()));
        h.session.launch().await.unwrap();
        assert_eq!(
            h.session.handle(choose_profile("safer")).await.unwrap(),
            SessionStatus::WipeRequired
        );
        assert_eq!(
            h.session.sequencer().coordinator().phase().await.unwrap(),
            ProvisioningPhase::None
        );
    }
    assert_eq!(sim.count("present_reset_dialog"), 1);

    // A fresh process: new process store, same durable files.
    let durable: Arc<dyn SettingsStore> = Arc::new(FileStore::open(tmp.path()).await.unwrap());
    let mut h = harness_with(SECURITY, sim.clone(), durable, Arc::new(MemoryStore::new()));
    assert_eq!(h.session.launch().await.unwrap(), LaunchOutcome::WipeRequired);
    assert_eq!(sim.count("present_reset_dialog"), 2);
    assert_eq!(sim.count("launch:"), 1);
    assert!(!setup_complete(h.durable.as_ref()).await);
}

#[tokio::test(start_paused = true)]
async fn connected_platform_runs_to_completion() {
    let tmp = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimulatedPlatform::new());
    sim.set_auto_progress(true);
    sim.set_provisioning_state(ProvisioningQueryResult::Pending);
    sim.set_available("b", false);
    sim.queue_reply(
        "a",
        ExternalResult::Returned {
            code: CompletionCode::OK,
            data: Some(json!({
                "settings": { "security_profile": "safer", "navigation_mode": "gestural" }
            })),
        },
    );

    let durable: Arc<dyn SettingsStore> = Arc::new(FileStore::open(tmp.path()).await.unwrap());
    let mut h = harness_with(CHAIN, sim.clone(), durable, Arc::new(MemoryStore::new()));
    sim.connect(h.session.events());

    h.session.launch().await.unwrap();
    let status = timeout(TEST_TIMEOUT, h.session.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, SessionStatus::Complete);

    // No relaunch was observed, so all bounded checks ran before moving on.
    assert_eq!(sim.count("launch:b"), 0);
    assert_eq!(sim.count("start_finalization"), 1);
    assert_eq!(sim.count("grant_default_permissions:org.example.store"), 1);
    assert!(!sim.is_entry_point_enabled().await);
    assert!(sim.status_bar_enabled());

    let reopened = FileStore::open(tmp.path()).await.unwrap();
    assert!(setup_complete(&reopened).await);
    assert!(reopened
        .get(Scope::App, settings_keys::SETUP_COMPLETED_AT)
        .await
        .unwrap()
        .is_some());
    assert!(h
        .process
        .get_bool(Scope::App, settings_keys::SETTINGS_APPLIED)
        .await
        .unwrap());
}
