mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use ferriswitch::channel::PromptKind;
use ferriswitch::error::{ConnectErrorKind, PlanError, SessionError};
use ferriswitch::plan::{DesiredState, Mode, Plan, PlanRequest, Vlan, build_plan};
use ferriswitch::session::{
    FailureReason, SessionConfig, SessionState, capture_running_config, observe_vlans, run_plan,
};
use ferriswitch::transport::DeviceTarget;
use ferriswitch::{Error, Outcome, StepStatus};
use tokio_util::sync::CancellationToken;

use common::{FakeSwitch, flat_dialect, target};

fn mgmt_vlan() -> DesiredState {
    DesiredState::new().with_vlan(Vlan::new(10, "Mgmt").with_untagged([1]))
}

fn add_plan() -> Plan {
    build_plan(&flat_dialect(), &PlanRequest::new(mgmt_vlan(), Mode::Add)).unwrap()
}

async fn run(switch: &FakeSwitch, target: &DeviceTarget, plan: &Plan) -> Outcome {
    run_plan(
        switch,
        target,
        &flat_dialect(),
        plan,
        &SessionConfig::default(),
        &CancellationToken::new(),
    )
    .await
}

#[test]
fn test_add_plan_is_six_gated_steps() {
    let plan = add_plan();
    assert_eq!(
        plan.commands(),
        vec![
            "configure",
            "create vlan 10",
            "name vlan 10 Mgmt",
            "untagged vlan 10 port 1",
            "end",
            "write",
        ]
    );
    let expects: Vec<PromptKind> = plan.iter().map(|s| s.expect).collect();
    assert_eq!(
        expects,
        vec![
            PromptKind::Config,
            PromptKind::Config,
            PromptKind::Config,
            PromptKind::Config,
            PromptKind::Privileged,
            PromptKind::Privileged,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_add_applies_then_second_run_is_unchanged() {
    let _ = env_logger::builder().is_test(true).try_init();
    let switch = FakeSwitch::new();
    let plan = add_plan();

    let first = run(&switch, &target(), &plan).await;
    assert!(first.is_success(), "{:?}", first.error);
    assert!(first.changed);
    assert_eq!(first.final_state, SessionState::Closed);
    assert_eq!(switch.vlans().get(&10).map(String::as_str), Some("Mgmt"));

    let second = run(&switch, &target(), &plan).await;
    assert!(second.is_success(), "{:?}", second.error);
    assert!(!second.changed);
    assert!(
        second
            .steps
            .iter()
            .filter(|s| s.mutating)
            .all(|s| s.status == StepStatus::Unchanged)
    );

    assert_eq!(switch.opens(), 2);
    assert_eq!(switch.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_walks_modes_and_logs_out() {
    let switch = FakeSwitch::new();
    let outcome = run(&switch, &target(), &add_plan()).await;
    assert!(outcome.is_success());

    let received = switch.received();
    assert_eq!(received.first().map(String::as_str), Some("admin"));
    assert_eq!(&received[1..3], ["enable", "terminal length 0"]);
    assert_eq!(
        &received[received.len() - 2..],
        ["disable", "exit"]
    );
    assert!(!received.iter().any(|line| line == "pw1"));
    assert!(outcome.transcript.contains("Saved OK"));
}

#[tokio::test(start_paused = true)]
async fn test_fragmented_output() {
    let mut switch = FakeSwitch::new();
    switch.chunk = Some(3);

    let outcome = run(&switch, &target(), &add_plan()).await;
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert!(outcome.changed);
}

#[tokio::test(start_paused = true)]
async fn test_prompt_timeout_fails_and_closes_once() {
    let switch = FakeSwitch::new().hang_on("create vlan 10");

    let outcome = run(&switch, &target(), &add_plan()).await;
    assert_eq!(
        outcome.final_state,
        SessionState::Failed(FailureReason::ProtocolError)
    );
    match &outcome.error {
        Some(SessionError::Protocol { tail, .. }) => assert!(tail.contains("create vlan 10")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(switch.closes(), 1);

    let last = outcome.steps.last().unwrap();
    assert_eq!(last.command, "create vlan 10");
    assert_eq!(last.status, StepStatus::Rejected);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_step_aborts_plan() {
    let switch = FakeSwitch::new().reject("create vlan 10", "Error: VLAN 10 is in use");

    let outcome = run(&switch, &target(), &add_plan()).await;
    assert_eq!(
        outcome.error,
        Some(SessionError::CommandRejected {
            command: "create vlan 10".into(),
            message: "Error: VLAN 10 is in use".into(),
        })
    );
    assert_eq!(
        outcome.final_state,
        SessionState::Failed(FailureReason::CommandRejected)
    );
    assert_eq!(outcome.steps.len(), 2);
    assert_eq!(outcome.failures().count(), 1);
    assert!(!outcome.changed);
    assert!(!outcome.is_partial());

    assert!(!switch.received().iter().any(|l| l.starts_with("name vlan")));
    assert_eq!(switch.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_after_change_is_partial() {
    let switch = FakeSwitch::new().reject("untagged vlan 10 port 1", "Error: port 1 is in use");

    let outcome = run(&switch, &target(), &add_plan()).await;
    assert!(outcome.changed);
    assert!(outcome.is_partial());
    let applied: Vec<&str> = outcome
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Applied && s.mutating)
        .map(|s| s.command.as_str())
        .collect();
    assert_eq!(applied, vec!["create vlan 10", "name vlan 10 Mgmt"]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_save_confirmation_is_rejected() {
    let switch = FakeSwitch::new().reject("write", "Flash busy");

    let outcome = run(&switch, &target(), &add_plan()).await;
    let save = outcome.steps.last().unwrap();
    assert_eq!(save.command, "write");
    assert_eq!(save.status, StepStatus::Rejected);
    assert!(matches!(
        outcome.error,
        Some(SessionError::CommandRejected { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_observe_then_replace_continues_past_best_effort_failure() {
    let switch = FakeSwitch::new()
        .with_vlan(30, "Old")
        .reject("no vlan 30", "Error: VLAN 30 is in use");
    let dialect = flat_dialect();
    let cancel = CancellationToken::new();
    let config = SessionConfig::default();

    let observed = observe_vlans(&switch, &target(), &dialect, &config, &cancel)
        .await
        .unwrap();
    assert_eq!(observed.vlans.keys().copied().collect::<Vec<_>>(), vec![1, 30]);
    assert_eq!(observed.vlans[&30].name, "Old");

    let request = PlanRequest::new(mgmt_vlan(), Mode::Replace).observed(observed);
    let plan = build_plan(&dialect, &request).unwrap();
    assert!(plan.commands().contains(&"no vlan 30"));
    assert!(!plan.commands().contains(&"no vlan 1"));

    let outcome = run_plan(&switch, &target(), &dialect, &plan, &config, &cancel).await;
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert!(outcome.changed);

    let failed: Vec<&str> = outcome.failures().map(|s| s.command.as_str()).collect();
    assert_eq!(failed, vec!["no vlan 30"]);
    assert!(switch.received().iter().any(|l| l == "untagged vlan 10 port 1"));
    assert_eq!(switch.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_replace_frees_listed_members_before_deleting_their_vlan() {
    let switch = FakeSwitch::new()
        .with_vlan(30, "Guest Wifi")
        .with_member(30, 2);
    let dialect = flat_dialect();
    let cancel = CancellationToken::new();
    let config = SessionConfig::default();

    let observed = observe_vlans(&switch, &target(), &dialect, &config, &cancel)
        .await
        .unwrap();
    assert_eq!(observed.vlans[&30].name, "Guest Wifi");
    assert!(observed.vlans[&30].carries(2));

    let request = PlanRequest::new(mgmt_vlan(), Mode::Replace).observed(observed);
    let plan = build_plan(&dialect, &request).unwrap();
    let commands = plan.commands();
    let reset = commands.iter().position(|c| *c == "reset port 2").unwrap();
    let delete = commands.iter().position(|c| *c == "no vlan 30").unwrap();
    assert!(reset < delete);

    let outcome = run_plan(&switch, &target(), &dialect, &plan, &config, &cancel).await;
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.failures().count(), 0);
    assert!(!switch.vlans().contains_key(&30));
    assert_eq!(switch.members(10), BTreeSet::from([1]));
}

#[tokio::test(start_paused = true)]
async fn test_target_dialect_must_match() {
    let switch = FakeSwitch::new();
    let target = DeviceTarget::builder("fake-sw")
        .username("admin")
        .password("pw1")
        .dialect("cisco_ios")
        .build()
        .unwrap();

    let outcome = run(&switch, &target, &add_plan()).await;
    match &outcome.error {
        Some(SessionError::DialectMismatch { target, dialect }) => {
            assert_eq!(target, "cisco_ios");
            assert_eq!(dialect, "flat");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(
        outcome.final_state,
        SessionState::Failed(FailureReason::ProtocolError)
    );
    assert_eq!(switch.opens(), 0);
    assert_eq!(switch.closes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_capture_running_config() {
    let switch = FakeSwitch::new().with_vlan(10, "Mgmt").with_member(10, 1);

    let running = capture_running_config(
        &switch,
        &target(),
        &flat_dialect(),
        &SessionConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(running.contains("hostname sw"));
    assert!(running.contains("name vlan 10 Mgmt"));
    assert!(running.contains("untagged vlan 10 port 1"));
    assert!(!running.contains("show running-config"));
    assert!(!running.contains("sw#"));

    assert!(!switch.received().iter().any(|l| l == "configure"));
    assert_eq!(switch.opens(), 1);
    assert_eq!(switch.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_capture_running_config_needs_template() {
    let switch = FakeSwitch::new();
    let mut dialect = flat_dialect();
    dialect.commands.show_running_config.clear();

    let err = capture_running_config(
        &switch,
        &target(),
        &dialect,
        &SessionConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Plan(PlanError::MissingTemplate { ref operation, .. }) if operation == "show_running_config"
    ));
    assert_eq!(switch.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_never_opens_a_channel() {
    let mut switch = FakeSwitch::new();
    switch.refuse = Some(ConnectErrorKind::Unreachable);

    let outcome = run(&switch, &target(), &add_plan()).await;
    match &outcome.error {
        Some(SessionError::Connect(err)) => assert_eq!(err.kind, ConnectErrorKind::Unreachable),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(
        outcome.final_state,
        SessionState::Failed(FailureReason::Connect(ConnectErrorKind::Unreachable))
    );
    assert!(outcome.steps.is_empty());
    assert!(outcome.transcript.is_empty());
    assert_eq!(switch.opens(), 0);
    assert_eq!(switch.closes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let mut switch = FakeSwitch::new();
    switch.blackhole = true;

    let outcome = run(&switch, &target(), &add_plan()).await;
    match &outcome.error {
        Some(SessionError::Connect(err)) => assert_eq!(err.kind, ConnectErrorKind::Timeout),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(outcome.elapsed >= Duration::from_secs(2));
    assert!(outcome.elapsed < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_wrong_password_is_auth_failure() {
    let switch = FakeSwitch::new();
    let target = DeviceTarget::builder("fake-sw")
        .username("admin")
        .password("nope")
        .dialect("flat")
        .build()
        .unwrap();

    let outcome = run(&switch, &target, &add_plan()).await;
    assert!(matches!(outcome.error, Some(SessionError::AuthFailed { .. })));
    assert_eq!(
        outcome.final_state,
        SessionState::Failed(FailureReason::AuthFailed)
    );
    assert!(outcome.steps.is_empty());
    assert_eq!(switch.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_enable_password() {
    let mut switch = FakeSwitch::new();
    switch.enable_secret = Some("en".into());

    let with_secret = DeviceTarget::builder("fake-sw")
        .username("admin")
        .password("pw1")
        .enable_password("en")
        .dialect("flat")
        .build()
        .unwrap();
    let outcome = run(&switch, &with_secret, &add_plan()).await;
    assert!(outcome.is_success(), "{:?}", outcome.error);

    // Falls back to the login password, which the device refuses
    let outcome = run(&switch, &target(), &add_plan()).await;
    assert!(matches!(outcome.error, Some(SessionError::AuthFailed { .. })));
    assert!(!switch.received().iter().any(|l| l == "en" || l == "pw1"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_plan() {
    let switch = FakeSwitch::new().hang_on("create vlan 10");
    let dialect = flat_dialect();
    let plan = add_plan();
    let config = SessionConfig::default();
    let target = target();
    let cancel = CancellationToken::new();

    let (outcome, ()) = tokio::join!(
        run_plan(&switch, &target, &dialect, &plan, &config, &cancel),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    );

    assert!(outcome.is_cancelled());
    assert!(!outcome.is_partial());
    assert_eq!(outcome.final_state, SessionState::Closed);
    assert!(outcome.elapsed < Duration::from_secs(30));
    assert_eq!(switch.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_connect() {
    let switch = FakeSwitch::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = run_plan(
        &switch,
        &target(),
        &flat_dialect(),
        &add_plan(),
        &SessionConfig::default(),
        &cancel,
    )
    .await;
    assert!(outcome.is_cancelled());
    assert_eq!(switch.opens(), 0);
}
