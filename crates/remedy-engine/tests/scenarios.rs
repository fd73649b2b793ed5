//! End-to-end runs through the remediation state machine with fake
//! policy service, connector and escalation channel

use pretty_assertions::assert_eq;
use remedy_approval::ApprovalOutcome;
use remedy_connector::ConnectorRouter;
use remedy_core::{
    ApprovalStatus, DecisionOrigin, Environment, IndeterminateHealthPolicy, RemediationAction,
    RemediationState, RemedyConfig, RiskLevel, RunOutcome, ValidationOutcome, COMMAND_PARAMETER,
    FAILED_STEP, PROVIDER_PARAMETER,
};
use remedy_engine::RemediationRunner;
use remedy_policy::PolicyClient;
use remedy_test_utils::{
    production_action, test_config, ExecuteBehavior, FakeConnector, HealthBehavior,
    RecordingNotifier, StaticPolicyClient, UnreachablePolicyClient,
};
use std::sync::Arc;

struct Harness {
    runner: RemediationRunner,
    connector: Arc<FakeConnector>,
    notifier: Arc<RecordingNotifier>,
}

fn harness_with(
    config: &RemedyConfig,
    policy: Arc<dyn PolicyClient>,
    connector: FakeConnector,
) -> Harness {
    let connector = Arc::new(connector);
    let notifier = Arc::new(RecordingNotifier::default());
    let router = ConnectorRouter::new().with_connector(connector.clone());
    let runner = RemediationRunner::with_services(config, policy, notifier.clone(), router);
    Harness {
        runner,
        connector,
        notifier,
    }
}

fn harness(connector: FakeConnector) -> Harness {
    harness_with(
        &test_config(),
        Arc::new(StaticPolicyClient::allow()),
        connector,
    )
}

fn nodes(state: &RemediationState) -> Vec<&str> {
    state
        .reasoning_chain
        .iter()
        .map(|s| s.node.as_str())
        .collect()
}

fn spawn_run(
    runner: &RemediationRunner,
    action: RemediationAction,
) -> tokio::task::JoinHandle<RemediationState> {
    let runner = runner.clone();
    tokio::spawn(async move { runner.remediate(action, None, None).await })
}

async fn escalations(notifier: &RecordingNotifier) -> usize {
    for _ in 0..16 {
        if !notifier.records().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    notifier.records().len()
}

// Scenario A
#[tokio::test]
async fn medium_risk_action_runs_without_approval() {
    let h = harness(FakeConnector::new("fake"));
    let state = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    assert_eq!(state.assessed_risk, Some(RiskLevel::Medium));
    assert_eq!(state.approval_status, None);
    assert_eq!(
        nodes(&state),
        vec![
            "evaluate_policy",
            "resolve_playbook",
            "assess_risk",
            "create_snapshot",
            "execute_action",
            "validate_health",
        ]
    );
    assert!(state.snapshot.is_some());
    assert!(state.execution_result.as_ref().unwrap().is_success());
    assert_eq!(state.validation, Some(ValidationOutcome::Passed));
    assert_eq!(state.outcome, Some(RunOutcome::Succeeded));
    assert_eq!(state.current_step, "validate_health");
    assert_eq!(state.error, None);
    assert!(state.duration_ms.is_some());
    assert_eq!(
        h.connector.methods(),
        vec!["create_snapshot", "execute_action", "get_health"]
    );
    assert_eq!(h.connector.released(), vec![state.snapshot.unwrap().id]);
}

#[tokio::test]
async fn reasoning_chain_is_numbered_in_order() {
    let h = harness(FakeConnector::new("fake"));
    let state = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    let numbers: Vec<u32> = state.reasoning_chain.iter().map(|s| s.step).collect();
    assert_eq!(numbers, (1..=6).collect::<Vec<u32>>());
    let playbook = &state.reasoning_chain[1];
    assert_eq!(playbook.output_summary, "provider fake, health timeout 30s");
    assert_eq!(state.reasoning_chain[0].tool.as_deref(), Some("policy_service"));
}

// Scenario B
#[tokio::test]
async fn high_risk_action_proceeds_after_one_approval() {
    let h = harness(FakeConnector::new("fake"));
    let mut announcements = h.runner.approvals().subscribe();
    let run = spawn_run(&h.runner, production_action("rollback_deployment"));

    let request = announcements.recv().await.unwrap();
    assert_eq!(request.risk, RiskLevel::High);
    assert_eq!(request.required_approvals, 1);
    assert!(h.connector.calls().is_empty());

    let outcome = h.runner.approvals().approve(&request.id, "sre-lead").await;
    assert_eq!(outcome, Ok(ApprovalOutcome::Approved));

    let state = run.await.unwrap();
    assert_eq!(state.approval_request_id.as_deref(), Some(request.id.as_str()));
    assert_eq!(state.approval_status, Some(ApprovalStatus::Approved));
    assert_eq!(state.approvers, vec!["sre-lead".to_string()]);
    assert_eq!(state.outcome, Some(RunOutcome::Succeeded));
    assert_eq!(h.connector.count("execute_action"), 1);
}

// Scenario C
#[tokio::test]
async fn critical_action_needs_two_distinct_approvers() {
    let h = harness(FakeConnector::new("fake"));
    let approvals = h.runner.approvals().clone();
    let mut announcements = approvals.subscribe();
    let run = spawn_run(&h.runner, production_action("drain_node"));

    let request = announcements.recv().await.unwrap();
    assert_eq!(request.risk, RiskLevel::Critical);
    assert_eq!(request.required_approvals, 2);

    assert_eq!(
        approvals.approve(&request.id, "alice").await,
        Ok(ApprovalOutcome::Recorded {
            approvals: 1,
            required: 2
        })
    );
    assert_eq!(
        approvals.approve(&request.id, "alice").await,
        Ok(ApprovalOutcome::Duplicate)
    );
    let record = approvals.status(&request.id).await.unwrap();
    assert_eq!(record.status, ApprovalStatus::Pending);
    assert_eq!(approvals.pending().len(), 1);
    assert!(h.connector.calls().is_empty());

    assert_eq!(
        approvals.approve(&request.id, "bob").await,
        Ok(ApprovalOutcome::Approved)
    );
    let state = run.await.unwrap();

    assert_eq!(state.approvers, vec!["alice".to_string(), "bob".to_string()]);
    assert_eq!(state.outcome, Some(RunOutcome::Succeeded));
    assert!(approvals.pending().is_empty());
}

#[tokio::test]
async fn denial_wins_over_collected_approvals() {
    let h = harness(FakeConnector::new("fake"));
    let approvals = h.runner.approvals().clone();
    let mut announcements = approvals.subscribe();
    let run = spawn_run(&h.runner, production_action("drain_node"));

    let request = announcements.recv().await.unwrap();
    approvals.approve(&request.id, "alice").await.unwrap();
    assert_eq!(
        approvals.deny(&request.id, "bob").await,
        Ok(ApprovalOutcome::Denied)
    );
    let state = run.await.unwrap();

    assert_eq!(state.approval_status, Some(ApprovalStatus::Denied));
    assert_eq!(state.outcome, Some(RunOutcome::ApprovalNotGranted));
    assert_eq!(state.current_step, "request_approval");
    assert!(state.snapshot.is_none());
    assert!(h.connector.calls().is_empty());
}

#[tokio::test]
async fn replayed_approval_after_resolution_changes_nothing() {
    let h = harness(FakeConnector::new("fake"));
    let approvals = h.runner.approvals().clone();
    let mut announcements = approvals.subscribe();
    let run = spawn_run(&h.runner, production_action("rollback_deployment"));

    let request = announcements.recv().await.unwrap();
    approvals.approve(&request.id, "sre-lead").await.unwrap();
    run.await.unwrap();

    assert_eq!(
        approvals.approve(&request.id, "sre-lead").await,
        Ok(ApprovalOutcome::AlreadyResolved(ApprovalStatus::Approved))
    );
    assert_eq!(
        approvals.deny(&request.id, "mallory").await,
        Ok(ApprovalOutcome::AlreadyResolved(ApprovalStatus::Approved))
    );
    let record = approvals.status(&request.id).await.unwrap();
    assert_eq!(record.status, ApprovalStatus::Approved);
    assert_eq!(h.connector.count("execute_action"), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_without_approvals_touches_no_connector() {
    let h = harness(FakeConnector::new("fake"));
    let state = h
        .runner
        .remediate(production_action("drain_node"), None, None)
        .await;

    assert_eq!(state.approval_status, Some(ApprovalStatus::Timeout));
    assert!(state.approvers.is_empty());
    assert_eq!(state.outcome, Some(RunOutcome::ApprovalNotGranted));
    assert!(h.connector.calls().is_empty());
    assert!(h.runner.approvals().pending().is_empty());

    assert_eq!(escalations(&h.notifier).await, 1);
    assert_eq!(h.notifier.records()[0].status, ApprovalStatus::Timeout);
}

#[tokio::test(start_paused = true)]
async fn partial_approval_escalates_on_timeout() {
    let h = harness(FakeConnector::new("fake"));
    let approvals = h.runner.approvals().clone();
    let mut announcements = approvals.subscribe();
    let run = spawn_run(&h.runner, production_action("drain_node"));

    let request = announcements.recv().await.unwrap();
    approvals.approve(&request.id, "alice").await.unwrap();
    let state = run.await.unwrap();

    assert_eq!(state.approval_status, Some(ApprovalStatus::Escalated));
    assert_eq!(state.approvers, vec!["alice".to_string()]);
    assert!(h.connector.calls().is_empty());
    assert_eq!(escalations(&h.notifier).await, 1);
    assert_eq!(h.notifier.records()[0].status, ApprovalStatus::Escalated);
}

// Scenario D
#[tokio::test]
async fn unreachable_policy_service_fails_closed() {
    let policy = Arc::new(UnreachablePolicyClient::default());
    let h = harness_with(&test_config(), policy.clone(), FakeConnector::new("fake"));
    let state = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    let decision = state.policy_result.as_ref().unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.origin, DecisionOrigin::FailClosed);
    assert!(decision.reasons[0].contains("defaulting to deny"));
    assert_eq!(nodes(&state), vec!["evaluate_policy"]);
    assert_eq!(state.outcome, Some(RunOutcome::PolicyDenied));
    assert_eq!(policy.calls(), 1);
    assert!(h.connector.calls().is_empty());
}

#[tokio::test]
async fn policy_denial_has_no_side_effects() {
    let policy = Arc::new(StaticPolicyClient::deny("change freeze in effect"));
    let h = harness_with(&test_config(), policy.clone(), FakeConnector::new("fake"));
    let state = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    let decision = state.policy_result.as_ref().unwrap();
    assert_eq!(decision.reasons, vec!["change freeze in effect".to_string()]);
    assert_eq!(decision.origin, DecisionOrigin::PolicyService);
    assert!(state.snapshot.is_none());
    assert!(state.execution_result.is_none());
    assert!(state.validation.is_none());
    assert_eq!(state.error, None);
    assert_eq!(state.outcome, Some(RunOutcome::PolicyDenied));
    assert!(h.connector.calls().is_empty());
}

#[tokio::test]
async fn policy_context_carries_rate_and_caller_context() {
    let policy = Arc::new(StaticPolicyClient::allow());
    let h = harness_with(&test_config(), policy.clone(), FakeConnector::new("fake"));
    let alert = serde_json::json!({ "alertname": "HighErrorRate" });

    h.runner
        .remediate(
            production_action("restart_pod"),
            Some(alert.clone()),
            Some("inv-42".into()),
        )
        .await;
    h.runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    let inputs = policy.inputs();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0].context["actions_this_hour"], 0);
    assert_eq!(inputs[0].context["alert"], alert);
    assert_eq!(inputs[0].context["investigation_id"], "inv-42");
    assert_eq!(inputs[0].context["classified_risk"], "MEDIUM");
    assert_eq!(inputs[0].agent_id, "remedy");
    assert_eq!(inputs[1].context["actions_this_hour"], 1);
}

// Scenario E
#[tokio::test]
async fn failed_execution_rolls_back_once() {
    let h = harness(FakeConnector::new("fake").with_execute(ExecuteBehavior::Fail("exit 1".into())));
    let state = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    assert_eq!(
        nodes(&state)[3..],
        ["create_snapshot", "execute_action", "perform_rollback"]
    );
    assert_eq!(state.current_step, "perform_rollback");
    assert_eq!(state.validation, None);
    assert_eq!(h.connector.count("rollback"), 1);
    assert_eq!(h.connector.count("get_health"), 0);
    assert!(state.rollback_result.as_ref().unwrap().is_success());
    assert_eq!(state.outcome, Some(RunOutcome::RolledBack));
    assert_eq!(state.error.as_deref(), Some("execution failed: exit 1"));
}

#[tokio::test(start_paused = true)]
async fn stalled_execution_times_out_and_rolls_back() {
    let h = harness(FakeConnector::new("fake").with_execute(ExecuteBehavior::Hang));
    let state = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    assert!(state.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(h.connector.count("rollback"), 1);
    assert_eq!(state.outcome, Some(RunOutcome::RolledBack));
}

#[tokio::test]
async fn unhealthy_result_rolls_back() {
    let h = harness(FakeConnector::new("fake").with_health(HealthBehavior::Unhealthy));
    let state = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    assert_eq!(state.validation, Some(ValidationOutcome::Failed));
    assert_eq!(state.current_step, "perform_rollback");
    assert_eq!(state.outcome, Some(RunOutcome::RolledBack));
    assert_eq!(state.health.as_ref().map(|h| h.healthy), Some(false));
}

#[tokio::test]
async fn failing_rollback_is_reported() {
    let h = harness(
        FakeConnector::new("fake")
            .with_execute(ExecuteBehavior::Fail("exit 1".into()))
            .with_failing_rollback(),
    );
    let state = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    assert_eq!(state.outcome, Some(RunOutcome::RollbackFailed));
    assert!(state.error.as_deref().unwrap().starts_with("rollback failed"));
}

#[tokio::test]
async fn indeterminate_health_follows_configured_policy() {
    let lenient = harness(FakeConnector::new("fake").with_health(HealthBehavior::Indeterminate));
    let state = lenient
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;
    assert_eq!(state.validation, Some(ValidationOutcome::Unknown));
    assert_eq!(state.outcome, Some(RunOutcome::Succeeded));
    assert_eq!(lenient.connector.count("rollback"), 0);

    let mut config = test_config();
    config.engine.on_indeterminate_health = IndeterminateHealthPolicy::Rollback;
    let strict = harness_with(
        &config,
        Arc::new(StaticPolicyClient::allow()),
        FakeConnector::new("fake").with_health(HealthBehavior::Error),
    );
    let state = strict
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;
    assert_eq!(state.validation, Some(ValidationOutcome::Unknown));
    assert_eq!(state.outcome, Some(RunOutcome::RolledBack));
    assert_eq!(strict.connector.count("rollback"), 1);
}

#[tokio::test]
async fn snapshot_failure_aborts_before_execution() {
    let h = harness(FakeConnector::new("fake").with_failing_snapshot());
    let state = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    assert_eq!(state.current_step, "create_snapshot");
    assert!(state.execution_result.is_none());
    assert!(state.rollback_result.is_none());
    assert!(state
        .error
        .as_deref()
        .unwrap()
        .starts_with("snapshot failed"));
    assert_eq!(state.outcome, Some(RunOutcome::Aborted));
    assert_eq!(h.connector.methods(), vec!["create_snapshot"]);
    assert!(h.connector.released().is_empty());
}

#[tokio::test]
async fn unknown_provider_aborts_the_run() {
    let h = harness(FakeConnector::new("fake"));
    let action = RemediationAction::new("restart_pod", "checkout-api", Environment::Staging)
        .with_parameter(PROVIDER_PARAMETER, "nomad");
    let state = h.runner.remediate(action, None, None).await;

    assert_eq!(
        state.error.as_deref(),
        Some("snapshot failed: provider not found: nomad")
    );
    assert_eq!(state.outcome, Some(RunOutcome::Aborted));
    assert!(h.connector.calls().is_empty());
}

#[tokio::test]
async fn forbidden_command_is_rejected_before_policy() {
    let policy = Arc::new(StaticPolicyClient::allow());
    let h = harness_with(&test_config(), policy.clone(), FakeConnector::new("fake"));
    let action = production_action("run_command").with_parameter(COMMAND_PARAMETER, "rm -rf /");
    let state = h.runner.remediate(action, None, None).await;

    let decision = state.policy_result.as_ref().unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.origin, DecisionOrigin::CommandGuard);
    assert!(state
        .error
        .as_deref()
        .unwrap()
        .starts_with("forbidden_command"));
    assert_eq!(state.outcome, Some(RunOutcome::PolicyDenied));
    assert_eq!(policy.calls(), 0);
    assert!(h.connector.calls().is_empty());
}

#[tokio::test]
async fn benign_command_passes_the_guard() {
    let policy = Arc::new(StaticPolicyClient::allow());
    let h = harness_with(&test_config(), policy.clone(), FakeConnector::new("fake"));
    let action = RemediationAction::new("run_command", "web-01", Environment::Staging)
        .with_parameter(PROVIDER_PARAMETER, "fake")
        .with_parameter(COMMAND_PARAMETER, "systemctl restart nginx");
    let state = h.runner.remediate(action, None, None).await;

    assert_eq!(policy.calls(), 1);
    assert_eq!(state.assessed_risk, Some(RiskLevel::Low));
    assert_eq!(state.outcome, Some(RunOutcome::Succeeded));
}

#[tokio::test]
async fn connector_panic_is_caught_at_the_run_boundary() {
    let h = harness(FakeConnector::new("fake").with_execute(ExecuteBehavior::Panic));
    let state = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    assert_eq!(state.current_step, FAILED_STEP);
    assert!(state.error.as_deref().unwrap().contains("connector bug"));
    assert_eq!(state.outcome, Some(RunOutcome::Failed));
    // steps completed before the panic are kept
    assert_eq!(nodes(&state).last(), Some(&"create_snapshot"));
    assert_eq!(h.runner.get_remediation(&state.run_id), Some(state));
}

#[tokio::test]
async fn step_limit_ends_the_run_as_failed() {
    let mut config = test_config();
    config.engine.max_steps = 3;
    let h = harness_with(
        &config,
        Arc::new(StaticPolicyClient::allow()),
        FakeConnector::new("fake"),
    );
    let state = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;

    assert_eq!(state.error.as_deref(), Some("run exceeded 3 steps"));
    assert_eq!(state.outcome, Some(RunOutcome::Failed));
    assert!(h.connector.calls().is_empty());
}

#[tokio::test]
async fn history_serves_finished_runs() {
    let h = harness(FakeConnector::new("fake"));
    let first = h
        .runner
        .remediate(production_action("restart_pod"), None, None)
        .await;
    let second = h
        .runner
        .remediate(production_action("restart_service"), None, None)
        .await;

    assert_eq!(h.runner.get_remediation(&first.run_id), Some(first.clone()));
    let runs = h.runner.list_remediations();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].run_id, first.run_id);
    assert_eq!(runs[1].run_id, second.run_id);
}
