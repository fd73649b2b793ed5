//! Node functions
//!
//! Each node reads the state and returns a [`StateUpdate`]. Step number,
//! node name and duration are filled in by the driver.

use crate::error::EngineError;
use crate::graph::{Node, RemediationGraph};
use chrono::Utc;
use remedy_approval::{required_approvals, ApprovalRequest};
use remedy_connector::guard;
use remedy_core::{
    ActionResult, PlaybookRef, PolicyDecision, ReasoningStep, RemediationState, StateUpdate,
    ValidationOutcome,
};
use serde_json::{Map, Value};

pub(crate) async fn dispatch(
    node: Node,
    graph: &RemediationGraph,
    state: &RemediationState,
) -> Result<StateUpdate, EngineError> {
    match node {
        Node::EvaluatePolicy => Ok(evaluate_policy(graph, state).await),
        Node::ResolvePlaybook => Ok(resolve_playbook(graph, state)),
        Node::AssessRisk => Ok(assess_risk(graph, state)),
        Node::RequestApproval => request_approval(graph, state).await,
        Node::CreateSnapshot => create_snapshot(graph, state).await,
        Node::ExecuteAction => execute_action(graph, state).await,
        Node::ValidateHealth => validate_health(graph, state).await,
        Node::PerformRollback => perform_rollback(graph, state).await,
        Node::End => Ok(StateUpdate::default()),
    }
}

fn step(input: impl Into<String>, output: impl Into<String>, tool: Option<&str>) -> ReasoningStep {
    ReasoningStep {
        input_summary: input.into(),
        output_summary: output.into(),
        tool: tool.map(str::to_string),
        ..ReasoningStep::default()
    }
}

fn playbook<'a>(state: &'a RemediationState, node: Node) -> Result<&'a PlaybookRef, EngineError> {
    state
        .playbook
        .as_ref()
        .ok_or_else(|| EngineError::missing(node.as_str(), "playbook"))
}

fn describe_failure(result: &ActionResult) -> String {
    result.error.clone().unwrap_or_else(|| result.message.clone())
}

async fn evaluate_policy(graph: &RemediationGraph, state: &RemediationState) -> StateUpdate {
    let action = &state.action;
    let input = action.summary();

    if let Some(command) = action.command() {
        if let Err(violation) = guard::check_command(command) {
            let message = violation.to_string();
            tracing::warn!(rule = %violation.rule, "command rejected by safety guard");
            metrics::counter!("remedy_guard_rejections_total", "rule" => violation.rule.as_str())
                .increment(1);
            return StateUpdate {
                policy_result: Some(PolicyDecision::forbidden_command(message.clone())),
                error: Some(message.clone()),
                ..StateUpdate::new(step(input, format!("denied: {message}"), Some("command_guard")))
            };
        }
    }

    let mut context = Map::new();
    context.insert("run_id".into(), Value::from(state.run_id.to_string()));
    if let Some(alert) = &state.alert_context {
        context.insert("alert".into(), alert.clone());
    }
    if let Some(investigation) = &state.investigation_id {
        context.insert("investigation_id".into(), Value::from(investigation.as_str()));
    }

    let decision = graph
        .policy
        .evaluate(action, graph.policy.agent_id(), context)
        .await;
    let verdict = if decision.allowed { "allowed" } else { "denied" };
    let output = format!("{verdict}: {}", decision.reasons.join("; "));
    StateUpdate {
        policy_result: Some(decision),
        ..StateUpdate::new(step(input, output, Some("policy_service")))
    }
}

fn resolve_playbook(graph: &RemediationGraph, state: &RemediationState) -> StateUpdate {
    let playbook = graph.playbooks.resolve(&state.action);
    let output = format!(
        "provider {}, health timeout {:?}",
        playbook.provider,
        playbook.health_timeout()
    );
    StateUpdate {
        playbook: Some(playbook),
        ..StateUpdate::new(step(&state.action.action_type, output, None))
    }
}

fn assess_risk(graph: &RemediationGraph, state: &RemediationState) -> StateUpdate {
    let action = &state.action;
    let risk = graph
        .policy
        .classify_risk(&action.action_type, action.environment);
    let required = required_approvals(risk);
    let output = if required == 0 {
        format!("risk {risk}, no approval required")
    } else {
        format!("risk {risk}, {required} approval(s) required")
    };
    StateUpdate {
        assessed_risk: Some(risk),
        ..StateUpdate::new(step(
            format!(
                "{} in {} (estimate {})",
                action.action_type, action.environment, action.risk_estimate
            ),
            output,
            Some("risk_classifier"),
        ))
    }
}

async fn request_approval(
    graph: &RemediationGraph,
    state: &RemediationState,
) -> Result<StateUpdate, EngineError> {
    let risk = state
        .assessed_risk
        .ok_or_else(|| EngineError::missing(Node::AssessRisk.as_str(), "assessed_risk"))?;
    let request = ApprovalRequest::new(
        state.run_id,
        state.action.clone(),
        risk,
        graph.approvals.default_timeout(),
    );
    let input = format!(
        "request {} needs {} approver(s) within {:?}",
        request.id,
        request.required_approvals,
        request.timeout()
    );
    let request_id = request.id.clone();

    let record = graph.approvals.request_approval(request).await;
    let approvers = record.approvers();
    let output = if approvers.is_empty() {
        record.status.to_string()
    } else {
        format!("{} by {}", record.status, approvers.join(", "))
    };

    Ok(StateUpdate {
        approval_request_id: Some(request_id),
        approval_status: Some(record.status),
        approvers: Some(approvers),
        ..StateUpdate::new(step(input, output, Some("approval_coordinator")))
    })
}

async fn create_snapshot(
    graph: &RemediationGraph,
    state: &RemediationState,
) -> Result<StateUpdate, EngineError> {
    let provider = playbook(state, Node::CreateSnapshot)?.provider.as_str();
    let resource = &state.action.target_resource;
    let input = format!("{resource} via {provider}");

    Ok(match graph.toolkit.create_snapshot(provider, resource).await {
        Ok(snapshot) => {
            let output = format!("snapshot {} ({})", snapshot.id, snapshot.kind);
            StateUpdate {
                snapshot: Some(snapshot),
                ..StateUpdate::new(step(input, output, Some(provider)))
            }
        }
        Err(failed) => {
            let error = format!("snapshot failed: {}", describe_failure(&failed));
            StateUpdate {
                error: Some(error.clone()),
                ..StateUpdate::new(step(input, error, Some(provider)))
            }
        }
    })
}

async fn execute_action(
    graph: &RemediationGraph,
    state: &RemediationState,
) -> Result<StateUpdate, EngineError> {
    let provider = playbook(state, Node::ExecuteAction)?.provider.as_str();
    let result = graph.toolkit.execute_action(provider, &state.action).await;

    let (output, error) = if result.is_success() {
        (result.message.clone(), None)
    } else {
        let error = format!("execution failed: {}", describe_failure(&result));
        (error.clone(), Some(error))
    };
    Ok(StateUpdate {
        execution_result: Some(result),
        error,
        ..StateUpdate::new(step(state.action.summary(), output, Some(provider)))
    })
}

async fn validate_health(
    graph: &RemediationGraph,
    state: &RemediationState,
) -> Result<StateUpdate, EngineError> {
    let playbook = playbook(state, Node::ValidateHealth)?;
    let resource = &state.action.target_resource;
    let timeout = playbook.health_timeout();

    let probe = graph
        .toolkit
        .get_health(&playbook.provider, resource, timeout)
        .await;
    let (validation, output, health) = match probe {
        Ok(Some(health)) if health.healthy => (
            ValidationOutcome::Passed,
            format!("healthy ({})", health.status),
            Some(health),
        ),
        Ok(Some(health)) => (
            ValidationOutcome::Failed,
            format!("unhealthy ({})", health.status),
            Some(health),
        ),
        Ok(None) => (ValidationOutcome::Unknown, "health indeterminate".to_string(), None),
        Err(e) => (ValidationOutcome::Unknown, format!("health probe failed: {e}"), None),
    };
    let error =
        (validation == ValidationOutcome::Failed).then(|| format!("validation failed: {output}"));

    Ok(StateUpdate {
        health,
        validation: Some(validation),
        error,
        ..StateUpdate::new(step(
            format!("{resource} within {timeout:?}"),
            output,
            Some(playbook.provider.as_str()),
        ))
    })
}

async fn perform_rollback(
    graph: &RemediationGraph,
    state: &RemediationState,
) -> Result<StateUpdate, EngineError> {
    let provider = playbook(state, Node::PerformRollback)?.provider.as_str();
    let result = match &state.snapshot {
        Some(snapshot) => graph.toolkit.rollback(provider, &snapshot.id).await,
        None => ActionResult::failed(
            &state.action.id,
            "rollback failed",
            "no snapshot to restore",
            Utc::now(),
        ),
    };
    let input = state
        .snapshot
        .as_ref()
        .map_or_else(|| "no snapshot".to_string(), |s| format!("snapshot {}", s.id));

    let (output, error) = if result.is_success() {
        (result.message.clone(), None)
    } else {
        let error = format!("rollback failed: {}", describe_failure(&result));
        (error.clone(), Some(error))
    };
    Ok(StateUpdate {
        rollback_result: Some(result),
        error,
        ..StateUpdate::new(step(input, output, Some(provider)))
    })
}
