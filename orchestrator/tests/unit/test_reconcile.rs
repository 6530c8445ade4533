//! Step reconciliation tests

use chrono::{Duration, Utc};
use deploy_api::{DeploymentContext, StepReport, StepState};

use fastdeploy::domain::events::DomainEvent;
use fastdeploy::domain::model::{Deployment, Service, Step, PLACEHOLDER_STEP};
use fastdeploy::domain::steps::{get_steps_to_do, process_step, start_deployment};
use fastdeploy::errors::AppError;
use fastdeploy::storage::uow::{Store, UnitOfWork};

fn service_with_steps(names: &[&str]) -> Service {
    let steps: Vec<_> = names.iter().map(|n| serde_json::json!({ "name": n })).collect();
    Service::new("blog", serde_json::json!({ "steps": steps }))
}

/// An in-flight deployment with steps in the given states
fn deployment_with_steps(uow: &mut UnitOfWork, steps: &[(&str, StepState)]) -> Deployment {
    let service = uow.services().add(Service::new("blog", serde_json::json!({}))).unwrap();
    let mut deployment = Deployment::new(service.id.unwrap(), "api", "alice");
    deployment.started = Some(Utc::now());
    let deployment = uow.deployments().add(deployment).unwrap();

    for (name, state) in steps {
        let mut step = Step::pending(*name);
        step.deployment_id = deployment.id;
        step.state = *state;
        uow.steps().add(step).unwrap();
    }
    deployment
}

fn states(uow: &mut UnitOfWork, deployment: &Deployment) -> Vec<(String, StepState)> {
    uow.steps()
        .list_by_deployment(deployment.id.unwrap())
        .into_iter()
        .map(|s| (s.name, s.state))
        .collect()
}

#[tokio::test]
async fn test_success_promotes_next_pending_step() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let deployment = deployment_with_steps(
        &mut uow,
        &[
            ("A", StepState::Running),
            ("B", StepState::Pending),
            ("C", StepState::Pending),
        ],
    );

    let now = Utc::now();
    let (step, events) = process_step(
        &mut uow,
        &deployment,
        StepReport::new("A", StepState::Success),
        now,
    )
    .unwrap();

    assert_eq!(step.name, "A");
    assert_eq!(step.state, StepState::Success);
    assert_eq!(step.finished, Some(now));
    assert_eq!(
        states(&mut uow, &deployment),
        vec![
            ("A".to_string(), StepState::Success),
            ("B".to_string(), StepState::Running),
            ("C".to_string(), StepState::Pending),
        ]
    );
    // promoted step first, then the reported one
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], DomainEvent::StepChanged { step } if step.name == "B"));
    assert!(matches!(&events[1], DomainEvent::StepChanged { step } if step.name == "A"));
}

#[tokio::test]
async fn test_failure_halts_auto_advance() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let deployment = deployment_with_steps(
        &mut uow,
        &[("A", StepState::Running), ("B", StepState::Pending)],
    );

    let report = StepReport::new("A", StepState::Failure).with_message("exit 1");
    let (step, events) = process_step(&mut uow, &deployment, report, Utc::now()).unwrap();

    assert_eq!(step.state, StepState::Failure);
    assert_eq!(step.message, "exit 1");
    assert_eq!(events.len(), 1);
    assert_eq!(
        states(&mut uow, &deployment),
        vec![
            ("A".to_string(), StepState::Failure),
            ("B".to_string(), StepState::Pending),
        ]
    );
}

#[tokio::test]
async fn test_unknown_step_is_created_finished() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let deployment = deployment_with_steps(&mut uow, &[]);

    let now = Utc::now();
    let (step, _) = process_step(
        &mut uow,
        &deployment,
        StepReport::new("X", StepState::Running),
        now,
    )
    .unwrap();

    assert!(step.id.is_some());
    assert_eq!(step.name, "X");
    assert_eq!(step.state, StepState::Running);
    assert_eq!(step.finished, Some(now));
    assert_eq!(step.deployment_id, deployment.id);
}

#[tokio::test]
async fn test_pending_step_reported_directly_does_not_promote() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let deployment = deployment_with_steps(
        &mut uow,
        &[("A", StepState::Pending), ("B", StepState::Pending)],
    );

    process_step(
        &mut uow,
        &deployment,
        StepReport::new("A", StepState::Success),
        Utc::now(),
    )
    .unwrap();

    assert_eq!(
        states(&mut uow, &deployment),
        vec![
            ("A".to_string(), StepState::Success),
            ("B".to_string(), StepState::Pending),
        ]
    );
}

#[tokio::test]
async fn test_running_match_wins_over_pending_duplicate() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let deployment = deployment_with_steps(
        &mut uow,
        &[("build", StepState::Pending), ("build", StepState::Running)],
    );

    let (step, _) = process_step(
        &mut uow,
        &deployment,
        StepReport::new("build", StepState::Failure),
        Utc::now(),
    )
    .unwrap();

    let steps = uow.steps().list_by_deployment(deployment.id.unwrap());
    assert_eq!(step.id, steps[1].id);
    assert_eq!(steps[0].state, StepState::Pending);
    assert_eq!(steps[1].state, StepState::Failure);
}

#[tokio::test]
async fn test_finished_deployment_rejects_reports() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let deployment = deployment_with_steps(&mut uow, &[("A", StepState::Running)]);
    let (deployment, _) = deployment.finish(Utc::now()).unwrap();
    let deployment = uow.deployments().update(deployment).unwrap();

    for state in [StepState::Running, StepState::Success, StepState::Failure] {
        let result = process_step(
            &mut uow,
            &deployment,
            StepReport::new("A", state),
            Utc::now(),
        );
        assert!(matches!(result, Err(AppError::DeploymentAlreadyFinished(_))));
    }
    assert_eq!(states(&mut uow, &deployment), vec![("A".to_string(), StepState::Running)]);
}

#[tokio::test]
async fn test_unstarted_deployment_rejects_reports() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let service = uow.services().add(Service::new("blog", serde_json::json!({}))).unwrap();
    let deployment = uow
        .deployments()
        .add(Deployment::new(service.id.unwrap(), "api", "alice"))
        .unwrap();

    let result = process_step(
        &mut uow,
        &deployment,
        StepReport::new("A", StepState::Success),
        Utc::now(),
    );
    assert!(matches!(result, Err(AppError::DeploymentNotStarted(_))));
}

#[test]
fn test_finish_never_precedes_start() {
    let mut deployment = Deployment::new(1, "api", "alice");
    deployment.id = Some(1);
    let started = Utc::now();
    deployment.started = Some(started);

    let (finished, events) = deployment.finish(started - Duration::seconds(10)).unwrap();
    assert_eq!(finished.finished, Some(started));
    assert_eq!(events.len(), 1);

    assert!(matches!(
        finished.finish(Utc::now()),
        Err(AppError::DeploymentAlreadyFinished(1))
    ));
}

#[tokio::test]
async fn test_steps_to_do_sources() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;

    // nothing configured: placeholder
    let bare = uow.services().add(Service::new("bare", serde_json::json!({}))).unwrap();
    let steps = get_steps_to_do(&mut uow, &bare);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].name, PLACEHOLDER_STEP);

    // configured templates
    let blog = uow.services().add(service_with_steps(&["build", "deploy"])).unwrap();
    let names: Vec<_> = get_steps_to_do(&mut uow, &blog).into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["build", "deploy"]);

    // last successful deployment wins over the configuration
    let mut deployment = Deployment::new(blog.id.unwrap(), "api", "alice");
    deployment.started = Some(Utc::now());
    deployment.finished = Some(Utc::now());
    let deployment = uow.deployments().add(deployment).unwrap();
    for name in ["checkout", "build", "deploy"] {
        let mut step = Step::pending(name);
        step.deployment_id = deployment.id;
        step.state = StepState::Success;
        uow.steps().add(step).unwrap();
    }
    let steps = get_steps_to_do(&mut uow, &blog);
    let names: Vec<_> = steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["checkout", "build", "deploy"]);
    assert!(steps.iter().all(|s| s.state == StepState::Pending && s.id.is_none()));
}

#[tokio::test]
async fn test_start_deployment_creates_expected_steps() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let blog = uow.services().add(service_with_steps(&["build", "deploy"])).unwrap();

    let mut context = DeploymentContext::default();
    context.env.insert("GIT_REF".to_string(), "main".to_string());
    let now = Utc::now();
    let (deployment, events) =
        start_deployment(&mut uow, &blog, "github", "alice", context.clone(), now).unwrap();

    assert_eq!(deployment.started, Some(now));
    assert!(deployment.finished.is_none());
    assert_eq!(deployment.context, context);
    assert_eq!(
        states(&mut uow, &deployment),
        vec![
            ("build".to_string(), StepState::Running),
            ("deploy".to_string(), StepState::Pending),
        ]
    );
    assert!(matches!(events[0], DomainEvent::DeploymentStarted { .. }));
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn test_full_pipeline_run() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let blog = uow.services().add(service_with_steps(&["build", "deploy"])).unwrap();
    let (deployment, _) = start_deployment(
        &mut uow,
        &blog,
        "github",
        "alice",
        DeploymentContext::default(),
        Utc::now(),
    )
    .unwrap();

    for name in ["build", "deploy"] {
        process_step(
            &mut uow,
            &deployment,
            StepReport::new(name, StepState::Success),
            Utc::now(),
        )
        .unwrap();
    }

    assert_eq!(
        states(&mut uow, &deployment),
        vec![
            ("build".to_string(), StepState::Success),
            ("deploy".to_string(), StepState::Success),
        ]
    );
}
