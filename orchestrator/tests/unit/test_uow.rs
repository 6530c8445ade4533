//! Unit of work and repository tests

use std::time::Duration;

use deploy_api::StepState;

use fastdeploy::domain::events::DomainEvent;
use fastdeploy::domain::model::{Deployment, Service, Step, User};
use fastdeploy::errors::AppError;
use fastdeploy::storage::uow::Store;

fn service(name: &str) -> Service {
    Service::new(name, serde_json::json!({}))
}

#[tokio::test]
async fn test_changes_are_invisible_until_commit() {
    let store = Store::in_memory();

    let mut uow = store.begin().await;
    uow.services().add(service("blog")).unwrap();
    uow.rollback();

    let mut uow = store.begin().await;
    assert!(matches!(
        uow.services().get_by_name("blog"),
        Err(AppError::NotFound(_))
    ));
    uow.services().add(service("blog")).unwrap();
    uow.commit().await.unwrap();

    let mut uow = store.begin().await;
    assert_eq!(uow.services().list().len(), 1);
}

#[tokio::test]
async fn test_drop_without_commit_discards_events() {
    let store = Store::in_memory();
    {
        let mut uow = store.begin().await;
        let created = uow.services().add(service("blog")).unwrap();
        uow.record([DomainEvent::ServiceCreated { service: created }]);
        assert_eq!(uow.pending_events().len(), 1);
    }

    let mut uow = store.begin().await;
    assert!(uow.services().list().is_empty());
    assert!(uow.pending_events().is_empty());
}

#[tokio::test]
async fn test_transactions_are_serialized() {
    let store = Store::in_memory();
    let first = store.begin().await;

    let blocked = tokio::time::timeout(Duration::from_millis(50), store.begin()).await;
    assert!(blocked.is_err());

    drop(first);
    let second = tokio::time::timeout(Duration::from_millis(500), store.begin()).await;
    assert!(second.is_ok());
}

#[tokio::test]
async fn test_lookup_misses_are_not_found() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;

    assert!(matches!(uow.users().get("nobody"), Err(AppError::NotFound(_))));
    assert!(matches!(uow.services().get(1), Err(AppError::NotFound(_))));
    match uow.deployments().get(1) {
        Err(AppError::NotFound(what)) => assert_eq!(what, "Deployment"),
        other => panic!("expected NotFound, got {:?}", other),
    }
    assert!(matches!(uow.steps().get(1), Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_unique_names() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;

    uow.users().add(User::new("alice", "hash")).unwrap();
    assert!(matches!(
        uow.users().add(User::new("alice", "other")),
        Err(AppError::Conflict(_))
    ));

    uow.services().add(service("blog")).unwrap();
    let mut shop = uow.services().add(service("shop")).unwrap();
    shop.name = "blog".to_string();
    assert!(matches!(uow.services().update(shop), Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_deleting_a_service_cascades() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;

    let blog = uow.services().add(service("blog")).unwrap();
    let shop = uow.services().add(service("shop")).unwrap();
    let blog_deployment = uow
        .deployments()
        .add(Deployment::new(blog.id.unwrap(), "api", "alice"))
        .unwrap();
    let shop_deployment = uow
        .deployments()
        .add(Deployment::new(shop.id.unwrap(), "api", "alice"))
        .unwrap();
    for deployment in [&blog_deployment, &shop_deployment] {
        let mut step = Step::pending("build");
        step.deployment_id = deployment.id;
        uow.steps().add(step).unwrap();
    }

    uow.services().delete(blog.id.unwrap()).unwrap();

    assert_eq!(uow.deployments().list(), vec![shop_deployment.clone()]);
    let steps = uow.steps().list();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].deployment_id, shop_deployment.id);
}

#[tokio::test]
async fn test_steps_need_an_existing_deployment() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;

    assert!(uow.steps().add(Step::pending("orphan")).is_err());

    let mut step = Step::pending("build");
    step.deployment_id = Some(42);
    assert!(matches!(uow.steps().add(step), Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_last_successful_deployment() {
    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let blog = uow.services().add(service("blog")).unwrap();
    let service_id = blog.id.unwrap();
    let now = chrono::Utc::now();

    let mut add_deployment = |finished: bool, states: &[StepState]| {
        let mut deployment = Deployment::new(service_id, "api", "alice");
        deployment.started = Some(now);
        deployment.finished = finished.then_some(now);
        let deployment = uow.deployments().add(deployment).unwrap();
        for state in states {
            let mut step = Step::pending("build");
            step.deployment_id = deployment.id;
            step.state = *state;
            uow.steps().add(step).unwrap();
        }
        deployment
    };

    let good = add_deployment(true, &[StepState::Success, StepState::Success]);
    add_deployment(true, &[StepState::Success, StepState::Failure]);
    add_deployment(false, &[StepState::Success]);
    add_deployment(true, &[]);

    assert_eq!(uow.deployments().last_successful(service_id), Some(good));
}

/// A blog service with one deployment and two steps, committed
async fn seeded_store() -> (Store, i64, i64) {
    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let blog = uow.services().add(service("blog")).unwrap();
    let deployment = uow
        .deployments()
        .add(Deployment::new(blog.id.unwrap(), "api", "alice"))
        .unwrap();
    for name in ["build", "deploy"] {
        let mut step = Step::pending(name);
        step.deployment_id = deployment.id;
        uow.steps().add(step).unwrap();
    }
    uow.commit().await.unwrap();
    (store, blog.id.unwrap(), deployment.id.unwrap())
}

#[tokio::test]
async fn test_rollback_restores_rows_ids_and_indexes() {
    let (store, service_id, deployment_id) = seeded_store().await;

    {
        let mut uow = store.begin().await;
        let mut build = uow.steps().list_by_deployment(deployment_id)[0].clone();
        build.state = StepState::Failure;
        uow.steps().update(build).unwrap();

        let extra = uow
            .deployments()
            .add(Deployment::new(service_id, "api", "alice"))
            .unwrap();
        let mut moved = uow.steps().list_by_deployment(deployment_id)[1].clone();
        moved.deployment_id = extra.id;
        uow.steps().update(moved).unwrap();
        assert_eq!(uow.steps().list_by_deployment(deployment_id).len(), 1);
        assert_eq!(uow.deployments().list_by_service(service_id).len(), 2);
    }

    let mut uow = store.begin().await;
    let steps = uow.steps().list_by_deployment(deployment_id);
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].state, StepState::Pending);
    assert_eq!(steps[1].name, "deploy");
    assert_eq!(uow.deployments().list_by_service(service_id).len(), 1);

    // the rolled back deployment did not use up its id
    let next = uow
        .deployments()
        .add(Deployment::new(service_id, "api", "alice"))
        .unwrap();
    assert_eq!(next.id, Some(deployment_id + 1));
}

#[tokio::test]
async fn test_rollback_of_cascading_delete() {
    let (store, service_id, deployment_id) = seeded_store().await;

    let mut uow = store.begin().await;
    uow.services().delete(service_id).unwrap();
    assert!(uow.steps().list().is_empty());
    uow.rollback();

    let mut uow = store.begin().await;
    assert_eq!(uow.services().get(service_id).unwrap().name, "blog");
    assert_eq!(uow.deployments().list_by_service(service_id).len(), 1);
    let names: Vec<String> = uow
        .steps()
        .list_by_deployment(deployment_id)
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["build", "deploy"]);
}

#[tokio::test]
async fn test_read_only_commit_keeps_state() {
    let (store, service_id, _) = seeded_store().await;

    let mut uow = store.begin().await;
    assert_eq!(uow.services().list().len(), 1);
    assert!(uow.commit().await.unwrap().is_empty());

    let mut uow = store.begin().await;
    assert!(uow.services().get(service_id).is_ok());
    assert_eq!(uow.steps().list().len(), 2);
}
