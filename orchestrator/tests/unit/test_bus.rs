//! Event bus tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use fastdeploy::bus::{BroadcastHandler, EventBus, EventHandler};
use fastdeploy::domain::events::{DomainEvent, EventKind};
use fastdeploy::domain::model::Service;
use fastdeploy::errors::AppError;
use fastdeploy::storage::uow::Store;

/// Records the service names of the events it sees
struct Recorder {
    name: &'static str,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EventHandler for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), AppError> {
        if let DomainEvent::ServiceCreated { service } | DomainEvent::ServiceUpdated { service } =
            event
        {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, service.name));
        }
        Ok(())
    }
}

/// Fails on every event
struct Failing;

#[async_trait]
impl EventHandler for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _event: &DomainEvent) -> Result<(), AppError> {
        Err(AppError::HandlerError("boom".to_string()))
    }
}

/// Panics on every event
struct Panicking;

#[async_trait]
impl EventHandler for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn handle(&self, _event: &DomainEvent) -> Result<(), AppError> {
        panic!("handler bug");
    }
}

fn created(name: &str) -> DomainEvent {
    DomainEvent::ServiceCreated {
        service: Service::new(name, serde_json::json!({})),
    }
}

#[test]
fn test_dispatch_runs_every_handler_in_order_despite_failures() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let bus = EventBus::builder()
        .on(
            EventKind::ServiceCreated,
            Arc::new(Recorder {
                name: "first",
                seen: seen.clone(),
            }),
        )
        .on(EventKind::ServiceCreated, Arc::new(Failing))
        .on(
            EventKind::ServiceCreated,
            Arc::new(Recorder {
                name: "last",
                seen: seen.clone(),
            }),
        )
        .build();

    let events = vec![created("a"), created("b"), created("c")];
    let report = tokio_test::block_on(bus.dispatch(events));

    assert_eq!(report.delivered, 6);
    assert_eq!(report.failed, 3);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["first:a", "last:a", "first:b", "last:b", "first:c", "last:c"]
    );
}

#[test]
fn test_events_without_handlers_are_ignored() {
    let bus = EventBus::builder().build();
    let report = tokio_test::block_on(bus.dispatch(vec![created("a")]));
    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(bus.handler_count(EventKind::ServiceCreated), 0);
}

#[tokio::test]
async fn test_commit_dispatches_after_persisting() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let bus = EventBus::builder()
        .on_all(Arc::new(Recorder {
            name: "rec",
            seen: seen.clone(),
        }))
        .on(EventKind::ServiceCreated, Arc::new(Failing))
        .build();
    assert_eq!(bus.handler_count(EventKind::StepChanged), 1);
    assert_eq!(bus.handler_count(EventKind::ServiceCreated), 2);

    let store = Store::in_memory();
    let mut uow = store.begin().await;
    let service = uow.services().add(Service::new("blog", serde_json::json!({}))).unwrap();
    uow.record([
        DomainEvent::ServiceCreated {
            service: service.clone(),
        },
        DomainEvent::ServiceUpdated { service },
    ]);
    let report = bus.commit(uow).await.unwrap();

    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(*seen.lock().unwrap(), vec!["rec:blog", "rec:blog"]);

    // a failing handler does not undo the transaction
    let mut uow = store.begin().await;
    assert!(uow.services().get_by_name("blog").is_ok());
}

#[tokio::test]
async fn test_broadcast_handler_republishes() {
    let broadcast = Arc::new(BroadcastHandler::new(8));
    let mut rx = broadcast.subscribe();
    let bus = EventBus::builder().on_all(broadcast.clone()).build();

    bus.dispatch(vec![created("a")]).await;

    let event = rx.recv().await.unwrap();
    assert_eq!(event.kind(), EventKind::ServiceCreated);
}

#[test]
fn test_panicking_handler_is_isolated() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let bus = EventBus::builder()
        .on(EventKind::ServiceCreated, Arc::new(Panicking))
        .on(
            EventKind::ServiceCreated,
            Arc::new(Recorder {
                name: "rec",
                seen: seen.clone(),
            }),
        )
        .build();

    let events = vec![created("a"), created("b"), created("c")];
    let report = tokio_test::block_on(bus.dispatch(events));

    assert_eq!(report.delivered, 3);
    assert_eq!(report.failed, 3);
    assert_eq!(*seen.lock().unwrap(), vec!["rec:a", "rec:b", "rec:c"]);
}

#[tokio::test]
async fn test_event_stream_yields_dispatched_events() {
    let broadcast = Arc::new(BroadcastHandler::new(8));
    let mut events = Box::pin(broadcast.stream());
    let bus = EventBus::builder().on_all(broadcast.clone()).build();

    bus.dispatch(vec![
        created("a"),
        DomainEvent::ServiceDeleted {
            id: 1,
            name: "a".to_string(),
        },
    ])
    .await;

    let first = events.next().await.unwrap();
    assert_eq!(first.kind().as_str(), "service_created");
    let second = events.next().await.unwrap();
    assert_eq!(second.kind(), EventKind::ServiceDeleted);
    assert_eq!(serde_json::to_value(&second).unwrap()["event"], "service_deleted");
}

#[tokio::test]
async fn test_lagging_event_stream_skips_ahead() {
    let broadcast = Arc::new(BroadcastHandler::new(1));
    let mut events = Box::pin(broadcast.stream());
    let bus = EventBus::builder().on_all(broadcast.clone()).build();

    bus.dispatch(vec![created("a"), created("b"), created("c")]).await;

    match events.next().await.unwrap() {
        DomainEvent::ServiceCreated { service } => assert_eq!(service.name, "c"),
        other => panic!("unexpected event {:?}", other),
    }
}
