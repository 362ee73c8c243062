//! Tests for widget models

use super::*;
use crate::key::Key;
use crate::processor::DataProcessor;
use crate::store::{KeyedStore, StoreOptions};
use crate::transport::MemoryTransport;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};

#[derive(Debug, Clone, PartialEq)]
enum LimitState {
    ProductDisconnected,
    Ready { meters: i32, card: String },
}

struct LimitLogic {
    camera: u32,
    limit: DataProcessor<i32>,
    card: DataProcessor<String>,
    in_flight: Arc<AtomicUsize>,
    overlaps: Arc<AtomicUsize>,
    slow: bool,
}

impl LimitLogic {
    fn new(camera: u32) -> Self {
        Self {
            camera,
            limit: DataProcessor::new(0),
            card: DataProcessor::new("Unknown".to_string()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            overlaps: Arc::new(AtomicUsize::new(0)),
            slow: false,
        }
    }
}

impl WidgetLogic for LimitLogic {
    type State = LimitState;

    fn in_setup(&mut self, ctx: &mut SetupContext) {
        ctx.bind_processor(&height_limit(), &self.limit);
        self.card = ctx.bind(&card_state(self.camera), "Unknown".to_string());
    }

    fn derive(&self) -> LimitState {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        if self.slow {
            std::thread::sleep(Duration::from_micros(200));
        }
        let state = LimitState::Ready {
            meters: self.limit.value(),
            card: self.card.value(),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        state
    }

    fn disconnected(&self) -> LimitState {
        LimitState::ProductDisconnected
    }
}

fn height_limit() -> Key<i32> {
    Key::new("FlightController", "HeightLimit")
}

fn card_state(camera: u32) -> Key<String> {
    Key::indexed("Camera", "SDCardState", camera)
}

fn ready(meters: i32, card: &str) -> LimitState {
    LimitState::Ready {
        meters,
        card: card.to_string(),
    }
}

fn setup_store() -> (Arc<MemoryTransport>, KeyedStore) {
    let transport = Arc::new(MemoryTransport::new("sim"));
    let store = KeyedStore::spawn(transport.clone(), StoreOptions::default());
    (transport, store)
}

fn model(store: &KeyedStore, camera: u32) -> WidgetModel<LimitLogic> {
    WidgetModel::new(format!("limit-{}", camera), store.clone(), LimitLogic::new(camera))
}

/// Read the stream until `expected` shows up
async fn expect_state<S>(stream: &mut S, expected: LimitState)
where
    S: Stream<Item = LimitState> + Unpin,
{
    let found = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(state) = stream.next().await {
            if state == expected {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(found, Ok(true), "never saw {:?}", expected);
}

async fn next_within<S: Stream + Unpin>(stream: &mut S) -> Option<S::Item> {
    tokio::time::timeout(Duration::from_millis(100), stream.next())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn test_state_before_setup_is_disconnected() {
    let (_transport, store) = setup_store();
    let model = model(&store, 0);
    assert_eq!(model.lifecycle(), LifecycleState::Created);
    assert_eq!(model.current_state(), LimitState::ProductDisconnected);
    assert_eq!(model.update_count(), 0);
}

#[tokio::test]
async fn test_setup_derives_from_defaults_then_pushes() {
    let (transport, store) = setup_store();
    let model = model(&store, 0);
    model.setup();
    assert_eq!(model.lifecycle(), LifecycleState::Active);
    assert_eq!(model.current_state(), ready(0, "Unknown"));

    let mut states = model.state_stream();
    transport.push(height_limit().id(), json!(20));
    expect_state(&mut states, ready(20, "Unknown")).await;
    transport.push(card_state(0).id(), json!("Full"));
    expect_state(&mut states, ready(20, "Full")).await;
}

#[tokio::test]
async fn test_height_limit_scenario_emits_once_per_change() {
    let (transport, store) = setup_store();
    let model = model(&store, 0);
    model.setup();
    store.stats().await.unwrap();

    let mut states = model.state_stream();
    assert_eq!(next_within(&mut states).await, Some(ready(0, "Unknown")));

    transport.push(height_limit().id(), json!(20));
    assert_eq!(next_within(&mut states).await, Some(ready(20, "Unknown")));

    transport.push(height_limit().id(), json!(20));
    assert_eq!(next_within(&mut states).await, None);

    transport.push(height_limit().id(), json!(30));
    assert_eq!(next_within(&mut states).await, Some(ready(30, "Unknown")));
}

#[tokio::test]
async fn test_disconnect_is_totalizing_for_every_model() {
    let (transport, store) = setup_store();
    transport.seed(height_limit().id().clone(), json!(120));
    let a = model(&store, 0);
    let b = model(&store, 1);
    a.setup();
    b.setup();

    let mut a_states = a.state_stream();
    let mut b_states = b.state_stream();
    expect_state(&mut a_states, ready(120, "Unknown")).await;
    expect_state(&mut b_states, ready(120, "Unknown")).await;

    transport.disconnect();
    expect_state(&mut a_states, LimitState::ProductDisconnected).await;
    expect_state(&mut b_states, LimitState::ProductDisconnected).await;

    // Values keep arriving but stay hidden while disconnected
    transport.push(height_limit().id(), json!(200));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.current_state(), LimitState::ProductDisconnected);
    assert!(!a.update_states());
    assert_eq!(a.current_state(), LimitState::ProductDisconnected);

    transport.connect();
    expect_state(&mut a_states, ready(200, "Unknown")).await;
    expect_state(&mut b_states, ready(200, "Unknown")).await;
}

#[tokio::test]
async fn test_setup_while_disconnected_starts_disconnected() {
    let (transport, store) = setup_store();
    transport.disconnect();
    let model = model(&store, 0);
    model.setup();
    assert_eq!(model.current_state(), LimitState::ProductDisconnected);
    assert!(model.update_count() >= 1);
}

#[tokio::test]
async fn test_shared_key_across_models_opens_one_subscription() {
    let (transport, store) = setup_store();
    let models: Vec<_> = (0..3).map(|_| model(&store, 0)).collect();
    for m in &models {
        m.setup();
    }
    store.stats().await.unwrap();
    assert_eq!(transport.subscribe_count(card_state(0).id()), 1);
    assert_eq!(transport.subscribe_count(height_limit().id()), 1);

    models[0].cleanup();
    models[1].cleanup();
    store.stats().await.unwrap();
    assert_eq!(transport.unsubscribe_count(card_state(0).id()), 0);

    models[2].cleanup();
    store.stats().await.unwrap();
    assert_eq!(transport.unsubscribe_count(card_state(0).id()), 1);
    assert_eq!(transport.unsubscribe_count(height_limit().id()), 1);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let (transport, store) = setup_store();
    let model = model(&store, 0);

    // Before setup
    model.cleanup();
    assert_eq!(model.lifecycle(), LifecycleState::Inactive);

    model.setup();
    store.stats().await.unwrap();
    model.cleanup();
    let after_first = store.stats().await.unwrap();
    let updates = model.update_count();

    model.cleanup();
    let after_second = store.stats().await.unwrap();

    assert_eq!(model.lifecycle(), LifecycleState::Inactive);
    assert_eq!(after_first, after_second);
    assert_eq!(model.update_count(), updates);
    assert_eq!(transport.unsubscribe_count(height_limit().id()), 1);
    assert!(model.bound_keys().is_empty());
}

#[tokio::test]
async fn test_setup_is_idempotent() {
    let (transport, store) = setup_store();
    let model = model(&store, 0);
    model.setup();
    model.setup();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.bindings, 2);
    assert_eq!(transport.subscribe_count(height_limit().id()), 1);
    assert_eq!(model.bound_keys().len(), 2);
}

#[tokio::test]
async fn test_no_updates_after_cleanup() {
    let (transport, store) = setup_store();
    let model = model(&store, 0);
    model.setup();
    let mut states = model.state_stream();
    assert!(next_within(&mut states).await.is_some());

    model.cleanup();
    store.stats().await.unwrap();
    let updates = model.update_count();

    transport.push(height_limit().id(), json!(77));
    transport.disconnect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(model.update_count(), updates);
    assert_eq!(next_within(&mut states).await, None);
}

#[tokio::test]
async fn test_restart_keeps_output_subscribers() {
    let (transport, store) = setup_store();
    transport.seed(card_state(0).id().clone(), json!("Normal"));
    transport.seed(card_state(1).id().clone(), json!("NotInserted"));

    let model = model(&store, 0);
    model.setup();
    let mut states = model.state_stream();
    expect_state(&mut states, ready(0, "Normal")).await;

    model.restart_with(|logic| logic.camera = 1);
    assert_eq!(model.lifecycle(), LifecycleState::Active);
    expect_state(&mut states, ready(0, "NotInserted")).await;

    store.stats().await.unwrap();
    assert_eq!(transport.unsubscribe_count(card_state(0).id()), 1);
    assert_eq!(transport.subscribe_count(card_state(1).id()), 1);
    // The shared key was released and re-acquired, never duplicated
    assert_eq!(
        store
            .subscriptions()
            .await
            .unwrap()
            .iter()
            .filter(|s| s.key == *height_limit().id())
            .count(),
        1
    );

    transport.push(card_state(1).id(), json!("Full"));
    expect_state(&mut states, ready(0, "Full")).await;

    // The old camera no longer reaches the model
    transport.push(card_state(0).id(), json!("Error"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(model.current_state(), ready(0, "Full"));
}

#[tokio::test]
async fn test_restart_emits_only_caught_up_states() {
    let (transport, store) = setup_store();
    transport.seed(height_limit().id().clone(), json!(120));
    transport.seed(card_state(0).id().clone(), json!("Normal"));
    transport.seed(card_state(1).id().clone(), json!("Full"));

    let model = model(&store, 0);
    model.setup();
    let mut states = model.state_stream();
    expect_state(&mut states, ready(120, "Normal")).await;
    while next_within(&mut states).await.is_some() {}

    model.restart_with(|logic| logic.camera = 1);

    let mut seen = Vec::new();
    while let Some(state) = next_within(&mut states).await {
        seen.push(state);
    }
    assert_eq!(seen, vec![ready(120, "Full")]);
    assert_eq!(model.current_state(), ready(120, "Full"));
}

#[tokio::test]
async fn test_restart_before_setup_applies_selector_later() {
    let (transport, store) = setup_store();
    let model = model(&store, 0);
    model.restart_with(|logic| logic.camera = 2);
    model.restart();
    assert_eq!(model.lifecycle(), LifecycleState::Created);

    model.setup();
    store.stats().await.unwrap();
    assert_eq!(transport.subscribe_count(card_state(2).id()), 1);
    assert_eq!(transport.subscribe_count(card_state(0).id()), 0);
}

#[tokio::test]
async fn test_drop_unbinds() {
    let (transport, store) = setup_store();
    {
        let model = model(&store, 0);
        model.setup();
        store.stats().await.unwrap();
    }
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.bindings, 0);
    assert_eq!(transport.unsubscribe_count(height_limit().id()), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_derivation_is_sequential() {
    let (transport, store) = setup_store();
    let mut logic = LimitLogic::new(0);
    logic.slow = true;
    let overlaps = Arc::clone(&logic.overlaps);
    let model = Arc::new(WidgetModel::new("slow", store.clone(), logic));
    model.setup();
    store.stats().await.unwrap();

    let mut writers = Vec::new();
    for t in 0..4 {
        let transport = Arc::clone(&transport);
        let model = Arc::clone(&model);
        writers.push(tokio::spawn(async move {
            for i in 0..50 {
                transport.push(height_limit().id(), json!(t * 1000 + i));
                transport.push(card_state(0).id(), json!(format!("s{}", i)));
                if i % 10 == 0 {
                    model.update_states();
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(model.update_count() > 1);
}
