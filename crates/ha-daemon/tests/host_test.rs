//! Daemon behaviour against an in-memory transport

mod common;

use common::{eventually, service_called, state, state_changed, test_config, FakeClient};
use ha_core::{events, Attributes, Event};
use ha_daemon::{ClientError, Daemon, DaemonError, SubscriptionKind, WaitCondition};
use ha_registries::DeviceRecord;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Harness {
    client: Arc<FakeClient>,
    daemon: Arc<Daemon>,
    cancel: CancellationToken,
    run: JoinHandle<Result<(), DaemonError>>,
}

impl Harness {
    async fn start(client: FakeClient) -> Self {
        Self::start_with(client, test_config()).await
    }

    async fn start_with(client: FakeClient, config: ha_daemon::DaemonConfig) -> Self {
        let client = Arc::new(client);
        let daemon = Arc::new(Daemon::new(config, client.clone()));
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let daemon = daemon.clone();
            let cancel = cancel.clone();
            async move { daemon.run(cancel).await }
        });
        assert!(eventually(|| daemon.is_connected()).await, "daemon never connected");
        Self {
            client,
            daemon,
            cancel,
            run,
        }
    }

    async fn shutdown(self) -> Result<(), DaemonError> {
        self.cancel.cancel();
        self.run.await.unwrap()
    }
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_initial_sync_resolves_areas() {
    let harness = Harness::start(FakeClient::with_kitchen()).await;

    let light = harness.daemon.get_state("light.kitchen1").unwrap();
    assert_eq!(light.state, "off");
    assert_eq!(light.area.as_deref(), Some("Kitchen"));
    assert!(harness.client.subscribed.load(Ordering::SeqCst));

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_state_change_updates_store_with_area() {
    let harness = Harness::start(FakeClient::with_kitchen()).await;

    harness
        .client
        .push(state_changed("light.kitchen1", Some("off"), Some("on")));

    let daemon = harness.daemon.clone();
    assert!(eventually(|| daemon.state_store().is_state("light.kitchen1", "on")).await);
    let light = daemon.get_state("light.kitchen1").unwrap();
    assert_eq!(light.area.as_deref(), Some("Kitchen"));

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_prefix_subscriptions() {
    let harness = Harness::start(FakeClient::new()).await;
    let all = counter();
    let lights = counter();

    let seen = all.clone();
    harness.daemon.listen_state("", move |_, _, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });
    let seen = lights.clone();
    harness.daemon.listen_state("light.", move |entity_id, new_state, old_state| {
        assert!(entity_id.starts_with("light."));
        assert_eq!(new_state.unwrap().state, "on");
        assert_eq!(old_state.unwrap().state, "off");
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });

    harness
        .client
        .push(state_changed("light.kitchen", Some("off"), Some("on")));
    harness
        .client
        .push(state_changed("switch.kitchen", Some("off"), Some("on")));

    assert!(eventually(|| all.load(Ordering::SeqCst) == 2).await);
    harness.daemon.dispatcher().drain().await;
    assert_eq!(lights.load(Ordering::SeqCst), 1);
    assert_eq!(all.load(Ordering::SeqCst), 2);

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_handlers_are_isolated() {
    let harness = Harness::start(FakeClient::new()).await;
    let healthy = counter();

    harness
        .daemon
        .listen_state("light.", |_, _, _| async { Err(anyhow::anyhow!("boom")) });
    harness.daemon.listen_state("light.", |entity_id, _, _| async move {
        if entity_id.starts_with("light.") {
            panic!("handler panicked");
        }
        Ok(())
    });
    let seen = healthy.clone();
    harness.daemon.listen_state("light.", move |_, _, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });

    harness
        .client
        .push(state_changed("light.a", Some("off"), Some("on")));
    harness
        .client
        .push(state_changed("light.a", Some("on"), Some("off")));

    assert!(eventually(|| healthy.load(Ordering::SeqCst) == 2).await);
    assert!(harness.daemon.is_connected());
    assert!(harness.daemon.state_store().is_state("light.a", "off"));

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_service_call_case_insensitive() {
    let harness = Harness::start(FakeClient::new()).await;
    let calls = counter();
    let payloads = Arc::new(std::sync::Mutex::new(Vec::new()));

    let seen = calls.clone();
    let sink = payloads.clone();
    harness
        .daemon
        .listen_service_call("light", "turn_on", move |data: Value| {
            seen.fetch_add(1, Ordering::SeqCst);
            sink.lock().unwrap().push(data);
            async { Ok(()) }
        });

    harness.client.push(service_called(
        "LIGHT",
        "Turn_On",
        json!({"entity_id": "light.kitchen"}),
    ));
    harness
        .client
        .push(service_called("light", "turn_off", Value::Null));

    assert!(eventually(|| calls.load(Ordering::SeqCst) == 1).await);
    harness.daemon.dispatcher().drain().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        payloads.lock().unwrap()[0],
        json!({"entity_id": "light.kitchen"})
    );

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_custom_events_exact_and_predicate() {
    let harness = Harness::start(FakeClient::new()).await;
    let exact = counter();
    let predicate = counter();

    let seen = exact.clone();
    harness.daemon.listen_event("doorbell", move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });
    let seen = predicate.clone();
    harness.daemon.listen_event_where(
        |event_type, data| event_type == "doorbell" && data["floor"] == "ground",
        move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        },
    );

    harness
        .client
        .push(Event::new("doorbell", json!({"floor": "ground"})));
    harness
        .client
        .push(Event::new("doorbell", json!({"floor": "first"})));
    harness.client.push(Event::new("unrelated", json!({})));

    assert!(eventually(|| exact.load(Ordering::SeqCst) == 2).await);
    harness.daemon.dispatcher().drain().await;
    assert_eq!(predicate.load(Ordering::SeqCst), 1);

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_subscription_not_invoked() {
    let harness = Harness::start(FakeClient::new()).await;
    let calls = counter();

    let seen = calls.clone();
    let id = harness.daemon.listen_state("sensor.", move |_, _, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });

    harness
        .client
        .push(state_changed("sensor.t", None, Some("1")));
    assert!(eventually(|| calls.load(Ordering::SeqCst) == 1).await);

    assert!(harness.daemon.cancel_listen_state(id));
    harness
        .client
        .push(state_changed("sensor.t", Some("1"), Some("2")));
    let daemon = harness.daemon.clone();
    assert!(eventually(|| daemon.state_store().is_state("sensor.t", "2")).await);
    daemon.dispatcher().drain().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_and_removed_notifications_are_dropped() {
    let harness = Harness::start(FakeClient::new()).await;
    let calls = counter();

    let seen = calls.clone();
    harness.daemon.listen_state("", move |_, _, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });

    harness
        .client
        .push(Event::new(events::STATE_CHANGED, json!({"entity_id": 42})));
    harness
        .client
        .push(state_changed("light.gone", Some("on"), None));
    harness
        .client
        .push(state_changed("light.ok", None, Some("on")));

    let daemon = harness.daemon.clone();
    assert!(eventually(|| daemon.state_store().is_state("light.ok", "on")).await);
    daemon.dispatcher().drain().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(daemon.get_state("light.gone").is_none());
    assert!(daemon.is_connected());

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registry_update_resyncs() {
    let harness = Harness::start(FakeClient::with_kitchen()).await;
    assert_eq!(harness.client.state_fetches.load(Ordering::SeqCst), 1);

    *harness.client.devices.lock().unwrap() = vec![DeviceRecord::new("d1").in_area("office")];
    harness.client.areas.lock().unwrap().push(ha_registries::AreaRecord::new("office", "Office"));
    *harness.client.states.lock().unwrap() = vec![state("light.kitchen1", "on")];
    harness
        .client
        .push(Event::new(events::DEVICE_REGISTRY_UPDATED, json!({"action": "update"})));

    let daemon = harness.daemon.clone();
    assert!(
        eventually(|| daemon
            .get_state("light.kitchen1")
            .map(|s| s.area.as_deref() == Some("Office") && s.state == "on")
            .unwrap_or(false))
        .await
    );
    assert_eq!(harness.client.state_fetches.load(Ordering::SeqCst), 2);

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_for_change_through_dispatch() {
    let harness = Harness::start(FakeClient::with_kitchen()).await;

    let wait = harness
        .daemon
        .wait_for_change(["light.kitchen1"], WaitCondition::to("on"));
    assert_eq!(harness.daemon.subscriptions().len(), 1);

    harness
        .client
        .push(state_changed("light.kitchen1", Some("on"), Some("dim")));
    harness
        .client
        .push(state_changed("light.kitchen1", Some("dim"), Some("on")));

    let fired = tokio::time::timeout(Duration::from_secs(1), wait.wait())
        .await
        .unwrap();
    assert!(fired);
    assert_eq!(wait.subscription_count(), 0);
    assert!(harness.daemon.subscriptions().is_empty());

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_announcements_are_fifo_and_paced() {
    let client = FakeClient::new();
    let mut player = state("media_player.kitchen", "playing");
    player
        .attributes
        .insert("media_duration".to_string(), json!(0.2));
    *client.states.lock().unwrap() = vec![player];
    let harness = Harness::start(client).await;

    assert!(harness.daemon.speak("media_player.kitchen", "first").unwrap());
    assert!(harness.daemon.speak("media_player.kitchen", "second").unwrap());

    let client = harness.client.clone();
    assert!(eventually(|| client.calls().len() == 2).await);

    let calls = client.calls();
    assert_eq!(calls[0].domain, "tts");
    assert_eq!(calls[0].service, "google_cloud_say");
    assert!(calls[0].wait_for_response);
    assert_eq!(
        calls[0].data,
        json!({"entity_id": "media_player.kitchen", "message": "first"})
    );
    assert_eq!(calls[1].data["message"], "second");
    // settle delay plus the remaining clip duration
    assert!(calls[1].at - calls[0].at >= Duration::from_millis(200));

    harness.shutdown().await.unwrap();
}

fn player_with_duration(entity_id: &str, duration: Value) -> ha_core::EntityState {
    let mut player = state(entity_id, "playing");
    player
        .attributes
        .insert("media_duration".to_string(), duration);
    player
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_announcement_does_not_stop_queue() {
    let client = FakeClient::new();
    client.fail_next_calls(1);
    let harness = Harness::start(client).await;

    assert!(harness.daemon.speak("media_player.kitchen", "lost").unwrap());
    assert!(harness.daemon.speak("media_player.kitchen", "heard").unwrap());

    let client = harness.client.clone();
    assert!(eventually(|| client.calls().len() == 2).await);
    let calls = client.calls();
    assert_eq!(calls[0].data["message"], "lost");
    assert_eq!(calls[1].data["message"], "heard");

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unusable_durations_do_not_stall_queue() {
    let client = FakeClient::new();
    *client.states.lock().unwrap() = vec![
        player_with_duration("media_player.garage", json!("abc")),
        player_with_duration("media_player.attic", json!(1e20)),
    ];
    let harness = Harness::start(client).await;

    assert!(harness.daemon.speak("media_player.garage", "one").unwrap());
    assert!(harness.daemon.speak("media_player.attic", "two").unwrap());
    assert!(harness.daemon.speak("media_player.garage", "three").unwrap());

    let client = harness.client.clone();
    assert!(eventually(|| client.calls().len() == 3).await);
    let messages: Vec<_> = client
        .calls()
        .iter()
        .map(|call| call.data["message"].clone())
        .collect();
    assert_eq!(messages, vec![json!("one"), json!("two"), json!("three")]);

    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queue_survives_stop_and_rerun() {
    let harness = Harness::start(FakeClient::new()).await;
    let client = harness.client.clone();
    let daemon = harness.daemon.clone();

    assert!(daemon.speak("media_player.kitchen", "before").unwrap());
    assert!(eventually(|| client.calls().len() == 1).await);

    daemon.stop().await;
    let result = tokio::time::timeout(Duration::from_secs(1), harness.run)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert!(!daemon.is_running());

    // queued while nothing is draining
    assert!(daemon.speak("media_player.kitchen", "while stopped").unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.calls().len(), 1);

    let cancel = CancellationToken::new();
    let rerun = tokio::spawn({
        let daemon = daemon.clone();
        let cancel = cancel.clone();
        async move { daemon.run(cancel).await }
    });
    assert!(eventually(|| daemon.is_connected()).await);
    assert!(eventually(|| client.calls().len() == 2).await);
    assert_eq!(client.calls()[1].data["message"], "while stopped");

    assert!(daemon.speak("media_player.kitchen", "after").unwrap());
    assert!(eventually(|| client.calls().len() == 3).await);

    cancel.cancel();
    assert!(rerun.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_speak_validates_and_drops_when_full() {
    let mut config = test_config();
    config.announcements.queue_capacity = 1;
    let daemon = Daemon::new(config, Arc::new(FakeClient::new()));

    assert!(matches!(
        daemon.speak("no_separator", "hi"),
        Err(DaemonError::InvalidEntityId(_))
    ));
    assert!(daemon.speak("media_player.a", "one").unwrap());
    assert!(!daemon.speak("media_player.a", "two").unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_twice_is_rejected() {
    let harness = Harness::start(FakeClient::new()).await;

    let second = harness.daemon.run(CancellationToken::new()).await;
    assert!(matches!(second, Err(DaemonError::AlreadyRunning)));
    assert!(harness.daemon.is_running());

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_refused_connection() {
    let client = Arc::new(FakeClient::new());
    client.refuse_connection();
    let daemon = Daemon::new(test_config(), client.clone());

    let result = daemon.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(DaemonError::ConnectRefused(_))));
    assert!(!daemon.is_connected());
    assert!(!daemon.is_running());
    assert!(!client.subscribed.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transport_failure_ends_run() {
    let harness = Harness::start(FakeClient::new()).await;

    harness
        .client
        .fail(ClientError::Protocol("socket reset".to_string()));

    let result = tokio::time::timeout(Duration::from_secs(1), harness.run)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(DaemonError::Client(ClientError::Protocol(_)))
    ));
    assert!(!harness.daemon.is_connected());
    assert!(!harness.daemon.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_keeps_companion_subscriptions() {
    let harness = Harness::start(FakeClient::new()).await;
    let reloads = counter();

    harness.daemon.listen_state("", |_, _, _| async { Ok(()) });
    harness.daemon.listen_event("x", |_, _| async { Ok(()) });
    let seen = reloads.clone();
    harness
        .daemon
        .listen_companion_service_call("reload", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

    harness.daemon.stop_automation_activities_only();
    assert_eq!(harness.daemon.subscriptions().len(), 1);
    assert!(harness.daemon.is_connected());

    harness
        .client
        .push(service_called("netdaemon", "reload", Value::Null));
    assert!(eventually(|| reloads.load(Ordering::SeqCst) == 1).await);

    harness.daemon.stop().await;
    harness.daemon.stop().await;
    assert!(harness.client.closed.load(Ordering::SeqCst));
    assert!(!harness.daemon.is_connected());
    assert_eq!(
        harness
            .daemon
            .subscriptions()
            .count(SubscriptionKind::CompanionServiceCall),
        1
    );

    let result = tokio::time::timeout(Duration::from_secs(1), harness.run)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_set_state_and_status() {
    let client = Arc::new(FakeClient::new());
    let daemon = Daemon::new(test_config(), client.clone());

    let mut attributes = Attributes::new();
    attributes.insert("brightness".to_string(), json!(120));
    let stored = daemon
        .set_state("light.desk", "on", attributes)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.attribute::<u32>("brightness"), Some(120));
    assert!(daemon.state_store().is_state("light.desk", "on"));

    assert!(matches!(
        daemon.set_state("desk", "on", Attributes::new()).await,
        Err(DaemonError::InvalidEntityId(_))
    ));

    let status = daemon.publish_status(3, 2).await.unwrap().unwrap();
    assert_eq!(status.entity_id, "netdaemon.status");
    assert_eq!(status.state, "Connected");
    assert_eq!(status.attribute::<usize>("number_of_loaded_apps"), Some(3));
    assert_eq!(status.attribute::<usize>("number_of_running_apps"), Some(2));
    assert!(status.attribute::<String>("version").is_some());
}

#[tokio::test]
async fn test_outbound_forwarding_and_apps() {
    let client = Arc::new(FakeClient::new());
    let daemon = Daemon::new(test_config(), client.clone());

    daemon
        .call_service("light", "turn_on", json!({"entity_id": "light.a"}), false)
        .await
        .unwrap();
    assert!(daemon.send_event("custom", json!({"a": 1})).await.unwrap());
    assert_eq!(client.calls()[0].service, "turn_on");
    assert_eq!(client.sent_events.lock().unwrap()[0].0, "custom");

    struct MyApp(u8);
    daemon.register_app_instance("my_app", Arc::new(MyApp(7)));
    assert_eq!(daemon.get_app::<MyApp>("my_app").unwrap().0, 7);
    assert!(daemon.get_app::<String>("my_app").is_none());
    daemon.clear_app_instances();
    assert_eq!(daemon.app_count(), 0);

    assert!(matches!(
        daemon.save_data("key", &json!(1)).await,
        Err(DaemonError::MissingCollaborator(_))
    ));
}
