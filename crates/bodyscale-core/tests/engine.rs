//! End-to-end tests driving the engine through the mock transport.
//!
//! All tests run on a paused clock, so reconnect delays and scan timeouts
//! elapse instantly and deterministically.

use std::time::Duration;

use bodyscale_core::{
    ConnectionState, DeviceIdentity, DeviceRegistry, EngineConfig, ErrorCode,
    MeasurementCharacteristic, MemoryStore, MockPeripheral, MockTransport, RegistryRecord,
    ScaleEngine, ScaleEvent, ScaleHandle,
};
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{Instant, sleep, timeout};

const EVENT_TIMEOUT: Duration = Duration::from_secs(60);

fn remembered(id: &str) -> DeviceRegistry {
    DeviceRegistry::open(MemoryStore::with_record(RegistryRecord::with_device(
        DeviceIdentity::new(id, "MIBFS"),
    )))
    .unwrap()
}

async fn next_event(events: &mut Receiver<ScaleEvent>) -> ScaleEvent {
    timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
}

async fn wait_for_event(
    events: &mut Receiver<ScaleEvent>,
    matches: impl Fn(&ScaleEvent) -> bool,
) -> ScaleEvent {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

/// Let the engine settle, then collect whatever it emitted.
async fn drain(events: &mut Receiver<ScaleEvent>) -> Vec<ScaleEvent> {
    sleep(Duration::from_millis(100)).await;
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return drained,
            Err(TryRecvError::Lagged(n)) => panic!("lagged by {n} events"),
        }
    }
}

fn accepted_weights(events: &[ScaleEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            ScaleEvent::MeasurementAccepted { measurement } => Some(measurement.weight_kg),
            _ => None,
        })
        .collect()
}

/// Spawn an engine that auto-connects to a remembered scale and wait until
/// it is reading. The returned receiver only sees events from then on.
async fn reading_engine(
    mock: &MockTransport,
    id: &str,
    config: EngineConfig,
) -> (ScaleHandle, Receiver<ScaleEvent>) {
    let handle = ScaleEngine::spawn(mock.clone(), remembered(id), config)
        .await
        .unwrap();
    timeout(EVENT_TIMEOUT, handle.wait_for_state(ConnectionState::Reading))
        .await
        .expect("engine never reached reading")
        .unwrap();
    let events = handle.subscribe();
    (handle, events)
}

#[tokio::test(start_paused = true)]
async fn test_auto_connects_to_remembered_scale() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBCS");
    let (handle, _events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.device.as_ref().map(|d| d.id.as_str()), Some(id.as_str()));
    assert_eq!(
        snapshot.subscribed,
        vec![
            MeasurementCharacteristic::WeightScale,
            MeasurementCharacteristic::BodyComposition
        ]
    );
    assert_eq!(mock.scan_count(), 1);
    assert_eq!(mock.connect_count(), 1);
    assert!(mock.is_connected(&id));
}

#[tokio::test(start_paused = true)]
async fn test_settling_weight_yields_one_measurement() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let (_handle, mut events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    for kg in [71.3, 71.1, 71.05, 71.02, 71.0, 71.0] {
        assert!(mock.send_weight(&id, kg, false));
        sleep(Duration::from_millis(300)).await;
    }

    let emitted = drain(&mut events).await;
    let live = emitted
        .iter()
        .filter(|event| matches!(event, ScaleEvent::LiveWeight { .. }))
        .count();
    assert_eq!(live, 4);
    assert_eq!(accepted_weights(&emitted), vec![71.0]);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_window_spans_measurements() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let (_handle, mut events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    assert!(mock.send_weight(&id, 70.0, true));
    sleep(Duration::from_millis(4999)).await;
    assert!(mock.send_weight(&id, 70.5, true));
    sleep(Duration::from_millis(1)).await;
    assert!(mock.send_weight(&id, 71.0, true));

    assert_eq!(accepted_weights(&drain(&mut events).await), vec![70.0, 71.0]);
}

#[tokio::test(start_paused = true)]
async fn test_impedance_marks_reading_stable() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBCS");
    let (_handle, mut events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    assert!(mock.send_body_composition(&id, 68.4, Some(480.0)));
    let event = wait_for_event(&mut events, |e| {
        matches!(e, ScaleEvent::MeasurementAccepted { .. })
    })
    .await;
    match event {
        ScaleEvent::MeasurementAccepted { measurement } => {
            assert!((measurement.weight_kg - 68.4).abs() < 1e-9);
            assert!((measurement.impedance_ohm.unwrap() - 480.0).abs() < 1e-9);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_implausible_weight_is_dropped_silently() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let (_handle, mut events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    assert!(mock.send_weight(&id, 1.5, true));
    let emitted = drain(&mut events).await;
    assert!(accepted_weights(&emitted).is_empty());
    assert!(
        !emitted
            .iter()
            .any(|event| matches!(event, ScaleEvent::Error { .. }))
    );

    assert!(mock.send_weight(&id, 64.2, true));
    assert_eq!(accepted_weights(&drain(&mut events).await), vec![64.2]);
}

#[tokio::test(start_paused = true)]
async fn test_decode_error_keeps_session_alive() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let (handle, mut events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    assert!(mock.send_frame(&id, MeasurementCharacteristic::WeightScale, vec![0x00]));
    let event = wait_for_event(&mut events, |e| matches!(e, ScaleEvent::Error { .. })).await;
    match event {
        ScaleEvent::Error {
            code, recoverable, ..
        } => {
            assert_eq!(code, ErrorCode::DecodeError);
            assert!(recoverable);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(handle.state(), ConnectionState::Reading);

    assert!(mock.send_weight(&id, 72.0, true));
    assert_eq!(accepted_weights(&drain(&mut events).await), vec![72.0]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhausts_after_five_attempts() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let (handle, mut events) = reading_engine(&mock, &id, EngineConfig::default()).await;
    let connects_before = mock.connect_count();

    mock.set_fail_connect(true);
    let dropped_at = Instant::now();
    assert!(mock.drop_link(&id));

    let mut attempts_at = Vec::new();
    let mut scheduled = Vec::new();
    loop {
        match next_event(&mut events).await {
            ScaleEvent::StateChanged {
                state: ConnectionState::Connecting,
                ..
            } => attempts_at.push(Instant::now()),
            ScaleEvent::ReconnectScheduled {
                attempt,
                max_attempts,
                delay_ms,
            } => {
                assert_eq!(max_attempts, 5);
                assert_eq!(delay_ms, 3000);
                scheduled.push(attempt);
            }
            ScaleEvent::ReconnectExhausted { attempts } => {
                assert_eq!(attempts, 5);
                break;
            }
            _ => {}
        }
    }

    assert_eq!(scheduled, vec![1, 2, 3, 4, 5]);
    assert_eq!(attempts_at.len(), 5);
    let mut previous = dropped_at;
    for at in attempts_at {
        let gap = at - previous;
        assert!(
            gap >= Duration::from_millis(3000) && gap < Duration::from_millis(3100),
            "attempt gap {gap:?}"
        );
        previous = at;
    }
    assert_eq!(mock.connect_count() - connects_before, 5);
    assert_eq!(handle.state(), ConnectionState::Disconnected);

    // Nothing more is scheduled and exhaustion is not reported again.
    sleep(Duration::from_secs(30)).await;
    let later = drain(&mut events).await;
    assert!(
        !later
            .iter()
            .any(|event| matches!(event, ScaleEvent::ReconnectExhausted { .. }))
    );
    assert_eq!(mock.connect_count() - connects_before, 5);
    assert_eq!(handle.snapshot().attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_recovers_and_resets_attempts() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let (handle, mut events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    mock.fail_next_connects(2);
    assert!(mock.drop_link(&id));
    wait_for_event(&mut events, |e| {
        matches!(
            e,
            ScaleEvent::StateChanged {
                state: ConnectionState::Reading,
                ..
            }
        )
    })
    .await;

    assert_eq!(handle.snapshot().attempt, 0);
    assert!(mock.is_connected(&id));

    // A second drop starts a fresh budget.
    assert!(mock.drop_link(&id));
    let event = wait_for_event(&mut events, |e| {
        matches!(e, ScaleEvent::ReconnectScheduled { .. })
    })
    .await;
    assert!(matches!(
        event,
        ScaleEvent::ReconnectScheduled { attempt: 1, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_after_exhaustion() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let config = EngineConfig::default().reconnect(
        bodyscale_core::ReconnectOptions::new()
            .max_attempts(2)
            .delay(Duration::from_millis(500)),
    );
    let (handle, mut events) = reading_engine(&mock, &id, config).await;

    mock.set_fail_connect(true);
    assert!(mock.drop_link(&id));
    wait_for_event(&mut events, |e| {
        matches!(e, ScaleEvent::ReconnectExhausted { attempts: 2 })
    })
    .await;

    mock.set_fail_connect(false);
    assert!(handle.reconnect().await.unwrap());
    timeout(EVENT_TIMEOUT, handle.wait_for_state(ConnectionState::Reading))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_scan_rejected_while_connecting() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    mock.set_connect_latency(Duration::from_secs(5));
    let handle = ScaleEngine::spawn(mock.clone(), DeviceRegistry::in_memory(), EngineConfig::default())
        .await
        .unwrap();

    assert!(handle.select_device(DeviceIdentity::new(&id, "MIBFS")).await.unwrap());
    handle
        .wait_for_state(ConnectionState::Connecting)
        .await
        .unwrap();

    assert!(!handle.start_scan().await.unwrap());
    assert_eq!(handle.state(), ConnectionState::Connecting);
    assert_eq!(mock.scan_count(), 1);

    timeout(EVENT_TIMEOUT, handle.wait_for_state(ConnectionState::Reading))
        .await
        .unwrap()
        .unwrap();
    assert!(!handle.start_scan().await.unwrap());
    assert!(
        !handle
            .select_device(DeviceIdentity::new("AA:BB:CC:DD:EE:FF", "MIBFS"))
            .await
            .unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn test_manual_scan_reports_scales_and_remembers_selection() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBCS");
    mock.add_peripheral(MockPeripheral {
        id: "11:22:33:44:55:66".to_string(),
        name: Some("Mi Smart Band 7".to_string()),
        rssi: Some(-70),
    });
    let handle = ScaleEngine::spawn(mock.clone(), DeviceRegistry::in_memory(), EngineConfig::default())
        .await
        .unwrap();
    let mut events = handle.subscribe();

    assert!(handle.start_scan().await.unwrap());
    assert_eq!(handle.state(), ConnectionState::Scanning);
    let event = wait_for_event(&mut events, |e| {
        matches!(e, ScaleEvent::DeviceDiscovered { .. })
    })
    .await;
    let ScaleEvent::DeviceDiscovered { device, rssi } = event else {
        panic!("unexpected {event:?}");
    };
    assert_eq!(device.id, id);
    assert_eq!(device.display_name, "MIBCS");
    assert_eq!(rssi, Some(-55));

    // The non-scale peripheral is filtered out.
    assert!(
        !drain(&mut events)
            .await
            .iter()
            .any(|e| matches!(e, ScaleEvent::DeviceDiscovered { .. }))
    );

    assert!(handle.select_device(device.clone()).await.unwrap());
    let snapshot = timeout(EVENT_TIMEOUT, handle.wait_for_state(ConnectionState::Reading))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.remembered, Some(device));
    assert!(!mock.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_scan_timeout_reports_device_not_found() {
    let mock = MockTransport::new();
    let handle = ScaleEngine::spawn(mock.clone(), DeviceRegistry::in_memory(), EngineConfig::default())
        .await
        .unwrap();
    let mut events = handle.subscribe();

    let started = Instant::now();
    assert!(handle.start_scan().await.unwrap());
    let event = wait_for_event(&mut events, |e| matches!(e, ScaleEvent::Error { .. })).await;
    match event {
        ScaleEvent::Error {
            code,
            recoverable,
            suggestion,
            ..
        } => {
            assert_eq!(code, ErrorCode::DeviceNotFound);
            assert!(recoverable);
            assert!(suggestion.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_stop_scan() {
    let mock = MockTransport::new();
    let handle = ScaleEngine::spawn(mock.clone(), DeviceRegistry::in_memory(), EngineConfig::default())
        .await
        .unwrap();

    assert!(!handle.stop_scan().await.unwrap());
    assert!(handle.start_scan().await.unwrap());
    assert!(handle.stop_scan().await.unwrap());
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    sleep(Duration::from_millis(10)).await;
    assert!(!mock.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_partial_subscription_still_reads() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    mock.set_fail_subscribe(MeasurementCharacteristic::BodyComposition, true);
    let (handle, _events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    assert_eq!(
        handle.snapshot().subscribed,
        vec![MeasurementCharacteristic::WeightScale]
    );
    assert_eq!(
        mock.subscriptions(&id),
        vec![MeasurementCharacteristic::WeightScale]
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_subscription_moves_to_error() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    mock.set_fail_subscribe(MeasurementCharacteristic::WeightScale, true);
    mock.set_fail_subscribe(MeasurementCharacteristic::BodyComposition, true);
    let handle = ScaleEngine::spawn(mock.clone(), remembered(&id), EngineConfig::default())
        .await
        .unwrap();
    let mut events = handle.subscribe();

    let event = wait_for_event(&mut events, |e| matches!(e, ScaleEvent::Error { .. })).await;
    assert!(matches!(
        event,
        ScaleEvent::Error {
            code: ErrorCode::SubscriptionFailed,
            ..
        }
    ));
    timeout(EVENT_TIMEOUT, handle.wait_for_state(ConnectionState::Error))
        .await
        .unwrap()
        .unwrap();

    assert!(handle.acknowledge_error().await.unwrap());
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(!handle.acknowledge_error().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_explicit_disconnect_does_not_reconnect() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let (handle, _events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    assert!(handle.disconnect().await.unwrap());
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    mock.drop_link(&id);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.connect_count(), 1);
    assert!(!mock.is_connected(&id));
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(!handle.disconnect().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_connect_leaves_no_link() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    mock.set_connect_latency(Duration::from_secs(5));
    let handle = ScaleEngine::spawn(mock.clone(), remembered(&id), EngineConfig::default())
        .await
        .unwrap();

    handle
        .wait_for_state(ConnectionState::Connecting)
        .await
        .unwrap();
    assert!(handle.disconnect().await.unwrap());

    sleep(Duration::from_secs(10)).await;
    assert!(!mock.is_connected(&id));
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_late_link_does_not_close_restarted_session() {
    for _ in 0..20 {
        let mock = MockTransport::new();
        let id = mock.add_scale("MIBFS");
        let latency = Duration::from_millis(500);
        mock.set_connect_latency(latency);
        let handle = ScaleEngine::spawn(mock.clone(), remembered(&id), EngineConfig::default())
            .await
            .unwrap();
        handle
            .wait_for_state(ConnectionState::Connecting)
            .await
            .unwrap();
        let mut events = handle.subscribe();

        // Restart the session at the instant the first connect lands, so its
        // result can arrive after the new session is already linked.
        sleep(latency).await;
        mock.set_connect_latency(Duration::ZERO);
        let (disconnected, reconnected) = tokio::join!(handle.disconnect(), handle.reconnect());
        assert!(disconnected.unwrap());
        assert!(reconnected.unwrap());

        timeout(EVENT_TIMEOUT, handle.wait_for_state(ConnectionState::Reading))
            .await
            .expect("restarted session never reached reading")
            .unwrap();
        let emitted = drain(&mut events).await;
        assert!(
            !emitted
                .iter()
                .any(|event| matches!(event, ScaleEvent::Error { .. })),
            "{emitted:?}"
        );
        assert_eq!(handle.state(), ConnectionState::Reading);
        assert_eq!(mock.connect_count(), 2);
        assert!(mock.is_connected(&id));
        assert_eq!(mock.subscriptions(&id).len(), 2);
        handle.shutdown().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_forget_device_cancels_reconnection() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let (handle, _events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    mock.set_fail_connect(true);
    assert!(mock.drop_link(&id));
    sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.snapshot().attempt, 1);

    assert!(handle.forget_device().await.unwrap());
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.remembered, None);
    assert_eq!(snapshot.device, None);
    assert_eq!(snapshot.attempt, 0);

    let connects = mock.connect_count();
    sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.connect_count(), connects);
    assert!(!handle.forget_device().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_disabling_auto_connect_stops_reconnection() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let (handle, _events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    assert!(mock.drop_link(&id));
    sleep(Duration::from_millis(100)).await;
    assert!(handle.set_auto_connect(false).await.unwrap());
    assert!(!handle.snapshot().auto_connect);

    let connects = mock.connect_count();
    sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.connect_count(), connects);
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_auto_connect_disabled_on_start() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let mut record = RegistryRecord::with_device(DeviceIdentity::new(&id, "MIBFS"));
    record.auto_connect = false;
    let registry = DeviceRegistry::open(MemoryStore::with_record(record)).unwrap();
    let handle = ScaleEngine::spawn(mock.clone(), registry, EngineConfig::default())
        .await
        .unwrap();

    sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(mock.scan_count(), 0);

    assert!(handle.set_auto_connect(true).await.unwrap());
    timeout(EVENT_TIMEOUT, handle.wait_for_state(ConnectionState::Reading))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_adapter_loss_is_not_retried() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let (handle, mut events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    assert!(mock.lose_adapter());
    let event = wait_for_event(&mut events, |e| matches!(e, ScaleEvent::Error { .. })).await;
    assert!(matches!(
        event,
        ScaleEvent::Error {
            code: ErrorCode::TransportUnavailable,
            recoverable: false,
            ..
        }
    ));
    assert_eq!(handle.state(), ConnectionState::Error);

    let connects = mock.connect_count();
    sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.connect_count(), connects);
}

#[tokio::test(start_paused = true)]
async fn test_transport_open_failure() {
    let mock = MockTransport::new();
    mock.set_fail_open(true);
    let result = ScaleEngine::spawn(mock, DeviceRegistry::in_memory(), EngineConfig::default()).await;
    assert!(matches!(
        result,
        Err(bodyscale_core::Error::TransportUnavailable(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_rejected() {
    let config = EngineConfig::default().reconnect(bodyscale_core::ReconnectOptions::new().max_attempts(0));
    let result = ScaleEngine::spawn(MockTransport::new(), DeviceRegistry::in_memory(), config).await;
    assert!(matches!(result, Err(bodyscale_core::Error::InvalidConfig(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_engine() {
    let mock = MockTransport::new();
    let id = mock.add_scale("MIBFS");
    let (handle, _events) = reading_engine(&mock, &id, EngineConfig::default()).await;

    handle.shutdown().await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert!(!handle.is_running());
    assert!(!mock.is_connected(&id));
    assert!(matches!(
        handle.start_scan().await,
        Err(bodyscale_core::Error::Cancelled)
    ));
}
