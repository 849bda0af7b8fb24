//! Integration tests for coldwatch-core
//!
//! These tests run the real HTTP transport against an in-process stub
//! controller. The test at the bottom talks to real hardware and should be
//! run with:
//! `COLDWATCH_UNIT_ADDRESS=10.0.0.5 COLDWATCH_UNIT_KEY=... cargo test --package coldwatch-core -- --ignored --nocapture`

use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coldwatch_core::notify::RecordingSink;
use coldwatch_core::{
    DebouncePolicy, DeviceClient, FileRegistry, HttpTransport, Monitor, MonitorEvent, NewUnit,
    ProbeOptions, Reconciler, UnitEvent, UnitProber, UnitRegistry,
};
use coldwatch_types::{Scheme, UnitRecord};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimal controller answering every request with a swappable JSON body.
struct FakeController {
    port: u16,
    body: Arc<Mutex<String>>,
    task: JoinHandle<()>,
}

impl FakeController {
    async fn start(body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let body = Arc::new(Mutex::new(body.to_string()));
        let shared = Arc::clone(&body);
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let body = shared.lock().unwrap().clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    while let Ok(n) = stream.read(&mut buf[read..]).await {
                        if n == 0 {
                            break;
                        }
                        read += n;
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len() {
                            break;
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        Self { port, body, task }
    }

    fn set_body(&self, body: &str) {
        *self.body.lock().unwrap() = body.to_string();
    }

    fn stop(&self) {
        self.task.abort();
    }
}

async fn next_unit_event(rx: &mut coldwatch_core::EventReceiver) -> UnitEvent {
    loop {
        let event = timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        match event {
            MonitorEvent::Offline { unit, message } => return UnitEvent::Offline { unit, message },
            MonitorEvent::AlarmRaised { unit, message } => {
                return UnitEvent::AlarmRaised { unit, message };
            }
            MonitorEvent::AlarmCleared { unit } => return UnitEvent::AlarmCleared { unit },
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_monitor_against_http_controller() {
    let controller = FakeController::start(r#"{"system_status":"Cooling","active_alarms":[]}"#).await;

    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(FileRegistry::new(dir.path().join("units.json")));
    registry
        .add(NewUnit::new("Walk-in 1", "127.0.0.1", "key").with_port(controller.port))
        .unwrap();

    let transport = Arc::new(HttpTransport::new(Duration::from_millis(500)).unwrap());
    let prober = UnitProber::with_options(transport, ProbeOptions::default().scheme(Scheme::Http));
    let sink = Arc::new(RecordingSink::new());
    let reconciler = Arc::new(Reconciler::new(DebouncePolicy::default(), sink.clone()));
    let mut monitor = Monitor::new(prober, reconciler, Duration::from_millis(100));
    let mut rx = monitor.subscribe();

    let units = registry.list_registered_units().unwrap();
    let summary = monitor.sync(&units).await;
    assert_eq!(summary.started, vec![1]);

    controller.set_body(r#"{"system_status":"Alarm","active_alarms":[12]}"#);
    let event = next_unit_event(&mut rx).await;
    assert!(matches!(event, UnitEvent::AlarmRaised { .. }), "{:?}", event);
    assert_eq!(event.message(), Some("Active alarms: 12"));

    controller.set_body(r#"{"system_status":"Cooling","active_alarms":[]}"#);
    let event = next_unit_event(&mut rx).await;
    assert!(matches!(event, UnitEvent::AlarmCleared { .. }), "{:?}", event);

    controller.stop();
    let event = next_unit_event(&mut rx).await;
    match &event {
        UnitEvent::Offline { message, .. } => {
            assert!(message.starts_with("Unit Walk-in 1 is offline"), "{}", message);
        }
        other => panic!("expected offline, got {:?}", other),
    }

    monitor.shutdown().await;
    assert_eq!(sink.clear_count(), 1);
    assert_eq!(sink.messages().len(), 2);
}

#[tokio::test]
async fn test_registry_edit_is_picked_up_by_sync() {
    let first = FakeController::start("{}").await;
    let second = FakeController::start("{}").await;

    let dir = tempfile::tempdir().unwrap();
    let registry = FileRegistry::new(dir.path().join("units.json"));
    let unit = registry
        .add(NewUnit::new("Reach-in", "127.0.0.1", "").with_port(first.port))
        .unwrap();

    let transport = Arc::new(HttpTransport::new(Duration::from_millis(500)).unwrap());
    let prober = UnitProber::with_options(transport, ProbeOptions::default().scheme(Scheme::Http));
    let reconciler = Arc::new(Reconciler::new(
        DebouncePolicy::default(),
        Arc::new(RecordingSink::new()),
    ));
    let mut monitor = Monitor::new(prober, reconciler, Duration::from_millis(100));

    monitor.sync(&registry.list().unwrap()).await;

    let edited = UnitRecord {
        port: second.port,
        ..unit
    };
    registry.update(edited).unwrap();
    let summary = monitor.sync(&registry.list().unwrap()).await;
    assert_eq!(summary.restarted, vec![1]);

    monitor.shutdown().await;
    first.stop();
    second.stop();
}

#[tokio::test]
#[ignore = "requires a reachable refrigeration controller"]
async fn test_real_unit_status() {
    let address = env::var("COLDWATCH_UNIT_ADDRESS").unwrap_or_else(|_| "10.0.0.5".to_string());
    let key = env::var("COLDWATCH_UNIT_KEY").unwrap_or_default();
    let unit = UnitRecord::new(1, "hardware", address, key);

    let client = DeviceClient::for_unit(&unit, Scheme::Https, Duration::from_secs(5)).unwrap();
    let status = client.status().await.expect("status request failed");
    println!("Mode: {:?}", status.operating_mode);
    println!("Sensors: {:?}", status.sensors);
    println!("Alarm: {} {:?}", status.alarm_active, status.alarm_description);

    let info = client.system_info().await.expect("system-info request failed");
    println!("{} configuration keys", info.entries.len());
}
