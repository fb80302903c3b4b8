use inspect_live::{
    connection::{ConnectionManager, LinkEvent, LinkNotice, ReconnectPolicy},
    models::{MeasurementResult, Phase},
    protocol::parse_frame,
    session::{ControllerOptions, SessionController, SessionError, SessionStage},
    ConnectionState, MemoryConnector,
};
use serde_json::json;
use tokio::time::Instant;

struct Station {
    controller: SessionController,
    connector: MemoryConnector,
}

impl Station {
    fn new() -> Self {
        let connector = MemoryConnector::new();
        let (manager, _notices) = ConnectionManager::new(
            "ws://backend/ws/inspection",
            Box::new(connector.clone()),
            ReconnectPolicy::default(),
        );
        Self {
            controller: SessionController::new(manager, ControllerOptions::default()),
            connector,
        }
    }

    fn link(&mut self, event: LinkEvent) {
        let generation = self.connector.last_generation().expect("no link opened");
        self.controller.handle_notice(LinkNotice { generation, event });
    }

    fn frame(&mut self, kind: &str, data: serde_json::Value) {
        let text = json!({ "type": kind, "data": data }).to_string();
        self.link(LinkEvent::Text(text));
    }

    fn online() -> Self {
        let mut station = Self::new();
        station.controller.connect();
        station.link(LinkEvent::Opened);
        station
    }
}

#[test]
fn scan_measure_and_stop() {
    let mut station = Station::online();
    assert_eq!(station.controller.connection_state(), ConnectionState::Connected);

    station.controller.start_listening(Some(7)).unwrap();
    let sent = station.connector.take_sent_json();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "start_listening");
    assert_eq!(sent[0]["data"]["modelId"], 7);
    assert!(sent[0]["requestId"].is_string());

    station.frame(
        "listening_started",
        json!({ "connectedDeviceCount": 1, "totalDeviceCount": 1 }),
    );
    assert!(station.controller.session().is_listening);

    station.controller.submit_barcode("BC123", Some(7)).unwrap();
    let sent = station.connector.take_sent_json();
    assert_eq!(sent[0]["type"], "submit_barcode");
    assert_eq!(sent[0]["data"]["barcode"], "BC123");

    let measurement = json!({
        "measurementId": "m-1",
        "barcode": "BC123",
        "phase": "P1",
        "value": 12.3,
        "unit": "V",
        "result": "PASS",
        "timestamp": "2024-05-01T09:30:00Z"
    });
    station.frame("measurement", measurement.clone());

    let history = station.controller.history();
    assert_eq!(history.len(), 1);
    let current = station.controller.current_measurement().unwrap();
    assert_eq!(current, &history[0]);
    assert_eq!(current.barcode, "BC123");
    assert_eq!(current.phase, Phase::P1);
    assert_eq!(current.value, 12.3);
    assert_eq!(current.unit, "V");
    assert_eq!(current.result, MeasurementResult::Pass);
    assert_eq!(
        station.controller.session().stage(),
        SessionStage::AwaitingPhase1
    );

    station.controller.stop().unwrap();
    assert_eq!(station.connector.take_sent_json()[0]["type"], "stop_listening");
    station.frame("listening_stopped", json!(null));

    let session = station.controller.session();
    assert!(!session.is_listening);
    assert!(session.current_barcode.is_none());
    assert!(session.current_phase.is_none());
    assert!(session.progress_percent.is_none());
    assert_eq!(station.controller.history().len(), 1);
}

#[test]
fn scan_is_refused_without_listening_and_sends_nothing() {
    let mut station = Station::online();
    assert!(matches!(
        station.controller.submit_barcode("BC123", Some(7)),
        Err(SessionError::NotListening)
    ));
    assert!(station.connector.take_sent().is_empty());
}

#[test]
fn malformed_frames_are_dropped_without_touching_state() {
    let mut station = Station::online();
    station.link(LinkEvent::Text("not json".into()));
    station.frame("measurement", json!({ "barcode": "BC1" }));
    station.frame("firmware_update", json!({}));
    station.frame("status", json!({ "progressPercent": 140 }));

    assert!(station.controller.history().is_empty());
    assert_eq!(station.controller.session().progress_percent, None);
    assert_eq!(station.controller.connection_state(), ConnectionState::Connected);
}

#[test]
fn retry_budget_is_five_abnormal_closures() {
    let mut station = Station::online();

    for attempt in 1..=5 {
        station.link(LinkEvent::Closed { code: Some(1006) });
        assert_eq!(
            station.controller.connection_state(),
            ConnectionState::Disconnected
        );
        assert_eq!(station.controller.connection().retries(), attempt);
        let deadline = station.controller.next_deadline().unwrap();
        station.controller.on_timer(deadline);
        assert_eq!(
            station.controller.connection_state(),
            ConnectionState::Connecting
        );
    }

    station.link(LinkEvent::Closed { code: Some(1006) });
    assert_eq!(station.controller.connection_state(), ConnectionState::Failed);
    assert!(station.controller.next_deadline().is_none());
    assert_eq!(station.connector.attempts(), 6);

    station.controller.retry_now();
    station.link(LinkEvent::Opened);
    assert_eq!(station.controller.connection_state(), ConnectionState::Connected);
    assert_eq!(station.controller.connection().retries(), 0);
}

#[test]
fn transport_error_doubles_the_delay() {
    let mut station = Station::online();
    let before = Instant::now();
    station.link(LinkEvent::Error("connection reset".into()));

    let deadline = station.controller.next_deadline().unwrap();
    assert!(deadline - before >= std::time::Duration::from_millis(6000));
}

#[test]
fn operator_disconnect_ignores_late_notices() {
    let mut station = Station::online();
    let stale = station.connector.last_generation().unwrap();
    station.controller.disconnect();

    station.controller.handle_notice(LinkNotice {
        generation: stale,
        event: LinkEvent::Closed { code: Some(1006) },
    });
    assert_eq!(
        station.controller.connection_state(),
        ConnectionState::Disconnected
    );
    assert!(station.controller.next_deadline().is_none());
}

#[test]
fn backend_envelope_parses_with_server_timestamp() {
    let frame = parse_frame(
        r#"{"type":"measurement_data","data":{"measurementId":42,"barcode":"BC1","phase":"P3","value":0.8,"unit":"A","result":"FAIL","timestamp":"2024-05-01T09:30:00.250"},"timestamp":"2024-05-01T09:30:00.300"}"#,
    )
    .unwrap();
    assert!(frame.sent_at.is_some());
}
