// Session driver against an in-memory production tool.

use obs_session::connector::testing::{MemoryConnector, ServerEnd};
use obs_session::{
    DockEvent, Session, SessionConfig, SessionError, SessionState, SlideAction, TallyTarget,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;

/// Skip frames until a request of `request_type` arrives.
async fn recv_request(server: &mut ServerEnd, request_type: &str) -> Value {
    loop {
        let frame = server.recv_json().await.unwrap();
        if frame["op"] == 6 && frame["d"]["requestType"] == request_type {
            return frame;
        }
    }
}

fn reply(server: &ServerEnd, request: &Value, data: Value) {
    server.send_json(json!({"op": 7, "d": {
        "requestType": request["d"]["requestType"],
        "requestId": request["d"]["requestId"],
        "requestStatus": {"result": true, "code": 100},
        "responseData": data,
    }}));
}

async fn next_tally(events: &mut broadcast::Receiver<DockEvent>) -> DockEvent {
    loop {
        let event = events.recv().await.unwrap();
        if matches!(event, DockEvent::Tally { .. }) {
            return event;
        }
    }
}

async fn wait_for_state(session: &Session, state: SessionState) {
    let mut watch = session.watch();
    while watch.borrow_and_update().state != state {
        watch.changed().await.unwrap();
    }
}

/// Accept the next connection and complete the handshake.
async fn handshake(servers: &mut UnboundedReceiver<ServerEnd>) -> ServerEnd {
    let mut server = servers.recv().await.unwrap();
    server.send_json(json!({"op": 0, "d": {"obsWebSocketVersion": "5.0.1", "rpcVersion": 1}}));
    let identify = server.recv_json().await.unwrap();
    assert_eq!(identify["op"], 1);
    assert_eq!(identify["d"]["eventSubscriptions"], 68);
    server.send_json(json!({"op": 2, "d": {"negotiatedRpcVersion": 1}}));
    server
}

#[tokio::test(start_paused = true)]
async fn handshake_then_tally_from_scene_items() {
    let (connector, mut servers) = MemoryConnector::new();
    let session = Session::spawn(SessionConfig::default(), Arc::new(connector));
    let mut events = session.subscribe();
    session.open().unwrap();

    let mut server = handshake(&mut servers).await;
    let program = recv_request(&mut server, "GetCurrentProgramScene").await;
    wait_for_state(&session, SessionState::Ready).await;

    reply(&server, &program, json!({"currentProgramSceneName": "Pulpit"}));
    let items = recv_request(&mut server, "GetSceneItemList").await;
    assert_eq!(items["d"]["requestId"], "scene-items:Program:Pulpit");
    assert_eq!(items["d"]["requestData"]["sceneName"], "Pulpit");
    reply(
        &server,
        &items,
        json!({"sceneItems": [
            {"sourceName": "Camera 2", "inputKind": "dshow_input"},
            {"sourceName": "Lower third", "inputKind": "image_source"},
        ]}),
    );

    match next_tally(&mut events).await {
        DockEvent::Tally {
            target,
            scene,
            cameras,
            live,
        } => {
            assert_eq!(target, TallyTarget::Program);
            assert_eq!(scene, "Pulpit");
            assert_eq!(cameras, vec!["Camera 2".to_string()]);
            assert_eq!(live, vec![false, true]);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        session.scene_cache().get("Pulpit"),
        Some(vec!["Camera 2".to_string()])
    );

    session.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn external_requests_resolve_by_id() {
    let (connector, mut servers) = MemoryConnector::new();
    let session = Session::spawn(SessionConfig::default(), Arc::new(connector));
    session.open().unwrap();
    let mut server = handshake(&mut servers).await;
    wait_for_state(&session, SessionState::Ready).await;

    let client = session.clone();
    let pending = tokio::spawn(async move { client.slide_action(SlideAction::Next).await });

    let hotkey = recv_request(&mut server, "TriggerHotkeyByName").await;
    assert_eq!(hotkey["d"]["requestData"]["hotkeyName"], "simpleslides_next_button");
    reply(&server, &hotkey, json!({}));
    assert_eq!(pending.await.unwrap(), Ok(json!({})));

    let client = session.clone();
    let failing = tokio::spawn(async move { client.request("GetVersion", None).await });
    let version = recv_request(&mut server, "GetVersion").await;
    server.send_json(json!({"op": 7, "d": {
        "requestType": "GetVersion",
        "requestId": version["d"]["requestId"],
        "requestStatus": {"result": false, "code": 204, "comment": "not today"},
    }}));
    assert_eq!(
        failing.await.unwrap(),
        Err(SessionError::RequestFailed {
            code: 204,
            comment: Some("not today".into())
        })
    );

    session.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn lost_connection_reconnects_and_reuses_cache() {
    let (connector, mut servers) = MemoryConnector::new();
    let session = Session::spawn(SessionConfig::default(), Arc::new(connector.clone()));
    let mut events = session.subscribe();
    session.open().unwrap();

    let mut server = handshake(&mut servers).await;
    let program = recv_request(&mut server, "GetCurrentProgramScene").await;
    reply(&server, &program, json!({"currentProgramSceneName": "Wide"}));
    let items = recv_request(&mut server, "GetSceneItemList").await;
    reply(
        &server,
        &items,
        json!({"sceneItems": [{"sourceName": "Camera 1", "inputKind": "dshow_input"}]}),
    );
    next_tally(&mut events).await;

    server.close();
    wait_for_state(&session, SessionState::Disconnected).await;

    // Paused time jumps to the reconnect timer once the driver is idle.
    let mut server = handshake(&mut servers).await;
    assert_eq!(connector.attempts().await.len(), 2);

    let program = recv_request(&mut server, "GetCurrentProgramScene").await;
    reply(&server, &program, json!({"currentProgramSceneName": "Wide"}));
    match next_tally(&mut events).await {
        DockEvent::Tally { scene, live, .. } => {
            assert_eq!(scene, "Wide");
            assert_eq!(live, vec![true, false]);
        }
        other => panic!("unexpected event {other:?}"),
    }

    session.close().unwrap();
    wait_for_state(&session, SessionState::Disconnected).await;
    session.dispose().await;
}
