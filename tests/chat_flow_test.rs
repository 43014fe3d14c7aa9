//! End-to-end chat flows against an in-process WebSocket backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

use banter::{Client, Config, ConnectionState};

const TIMEOUT: Duration = Duration::from_secs(5);

type ServerWs = tokio_tungstenite::WebSocketStream<TcpStream>;

/// Bind a listener and return it with the matching http:// server URL.
async fn bind_backend() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let url = format!("http://{}", listener.local_addr().expect("local addr"));
    (listener, url)
}

/// Accept one WebSocket connection, capturing the request path + query.
async fn accept_client(listener: &TcpListener) -> (ServerWs, String) {
    let (stream, _) = timeout(TIMEOUT, listener.accept())
        .await
        .expect("accept within timeout")
        .expect("accept succeeds");

    let path = Arc::new(Mutex::new(String::new()));
    let path_capture = Arc::clone(&path);
    let ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
        *path_capture.lock().expect("path lock") = req.uri().to_string();
        Ok(resp)
    })
    .await
    .expect("websocket handshake");

    let path = path.lock().expect("path lock").clone();
    (ws, path)
}

/// Read the next text frame from the client as JSON.
async fn next_json(ws: &mut ServerWs) -> serde_json::Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("frame readable");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("client sends valid JSON");
        }
    }
}

/// Send one JSON frame to the client.
async fn send_json(ws: &mut ServerWs, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string()))
        .await
        .expect("server send");
}

/// Poll until `predicate` holds on the store, panicking after the timeout.
async fn wait_for<F>(client: &Client, what: &str, predicate: F)
where
    F: Fn(&Client) -> bool,
{
    for _ in 0..200 {
        if predicate(client) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_state(client: &Client, state: ConnectionState) {
    wait_for(client, "connection state", |c| c.connection_state() == state).await;
}

/// Open a connected client + server pair with the open_session frame
/// already consumed.
async fn connected_pair(config_formality: Option<&str>) -> (Client, String, ServerWs, TcpListener) {
    let (listener, url) = bind_backend().await;
    let (client, _events) = Client::new(Config {
        server_url: url,
        formality: config_formality.map(str::to_string),
        typing_reveal: true,
    });

    let session_id = client.create_session();
    client.connect(&session_id);

    let (mut server, path) = accept_client(&listener).await;
    assert!(
        path.contains(&format!("session_id={session_id}")),
        "session id must ride the connect URL, got {path}"
    );

    let open = next_json(&mut server).await;
    assert_eq!(open["type"], "open_session");
    assert_eq!(open["session_id"], session_id.as_str());

    wait_for_state(&client, ConnectionState::Connected).await;
    (client, session_id, server, listener)
}

#[tokio::test]
async fn test_full_turn_reveals_agent_reply() {
    let (client, session_id, mut server, _listener) = connected_pair(Some("반말")).await;

    let outcome = client.send_user_message("안녕").expect("active session");
    assert!(outcome.delivered);

    let frame = next_json(&mut server).await;
    assert_eq!(frame["type"], "user_message");
    assert_eq!(frame["session_id"], session_id.as_str());
    assert_eq!(frame["message_id"], outcome.message_id.as_str());
    assert_eq!(frame["text"], "안녕");
    assert_eq!(frame["client_style"]["formality"], "반말");

    send_json(
        &mut server,
        json!({"type": "final_text", "message_id": "a-001", "text": "반가워!"}),
    )
    .await;
    send_json(&mut server, json!({"type": "meta", "used_ops": ["style.casual"]})).await;
    send_json(&mut server, json!({"type": "eot"})).await;

    wait_for(&client, "finalized reply", |c| {
        c.with_store(|store| {
            store
                .session(&session_id)
                .is_some_and(|s| s.messages.len() == 2 && !s.messages[1].revealing)
        })
    })
    .await;

    client.with_store(|store| {
        let session = store.session(&session_id).expect("session exists");
        assert_eq!(session.messages[0].text, "안녕");
        let reply = &session.messages[1];
        assert_eq!(reply.id, "a-001");
        assert_eq!(reply.text, "반가워!");
        assert!(!reply.revealing);
        assert_eq!(reply.used_ops, vec!["style.casual".to_string()]);
    });

    client.dispose();
}

#[tokio::test]
async fn test_formality_omitted_when_not_configured() {
    let (client, _session_id, mut server, _listener) = connected_pair(None).await;

    client.send_user_message("hi").expect("active session");
    let frame = next_json(&mut server).await;
    assert_eq!(frame["type"], "user_message");
    assert!(frame.get("client_style").is_none());

    client.dispose();
}

#[tokio::test]
async fn test_empty_final_text_finishes_immediately() {
    let (client, session_id, mut server, _listener) = connected_pair(None).await;

    send_json(
        &mut server,
        json!({"type": "final_text", "message_id": "a-empty", "text": ""}),
    )
    .await;
    send_json(&mut server, json!({"type": "eot"})).await;

    wait_for(&client, "empty reply", |c| {
        c.with_store(|store| {
            store
                .session(&session_id)
                .is_some_and(|s| s.messages.len() == 1 && !s.messages[0].revealing)
        })
    })
    .await;

    client.with_store(|store| {
        let reply = &store.session(&session_id).expect("session").messages[0];
        assert_eq!(reply.text, "");
        assert!(!reply.revealing);
    });

    client.dispose();
}

#[tokio::test]
async fn test_bad_frames_do_not_break_the_channel() {
    let (client, session_id, mut server, _listener) = connected_pair(None).await;

    // Malformed JSON, then a well-formed frame of an unknown kind: both
    // are swallowed without tearing anything down
    server
        .send(Message::Text("{definitely not json".to_string()))
        .await
        .expect("server send");
    send_json(&mut server, json!({"type": "typing_indicator", "on": true})).await;

    send_json(
        &mut server,
        json!({"type": "final_text", "message_id": "a-ok", "text": "still here"}),
    )
    .await;
    send_json(&mut server, json!({"type": "eot"})).await;

    wait_for(&client, "reply after bad frames", |c| {
        c.with_store(|store| {
            store
                .session(&session_id)
                .is_some_and(|s| s.messages.len() == 1 && s.messages[0].text == "still here")
        })
    })
    .await;
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    client.dispose();
}

#[tokio::test]
async fn test_backend_error_surfaces_as_notice_not_teardown() {
    let (client, session_id, mut server, _listener) = connected_pair(None).await;

    send_json(&mut server, json!({"type": "error", "error": "planner timeout"})).await;

    wait_for(&client, "inline notice", |c| {
        c.with_store(|store| {
            store
                .session(&session_id)
                .is_some_and(|s| !s.notices.is_empty())
        })
    })
    .await;

    client.with_store(|store| {
        let session = store.session(&session_id).expect("session");
        assert_eq!(session.notices[0].text, "planner timeout");
    });
    // The connection stays up
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    client.dispose();
}

#[tokio::test]
async fn test_send_after_drop_is_kept_locally_but_not_retried() {
    let (client, session_id, server, _listener) = connected_pair(None).await;

    drop(server);
    wait_for_state(&client, ConnectionState::Disconnected).await;

    let outcome = client.send_user_message("into the void").expect("active session");
    assert!(!outcome.delivered);

    // The optimistic append stays; nothing queues for retry
    client.with_store(|store| {
        let session = store.session(&session_id).expect("session");
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].text, "into the void");
    });

    client.dispose();
}
