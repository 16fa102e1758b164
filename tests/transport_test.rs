use design_bridge::{
    config::{BridgeConfig, SessionConfig},
    notifications::{NotificationBody, NotificationFeed},
    transport, Bridge, Channel, LocalChannel, Message, Payload, RequestKind,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
};

async fn send(writer: &mut (impl AsyncWriteExt + Unpin), message: Message) {
    let mut line = message.to_line().unwrap();
    line.push('\n');
    writer.write_all(line.as_bytes()).await.unwrap();
}

/// Accepts one client and plays the design service for a single request.
async fn fake_design_service(listener: TcpListener) -> Message {
    let (stream, _) = listener.accept().await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let connect = Message::from_line(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(connect.event, transport::CONNECT_EVENT);
    send(&mut writer, Message::new("is-connected", json!(true))).await;
    send(
        &mut writer,
        Message::new("send-message", json!("Connected to session s1")),
    )
    .await;

    let request = Message::from_line(&lines.next_line().await.unwrap().unwrap()).unwrap();
    let name = request.payload["name"].clone();
    send(
        &mut writer,
        Message::new(
            "send-notification",
            json!({"crometypes": "success", "content": "The mealy has been created"}),
        ),
    )
    .await;
    send(
        &mut writer,
        Message::new("design-created", json!({"name": name, "nodes": [0, 1]})),
    )
    .await;
    request
}

#[tokio::test]
async fn test_create_design_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let service = tokio::spawn(fake_design_service(listener));

    let config = BridgeConfig {
        session: Some(SessionConfig {
            id: "s1".to_string(),
            cookie: "c00kie".to_string(),
            tab_id: "1".to_string(),
        }),
        ..Default::default()
    };
    let channel = Arc::new(LocalChannel::new(config.event_buffer_size));
    let feed = NotificationFeed::attach(&channel, 16);
    let mut notifications = feed.subscribe();

    let pump = transport::connect_tcp(&addr, channel.clone(), config.session_params())
        .await
        .unwrap();
    channel.wait_connected().await.unwrap();

    let bridge = Bridge::new(channel.clone(), RequestKind::CreateDesign, &config);
    let payload: Payload = match json!({"strategy": "strategy_another", "name": "mealy"}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    let response = bridge.request(&payload).await.unwrap();

    let request = service.await.unwrap();
    assert_eq!(request.event, "create-design");
    assert_eq!(
        request.payload,
        json!({"strategy": "strategy_another", "name": "mealy"})
    );
    assert_eq!(
        response.into_value(),
        Some(json!({"name": "mealy", "nodes": [0, 1]}))
    );
    assert_eq!(channel.listener_count("design-created"), 0);

    let mut bodies = Vec::new();
    for _ in 0..3 {
        bodies.push(notifications.recv().await.unwrap().body);
    }
    assert_eq!(
        bodies,
        vec![
            NotificationBody::Connected(true),
            NotificationBody::Message("Connected to session s1".to_string()),
            NotificationBody::Notice {
                severity: "success".to_string(),
                content: "The mealy has been created".to_string(),
            },
        ]
    );

    pump.await.unwrap().unwrap();
    assert!(!channel.is_connected());
}
