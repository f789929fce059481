//! Websocket server the remote connects to

use crate::api::IntegrationApi;
use crate::handler::IntegrationHandler;
use crate::messages::{DriverSetupRequest, Envelope, MessageKind, Outgoing, RemoteEvent, Request, UserData};
use crate::metadata::{DriverMetadata, API_VERSION};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Setup request that runs once its acknowledgement is sent.
#[derive(Debug)]
pub enum PendingSetup {
    Start(DriverSetupRequest),
    UserData(UserData),
}

/// Outcome of one incoming frame.
#[derive(Debug, Default)]
pub struct Handled {
    /// Replies, in sending order
    pub replies: Vec<Outgoing>,
    pub setup: Option<PendingSetup>,
}

impl From<Vec<Outgoing>> for Handled {
    fn from(replies: Vec<Outgoing>) -> Self {
        Self { replies, setup: None }
    }
}

/// Frames of one request for the connection writer.
struct Reply {
    frames: Vec<String>,
    /// Fired once the frames are written
    sent: oneshot::Sender<()>,
}

pub struct IntegrationServer {
    api: IntegrationApi,
    handler: Arc<dyn IntegrationHandler>,
    metadata: DriverMetadata,
}

impl IntegrationServer {
    pub fn new(api: IntegrationApi, handler: Arc<dyn IntegrationHandler>, metadata: DriverMetadata) -> Arc<Self> {
        Arc::new(Self { api, handler, metadata })
    }

    pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind integration server to {}", addr))
    }

    /// Accept remotes until the listener fails.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("Integration server listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await.context("Failed to accept connection")?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer).await {
                    warn!("Connection {} closed with error: {:#}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .context("Websocket handshake failed")?;
        info!("Remote connected: {}", peer);

        let (mut sink, mut source) = ws.split();
        let mut events = self.api.subscribe();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Reply>();

        sink.send(Message::Text(Outgoing::authentication().to_json())).await?;

        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        // Requests may take a while (setup, receiver commands), keep reading meanwhile
                        let server = self.clone();
                        let reply_tx = reply_tx.clone();
                        tokio::spawn(async move {
                            let handled = server.handle_message(&text).await;
                            let (sent, written) = oneshot::channel();
                            let frames = handled.replies.iter().map(Outgoing::to_json).collect();
                            if reply_tx.send(Reply { frames, sent }).is_err() {
                                return;
                            }
                            // The remote expects the acknowledgement before any setup change
                            if let Some(setup) = handled.setup {
                                if written.await.is_ok() {
                                    server.run_setup(setup).await;
                                }
                            }
                        });
                    }
                    Some(Ok(Message::Ping(payload))) => sink.send(Message::Pong(payload)).await?,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Websocket error from {}: {}", peer, e);
                        break;
                    }
                },
                Some(reply) = reply_rx.recv() => {
                    for frame in reply.frames {
                        sink.send(Message::Text(frame)).await?;
                    }
                    let _ = reply.sent.send(());
                }
                event = events.recv() => match event {
                    Ok(event) => sink.send(Message::Text(event)).await?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Remote {} lagging, {} event(s) dropped", peer, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        info!("Remote disconnected: {}", peer);
        Ok(())
    }

    /// Handle one incoming frame. Setup requests are only acknowledged here,
    /// see [`IntegrationServer::run_setup`].
    pub async fn handle_message(&self, text: &str) -> Handled {
        debug!("<- {}", text);
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring message: {}", e);
                return Handled::default();
            }
        };

        match envelope.kind {
            MessageKind::Req => {
                let req_id = envelope.id.unwrap_or_default();
                match Request::from_envelope(&envelope) {
                    Ok(request) => self.handle_request(req_id, request).await,
                    Err(e) => {
                        warn!("[{}] {}", req_id, e);
                        vec![Outgoing::result(req_id, 400)].into()
                    }
                }
            }
            MessageKind::Event => {
                match RemoteEvent::from_envelope(&envelope) {
                    Ok(event) => self.handler.on_event(event).await,
                    Err(e) => debug!("{}", e),
                }
                Handled::default()
            }
            MessageKind::Resp => Handled::default(),
        }
    }

    async fn handle_request(&self, req_id: u32, request: Request) -> Handled {
        let replies = match request {
            Request::GetDriverVersion => vec![Outgoing::response(
                req_id,
                200,
                "driver_version",
                json!({
                    "name": self.metadata.display_name(),
                    "version": { "api": API_VERSION, "driver": self.metadata.version },
                }),
            )],
            Request::GetDriverMetadata => vec![Outgoing::response(
                req_id,
                200,
                "driver_metadata",
                serde_json::to_value(&self.metadata).unwrap_or_default(),
            )],
            Request::GetDeviceState => vec![self.api.device_state_event()],
            Request::GetAvailableEntities => vec![Outgoing::response(
                req_id,
                200,
                "available_entities",
                json!({ "available_entities": self.handler.available_entities() }),
            )],
            Request::GetEntityStates => vec![Outgoing::response(
                req_id,
                200,
                "entity_states",
                json!(self.handler.entity_states()),
            )],
            Request::SubscribeEvents(ids) => {
                let code = self.handler.subscribe_entities(ids.entity_ids).await;
                vec![Outgoing::result(req_id, code.as_u16())]
            }
            Request::UnsubscribeEvents(ids) => {
                let code = self.handler.unsubscribe_entities(ids.entity_ids).await;
                vec![Outgoing::result(req_id, code.as_u16())]
            }
            Request::EntityCommand(command) => {
                let code = self.handler.entity_command(command).await;
                vec![Outgoing::result(req_id, code.as_u16())]
            }
            Request::SetupDriver(request) => {
                return Handled {
                    replies: vec![Outgoing::result(req_id, 200)],
                    setup: Some(PendingSetup::Start(request)),
                };
            }
            Request::SetDriverUserData(data) => {
                return Handled {
                    replies: vec![Outgoing::result(req_id, 200)],
                    setup: Some(PendingSetup::UserData(data)),
                };
            }
        };
        replies.into()
    }

    /// Run an acknowledged setup request and publish its progress and result.
    pub async fn run_setup(&self, setup: PendingSetup) {
        self.api.driver_setup_progress();
        let action = match setup {
            PendingSetup::Start(request) => self.handler.setup_driver(request).await,
            PendingSetup::UserData(data) => self.handler.set_driver_user_data(data).await,
        };
        self.api.driver_setup_change(&action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AvailableEntity, DriverSetupRequest, EntityCommand, EntityState, SetupAction, UserData};
    use async_trait::async_trait;
    use avr_core::StatusCode;
    use futures_util::Stream;
    use parking_lot::Mutex;
    use serde_json::{Map, Value};
    use tokio_tungstenite::connect_async;

    #[derive(Default)]
    struct MockHandler {
        events: Mutex<Vec<RemoteEvent>>,
        subscribed: Mutex<Vec<String>>,
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IntegrationHandler for MockHandler {
        async fn on_event(&self, event: RemoteEvent) {
            self.events.lock().push(event);
        }

        fn available_entities(&self) -> Vec<AvailableEntity> {
            vec![AvailableEntity {
                entity_id: "media_player.AVR1".into(),
                entity_type: "media_player".into(),
                device_id: "AVR1".into(),
                name: json!({ "en": "Living room" }),
                features: vec!["on_off".into()],
                device_class: Some("receiver".into()),
                options: None,
                attributes: Map::new(),
            }]
        }

        fn entity_states(&self) -> Vec<EntityState> {
            let mut attributes = Map::new();
            attributes.insert("state".into(), json!("ON"));
            vec![EntityState {
                entity_id: "media_player.AVR1".into(),
                entity_type: "media_player".into(),
                device_id: "AVR1".into(),
                attributes,
            }]
        }

        async fn subscribe_entities(&self, entity_ids: Vec<String>) -> StatusCode {
            self.subscribed.lock().extend(entity_ids);
            StatusCode::Ok
        }

        async fn unsubscribe_entities(&self, _entity_ids: Vec<String>) -> StatusCode {
            StatusCode::Ok
        }

        async fn entity_command(&self, command: EntityCommand) -> StatusCode {
            self.commands.lock().push(command.cmd_id.clone());
            if command.entity_id == "media_player.AVR1" {
                StatusCode::Ok
            } else {
                StatusCode::NotFound
            }
        }

        async fn setup_driver(&self, _request: DriverSetupRequest) -> SetupAction {
            SetupAction::UserInput {
                title: "Setup mode".into(),
                settings: json!([]),
            }
        }

        async fn set_driver_user_data(&self, _data: UserData) -> SetupAction {
            SetupAction::Complete
        }
    }

    fn metadata() -> DriverMetadata {
        serde_json::from_value(json!({
            "driver_id": "denonavr",
            "version": "0.6.3",
            "name": { "en": "Denon AVR" },
            "icon": "uc:integration"
        }))
        .unwrap()
    }

    fn server() -> (Arc<MockHandler>, IntegrationApi, Arc<IntegrationServer>) {
        let handler = Arc::new(MockHandler::default());
        let api = IntegrationApi::new();
        let server = IntegrationServer::new(api.clone(), handler.clone(), metadata());
        (handler, api, server)
    }

    fn json_of(reply: &Outgoing) -> Value {
        serde_json::to_value(reply).unwrap()
    }

    #[tokio::test]
    async fn test_protocol_requests() {
        let (_handler, _api, server) = server();

        let replies = server
            .handle_message(r#"{"kind": "req", "id": 1, "msg": "get_driver_version"}"#)
            .await
            .replies;
        let reply = json_of(&replies[0]);
        assert_eq!(reply["req_id"], 1);
        assert_eq!(reply["msg"], "driver_version");
        assert_eq!(reply["msg_data"]["version"]["driver"], "0.6.3");
        assert_eq!(reply["msg_data"]["name"], "Denon AVR");

        let replies = server
            .handle_message(r#"{"kind": "req", "id": 2, "msg": "get_driver_metadata"}"#)
            .await
            .replies;
        assert_eq!(json_of(&replies[0])["msg_data"]["icon"], "uc:integration");

        let replies = server
            .handle_message(r#"{"kind": "req", "id": 3, "msg": "get_device_state"}"#)
            .await
            .replies;
        let reply = json_of(&replies[0]);
        assert_eq!(reply["kind"], "event");
        assert_eq!(reply["msg_data"]["state"], "DISCONNECTED");
    }

    #[tokio::test]
    async fn test_entity_requests() {
        let (handler, _api, server) = server();

        let replies = server
            .handle_message(r#"{"kind": "req", "id": 4, "msg": "get_available_entities"}"#)
            .await
            .replies;
        let reply = json_of(&replies[0]);
        assert_eq!(reply["msg_data"]["available_entities"][0]["entity_id"], "media_player.AVR1");
        assert_eq!(reply["msg_data"]["available_entities"][0]["device_class"], "receiver");
        assert!(reply["msg_data"]["available_entities"][0].get("options").is_none());

        let replies = server
            .handle_message(r#"{"kind": "req", "id": 5, "msg": "get_entity_states"}"#)
            .await
            .replies;
        assert_eq!(json_of(&replies[0])["msg_data"][0]["attributes"]["state"], "ON");

        let replies = server
            .handle_message(
                r#"{"kind": "req", "id": 6, "msg": "subscribe_events", "msg_data": {"entity_ids": ["media_player.AVR1"]}}"#,
            )
            .await
            .replies;
        assert_eq!(json_of(&replies[0])["code"], 200);
        assert_eq!(*handler.subscribed.lock(), vec!["media_player.AVR1".to_string()]);

        let replies = server
            .handle_message(
                r#"{"kind": "req", "id": 7, "msg": "entity_command",
                    "msg_data": {"entity_id": "media_player.AVR9", "cmd_id": "on"}}"#,
            )
            .await
            .replies;
        let reply = json_of(&replies[0]);
        assert_eq!(reply["msg"], "result");
        assert_eq!(reply["code"], 404);
        assert_eq!(*handler.commands.lock(), vec!["on".to_string()]);
    }

    #[tokio::test]
    async fn test_bad_requests_and_events() {
        let (handler, _api, server) = server();

        let replies = server
            .handle_message(r#"{"kind": "req", "id": 8, "msg": "get_localization_cfg"}"#)
            .await
            .replies;
        assert_eq!(json_of(&replies[0])["code"], 400);

        assert!(server.handle_message("not json").await.replies.is_empty());

        let replies = server
            .handle_message(r#"{"kind": "event", "msg": "enter_standby", "cat": "DEVICE"}"#)
            .await
            .replies;
        assert!(replies.is_empty());
        assert_eq!(*handler.events.lock(), vec![RemoteEvent::EnterStandby]);
    }

    #[tokio::test]
    async fn test_setup_runs_after_acknowledgement() {
        let (_handler, api, server) = server();
        let mut events = api.subscribe();

        let handled = server
            .handle_message(r#"{"kind": "req", "id": 9, "msg": "setup_driver", "msg_data": {"setup_data": {}}}"#)
            .await;
        assert_eq!(json_of(&handled.replies[0])["code"], 200);
        assert!(matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Empty)));

        server.run_setup(handled.setup.unwrap()).await;
        let progress: Value = serde_json::from_str(&events.recv().await.unwrap()).unwrap();
        assert_eq!(progress["msg_data"]["state"], "SETUP");
        let page: Value = serde_json::from_str(&events.recv().await.unwrap()).unwrap();
        assert_eq!(page["msg_data"]["state"], "WAIT_USER_ACTION");

        let handled = server
            .handle_message(
                r#"{"kind": "req", "id": 10, "msg": "set_driver_user_data", "msg_data": {"input_values": {"choice": "x"}}}"#,
            )
            .await;
        assert!(matches!(handled.setup, Some(PendingSetup::UserData(_))));
        server.run_setup(handled.setup.unwrap()).await;
        events.recv().await.unwrap();
        let done: Value = serde_json::from_str(&events.recv().await.unwrap()).unwrap();
        assert_eq!(done["msg_data"]["event_type"], "STOP");
        assert_eq!(done["msg_data"]["state"], "OK");
    }

    async fn next_json(ws: &mut (impl Stream<Item = tokio_tungstenite::tungstenite::Result<Message>> + Unpin)) -> Value {
        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("websocket closed");
        };
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_websocket_setup_order() {
        let (_handler, _api, server) = server();
        let listener = IntegrationServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.run(listener));

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        assert_eq!(next_json(&mut ws).await["msg"], "authentication");

        ws.send(Message::Text(
            r#"{"kind": "req", "id": 3, "msg": "setup_driver", "msg_data": {"setup_data": {}}}"#.into(),
        ))
        .await
        .unwrap();

        let ack = next_json(&mut ws).await;
        assert_eq!(ack["kind"], "resp");
        assert_eq!(ack["req_id"], 3);
        assert_eq!(ack["code"], 200);
        let progress = next_json(&mut ws).await;
        assert_eq!(progress["msg"], "driver_setup_change");
        assert_eq!(progress["msg_data"]["state"], "SETUP");
        let page = next_json(&mut ws).await;
        assert_eq!(page["msg_data"]["state"], "WAIT_USER_ACTION");
    }

    #[tokio::test]
    async fn test_websocket_session() {
        let (_handler, api, server) = server();
        let listener = IntegrationServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.run(listener));

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        let Some(Ok(Message::Text(auth))) = ws.next().await else {
            panic!("no authentication message");
        };
        let auth: Value = serde_json::from_str(&auth).unwrap();
        assert_eq!(auth["msg"], "authentication");

        ws.send(Message::Text(r#"{"kind": "req", "id": 1, "msg": "get_driver_version"}"#.into()))
            .await
            .unwrap();
        let Some(Ok(Message::Text(reply))) = ws.next().await else {
            panic!("no reply");
        };
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["msg"], "driver_version");

        api.set_device_state(crate::messages::DeviceState::Connected);
        let Some(Ok(Message::Text(event))) = ws.next().await else {
            panic!("no event");
        };
        let event: Value = serde_json::from_str(&event).unwrap();
        assert_eq!(event["msg"], "device_state");
        assert_eq!(event["msg_data"]["state"], "CONNECTED");
    }
}
