//! WebSocket signaling relay
//!
//! Routes call-control and WebRTC negotiation events between the
//! connections resolved by the registry. The relay is a dumb pipe for
//! SDP/ICE payloads: it carries them, it never interprets them. The only
//! state it holds is call-room membership.

use crate::domain::auth::TokenVerifier;
use crate::domain::call::record::CallRecord;
use crate::domain::call::session::CallSessionManager;
use crate::domain::call::value_object::{Caller, CallStatus, CallType};
use crate::domain::notify::{CallNotice, CallNotifier};
use crate::domain::registry::{ConnectionIdentity, ConnectionRegistry};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, SocketId, UserId, VisitorId};
use crate::interface::api::call_dto::CallResponse;
use crate::interface::api::metrics::{record_call_initiated, record_call_resolved};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Utc;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Client -> server signaling events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    StartCall {
        receiver_id: Uuid,
        call_type: CallType,
        caller_name: Option<String>,
        caller_phone: Option<String>,
    },
    AnswerCall {
        call_id: CallId,
    },
    RejectCall {
        call_id: CallId,
    },
    EndCall {
        call_id: CallId,
    },
    JoinCall {
        call_id: CallId,
    },
    LeaveCall {
        call_id: CallId,
    },
    WebrtcOffer {
        call_id: CallId,
        target: Option<SocketId>,
        payload: serde_json::Value,
    },
    WebrtcAnswer {
        call_id: CallId,
        target: Option<SocketId>,
        payload: serde_json::Value,
    },
    WebrtcIceCandidate {
        call_id: CallId,
        target: Option<SocketId>,
        payload: serde_json::Value,
    },
    ToggleAudio {
        call_id: CallId,
        enabled: bool,
    },
    ToggleVideo {
        call_id: CallId,
        enabled: bool,
    },
}

/// Server -> client signaling events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        socket_id: SocketId,
        identity: ConnectionIdentity,
    },
    IncomingCall {
        call: CallResponse,
    },
    CallStarted {
        call: CallResponse,
    },
    CallAnswered {
        call: CallResponse,
    },
    CallRejected {
        call: CallResponse,
    },
    CallEnded {
        call: CallResponse,
    },
    CallError {
        code: String,
        message: String,
    },
    WebrtcOffer {
        call_id: CallId,
        from: SocketId,
        payload: serde_json::Value,
    },
    WebrtcAnswer {
        call_id: CallId,
        from: SocketId,
        payload: serde_json::Value,
    },
    WebrtcIceCandidate {
        call_id: CallId,
        from: SocketId,
        payload: serde_json::Value,
    },
    PeerJoined {
        call_id: CallId,
        socket_id: SocketId,
    },
    PeerLeft {
        call_id: CallId,
        socket_id: SocketId,
    },
    PeerDisconnected {
        call_id: CallId,
        socket_id: SocketId,
    },
    PeerAudioToggle {
        call_id: CallId,
        socket_id: SocketId,
        enabled: bool,
    },
    PeerVideoToggle {
        call_id: CallId,
        socket_id: SocketId,
        enabled: bool,
    },
}

/// Delivery address of a relayed event
///
/// `User` is the personal room: every connection of that user matches with
/// no extra fan-out bookkeeping. `Room` requires explicit membership.
#[derive(Debug, Clone)]
pub enum Destination {
    Socket(SocketId),
    User(UserId),
    Room {
        call_id: CallId,
        exclude: Option<SocketId>,
    },
}

/// Connection handshake parameters
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Optional bearer credential; absent or invalid downgrades to visitor
    pub token: Option<String>,
    /// Client-supplied ephemeral visitor id
    pub visitor_id: Option<String>,
}

/// Shared state of the signaling relay
pub struct SignalingState {
    sessions: Arc<CallSessionManager>,
    registry: Arc<ConnectionRegistry>,
    notifier: Arc<dyn CallNotifier>,
    verifier: TokenVerifier,
    rooms: RwLock<HashMap<CallId, HashSet<SocketId>>>,
    tx: broadcast::Sender<(Destination, ServerEvent)>,
    ring_timeout: Duration,
}

impl SignalingState {
    pub fn new(
        sessions: Arc<CallSessionManager>,
        registry: Arc<ConnectionRegistry>,
        notifier: Arc<dyn CallNotifier>,
        verifier: TokenVerifier,
        ring_timeout: Duration,
    ) -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            sessions,
            registry,
            notifier,
            verifier,
            rooms: RwLock::new(HashMap::new()),
            tx,
            ring_timeout,
        }
    }

    pub fn sessions(&self) -> &Arc<CallSessionManager> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(Destination, ServerEvent)> {
        self.tx.subscribe()
    }

    fn send(&self, destination: Destination, event: ServerEvent) {
        // No receivers is fine: nobody is connected
        let _ = self.tx.send((destination, event));
    }

    pub fn send_to_socket(&self, socket_id: SocketId, event: ServerEvent) {
        self.send(Destination::Socket(socket_id), event);
    }

    pub fn send_to_user(&self, user_id: UserId, event: ServerEvent) {
        self.send(Destination::User(user_id), event);
    }

    pub fn send_to_room(&self, call_id: CallId, exclude: Option<SocketId>, event: ServerEvent) {
        self.send(Destination::Room { call_id, exclude }, event);
    }

    /// Whether an event addressed to `destination` should be delivered to
    /// this socket. Evaluated in each connection's send task.
    pub async fn accepts(
        &self,
        destination: &Destination,
        socket_id: SocketId,
        identity: &ConnectionIdentity,
    ) -> bool {
        match destination {
            Destination::Socket(target) => *target == socket_id,
            Destination::User(user_id) => identity.user_id() == Some(*user_id),
            Destination::Room { call_id, exclude } => {
                if *exclude == Some(socket_id) {
                    return false;
                }
                let rooms = self.rooms.read().await;
                rooms
                    .get(call_id)
                    .map_or(false, |members| members.contains(&socket_id))
            }
        }
    }

    /// Idempotent room join; returns whether the socket was newly added
    pub async fn join_room(&self, call_id: CallId, socket_id: SocketId) -> bool {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(call_id)
            .or_insert_with(HashSet::new)
            .insert(socket_id)
    }

    /// Idempotent room leave; returns whether the socket was a member
    pub async fn leave_room(&self, call_id: CallId, socket_id: SocketId) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&call_id) {
            let removed = members.remove(&socket_id);
            if members.is_empty() {
                rooms.remove(&call_id);
            }
            removed
        } else {
            false
        }
    }

    /// Remove a socket from every room, returning the rooms it was in
    pub async fn drop_socket(&self, socket_id: SocketId) -> Vec<CallId> {
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();
        rooms.retain(|call_id, members| {
            if members.remove(&socket_id) {
                left.push(*call_id);
            }
            !members.is_empty()
        });
        left
    }

    pub async fn room_size(&self, call_id: &CallId) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(call_id).map_or(0, |members| members.len())
    }

    /// Resolve the connection identity from handshake parameters
    pub fn resolve_identity(&self, params: &ConnectParams) -> ConnectionIdentity {
        if let Some(token) = &params.token {
            if let Some(claims) = self.verifier.verify(token) {
                return ConnectionIdentity::User {
                    id: UserId::from_uuid(claims.sub),
                    name: claims.name,
                };
            }
            warn!("Invalid bearer token in handshake, downgrading to visitor");
        }
        ConnectionIdentity::Visitor {
            id: params
                .visitor_id
                .clone()
                .map(VisitorId::from_raw)
                .unwrap_or_default(),
        }
    }

    /// Alert the receiver of a freshly created call
    ///
    /// Emits `incoming_call` to every connection of the receiver, hands a
    /// notice to the external notifier (with the receiver-offline flag)
    /// and arms the server-side ring timer. Shared by the WebSocket and
    /// REST initiation paths.
    pub async fn ring_receiver(self: &Arc<Self>, call: &CallRecord) {
        record_call_initiated();

        self.send_to_user(
            call.receiver_id,
            ServerEvent::IncomingCall {
                call: CallResponse::from(call),
            },
        );
        self.notify_transition(call).await;
        self.arm_ring_timeout(call.id);
    }

    /// Broadcast a status transition and inform the notification hook
    pub async fn publish_transition(&self, call: &CallRecord) {
        let response = CallResponse::from(call);
        let event = match call.status {
            CallStatus::Ringing => ServerEvent::CallStarted { call: response },
            CallStatus::Answered => ServerEvent::CallAnswered { call: response },
            CallStatus::Rejected => ServerEvent::CallRejected { call: response },
            CallStatus::Ended | CallStatus::Missed => ServerEvent::CallEnded { call: response },
        };

        // Call room first, then both parties' personal rooms: covers
        // connections that never joined the room, e.g. a second device
        // still ringing after the first one answered.
        self.send_to_room(call.id, None, event.clone());
        self.send_to_user(call.receiver_id, event.clone());
        if let Some(caller_id) = call.caller.user_id() {
            self.send_to_user(caller_id, event.clone());
        }
        if let Some(visitor_id) = call.caller.visitor_id() {
            if let Some(socket_id) = self.registry.connection_for(visitor_id) {
                self.send_to_socket(socket_id, event);
            }
        }

        if call.status.is_terminal() {
            record_call_resolved(call.status);
        }
        self.notify_transition(call).await;
    }

    async fn notify_transition(&self, call: &CallRecord) {
        let receiver_offline = self.registry.connections_for(&call.receiver_id).is_empty();
        self.notifier
            .notify(CallNotice {
                call_id: call.id,
                receiver_id: call.receiver_id,
                caller_name: call.caller_name.clone(),
                status: call.status,
                receiver_offline,
                occurred_at: Utc::now(),
            })
            .await;
    }

    /// Arm the per-call ring deadline
    ///
    /// The timer only attempts `Ringing -> Missed`; once the call left
    /// `Ringing` the conditional update makes the expiry a no-op, which is
    /// all the cancellation this needs.
    pub fn arm_ring_timeout(self: &Arc<Self>, call_id: CallId) {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(state.ring_timeout).await;
            match state.sessions.expire_ringing(&call_id).await {
                Ok(Some(missed)) => state.publish_transition(&missed).await,
                Ok(None) => {}
                Err(e) => error!("Ring timeout for call {} failed: {}", call_id, e),
            }
        });
    }

    /// Handle one inbound client event
    ///
    /// Taxonomy errors bubble up to the socket loop, which answers the
    /// requesting connection with `call_error` and nothing else.
    pub async fn handle_client_event(
        self: &Arc<Self>,
        socket_id: SocketId,
        identity: &ConnectionIdentity,
        event: ClientEvent,
    ) -> Result<()> {
        match event {
            ClientEvent::StartCall {
                receiver_id,
                call_type,
                caller_name,
                caller_phone,
            } => {
                self.start_call(
                    socket_id,
                    identity,
                    UserId::from_uuid(receiver_id),
                    call_type,
                    caller_name,
                    caller_phone,
                )
                .await
            }
            ClientEvent::AnswerCall { call_id } => {
                let call = self.authorized_call(identity, &call_id).await?;
                let call = self.sessions.answer_call(&call.id).await?;
                self.publish_transition(&call).await;
                Ok(())
            }
            ClientEvent::RejectCall { call_id } => {
                let call = self.authorized_call(identity, &call_id).await?;
                let call = self.sessions.reject_call(&call.id).await?;
                self.publish_transition(&call).await;
                Ok(())
            }
            ClientEvent::EndCall { call_id } => {
                let call = self.authorized_call(identity, &call_id).await?;
                let end = self.sessions.end_call(&call.id).await?;
                if end.transitioned {
                    self.publish_transition(&end.call).await;
                } else {
                    // Redundant end: confirm to the requester only
                    self.send_to_socket(
                        socket_id,
                        ServerEvent::CallEnded {
                            call: CallResponse::from(&end.call),
                        },
                    );
                }
                Ok(())
            }
            ClientEvent::JoinCall { call_id } => {
                if self.join_room(call_id, socket_id).await {
                    self.send_to_room(
                        call_id,
                        Some(socket_id),
                        ServerEvent::PeerJoined { call_id, socket_id },
                    );
                }
                Ok(())
            }
            ClientEvent::LeaveCall { call_id } => {
                if self.leave_room(call_id, socket_id).await {
                    self.send_to_room(
                        call_id,
                        Some(socket_id),
                        ServerEvent::PeerLeft { call_id, socket_id },
                    );
                }
                Ok(())
            }
            ClientEvent::WebrtcOffer {
                call_id,
                target,
                payload,
            } => {
                self.relay(
                    call_id,
                    socket_id,
                    target,
                    ServerEvent::WebrtcOffer {
                        call_id,
                        from: socket_id,
                        payload,
                    },
                );
                Ok(())
            }
            ClientEvent::WebrtcAnswer {
                call_id,
                target,
                payload,
            } => {
                self.relay(
                    call_id,
                    socket_id,
                    target,
                    ServerEvent::WebrtcAnswer {
                        call_id,
                        from: socket_id,
                        payload,
                    },
                );
                Ok(())
            }
            ClientEvent::WebrtcIceCandidate {
                call_id,
                target,
                payload,
            } => {
                self.relay(
                    call_id,
                    socket_id,
                    target,
                    ServerEvent::WebrtcIceCandidate {
                        call_id,
                        from: socket_id,
                        payload,
                    },
                );
                Ok(())
            }
            ClientEvent::ToggleAudio { call_id, enabled } => {
                self.send_to_room(
                    call_id,
                    Some(socket_id),
                    ServerEvent::PeerAudioToggle {
                        call_id,
                        socket_id,
                        enabled,
                    },
                );
                Ok(())
            }
            ClientEvent::ToggleVideo { call_id, enabled } => {
                self.send_to_room(
                    call_id,
                    Some(socket_id),
                    ServerEvent::PeerVideoToggle {
                        call_id,
                        socket_id,
                        enabled,
                    },
                );
                Ok(())
            }
        }
    }

    async fn start_call(
        self: &Arc<Self>,
        socket_id: SocketId,
        identity: &ConnectionIdentity,
        receiver_id: UserId,
        call_type: CallType,
        caller_name: Option<String>,
        caller_phone: Option<String>,
    ) -> Result<()> {
        let caller = match identity {
            ConnectionIdentity::User { id, .. } => Caller::User { id: *id },
            ConnectionIdentity::Visitor { id } => Caller::Visitor {
                id: id.clone(),
                phone: caller_phone,
            },
        };
        let caller_name =
            caller_name.unwrap_or_else(|| identity.display_name().to_string());

        let call = self
            .sessions
            .create_call(caller, &caller_name, receiver_id, call_type)
            .await?;

        self.join_room(call.id, socket_id).await;
        self.send_to_socket(
            socket_id,
            ServerEvent::CallStarted {
                call: CallResponse::from(&call),
            },
        );
        self.ring_receiver(&call).await;
        Ok(())
    }

    /// Fetch the call and check the actor participates in it
    async fn authorized_call(
        &self,
        identity: &ConnectionIdentity,
        call_id: &CallId,
    ) -> Result<CallRecord> {
        let call = self.sessions.get_call(call_id).await?;
        let permitted = match identity {
            ConnectionIdentity::User { id, .. } => call.involves_user(id),
            ConnectionIdentity::Visitor { id } => call.caller.visitor_id() == Some(id),
        };
        if !permitted {
            return Err(DomainError::Forbidden(format!(
                "connection is neither caller nor receiver of call {}",
                call_id
            )));
        }
        Ok(call)
    }

    fn relay(
        &self,
        call_id: CallId,
        from: SocketId,
        target: Option<SocketId>,
        event: ServerEvent,
    ) {
        match target {
            Some(target) => self.send_to_socket(target, event),
            None => self.send_to_room(call_id, Some(from), event),
        }
    }
}

/// WebSocket handler for the signaling endpoint
pub async fn signaling_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<SignalingState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Drive one signaling connection until either side hangs up
async fn handle_socket(socket: WebSocket, params: ConnectParams, state: Arc<SignalingState>) {
    let identity = state.resolve_identity(&params);
    let socket_id = SocketId::new();
    state.registry.register(socket_id, identity.clone());

    info!(
        "Signaling connection {} established as {}",
        socket_id,
        identity.display_name()
    );

    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.subscribe();

    let welcome = ServerEvent::Connected {
        socket_id,
        identity: identity.clone(),
    };
    match serde_json::to_string(&welcome) {
        Ok(json) => {
            if sender.send(Message::Text(json)).await.is_err() {
                state.registry.unregister(&socket_id);
                return;
            }
        }
        Err(e) => error!("Failed to serialize welcome event: {}", e),
    }

    let send_state = state.clone();
    let send_identity = identity.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok((destination, event)) => {
                    if !send_state
                        .accepts(&destination, socket_id, &send_identity)
                        .await
                    {
                        continue;
                    }
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            if sender.send(Message::Text(json)).await.is_err() {
                                debug!("Socket {} went away mid-send", socket_id);
                                break;
                            }
                        }
                        Err(e) => error!("Failed to serialize event: {}", e),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Socket {} lagged, skipped {} events", socket_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let recv_state = state.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let event = match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            debug!("Unparseable event from {}: {}", socket_id, e);
                            recv_state.send_to_socket(
                                socket_id,
                                ServerEvent::CallError {
                                    code: "bad_event".to_string(),
                                    message: format!("invalid event: {}", e),
                                },
                            );
                            continue;
                        }
                    };

                    if let Err(e) = recv_state
                        .handle_client_event(socket_id, &recv_identity, event)
                        .await
                    {
                        recv_state.send_to_socket(
                            socket_id,
                            ServerEvent::CallError {
                                code: e.code().to_string(),
                                message: e.to_string(),
                            },
                        );
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Socket {} requested close", socket_id);
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(_) => {}
                Err(e) => {
                    debug!("Socket {} errored: {}", socket_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    // Announce the departure to every room the socket was in, then drop
    // it from all registry indexes
    let left_rooms = state.drop_socket(socket_id).await;
    for call_id in left_rooms {
        state.send_to_room(
            call_id,
            None,
            ServerEvent::PeerDisconnected { call_id, socket_id },
        );
    }

    if let Some(disconnection) = state.registry.unregister(&socket_id) {
        if disconnection.user_went_offline {
            info!(
                "User {} went offline",
                disconnection.identity.display_name()
            );
        }
    }

    info!("Signaling connection {} closed", socket_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::session::CallSessionManager;
    use crate::domain::notify::LogNotifier;
    use crate::infrastructure::persistence::memory::InMemoryCallRepository;

    fn test_state() -> Arc<SignalingState> {
        let repository = Arc::new(InMemoryCallRepository::new());
        let sessions = Arc::new(CallSessionManager::new(repository));
        let registry = Arc::new(ConnectionRegistry::new());
        Arc::new(SignalingState::new(
            sessions,
            registry,
            Arc::new(LogNotifier),
            TokenVerifier::new(b"test-secret".to_vec()),
            Duration::from_secs(60),
        ))
    }

    fn user_identity(id: UserId) -> ConnectionIdentity {
        ConnectionIdentity::User {
            id,
            name: "Resident".to_string(),
        }
    }

    fn visitor_identity(raw: &str) -> ConnectionIdentity {
        ConnectionIdentity::Visitor {
            id: VisitorId::from_raw(raw),
        }
    }

    #[tokio::test]
    async fn test_join_room_is_idempotent() {
        let state = test_state();
        let call_id = CallId::new();
        let socket = SocketId::new();

        assert!(state.join_room(call_id, socket).await);
        assert!(!state.join_room(call_id, socket).await);
        assert_eq!(state.room_size(&call_id).await, 1);
    }

    #[tokio::test]
    async fn test_leave_room_is_idempotent() {
        let state = test_state();
        let call_id = CallId::new();
        let socket = SocketId::new();

        state.join_room(call_id, socket).await;
        assert!(state.leave_room(call_id, socket).await);
        assert!(!state.leave_room(call_id, socket).await);
        assert_eq!(state.room_size(&call_id).await, 0);
    }

    #[tokio::test]
    async fn test_drop_socket_reports_rooms() {
        let state = test_state();
        let socket = SocketId::new();
        let first = CallId::new();
        let second = CallId::new();

        state.join_room(first, socket).await;
        state.join_room(second, socket).await;

        let mut left = state.drop_socket(socket).await;
        left.sort_by_key(|id| id.to_string());
        let mut expected = vec![first, second];
        expected.sort_by_key(|id| id.to_string());
        assert_eq!(left, expected);
        assert_eq!(state.room_size(&first).await, 0);
    }

    #[tokio::test]
    async fn test_accepts_personal_room() {
        let state = test_state();
        let user = UserId::new();
        let socket = SocketId::new();
        let identity = user_identity(user);

        let for_me = Destination::User(user);
        let for_other = Destination::User(UserId::new());
        assert!(state.accepts(&for_me, socket, &identity).await);
        assert!(!state.accepts(&for_other, socket, &identity).await);
    }

    #[tokio::test]
    async fn test_accepts_room_honors_exclusion() {
        let state = test_state();
        let call_id = CallId::new();
        let socket = SocketId::new();
        let identity = visitor_identity("v");
        state.join_room(call_id, socket).await;

        let included = Destination::Room {
            call_id,
            exclude: None,
        };
        let excluded = Destination::Room {
            call_id,
            exclude: Some(socket),
        };
        assert!(state.accepts(&included, socket, &identity).await);
        assert!(!state.accepts(&excluded, socket, &identity).await);
    }

    #[tokio::test]
    async fn test_visitor_start_call_creates_ringing_record() {
        let state = test_state();
        let receiver = UserId::new();
        let socket = SocketId::new();
        let identity = visitor_identity("front-gate");

        state
            .handle_client_event(
                socket,
                &identity,
                ClientEvent::StartCall {
                    receiver_id: receiver.as_uuid(),
                    call_type: CallType::Video,
                    caller_name: Some("Courier".to_string()),
                    caller_phone: None,
                },
            )
            .await
            .unwrap();

        let call = state
            .sessions()
            .get_active_call(&receiver)
            .await
            .unwrap()
            .expect("call should be ringing");
        assert_eq!(call.status, CallStatus::Ringing);
        assert_eq!(call.caller_name, "Courier");
        assert_eq!(call.caller.visitor_id().unwrap().as_str(), "front-gate");
        // Initiator joined the call room
        assert_eq!(state.room_size(&call.id).await, 1);
    }

    #[tokio::test]
    async fn test_receiver_can_answer() {
        let state = test_state();
        let receiver = UserId::new();
        let caller_socket = SocketId::new();

        state
            .handle_client_event(
                caller_socket,
                &visitor_identity("gate"),
                ClientEvent::StartCall {
                    receiver_id: receiver.as_uuid(),
                    call_type: CallType::Audio,
                    caller_name: Some("Courier".to_string()),
                    caller_phone: None,
                },
            )
            .await
            .unwrap();
        let call = state
            .sessions()
            .get_active_call(&receiver)
            .await
            .unwrap()
            .unwrap();

        state
            .handle_client_event(
                SocketId::new(),
                &user_identity(receiver),
                ClientEvent::AnswerCall { call_id: call.id },
            )
            .await
            .unwrap();

        let answered = state.sessions().get_call(&call.id).await.unwrap();
        assert_eq!(answered.status, CallStatus::Answered);
        assert!(answered.answered_at.is_some());
    }

    #[tokio::test]
    async fn test_outsider_cannot_control_call() {
        let state = test_state();
        let receiver = UserId::new();

        state
            .handle_client_event(
                SocketId::new(),
                &visitor_identity("gate"),
                ClientEvent::StartCall {
                    receiver_id: receiver.as_uuid(),
                    call_type: CallType::Video,
                    caller_name: Some("Courier".to_string()),
                    caller_phone: None,
                },
            )
            .await
            .unwrap();
        let call = state
            .sessions()
            .get_active_call(&receiver)
            .await
            .unwrap()
            .unwrap();

        let result = state
            .handle_client_event(
                SocketId::new(),
                &user_identity(UserId::new()),
                ClientEvent::EndCall { call_id: call.id },
            )
            .await;
        assert!(matches!(result, Err(DomainError::Forbidden(_))));

        // Original state preserved
        let unchanged = state.sessions().get_call(&call.id).await.unwrap();
        assert_eq!(unchanged.status, CallStatus::Ringing);
    }

    #[tokio::test]
    async fn test_answer_after_reject_is_invalid_transition() {
        let state = test_state();
        let receiver = UserId::new();
        let identity = user_identity(receiver);

        state
            .handle_client_event(
                SocketId::new(),
                &visitor_identity("gate"),
                ClientEvent::StartCall {
                    receiver_id: receiver.as_uuid(),
                    call_type: CallType::Video,
                    caller_name: Some("Courier".to_string()),
                    caller_phone: None,
                },
            )
            .await
            .unwrap();
        let call = state
            .sessions()
            .get_active_call(&receiver)
            .await
            .unwrap()
            .unwrap();

        state
            .handle_client_event(
                SocketId::new(),
                &identity,
                ClientEvent::RejectCall { call_id: call.id },
            )
            .await
            .unwrap();

        let result = state
            .handle_client_event(
                SocketId::new(),
                &identity,
                ClientEvent::AnswerCall { call_id: call.id },
            )
            .await;
        assert!(matches!(result, Err(DomainError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_redundant_end_is_swallowed() {
        let state = test_state();
        let receiver = UserId::new();
        let identity = user_identity(receiver);
        let socket = SocketId::new();

        state
            .handle_client_event(
                socket,
                &visitor_identity("gate"),
                ClientEvent::StartCall {
                    receiver_id: receiver.as_uuid(),
                    call_type: CallType::Video,
                    caller_name: Some("Courier".to_string()),
                    caller_phone: None,
                },
            )
            .await
            .unwrap();
        let call = state
            .sessions()
            .get_active_call(&receiver)
            .await
            .unwrap()
            .unwrap();

        for _ in 0..2 {
            state
                .handle_client_event(
                    SocketId::new(),
                    &identity,
                    ClientEvent::EndCall { call_id: call.id },
                )
                .await
                .unwrap();
        }

        let ended = state.sessions().get_call(&call.id).await.unwrap();
        assert_eq!(ended.status, CallStatus::Missed);
    }

    #[tokio::test]
    async fn test_ring_timeout_resolves_to_missed() {
        let repository = Arc::new(InMemoryCallRepository::new());
        let sessions = Arc::new(CallSessionManager::new(repository));
        let registry = Arc::new(ConnectionRegistry::new());
        let state = Arc::new(SignalingState::new(
            sessions,
            registry,
            Arc::new(LogNotifier),
            TokenVerifier::new(b"test-secret".to_vec()),
            Duration::from_millis(20),
        ));
        let receiver = UserId::new();

        state
            .handle_client_event(
                SocketId::new(),
                &visitor_identity("gate"),
                ClientEvent::StartCall {
                    receiver_id: receiver.as_uuid(),
                    call_type: CallType::Video,
                    caller_name: Some("Courier".to_string()),
                    caller_phone: None,
                },
            )
            .await
            .unwrap();
        let call = state
            .sessions()
            .get_active_call(&receiver)
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        let expired = state.sessions().get_call(&call.id).await.unwrap();
        assert_eq!(expired.status, CallStatus::Missed);
        assert!(expired.duration.is_none());
    }

    #[tokio::test]
    async fn test_ring_timeout_spares_answered_call() {
        let repository = Arc::new(InMemoryCallRepository::new());
        let sessions = Arc::new(CallSessionManager::new(repository));
        let registry = Arc::new(ConnectionRegistry::new());
        let state = Arc::new(SignalingState::new(
            sessions,
            registry,
            Arc::new(LogNotifier),
            TokenVerifier::new(b"test-secret".to_vec()),
            Duration::from_millis(30),
        ));
        let receiver = UserId::new();

        state
            .handle_client_event(
                SocketId::new(),
                &visitor_identity("gate"),
                ClientEvent::StartCall {
                    receiver_id: receiver.as_uuid(),
                    call_type: CallType::Audio,
                    caller_name: Some("Courier".to_string()),
                    caller_phone: None,
                },
            )
            .await
            .unwrap();
        let call = state
            .sessions()
            .get_active_call(&receiver)
            .await
            .unwrap()
            .unwrap();

        state.sessions().answer_call(&call.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(90)).await;

        let still_answered = state.sessions().get_call(&call.id).await.unwrap();
        assert_eq!(still_answered.status, CallStatus::Answered);
    }

    #[tokio::test]
    async fn test_relay_routes_to_target_or_room() {
        let state = test_state();
        let call_id = CallId::new();
        let sender_socket = SocketId::new();
        let peer_socket = SocketId::new();
        let identity = visitor_identity("v");

        state.join_room(call_id, sender_socket).await;
        state.join_room(call_id, peer_socket).await;

        let mut rx = state.subscribe();
        state
            .handle_client_event(
                sender_socket,
                &identity,
                ClientEvent::WebrtcOffer {
                    call_id,
                    target: None,
                    payload: serde_json::json!({"sdp": "v=0"}),
                },
            )
            .await
            .unwrap();

        let (destination, event) = rx.recv().await.unwrap();
        match destination {
            Destination::Room { call_id: room, exclude } => {
                assert_eq!(room, call_id);
                assert_eq!(exclude, Some(sender_socket));
            }
            other => panic!("unexpected destination {:?}", other),
        }
        match event {
            ServerEvent::WebrtcOffer { from, .. } => assert_eq!(from, sender_socket),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_incoming_call_reaches_all_receiver_devices() {
        let state = test_state();
        let receiver = UserId::new();
        let identity = user_identity(receiver);
        let phone = SocketId::new();
        let tablet = SocketId::new();
        state.registry().register(phone, identity.clone());
        state.registry().register(tablet, identity.clone());

        let mut rx = state.subscribe();
        state
            .handle_client_event(
                SocketId::new(),
                &visitor_identity("gate"),
                ClientEvent::StartCall {
                    receiver_id: receiver.as_uuid(),
                    call_type: CallType::Video,
                    caller_name: Some("Courier".to_string()),
                    caller_phone: None,
                },
            )
            .await
            .unwrap();

        // First the initiator's confirmation, then the receiver alert
        let (_, started) = rx.recv().await.unwrap();
        assert!(matches!(started, ServerEvent::CallStarted { .. }));

        let (destination, alert) = rx.recv().await.unwrap();
        assert!(matches!(alert, ServerEvent::IncomingCall { .. }));
        // Personal-room addressing: every device of the receiver matches
        assert!(state.accepts(&destination, phone, &identity).await);
        assert!(state.accepts(&destination, tablet, &identity).await);

        // Phone answers; the tablet still observes the answer through the
        // receiver's personal room and can stop ringing
        let call = state
            .sessions()
            .get_active_call(&receiver)
            .await
            .unwrap()
            .unwrap();
        state
            .handle_client_event(phone, &identity, ClientEvent::AnswerCall { call_id: call.id })
            .await
            .unwrap();

        let mut tablet_saw_answer = false;
        while let Ok((destination, event)) = rx.try_recv() {
            if matches!(event, ServerEvent::CallAnswered { .. })
                && state.accepts(&destination, tablet, &identity).await
            {
                tablet_saw_answer = true;
            }
        }
        assert!(tablet_saw_answer);
    }

    #[test]
    fn test_client_event_wire_format() {
        let json = r#"{"type":"answer_call","call_id":"6e9f7d5e-47cb-41de-b74c-6bb egg"}"#;
        // Malformed ids fail to parse rather than panic
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());

        let json = format!(
            r#"{{"type":"toggle_audio","call_id":"{}","enabled":false}}"#,
            Uuid::new_v4()
        );
        let event = serde_json::from_str::<ClientEvent>(&json).unwrap();
        assert!(matches!(
            event,
            ClientEvent::ToggleAudio { enabled: false, .. }
        ));
    }

    #[test]
    fn test_server_event_wire_format() {
        let event = ServerEvent::PeerLeft {
            call_id: CallId::new(),
            socket_id: SocketId::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"peer_left\""));
    }
}
