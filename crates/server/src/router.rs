use crate::error::ServerResult;
use crate::ids::{DeviceType, GroupId, UserId};
use crate::network::connection::Connection;
use crate::state::ServerState;
use quill_proto::{Frame, FrameType};
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::OnceLock;
use tracing::debug;

fn email_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\w+\.)*\w+@(\w+\.)+[A-Za-z]+$").expect("email pattern"))
}

#[derive(Deserialize)]
struct Request {
    function: String,
    #[serde(default)]
    parameters: Value,
}

#[derive(Deserialize)]
struct RegisterParams {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginParams {
    user_id: i64,
    password: String,
    #[serde(default)]
    device: Option<String>,
}

#[derive(Deserialize)]
struct UserTarget {
    user_id: i64,
}

#[derive(Deserialize)]
struct GroupTarget {
    group_id: i64,
}

#[derive(Deserialize)]
struct GroupUserTarget {
    group_id: i64,
    user_id: i64,
}

#[derive(Deserialize)]
struct FriendMessageParams {
    user_id: i64,
    message: String,
}

#[derive(Deserialize)]
struct GroupMessageParams {
    group_id: i64,
    message: String,
}

fn success_message(message: &str) -> Value {
    json!({"state": "success", "message": message})
}

fn error_message(message: &str) -> Value {
    json!({"state": "error", "message": message})
}

fn error_from(error: crate::error::ServerError) -> Value {
    error_message(&error.to_string())
}

fn parse<T: DeserializeOwned>(parameters: Value) -> Result<T, Value> {
    serde_json::from_value(parameters).map_err(|_| error_message("invalid parameters"))
}

/// Routes one inbound frame and writes the correlated response.
///
/// `Text` frames carry `{function, parameters}` JSON; every other type is
/// answered with an error response. Heartbeats never reach this function.
/// A failure to reach the connection itself propagates so the read loop can
/// terminate it.
pub async fn handle_frame(
    state: &ServerState,
    connection: &Connection,
    frame: Frame,
) -> ServerResult<()> {
    let response = match frame.frame_type {
        FrameType::Text => {
            if frame.sequence_size != 1 {
                error_message("segmented payloads are not supported")
            } else if frame.payload.is_empty() {
                error_message("empty request")
            } else {
                process_text(state, connection, &frame).await?
            }
        }
        FrameType::HeartBeat => return Ok(()),
        FrameType::Binary | FrameType::FileStream | FrameType::Unknown => {
            error_message("Error type")
        }
    };
    let bytes = Frame::text(frame.request_id, response.to_string().into_bytes()).encode();
    connection.send(bytes).await
}

async fn process_text(
    state: &ServerState,
    connection: &Connection,
    frame: &Frame,
) -> ServerResult<Value> {
    let request: Request = match serde_json::from_slice(&frame.payload) {
        Ok(request) => request,
        Err(_) => return Ok(error_message("invalid json request")),
    };
    debug!(
        connection = %connection.id(),
        function = %request.function,
        request_id = frame.request_id,
        "routing request"
    );

    // The binding lookup also guards against a connection the registry no
    // longer knows; that one terminates the caller instead of responding.
    let bound = state.registry.user_of(connection.id()).await?;

    let response = match request.function.as_str() {
        "register" => register(state, connection, request.parameters).await,
        "login" => login(state, connection, request.parameters).await,
        _ => {
            let Some(user_id) = bound else {
                return Ok(error_message("You haven't logged in!"));
            };
            let user = match state.registry.get_user(user_id).await {
                Ok(user) => user,
                Err(error) => return Ok(error_from(error)),
            };
            match request.function.as_str() {
                "add_friend" => {
                    let params: UserTarget = match parse(request.parameters) {
                        Ok(params) => params,
                        Err(response) => return Ok(response),
                    };
                    match user.request_friend(state, UserId::new(params.user_id)).await {
                        Ok(()) => success_message("friend verification sent"),
                        Err(error) => error_from(error),
                    }
                }
                "accept_friend_verification" => {
                    let params: UserTarget = match parse(request.parameters) {
                        Ok(params) => params,
                        Err(response) => return Ok(response),
                    };
                    match user.accept_friend(state, UserId::new(params.user_id)).await {
                        Ok(()) => success_message("friend added"),
                        Err(error) => error_from(error),
                    }
                }
                "reject_friend_verification" => {
                    let params: UserTarget = match parse(request.parameters) {
                        Ok(params) => params,
                        Err(response) => return Ok(response),
                    };
                    match user.reject_friend(state, UserId::new(params.user_id)).await {
                        Ok(()) => success_message("friend verification rejected"),
                        Err(error) => error_from(error),
                    }
                }
                "remove_friend" => {
                    let params: UserTarget = match parse(request.parameters) {
                        Ok(params) => params,
                        Err(response) => return Ok(response),
                    };
                    match user.remove_friend(state, UserId::new(params.user_id)).await {
                        Ok(()) => success_message("friend removed"),
                        Err(error) => error_from(error),
                    }
                }
                "create_group" => match user.create_group(state).await {
                    Ok(group) => json!({
                        "state": "success",
                        "message": "group created",
                        "group_id": group,
                    }),
                    Err(error) => error_from(error),
                },
                "add_group" => {
                    let params: GroupTarget = match parse(request.parameters) {
                        Ok(params) => params,
                        Err(response) => return Ok(response),
                    };
                    match user
                        .request_join_group(state, GroupId::new(params.group_id))
                        .await
                    {
                        Ok(()) => success_message("group verification sent"),
                        Err(error) => error_from(error),
                    }
                }
                "accept_group_verification" => {
                    let params: GroupUserTarget = match parse(request.parameters) {
                        Ok(params) => params,
                        Err(response) => return Ok(response),
                    };
                    match user
                        .accept_join_group(
                            state,
                            GroupId::new(params.group_id),
                            UserId::new(params.user_id),
                        )
                        .await
                    {
                        Ok(()) => success_message("group member accepted"),
                        Err(error) => error_from(error),
                    }
                }
                "reject_group_verification" => {
                    let params: GroupUserTarget = match parse(request.parameters) {
                        Ok(params) => params,
                        Err(response) => return Ok(response),
                    };
                    match user
                        .reject_join_group(
                            state,
                            GroupId::new(params.group_id),
                            UserId::new(params.user_id),
                        )
                        .await
                    {
                        Ok(()) => success_message("group verification rejected"),
                        Err(error) => error_from(error),
                    }
                }
                "remove_group" => {
                    let params: GroupTarget = match parse(request.parameters) {
                        Ok(params) => params,
                        Err(response) => return Ok(response),
                    };
                    match user.remove_group(state, GroupId::new(params.group_id)).await {
                        Ok(()) => success_message("group removed"),
                        Err(error) => error_from(error),
                    }
                }
                "leave_group" => {
                    let params: GroupTarget = match parse(request.parameters) {
                        Ok(params) => params,
                        Err(response) => return Ok(response),
                    };
                    match user.leave_group(state, GroupId::new(params.group_id)).await {
                        Ok(()) => success_message("left group"),
                        Err(error) => error_from(error),
                    }
                }
                "send_friend_message" => {
                    let params: FriendMessageParams = match parse(request.parameters) {
                        Ok(params) => params,
                        Err(response) => return Ok(response),
                    };
                    send_friend_message(state, &user, UserId::new(params.user_id), &params.message)
                        .await
                }
                "send_group_message" => {
                    let params: GroupMessageParams = match parse(request.parameters) {
                        Ok(params) => params,
                        Err(response) => return Ok(response),
                    };
                    send_group_message(
                        state,
                        user.id(),
                        GroupId::new(params.group_id),
                        &params.message,
                    )
                    .await
                }
                _ => error_message("unknown function"),
            }
        }
    };
    Ok(response)
}

async fn register(state: &ServerState, connection: &Connection, parameters: Value) -> Value {
    let params: RegisterParams = match parse(parameters) {
        Ok(params) => params,
        Err(response) => return response,
    };
    if !email_regex().is_match(&params.email) {
        return error_message("invalid email address");
    }
    let user = state.registry.add_user().await;
    user.update_email(&params.email).await;
    if let Err(error) = user.set_initial_password(&params.password).await {
        return error_from(error);
    }
    if let Err(error) = state.store.persist_user(user.id()) {
        return error_from(error);
    }
    if let Err(error) = state
        .registry
        .bind_connection(connection.id(), user.id(), DeviceType::Unknown)
        .await
    {
        return error_from(error);
    }
    json!({
        "state": "success",
        "message": "user registered",
        "user_id": user.id(),
    })
}

async fn login(state: &ServerState, connection: &Connection, parameters: Value) -> Value {
    let params: LoginParams = match parse(parameters) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let user_id = UserId::new(params.user_id);
    let user = match state.registry.get_user(user_id).await {
        Ok(user) => user,
        Err(error) => return error_from(error),
    };
    if !user.check_password(&params.password).await {
        return error_from(crate::error::ServerError::PasswordMismatch);
    }
    let device = params
        .device
        .as_deref()
        .map(DeviceType::from_wire)
        .unwrap_or(DeviceType::Unknown);
    if let Err(error) = state
        .registry
        .bind_connection(connection.id(), user_id, device)
        .await
    {
        return error_from(error);
    }
    success_message("logged in")
}

async fn send_friend_message(
    state: &ServerState,
    user: &crate::user::User,
    other: UserId,
    message: &str,
) -> Value {
    let room_id = match state.registry.private_room_id(user.id(), other).await {
        Ok(room_id) => room_id,
        Err(error) => return error_from(error),
    };
    let room = match state.registry.get_private_room(room_id).await {
        Ok(room) => room,
        Err(error) => return error_from(error),
    };
    if let Err(error) = room.send_message(message, user.id()).await {
        return error_from(error);
    }
    if let Err(error) = state.store.persist_message(room_id, user.id(), message) {
        return error_from(error);
    }
    success_message("message sent")
}

async fn send_group_message(
    state: &ServerState,
    sender: UserId,
    group: GroupId,
    message: &str,
) -> Value {
    let room = match state.registry.get_group_room(group).await {
        Ok(room) => room,
        Err(error) => return error_from(error),
    };
    if let Err(error) = room.send_message(sender, message).await {
        return error_from(error);
    }
    if let Err(error) = state.store.persist_message(group, sender, message) {
        return error_from(error);
    }
    success_message("message sent")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::FIRST_USER_ID;
    use crate::storage::NullStore;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn state() -> Arc<ServerState> {
        ServerState::new(ServerConfig::default(), Arc::new(NullStore))
    }

    async fn open_connection(state: &ServerState) -> (Connection, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(64);
        let connection = Connection::from_parts("127.0.0.1:4000".parse().unwrap(), tx);
        state
            .registry
            .register_connection(connection.clone())
            .await
            .unwrap();
        (connection, rx)
    }

    struct CallResult {
        response: Value,
        /// Notifications that landed on the caller's own lane before the
        /// response (request id 0).
        notifications: Vec<Value>,
    }

    async fn call(
        state: &ServerState,
        connection: &Connection,
        rx: &mut mpsc::Receiver<Vec<u8>>,
        request_id: i64,
        function: &str,
        parameters: Value,
    ) -> CallResult {
        let payload = json!({"function": function, "parameters": parameters})
            .to_string()
            .into_bytes();
        handle_frame(state, connection, Frame::text(request_id, payload))
            .await
            .unwrap();
        let mut notifications = Vec::new();
        loop {
            let frame = Frame::decode(&rx.recv().await.unwrap()).unwrap();
            let json: Value = serde_json::from_slice(&frame.payload).unwrap();
            if frame.request_id == request_id {
                return CallResult {
                    response: json,
                    notifications,
                };
            }
            notifications.push(json);
        }
    }

    fn next_notification(rx: &mut mpsc::Receiver<Vec<u8>>) -> Value {
        let bytes = rx.try_recv().expect("expected a notification");
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.request_id, 0);
        serde_json::from_slice(&frame.payload).unwrap()
    }

    #[tokio::test]
    async fn register_login_echo_flow() {
        let state = state();
        let (connection, mut rx) = open_connection(&state).await;

        let registered = call(
            &state,
            &connection,
            &mut rx,
            1,
            "register",
            json!({"email": "a@b.co", "password": "p"}),
        )
        .await
        .response;
        assert_eq!(registered["state"], "success");
        assert_eq!(registered["user_id"], FIRST_USER_ID);

        // A second connection logs in as the same user.
        let (second, mut second_rx) = open_connection(&state).await;
        let logged_in = call(
            &state,
            &second,
            &mut second_rx,
            2,
            "login",
            json!({"user_id": FIRST_USER_ID, "password": "p", "device": "PersonalComputer"}),
        )
        .await
        .response;
        assert_eq!(logged_in["state"], "success");

        // Any subsequent non-login call is accepted (and routed).
        let response = call(
            &state,
            &second,
            &mut second_rx,
            3,
            "create_group",
            json!({}),
        )
        .await
        .response;
        assert_eq!(response["state"], "success");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let state = state();
        let (connection, mut rx) = open_connection(&state).await;
        call(
            &state,
            &connection,
            &mut rx,
            1,
            "register",
            json!({"email": "a@b.co", "password": "p"}),
        )
        .await;

        let (second, mut second_rx) = open_connection(&state).await;
        let response = call(
            &state,
            &second,
            &mut second_rx,
            2,
            "login",
            json!({"user_id": FIRST_USER_ID, "password": "nope"}),
        )
        .await
        .response;
        assert_eq!(response["state"], "error");
        assert_eq!(response["message"], "wrong password");
    }

    #[tokio::test]
    async fn unbound_connection_may_only_register_or_login() {
        let state = state();
        let (connection, mut rx) = open_connection(&state).await;
        let response = call(
            &state,
            &connection,
            &mut rx,
            7,
            "add_friend",
            json!({"user_id": 1}),
        )
        .await
        .response;
        assert_eq!(response["state"], "error");
        assert_eq!(response["message"], "You haven't logged in!");
    }

    #[tokio::test]
    async fn invalid_email_is_rejected() {
        let state = state();
        let (connection, mut rx) = open_connection(&state).await;
        let response = call(
            &state,
            &connection,
            &mut rx,
            1,
            "register",
            json!({"email": "not-an-email", "password": "p"}),
        )
        .await
        .response;
        assert_eq!(response["state"], "error");
        assert_eq!(response["message"], "invalid email address");
        assert_eq!(state.registry.user_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_function_and_bad_types_get_error_responses() {
        let state = state();
        let (connection, mut rx) = open_connection(&state).await;
        call(
            &state,
            &connection,
            &mut rx,
            1,
            "register",
            json!({"email": "a@b.co", "password": "p"}),
        )
        .await;

        let response = call(&state, &connection, &mut rx, 2, "frobnicate", json!({}))
            .await
            .response;
        assert_eq!(response["state"], "error");
        assert_eq!(response["message"], "unknown function");

        // A Binary frame is answered with an error carrying the request id.
        let mut frame = Frame::new(FrameType::Binary, b"blob".to_vec());
        frame.request_id = 9;
        handle_frame(&state, &connection, frame).await.unwrap();
        let reply = Frame::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.request_id, 9);
        let json: Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(json["state"], "error");

        // Same for the FileStream frame type: it exists but is rejected.
        let mut frame = Frame::new(FrameType::FileStream, b"chunk".to_vec());
        frame.request_id = 10;
        handle_frame(&state, &connection, frame).await.unwrap();
        let reply = Frame::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.request_id, 10);

        // Segmented payloads are declared but not accepted.
        let mut frame = Frame::text(11, b"{\"function\":\"create_group\"}".to_vec());
        frame.sequence_size = 2;
        handle_frame(&state, &connection, frame).await.unwrap();
        let reply = Frame::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.request_id, 11);
        let json: Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(json["state"], "error");
        assert_eq!(state.registry.group_count().await, 0);

        // Empty Text payloads are rejected for text, accepted for heartbeats
        // at the transport level.
        handle_frame(&state, &connection, Frame::text(12, Vec::new()))
            .await
            .unwrap();
        let reply = Frame::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.request_id, 12);
        let json: Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(json["message"], "empty request");
    }

    async fn register_pair(
        state: &Arc<ServerState>,
    ) -> (
        Connection,
        mpsc::Receiver<Vec<u8>>,
        i64,
        Connection,
        mpsc::Receiver<Vec<u8>>,
        i64,
    ) {
        let (a, mut a_rx) = open_connection(state).await;
        let a_id = call(
            state,
            &a,
            &mut a_rx,
            1,
            "register",
            json!({"email": "a@b.co", "password": "p"}),
        )
        .await
        .response["user_id"]
            .as_i64()
            .unwrap();
        let (b, mut b_rx) = open_connection(state).await;
        let b_id = call(
            state,
            &b,
            &mut b_rx,
            1,
            "register",
            json!({"email": "c@d.co", "password": "p"}),
        )
        .await
        .response["user_id"]
            .as_i64()
            .unwrap();
        (a, a_rx, a_id, b, b_rx, b_id)
    }

    #[tokio::test]
    async fn friend_handshake_over_the_wire() {
        let state = state();
        let (a, mut a_rx, a_id, b, mut b_rx, b_id) = register_pair(&state).await;

        let response = call(
            &state,
            &a,
            &mut a_rx,
            2,
            "add_friend",
            json!({"user_id": b_id}),
        )
        .await
        .response;
        assert_eq!(response["state"], "success");
        let asked = next_notification(&mut b_rx);
        assert_eq!(asked["type"], "added_friend_verification");
        assert_eq!(asked["userid"], a_id);

        let response = call(
            &state,
            &b,
            &mut b_rx,
            3,
            "accept_friend_verification",
            json!({"user_id": a_id}),
        )
        .await
        .response;
        assert_eq!(response["state"], "success");
        let added = next_notification(&mut a_rx);
        assert_eq!(added["type"], "added_friend");
        assert_eq!(added["userid"], b_id);

        assert!(
            state
                .registry
                .has_private_pair(UserId::new(a_id), UserId::new(b_id))
                .await
        );

        // The private channel works both ways now; the sender sees their own
        // message come back as a notification ahead of the response.
        let result = call(
            &state,
            &a,
            &mut a_rx,
            4,
            "send_friend_message",
            json!({"user_id": b_id, "message": "hi bob"}),
        )
        .await;
        assert_eq!(result.response["state"], "success");
        assert_eq!(result.notifications.len(), 1);
        assert_eq!(result.notifications[0]["type"], "private_message");
        let delivered = next_notification(&mut b_rx);
        assert_eq!(delivered["type"], "private_message");
        assert_eq!(delivered["data"]["message"], "hi bob");
    }

    #[tokio::test]
    async fn group_admin_flow_over_the_wire() {
        let state = state();
        let (a, mut a_rx, a_id, b, mut b_rx, b_id) = register_pair(&state).await;

        let created = call(&state, &a, &mut a_rx, 2, "create_group", json!({}))
            .await
            .response;
        assert_eq!(created["state"], "success");
        let group_id = created["group_id"].as_i64().unwrap();

        let response = call(
            &state,
            &b,
            &mut b_rx,
            3,
            "add_group",
            json!({"group_id": group_id}),
        )
        .await
        .response;
        assert_eq!(response["state"], "success");
        let asked = next_notification(&mut a_rx);
        assert_eq!(asked["type"], "added_group_verification");
        assert_eq!(asked["groupid"], group_id);
        assert_eq!(asked["userid"], b_id);

        let response = call(
            &state,
            &a,
            &mut a_rx,
            4,
            "accept_group_verification",
            json!({"group_id": group_id, "user_id": b_id}),
        )
        .await
        .response;
        assert_eq!(response["state"], "success");
        let joined = next_notification(&mut b_rx);
        assert_eq!(joined["type"], "added_group");

        let result = call(
            &state,
            &a,
            &mut a_rx,
            5,
            "send_group_message",
            json!({"group_id": group_id, "message": "hi"}),
        )
        .await;
        assert_eq!(result.response["state"], "success");
        // The sender's copy arrives on their own lane before the response.
        assert_eq!(result.notifications.len(), 1);
        let own_copy = &result.notifications[0];
        assert_eq!(own_copy["type"], "group_message");
        assert_eq!(own_copy["data"]["user_id"], a_id);
        assert_eq!(own_copy["data"]["group_id"], group_id);
        assert_eq!(own_copy["data"]["message"], "hi");
        let message = next_notification(&mut b_rx);
        assert_eq!(message["type"], "group_message");
        assert_eq!(message["data"]["user_id"], a_id);
        assert_eq!(message["data"]["group_id"], group_id);
        assert_eq!(message["data"]["message"], "hi");
    }

    #[tokio::test]
    async fn muted_member_send_succeeds_without_emission() {
        let state = state();
        let (a, mut a_rx, a_id, b, mut b_rx, b_id) = register_pair(&state).await;
        let created = call(&state, &a, &mut a_rx, 2, "create_group", json!({}))
            .await
            .response;
        let group_id = created["group_id"].as_i64().unwrap();
        call(
            &state,
            &b,
            &mut b_rx,
            3,
            "add_group",
            json!({"group_id": group_id}),
        )
        .await;
        call(
            &state,
            &a,
            &mut a_rx,
            4,
            "accept_group_verification",
            json!({"group_id": group_id, "user_id": b_id}),
        )
        .await;
        while a_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}

        let room = state
            .registry
            .get_group_room(GroupId::new(group_id))
            .await
            .unwrap();
        room.mute(
            UserId::new(a_id),
            UserId::new(b_id),
            ChronoDuration::minutes(1),
        )
        .await
        .unwrap();
        while a_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}

        // Accepted, but no group_message reaches anyone.
        let result = call(
            &state,
            &b,
            &mut b_rx,
            5,
            "send_group_message",
            json!({"group_id": group_id, "message": "silenced"}),
        )
        .await;
        assert_eq!(result.response["state"], "success");
        assert!(result.notifications.is_empty());
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_group_over_the_wire() {
        let state = state();
        let (a, mut a_rx, _a_id, b, mut b_rx, b_id) = register_pair(&state).await;
        let created = call(&state, &a, &mut a_rx, 2, "create_group", json!({}))
            .await
            .response;
        let group_id = created["group_id"].as_i64().unwrap();
        call(
            &state,
            &b,
            &mut b_rx,
            3,
            "add_group",
            json!({"group_id": group_id}),
        )
        .await;
        call(
            &state,
            &a,
            &mut a_rx,
            4,
            "accept_group_verification",
            json!({"group_id": group_id, "user_id": b_id}),
        )
        .await;
        while a_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}

        let result = call(
            &state,
            &a,
            &mut a_rx,
            5,
            "remove_group",
            json!({"group_id": group_id}),
        )
        .await;
        assert_eq!(result.response["state"], "success");
        let gone = next_notification(&mut b_rx);
        assert_eq!(gone["type"], "group_removed");
        assert!(
            !state
                .registry
                .has_group_room(GroupId::new(group_id))
                .await
        );
    }
}
