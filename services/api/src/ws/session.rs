//! Manages the WebSocket connection lifecycle for one learner's course session.

use super::protocol::{ClientMessage, ServerMessage};
use crate::{models::CourseSummary, state::AppState};
use anyhow::{Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use coursecraft_core::{CourseSession, DisplayCommand};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinSet,
};
use tracing::{Instrument, debug, error, info, instrument, warn};

type SocketSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Performs the `init` handshake, then runs the session loop until the client
/// goes away.
#[instrument(name = "ws_session", skip_all, fields(connection_id, user_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: u32 = rand::random();
    tracing::Span::current().record("connection_id", connection_id);
    info!("New WebSocket connection. Awaiting initialization...");

    let (socket_tx, mut socket_rx) = socket.split();
    let socket_tx: SocketSink = Arc::new(Mutex::new(socket_tx));

    // The first message from the client must be an `init` message.
    let user_id = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => parse_init(&text),
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        _ => {
            info!("Client disconnected before sending init message.");
            return;
        }
    };
    let user_id = match user_id {
        Ok(user_id) => user_id,
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_msg(
                &socket_tx,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };
    tracing::Span::current().record("user_id", user_id.as_str());

    let (display_tx, display_rx) = mpsc::channel(64);
    let session = Arc::new(CourseSession::new(
        state.llm_client.clone(),
        state.courses.for_user(&user_id),
        state.prompts.clone(),
        display_tx,
    ));

    let courses = match course_summaries(&session).await {
        Ok(courses) => courses,
        Err(e) => {
            warn!(error = ?e, "Could not load course history");
            Vec::new()
        }
    };
    let initialized = ServerMessage::Initialized {
        courses,
        theme: state.preferences.theme().await,
    };
    if send_msg(&socket_tx, initialized).await.is_err() {
        error!("Failed to send Initialized message to client.");
        return;
    }
    info!("Session initialized.");

    // Reopen the learner's latest course so progress keeps saving to it.
    match session.resume_latest_course().await {
        Ok(Some(course)) => info!(course_id = %course.id, "Resumed latest course."),
        Ok(None) => debug!("No saved course to resume."),
        Err(e) => warn!(error = ?e, "Could not resume latest course"),
    }

    if let Err(e) = run_course_session(state, session, socket_tx, socket_rx, display_rx).await {
        error!(error = ?e, "Course session terminated with error.");
    }
    info!("Course session finished.");
}

fn parse_init(text: &str) -> Result<String> {
    match serde_json::from_str::<ClientMessage>(text)? {
        ClientMessage::Init { user_id } if !user_id.trim().is_empty() => Ok(user_id),
        ClientMessage::Init { .. } => Err(anyhow!("`user_id` is required for `init`")),
        _ => Err(anyhow!("First message must be `init`")),
    }
}

/// The main event loop for an initialized connection.
///
/// Every action runs as its own task so a slow stream never blocks the
/// socket; display commands from all of them are forwarded as they arrive.
async fn run_course_session(
    state: Arc<AppState>,
    session: Arc<CourseSession>,
    socket_tx: SocketSink,
    mut socket_rx: SplitStream<WebSocket>,
    mut display_rx: mpsc::Receiver<DisplayCommand>,
) -> Result<()> {
    let mut actions = JoinSet::new();

    loop {
        tokio::select! {
            // Handle messages from the client WebSocket.
            msg_result = socket_rx.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => dispatch(msg, &state, &session, &socket_tx, &mut actions),
                            Err(e) => warn!(error = %e, "Ignoring malformed client message."),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client closed the connection. Shutting down session.");
                        break;
                    }
                    Some(Ok(_)) => debug!("Ignoring non-text frame."),
                    Some(Err(e)) => {
                        error!("Error receiving from client WebSocket: {:?}", e);
                        break;
                    }
                }
            },
            // Forward display updates produced by running actions.
            Some(command) = display_rx.recv() => {
                send_msg(&socket_tx, outgoing_message(&session, command).await).await?;
            },
            // Reap finished actions.
            Some(joined) = actions.join_next() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = ?e, "Action task panicked.");
                    }
                }
            },
        }
    }

    // Dropping in-flight streams cancels their requests.
    actions.abort_all();
    info!("WebSocket connection closed and course session terminated.");
    Ok(())
}

/// Starts the task for one client action.
fn dispatch(
    msg: ClientMessage,
    state: &Arc<AppState>,
    session: &Arc<CourseSession>,
    socket_tx: &SocketSink,
    actions: &mut JoinSet<()>,
) {
    let session = session.clone();
    let socket_tx = socket_tx.clone();
    let state = state.clone();

    let task = async move {
        match msg {
            ClientMessage::Init { .. } => warn!("Ignoring repeated `init` message."),
            ClientMessage::GenerateOutline { topic } => {
                log_outcome("generate_outline", session.generate_outline(&topic).await)
            }
            ClientMessage::OpenLesson { title } => {
                log_outcome("open_lesson", session.open_lesson(&title).await)
            }
            ClientMessage::AskTutor { question } => {
                log_outcome("ask_tutor", session.tutor_turn(&question).await)
            }
            ClientMessage::GenerateNotes => {
                log_outcome("generate_notes", session.generate_notes().await)
            }
            ClientMessage::GenerateAssessment { mode } => log_outcome(
                "generate_assessment",
                session.generate_assessment(mode).await,
            ),
            ClientMessage::LoadCourse { course_id } => {
                if let Err(e) = session.load_course(&course_id).await {
                    reply_error(&socket_tx, e.to_string()).await;
                }
            }
            ClientMessage::SetLessonCompleted { title, completed } => {
                if let Some(save) = session.set_lesson_completed(&title, completed).await {
                    let _ = save.await;
                }
            }
            ClientMessage::ExportLesson => {
                match session.export_lesson(state.exporter.as_ref()).await {
                    Ok(path) => {
                        let path = path.display().to_string();
                        let _ = send_msg(&socket_tx, ServerMessage::Exported { path }).await;
                    }
                    Err(e) => reply_error(&socket_tx, e.to_string()).await,
                }
            }
            ClientMessage::ListCourses => match course_summaries(&session).await {
                Ok(courses) => {
                    let _ = send_msg(&socket_tx, ServerMessage::Courses { courses }).await;
                }
                Err(e) => reply_error(&socket_tx, e.to_string()).await,
            },
        }
    };
    actions.spawn(task.in_current_span());
}

fn log_outcome<E: std::fmt::Display>(action: &str, outcome: Result<(), E>) {
    // Failures were already shown in the action's region.
    if let Err(e) = outcome {
        debug!(action, error = %e, "Action finished with an error.");
    }
}

/// Turns a display command into the message sent to the client. A changed
/// course history is sent as the refreshed list.
async fn outgoing_message(session: &CourseSession, command: DisplayCommand) -> ServerMessage {
    if command != DisplayCommand::HistoryChanged {
        return ServerMessage::Display { command };
    }
    match course_summaries(session).await {
        Ok(courses) => ServerMessage::Courses { courses },
        Err(e) => {
            warn!(error = ?e, "Could not refresh course history");
            ServerMessage::Display { command }
        }
    }
}

async fn course_summaries(session: &CourseSession) -> Result<Vec<CourseSummary>> {
    let courses = session.list_courses().await?;
    Ok(courses.iter().map(CourseSummary::from).collect())
}

async fn reply_error(socket_tx: &SocketSink, message: String) {
    if let Err(e) = send_msg(socket_tx, ServerMessage::Error { message }).await {
        warn!(error = ?e, "Failed to send error to client.");
    }
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(socket_tx: &SocketSink, msg: ServerMessage) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx
        .lock()
        .await
        .send(Message::Text(serialized.into()))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursecraft_core::{
        course::{CourseStore, InMemoryCourseStore},
        llm_client::{GeminiClient, GeminiConfig},
        prompts::PromptSet,
    };

    fn offline_session(store: Arc<InMemoryCourseStore>) -> CourseSession {
        let (display_tx, _display_rx) = mpsc::channel(8);
        CourseSession::new(
            Arc::new(GeminiClient::new(GeminiConfig::new("unused", "unused"))),
            store,
            Arc::new(PromptSet::default()),
            display_tx,
        )
    }

    #[tokio::test]
    async fn test_history_change_is_sent_as_course_list() {
        let store = Arc::new(InMemoryCourseStore::new());
        let id = store.create_course("Rust", "<ul></ul>", 4).await.unwrap();
        let session = offline_session(store);

        match outgoing_message(&session, DisplayCommand::HistoryChanged).await {
            ServerMessage::Courses { courses } => {
                assert_eq!(courses.len(), 1);
                assert_eq!(courses[0].id, id);
                assert_eq!(courses[0].total_lessons, 4);
            }
            other => panic!("expected the course list, got {other:?}"),
        }

        let saved = DisplayCommand::SaveStatus {
            status: "Saved".to_string(),
        };
        assert!(matches!(
            outgoing_message(&session, saved.clone()).await,
            ServerMessage::Display { command } if command == saved
        ));
    }

    #[tokio::test]
    async fn test_connection_resumes_latest_course() {
        let store = Arc::new(InMemoryCourseStore::new());
        store.create_course("Go", "<ul></ul>", 1).await.unwrap();
        let latest = store.create_course("Rust", "<ul></ul>", 2).await.unwrap();
        let session = offline_session(store);

        session.resume_latest_course().await.unwrap();

        let state = session.snapshot().await;
        assert_eq!(state.active_course, Some(latest));
        assert_eq!(state.topic, "Rust");
    }

    #[test]
    fn test_parse_init() {
        assert_eq!(
            parse_init(r#"{"type": "init", "user_id": "user_1"}"#).unwrap(),
            "user_1"
        );
        assert!(parse_init(r#"{"type": "init", "user_id": " "}"#).is_err());
        assert!(parse_init(r#"{"type": "generate_notes"}"#).is_err());
        assert!(parse_init("not json").is_err());
    }
}
