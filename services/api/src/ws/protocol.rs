//! Defines the WebSocket message protocol between the browser client and the API server.

use crate::models::CourseSummary;
use coursecraft_core::{display::DisplayCommand, preferences::Theme, prompts::AssessmentMode};
use serde::{Deserialize, Serialize};

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identifies the learner. This must be the first message.
    Init { user_id: String },
    GenerateOutline { topic: String },
    OpenLesson { title: String },
    AskTutor { question: String },
    GenerateNotes,
    GenerateAssessment { mode: AssessmentMode },
    /// Restores a course from the history list.
    LoadCourse { course_id: String },
    SetLessonCompleted { title: String, completed: bool },
    ExportLesson,
    ListCourses,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms initialization with the learner's history and theme.
    Initialized {
        courses: Vec<CourseSummary>,
        theme: Theme,
    },
    /// A display update produced by the session controller.
    Display { command: DisplayCommand },
    /// The refreshed course history.
    Courses { courses: Vec<CourseSummary> },
    /// Where the exported lesson document was written.
    Exported { path: String },
    /// Reports an error that no display region shows.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursecraft_core::display::Region;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "init", "user_id": "user_1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Init {
                user_id: "user_1".to_string()
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "generate_assessment", "mode": "test"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::GenerateAssessment {
                mode: AssessmentMode::Test
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "generate_notes"}"#).unwrap();
        assert_eq!(msg, ClientMessage::GenerateNotes);
    }

    #[test]
    fn test_unknown_client_message_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type": "set_voice_enabled"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_display_message_nests_command() {
        let msg = ServerMessage::Display {
            command: DisplayCommand::SetBusy {
                region: Region::Outline,
                busy: true,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "display",
                "command": {"kind": "set_busy", "region": "outline", "busy": true}
            })
        );
    }
}
