//! Display commands and per-region generation tokens.
//!
//! The session controller never touches a UI directly. It issues
//! [`DisplayCommand`]s to whichever runtime paints the regions (the WebSocket
//! service forwards them to the browser). Every streamed write is guarded by a
//! [`GenerationToken`]; starting a new action on a region invalidates the
//! token held by any older stream still writing to it.

use crate::llm_client::ChatTurn;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A display area owned by exactly one kind of action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Outline,
    LessonContent,
    TutorChat,
    Notes,
    Assessment,
}

impl Region {
    const ALL: [Region; 5] = [
        Region::Outline,
        Region::LessonContent,
        Region::TutorChat,
        Region::Notes,
        Region::Assessment,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Sections that only make sense once a lesson has finished generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Tutor,
    Notes,
    Assessment,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Tutor, Section::Notes, Section::Assessment];
}

/// An instruction for the display runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayCommand {
    /// Replace the whole content of a region.
    ReplaceRegion { region: Region, markup: String },
    /// Show or hide the busy indicator of a region. Busy regions also disable
    /// the control that starts them.
    SetBusy { region: Region, busy: bool },
    SetSectionVisible { section: Section, visible: bool },
    /// Replace a region's content with an error message.
    ShowError { region: Region, message: String },
    /// Show a message beside a region, leaving its content untouched.
    ShowNotice { region: Region, message: String },
    /// Append a finished chat bubble (the learner's question).
    AppendChatTurn { turn: ChatTurn },
    /// Open an empty model bubble that subsequent text updates fill.
    BeginChatResponse { response_id: u64 },
    /// Set the raw text of a model bubble.
    ChatResponseText { response_id: u64, text: String },
    /// Persistence status label ("Saving...", "Saved", ...).
    SaveStatus { status: String },
    CourseSaved { course_id: String },
    /// The saved course list changed and should be fetched again.
    HistoryChanged,
    /// Fill the topic input with a loaded course's topic.
    SetTopic { topic: String },
    /// Tick exactly these lessons in the outline.
    ApplyProgress { completed: Vec<String> },
}

/// Proof that an action is still the most recent one for its region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationToken {
    region: Region,
    epoch: u64,
}

impl GenerationToken {
    pub fn region(&self) -> Region {
        self.region
    }
}

/// Monotonic epoch counter per region.
#[derive(Debug, Default)]
pub struct RegionTokens {
    epochs: [AtomicU64; Region::ALL.len()],
}

impl RegionTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new generation on `region`, invalidating every earlier token
    /// for it.
    pub fn begin(&self, region: Region) -> GenerationToken {
        let epoch = self.epochs[region.index()].fetch_add(1, Ordering::SeqCst) + 1;
        GenerationToken { region, epoch }
    }

    /// Joins the generation currently running on `region` without
    /// invalidating it.
    pub fn current(&self, region: Region) -> GenerationToken {
        let epoch = self.epochs[region.index()].load(Ordering::SeqCst);
        GenerationToken { region, epoch }
    }

    /// Invalidates outstanding tokens for `region` without starting anything.
    pub fn invalidate(&self, region: Region) {
        self.epochs[region.index()].fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_current(&self, token: &GenerationToken) -> bool {
        self.epochs[token.region.index()].load(Ordering::SeqCst) == token.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_invalidates_previous_one() {
        let tokens = RegionTokens::new();
        let first = tokens.begin(Region::Notes);
        assert!(tokens.is_current(&first));

        let second = tokens.begin(Region::Notes);
        assert!(!tokens.is_current(&first));
        assert!(tokens.is_current(&second));
    }

    #[test]
    fn test_regions_are_independent() {
        let tokens = RegionTokens::new();
        let notes = tokens.begin(Region::Notes);
        let _assessment = tokens.begin(Region::Assessment);
        tokens.invalidate(Region::Outline);
        assert!(tokens.is_current(&notes));

        tokens.invalidate(Region::Notes);
        assert!(!tokens.is_current(&notes));
        assert_eq!(notes.region(), Region::Notes);
    }

    #[test]
    fn test_current_token_shares_the_running_epoch() {
        let tokens = RegionTokens::new();
        let joined = tokens.current(Region::TutorChat);
        let again = tokens.current(Region::TutorChat);
        assert!(tokens.is_current(&joined) && tokens.is_current(&again));

        tokens.invalidate(Region::TutorChat);
        assert!(!tokens.is_current(&joined));
    }

    #[test]
    fn test_command_serialization() {
        let cmd = DisplayCommand::ReplaceRegion {
            region: Region::LessonContent,
            markup: "<h2>Hi</h2>".to_string(),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "replace_region", "region": "lesson_content", "markup": "<h2>Hi</h2>"})
        );

        let cmd = DisplayCommand::AppendChatTurn {
            turn: ChatTurn::user("Why?"),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["turn"]["role"], "user");

        let json = serde_json::to_value(DisplayCommand::HistoryChanged).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "history_changed"}));
    }
}
