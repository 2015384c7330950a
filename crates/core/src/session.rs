//! Generation Session Controller
//!
//! A [`CourseSession`] owns everything one learner's workspace needs: the
//! current topic and outline, the open lesson, the tutor conversation and the
//! active course record. Each user-triggered action (outline, lesson, tutor
//! turn, notes, assessment) issues one streaming request, re-renders the
//! accumulated text on every delta and reports progress as
//! [`DisplayCommand`]s on the session's display channel.
//!
//! Actions take `&self` so the runtime may run different actions at the same
//! time. Writes to a region are guarded by generation tokens: a newer action on
//! the same region silences and drops any older stream still writing to it.

use crate::{
    course::{CourseId, CourseRecord, CourseStore},
    display::{DisplayCommand, GenerationToken, Region, RegionTokens, Section},
    error::{GenerationError, StreamError},
    export::{DocumentExporter, strip_interactive_chrome},
    llm_client::{ChatTurn, GenerationRequest, LLMClient, Role},
    markup::{self, Variant},
    prompts::{AssessmentMode, LessonContext, PromptSet},
    sse::StreamEvent,
};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, instrument, warn};

const CURSOR_MARKUP: &str = r#"<span class="blinking-cursor"></span>"#;

/// Mutable state of one session. Only [`CourseSession`] mutates it.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub topic: String,
    pub outline_html: String,
    pub lesson: LessonContext,
    /// Last rendered lesson markup, without the streaming cursor.
    pub lesson_markup: String,
    pub chat_history: Vec<ChatTurn>,
    pub active_course: Option<CourseId>,
    pub completed_lessons: BTreeSet<String>,
}

/// The controller behind every generation action of one learner.
pub struct CourseSession {
    llm_client: Arc<dyn LLMClient>,
    store: Arc<dyn CourseStore>,
    prompts: Arc<PromptSet>,
    display_tx: mpsc::Sender<DisplayCommand>,
    state: Arc<Mutex<SessionState>>,
    tokens: RegionTokens,
    next_response_id: AtomicU64,
    /// Serialises tutor turns of the open lesson. Replaced on lesson open so a
    /// new lesson never waits on a superseded reply.
    tutor_gate: std::sync::Mutex<Arc<Mutex<()>>>,
}

impl CourseSession {
    pub fn new(
        llm_client: Arc<dyn LLMClient>,
        store: Arc<dyn CourseStore>,
        prompts: Arc<PromptSet>,
        display_tx: mpsc::Sender<DisplayCommand>,
    ) -> Self {
        Self {
            llm_client,
            store,
            prompts,
            display_tx,
            state: Arc::new(Mutex::new(SessionState::default())),
            tokens: RegionTokens::new(),
            next_response_id: AtomicU64::new(1),
            tutor_gate: std::sync::Mutex::new(Arc::new(Mutex::new(()))),
        }
    }

    /// A copy of the current session state.
    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Generates a course outline for `topic` and persists it once complete.
    #[instrument(skip(self))]
    pub async fn generate_outline(&self, topic: &str) -> Result<(), GenerationError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return self
                .reject(Region::Outline, "Please enter a course topic.")
                .await;
        }

        let token = self.tokens.begin(Region::Outline);
        {
            let mut state = self.state.lock().await;
            state.topic = topic.to_string();
            state.outline_html.clear();
            state.active_course = None;
            state.completed_lessons.clear();
        }
        self.send(DisplayCommand::ReplaceRegion {
            region: Region::Outline,
            markup: String::new(),
        })
        .await;
        self.send(DisplayCommand::SetBusy {
            region: Region::Outline,
            busy: true,
        })
        .await;

        let request = self.prompts.outline(topic);
        let result = self
            .run_stream(&token, request, false, |text| DisplayCommand::ReplaceRegion {
                region: Region::Outline,
                markup: markup::render(text, Variant::Outline),
            })
            .await;

        let outcome = match result {
            Ok(Some(full_text)) => {
                let outline = markup::render(&full_text, Variant::Outline);
                let total_lessons = markup::count_lesson_links(&outline);
                let stored = {
                    let mut state = self.state.lock().await;
                    let current = self.tokens.is_current(&token);
                    if current {
                        state.outline_html = outline.clone();
                    }
                    current
                };
                if stored {
                    info!(total_lessons, "Outline generated");
                    self.persist_outline(topic.to_string(), outline, total_lessons);
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                error!(error = %e, "Outline generation error");
                self.send_if_current(
                    &token,
                    DisplayCommand::ShowError {
                        region: Region::Outline,
                        message: format!(
                            "Failed to generate course outline: {e}. Please check your internet connection and try again."
                        ),
                    },
                )
                .await;
                Err(e.into())
            }
        };

        self.send_if_current(
            &token,
            DisplayCommand::SetBusy {
                region: Region::Outline,
                busy: false,
            },
        )
        .await;
        outcome
    }

    /// Opens a lesson of the current course and streams its content.
    #[instrument(skip(self))]
    pub async fn open_lesson(&self, title: &str) -> Result<(), GenerationError> {
        let title = title.trim();
        let topic = self.state.lock().await.topic.clone();
        if title.is_empty() {
            return self
                .reject(Region::LessonContent, "Select a lesson to open.")
                .await;
        }
        if topic.is_empty() {
            return self
                .reject(
                    Region::LessonContent,
                    "Generate or load a course before opening a lesson.",
                )
                .await;
        }

        for region in [Region::TutorChat, Region::Notes, Region::Assessment] {
            self.tokens.invalidate(region);
        }
        *self.tutor_gate.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(Mutex::new(()));
        let token = self.tokens.begin(Region::LessonContent);
        {
            let mut state = self.state.lock().await;
            state.lesson = LessonContext {
                topic: topic.clone(),
                lesson_title: title.to_string(),
                lesson_content: String::new(),
            };
            state.lesson_markup.clear();
            state.chat_history.clear();
        }

        for section in Section::ALL {
            self.send(DisplayCommand::SetSectionVisible {
                section,
                visible: false,
            })
            .await;
        }
        for region in [
            Region::TutorChat,
            Region::Notes,
            Region::Assessment,
            Region::LessonContent,
        ] {
            self.send(DisplayCommand::ReplaceRegion {
                region,
                markup: String::new(),
            })
            .await;
        }
        self.send(DisplayCommand::SetBusy {
            region: Region::LessonContent,
            busy: true,
        })
        .await;

        let request = self.prompts.lesson(&topic, title);
        let result = self
            .run_stream(&token, request, true, |text| DisplayCommand::ReplaceRegion {
                region: Region::LessonContent,
                markup: lesson_markup(text, true),
            })
            .await;

        let outcome = match result {
            Ok(Some(full_text)) => {
                let rendered = lesson_markup(&full_text, false);
                let stored = {
                    let mut state = self.state.lock().await;
                    let current = self.tokens.is_current(&token);
                    if current {
                        state.lesson.lesson_content = full_text;
                        state.lesson_markup = rendered.clone();
                    }
                    current
                };
                if stored {
                    self.send(DisplayCommand::ReplaceRegion {
                        region: Region::LessonContent,
                        markup: rendered,
                    })
                    .await;
                    for section in Section::ALL {
                        self.send(DisplayCommand::SetSectionVisible {
                            section,
                            visible: true,
                        })
                        .await;
                    }
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                error!(error = %e, "Lesson content generation error");
                self.send_if_current(
                    &token,
                    DisplayCommand::ShowError {
                        region: Region::LessonContent,
                        message: format!("Error generating lesson content: {e}. Please try again."),
                    },
                )
                .await;
                Err(e.into())
            }
        };

        self.send_if_current(
            &token,
            DisplayCommand::SetBusy {
                region: Region::LessonContent,
                busy: false,
            },
        )
        .await;
        outcome
    }

    /// Answers one learner question about the open lesson.
    ///
    /// Turns run one at a time: a question asked while another is being
    /// answered waits for that answer, so the conversation sent as prior turns
    /// always alternates question and answer. The model's answer is appended
    /// once its stream completes.
    #[instrument(skip(self))]
    pub async fn tutor_turn(&self, question: &str) -> Result<(), GenerationError> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(());
        }

        let token = self.tokens.current(Region::TutorChat);
        let gate = self
            .tutor_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let _turn = gate.lock_owned().await;
        if !self.tokens.is_current(&token) {
            debug!("Lesson changed while the question was queued; dropping it");
            return Ok(());
        }

        let (lesson, prior_turns) = {
            let mut state = self.state.lock().await;
            if !state.lesson.is_ready() {
                drop(state);
                return self
                    .reject(Region::TutorChat, "Open a lesson before asking the tutor.")
                    .await;
            }
            let prior_turns = state.chat_history.clone();
            state.chat_history.push(ChatTurn::user(question));
            (state.lesson.clone(), prior_turns)
        };

        let response_id = self.next_response_id.fetch_add(1, Ordering::SeqCst);
        self.send(DisplayCommand::AppendChatTurn {
            turn: ChatTurn::user(question),
        })
        .await;
        self.send(DisplayCommand::BeginChatResponse { response_id })
            .await;

        let request = self.prompts.tutor(&lesson, question, prior_turns);
        let result = self
            .run_stream(&token, request, false, |text| {
                DisplayCommand::ChatResponseText {
                    response_id,
                    text: text.to_string(),
                }
            })
            .await;

        match result {
            Ok(Some(full_text)) => {
                let mut state = self.state.lock().await;
                if self.tokens.is_current(&token) {
                    state.chat_history.push(ChatTurn::model(full_text));
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                error!(error = %e, "Tutor chat error");
                {
                    let mut state = self.state.lock().await;
                    if self.tokens.is_current(&token) {
                        // An unanswered question would leave two user turns in a row.
                        if let Some(pos) = state
                            .chat_history
                            .iter()
                            .rposition(|t| t.role == Role::User && t.text == question)
                        {
                            state.chat_history.remove(pos);
                        }
                    }
                }
                self.send_if_current(
                    &token,
                    DisplayCommand::ChatResponseText {
                        response_id,
                        text: format!("Error: {e}"),
                    },
                )
                .await;
                Err(e.into())
            }
        }
    }

    /// Summarises the open lesson into notes.
    #[instrument(skip(self))]
    pub async fn generate_notes(&self) -> Result<(), GenerationError> {
        let request = match self.lesson_snapshot().await {
            Some(lesson) => self.prompts.notes(&lesson),
            None => {
                return self
                    .reject(Region::Notes, "Open a lesson before generating notes.")
                    .await;
            }
        };
        self.generate_study_aid(Region::Notes, Section::Notes, request, "notes")
            .await
    }

    /// Builds a practice or test assessment for the open lesson.
    #[instrument(skip(self))]
    pub async fn generate_assessment(&self, mode: AssessmentMode) -> Result<(), GenerationError> {
        let request = match self.lesson_snapshot().await {
            Some(lesson) => self.prompts.assessment(&lesson, mode),
            None => {
                return self
                    .reject(
                        Region::Assessment,
                        "Open a lesson before generating an assessment.",
                    )
                    .await;
            }
        };
        self.generate_study_aid(Region::Assessment, Section::Assessment, request, "assessment")
            .await
    }

    /// Restores a saved course into the outline region.
    #[instrument(skip(self))]
    pub async fn load_course(&self, id: &str) -> Result<CourseRecord, GenerationError> {
        let course = self
            .store
            .get_course(id)
            .await
            .map_err(GenerationError::Persistence)?
            .ok_or_else(|| GenerationError::validation(format!("Course '{id}' not found.")))?;

        // A saved outline supersedes any outline still streaming.
        let _token = self.tokens.begin(Region::Outline);
        {
            let mut state = self.state.lock().await;
            state.topic = course.topic.clone();
            state.outline_html = course.outline_html.clone();
            state.active_course = Some(course.id.clone());
            state.completed_lessons = course.completed_lessons.iter().cloned().collect();
        }

        self.send(DisplayCommand::SetTopic {
            topic: course.topic.clone(),
        })
        .await;
        self.send(DisplayCommand::ReplaceRegion {
            region: Region::Outline,
            markup: course.outline_html.clone(),
        })
        .await;
        self.send(DisplayCommand::SetBusy {
            region: Region::Outline,
            busy: false,
        })
        .await;
        self.send(DisplayCommand::ApplyProgress {
            completed: course.completed_lessons.clone(),
        })
        .await;
        info!(course_id = %course.id, "Course loaded");
        Ok(course)
    }

    /// Loads the most recently created course, if there is one.
    #[instrument(skip(self))]
    pub async fn resume_latest_course(&self) -> Result<Option<CourseRecord>, GenerationError> {
        let latest = self.list_courses().await?.into_iter().next();
        match latest {
            Some(course) => self.load_course(&course.id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Saved courses, most recent first.
    pub async fn list_courses(&self) -> Result<Vec<CourseRecord>, GenerationError> {
        self.store
            .list_courses()
            .await
            .map_err(GenerationError::Persistence)
    }

    /// Ticks or unticks a lesson and saves progress for the active course.
    ///
    /// Returns the spawned save, if a course is active.
    #[instrument(skip(self))]
    pub async fn set_lesson_completed(&self, title: &str, completed: bool) -> Option<JoinHandle<()>> {
        let (course_id, titles) = {
            let mut state = self.state.lock().await;
            if completed {
                state.completed_lessons.insert(title.to_string());
            } else {
                state.completed_lessons.remove(title);
            }
            let titles: Vec<String> = markup::lesson_titles(&state.outline_html)
                .into_iter()
                .filter(|t| state.completed_lessons.contains(t))
                .collect();
            (state.active_course.clone(), titles)
        };

        let course_id = course_id?;
        let store = self.store.clone();
        let display_tx = self.display_tx.clone();
        Some(tokio::spawn(
            async move {
                match store.update_progress(&course_id, &titles).await {
                    Ok(()) => {
                        send_display(&display_tx, save_status("Progress Saved")).await;
                        send_display(&display_tx, DisplayCommand::HistoryChanged).await;
                    }
                    Err(e) => {
                        error!(error = ?e, "Error saving progress");
                        send_display(&display_tx, save_status("Progress Save Failed")).await;
                    }
                }
            }
            .in_current_span(),
        ))
    }

    /// Exports the open lesson without its interactive chrome.
    #[instrument(skip(self, exporter))]
    pub async fn export_lesson(
        &self,
        exporter: &dyn DocumentExporter,
    ) -> Result<PathBuf, GenerationError> {
        let (markup, title) = {
            let state = self.state.lock().await;
            if !state.lesson.is_ready() {
                return Err(GenerationError::validation(
                    "Open a lesson before exporting it.",
                ));
            }
            (state.lesson_markup.clone(), state.lesson.lesson_title.clone())
        };

        let html = strip_interactive_chrome(&markup);
        exporter
            .export_document(&html, &format!("{title}.html"))
            .await
            .map_err(GenerationError::Export)
    }

    async fn generate_study_aid(
        &self,
        region: Region,
        section: Section,
        request: GenerationRequest,
        label: &str,
    ) -> Result<(), GenerationError> {
        let token = self.tokens.begin(region);
        self.send(DisplayCommand::SetSectionVisible {
            section,
            visible: true,
        })
        .await;
        self.send(DisplayCommand::ReplaceRegion {
            region,
            markup: String::new(),
        })
        .await;
        self.send(DisplayCommand::SetBusy { region, busy: true })
            .await;

        let result = self
            .run_stream(&token, request, true, |text| DisplayCommand::ReplaceRegion {
                region,
                markup: page_markup(text),
            })
            .await;

        let outcome = match result {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(error = %e, label, "Generation error");
                self.send_if_current(
                    &token,
                    DisplayCommand::ShowError {
                        region,
                        message: format!("Error generating {label}: {e}"),
                    },
                )
                .await;
                Err(e.into())
            }
        };

        self.send_if_current(&token, DisplayCommand::SetBusy { region, busy: false })
            .await;
        outcome
    }

    /// Consumes one completion stream on behalf of `token`.
    ///
    /// `render` turns the accumulated text into the command to emit after each
    /// delta. Returns the full text on completion, or `None` once the token
    /// has been superseded, in which case the stream is dropped unread.
    async fn run_stream<F>(
        &self,
        token: &GenerationToken,
        request: GenerationRequest,
        clear_busy_on_first_delta: bool,
        mut render: F,
    ) -> Result<Option<String>, StreamError>
    where
        F: FnMut(&str) -> DisplayCommand + Send,
    {
        let mut stream = self.llm_client.stream_completion(&request).await?;
        let mut accumulated = String::new();

        while let Some(event) = stream.next().await {
            if !self.tokens.is_current(token) {
                debug!(region = ?token.region(), "Stream superseded; dropping it");
                return Ok(None);
            }
            match event? {
                StreamEvent::Delta(delta) => {
                    if accumulated.is_empty() && clear_busy_on_first_delta {
                        self.send(DisplayCommand::SetBusy {
                            region: token.region(),
                            busy: false,
                        })
                        .await;
                    }
                    accumulated.push_str(&delta);
                    self.send(render(&accumulated)).await;
                }
                StreamEvent::Completed(full_text) => return Ok(Some(full_text)),
            }
        }

        Err(StreamError::Body(
            "stream ended without a completion".to_string(),
        ))
    }

    fn persist_outline(&self, topic: String, outline: String, total_lessons: usize) {
        let store = self.store.clone();
        let display_tx = self.display_tx.clone();
        let state = self.state.clone();
        tokio::spawn(
            async move {
                send_display(&display_tx, save_status("Saving...")).await;
                match store.create_course(&topic, &outline, total_lessons).await {
                    Ok(course_id) => {
                        {
                            let mut state = state.lock().await;
                            if state.outline_html == outline {
                                state.active_course = Some(course_id.clone());
                            }
                        }
                        info!(course_id = %course_id, "Course saved");
                        send_display(&display_tx, save_status("Saved")).await;
                        send_display(&display_tx, DisplayCommand::CourseSaved { course_id }).await;
                        send_display(&display_tx, DisplayCommand::HistoryChanged).await;
                    }
                    Err(e) => {
                        error!(error = ?e, "Error saving course");
                        send_display(&display_tx, save_status("Save Failed")).await;
                    }
                }
            }
            .in_current_span(),
        );
    }

    async fn lesson_snapshot(&self) -> Option<LessonContext> {
        let state = self.state.lock().await;
        state.lesson.is_ready().then(|| state.lesson.clone())
    }

    async fn reject(&self, region: Region, message: &str) -> Result<(), GenerationError> {
        warn!(?region, message, "Rejected action");
        self.send(DisplayCommand::ShowNotice {
            region,
            message: message.to_string(),
        })
        .await;
        Err(GenerationError::validation(message))
    }

    async fn send(&self, command: DisplayCommand) {
        send_display(&self.display_tx, command).await;
    }

    async fn send_if_current(&self, token: &GenerationToken, command: DisplayCommand) {
        if self.tokens.is_current(token) {
            self.send(command).await;
        }
    }
}

async fn send_display(display_tx: &mpsc::Sender<DisplayCommand>, command: DisplayCommand) {
    if display_tx.send(command).await.is_err() {
        warn!("Failed to send display command: receiver dropped.");
    }
}

fn save_status(status: &str) -> DisplayCommand {
    DisplayCommand::SaveStatus {
        status: status.to_string(),
    }
}

fn page_markup(text: &str) -> String {
    format!(
        r#"<div class="page-content">{}</div>"#,
        markup::render(text, Variant::InlineFlow)
    )
}

fn lesson_markup(text: &str, with_cursor: bool) -> String {
    format!(
        r#"<div class="page-content pt-12">{}</div>{}"#,
        markup::render(text, Variant::InlineFlow),
        if with_cursor { CURSOR_MARKUP } else { "" }
    )
}
