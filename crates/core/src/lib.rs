pub mod course;
pub mod display;
pub mod error;
pub mod export;
pub mod llm_client;
pub mod markup;
pub mod preferences;
pub mod prompts;
pub mod session;
pub mod sse;

pub use display::{DisplayCommand, Region, Section};
pub use error::{GenerationError, StreamError};
pub use session::{CourseSession, SessionState};
