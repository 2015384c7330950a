//! Lightweight Markup Renderer
//!
//! Converts the small Markdown subset produced by the generation prompts into
//! display markup. This is not a general Markdown parser: only headings, bold,
//! inline code, bullet lines and paragraph/line breaks are recognised. Anything
//! else, including unterminated markers, passes through literally.
//!
//! Rendering is a pure function of its input. Callers re-render the whole
//! accumulated text on every streamed delta because list and paragraph
//! boundaries depend on full-text context.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static H3: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^### (.*)$").unwrap());
static H2: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^## (.*)$").unwrap());
static STRONG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[*-] (.*)$").unwrap());
static LESSON_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r##"<a href="#" class="lesson-link[^"]*" data-lesson-title="([^"]*)">"##).unwrap()
});

/// The two rendering modes of the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Lesson, notes and assessment bodies: code spans, paragraphs and line breaks.
    InlineFlow,
    /// Course outlines: every bullet becomes a progress checkbox plus a lesson selector.
    Outline,
}

/// Renders `text` with the given variant.
pub fn render(text: &str, variant: Variant) -> String {
    let (h3, h2) = match variant {
        Variant::InlineFlow => ("<h3>${1}</h3>", "<h2>${1}</h2>"),
        Variant::Outline => (
            r#"<h3 class="text-xl font-semibold mt-4 mb-2">${1}</h3>"#,
            r#"<h2 class="text-2xl font-bold mt-6 mb-3 pb-2 border-b border-[var(--border-color)]">${1}</h2>"#,
        ),
    };

    let html = H3.replace_all(text, h3);
    let html = H2.replace_all(&html, h2);
    let html = STRONG.replace_all(&html, "<strong>${1}</strong>");

    match variant {
        Variant::InlineFlow => {
            let html = CODE.replace_all(&html, "<code>${1}</code>");
            let html = LIST_ITEM.replace_all(&html, r#"<li class="ml-4">${1}</li>"#);
            html.replace("\n\n", "</p><p>").replace('\n', "<br>")
        }
        Variant::Outline => {
            let html = LIST_ITEM.replace_all(&html, |caps: &Captures| lesson_item(&caps[1]));
            format!(r#"<ul class="space-y-1">{html}</ul>"#)
        }
    }
}

fn lesson_item(title: &str) -> String {
    let key = escape_attr(title);
    format!(
        concat!(
            r#"<li class="lesson-item"><div class="flex items-center gap-3">"#,
            r#"<input type="checkbox" class="lesson-checkbox w-4 h-4 rounded" data-lesson-title="{key}">"#,
            r##"<a href="#" class="lesson-link block p-2.5 rounded-md flex-grow" data-lesson-title="{key}">{title}</a>"##,
            r#"</div></li>"#
        ),
        key = key,
        title = title,
    )
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

fn unescape_attr(value: &str) -> String {
    value.replace("&quot;", "\"").replace("&amp;", "&")
}

/// Number of lesson-selector elements in rendered outline markup.
pub fn count_lesson_links(markup: &str) -> usize {
    LESSON_LINK.find_iter(markup).count()
}

/// Identifying keys of every lesson selector, in document order.
pub fn lesson_titles(markup: &str) -> Vec<String> {
    LESSON_LINK
        .captures_iter(markup)
        .map(|caps| unescape_attr(&caps[1]))
        .collect()
}
