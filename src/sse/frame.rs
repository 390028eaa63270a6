//! `text/event-stream` wire format.

use std::time::Duration;

/// Lines of `text` under any of the three event-stream line terminators.
fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.split("\r\n").flat_map(|part| part.split(['\r', '\n']))
}

/// Single-line field value; line breaks would start a new field.
fn push_field(text: &mut String, name: &str, value: &str) {
    text.push_str(name);
    text.push_str(": ");
    text.extend(value.chars().filter(|c| !matches!(c, '\r' | '\n')));
    text.push('\n');
}

/// Serialize a message event.
///
/// Multi-line messages become one `data:` line per line, splitting on CRLF,
/// lone CR and LF alike. Line breaks inside `id` or `event` are removed.
pub fn data_text(message: &str, event: Option<&str>, id: Option<&str>) -> String {
    let mut text = String::with_capacity(message.len() + 16);
    if let Some(id) = id {
        push_field(&mut text, "id", id);
    }
    if let Some(event) = event {
        push_field(&mut text, "event", event);
    }
    for line in lines(message) {
        push_field(&mut text, "data", line);
    }
    text.push('\n');
    text
}

/// Serialize a comment, ignored by clients but useful as a keep-alive.
pub fn comment_text(comment: &str) -> String {
    let mut text = String::with_capacity(comment.len() + 4);
    for line in lines(comment) {
        text.push_str(": ");
        text.push_str(line);
        text.push('\n');
    }
    text.push('\n');
    text
}

/// Serialize a reconnect delay instruction.
pub fn retry_text(delay: Duration) -> String {
    format!("retry: {}\n\n", delay.as_millis())
}
