//! Parser for exported bubble transcripts.
//!
//! A transcript is a sequence of messages, each introduced by a header line
//! `Author Name Weekday, Month D, YYYY H:MM AM|PM` and followed by one or
//! more content lines.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::engines::ImportedMessage;
use crate::error::EngineError;

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<author>.+?)\s+(?:Monday|Tuesday|Wednesday|Thursday|Friday|Saturday|Sunday),\s+(?P<date>[A-Z][a-z]+ \d{1,2}, \d{4} \d{1,2}:\d{2} [AP]M)\s*$",
    )
    .unwrap()
});

const DATE_FORMAT: &str = "%B %d, %Y %I:%M %p";

struct Pending {
    author_name: String,
    date: chrono::DateTime<chrono::Utc>,
    lines: Vec<String>,
}

impl Pending {
    fn finish(self) -> Option<ImportedMessage> {
        let content = self.lines.join("\n").trim().to_string();
        (!content.is_empty()).then_some(ImportedMessage {
            author_name: self.author_name,
            date: self.date,
            content,
        })
    }
}

/// Split a transcript into messages. Headers without content are skipped.
pub fn parse_transcript(text: &str) -> Result<Vec<ImportedMessage>, EngineError> {
    let mut messages = Vec::new();
    let mut current: Option<Pending> = None;

    for (line_no, line) in text.lines().enumerate() {
        if let Some(caps) = HEADER.captures(line) {
            let raw_date = &caps["date"];
            let date = NaiveDateTime::parse_from_str(raw_date, DATE_FORMAT)
                .map_err(|e| {
                    EngineError::InvalidInput(format!("line {}: bad date `{raw_date}`: {e}", line_no + 1))
                })?
                .and_utc();
            if let Some(done) = current.take().and_then(Pending::finish) {
                messages.push(done);
            }
            current = Some(Pending {
                author_name: caps["author"].trim().to_string(),
                date,
                lines: Vec::new(),
            });
            continue;
        }

        match current.as_mut() {
            Some(pending) => pending.lines.push(line.to_string()),
            None if line.trim().is_empty() => {}
            None => {
                return Err(EngineError::InvalidInput(format!(
                    "line {}: content before the first message header",
                    line_no + 1
                )));
            }
        }
    }

    if let Some(done) = current.and_then(Pending::finish) {
        messages.push(done);
    }
    if messages.is_empty() {
        return Err(EngineError::InvalidInput("no messages found".into()));
    }
    Ok(messages)
}
