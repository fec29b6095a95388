//! Parsers for the structured text responses the artifact prompts ask
//! for. Responses that don't carry the expected labels are parse errors;
//! parse errors are never cached.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use mailmind_core::types::{ActionVerdict, Classification, Fingerprint, ReminderNote, Summary};
use mailmind_core::MailmindError;

static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}:\d{2}$").unwrap());

const SUMMARY_LABELS: &[&str] = &[
    "Todos:",
    "Two-line summary:",
    "Detailed summary:",
    "Reminder due date:",
    "Reminder due time:",
    "Reminder content:",
];

/// Split a labelled response into `(label, content)` sections. A label
/// only counts at the start of a line; content runs to the next label.
fn sections<'a>(text: &'a str, labels: &[&'a str]) -> Vec<(&'a str, String)> {
    let mut out: Vec<(&str, String)> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        let hit = labels.iter().find(|l| {
            trimmed
                .get(..l.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(l))
        });
        match hit {
            Some(label) => {
                let rest = trimmed[label.len()..].trim().to_string();
                out.push((*label, rest));
            }
            None => {
                if let Some((_, content)) = out.last_mut() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(trimmed);
                }
            }
        }
    }
    out
}

fn section(parsed: &[(&str, String)], label: &str) -> String {
    parsed
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, c)| c.trim().to_string())
        .unwrap_or_default()
}

fn is_none_token(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("none")
}

/// Parse a summary response.
///
/// Todo items are re-bulleted with `•` (one per line, trailing period
/// stripped). A reminder exists only when `Reminder content:` is present
/// and not the literal "none". A malformed due date is preserved verbatim
/// with a warning rather than dropped.
pub fn parse_summary(text: &str, fp: &Fingerprint) -> Result<Summary, MailmindError> {
    let parsed = sections(text, SUMMARY_LABELS);
    if parsed.is_empty() {
        return Err(MailmindError::Parse(
            "summary response has no recognized sections".to_string(),
        ));
    }

    let blurb = section(&parsed, "Two-line summary:");
    let detailed = section(&parsed, "Detailed summary:");
    let todos = bulletize(&section(&parsed, "Todos:"));

    if blurb.is_empty() && detailed.is_empty() && todos.is_empty() {
        return Err(MailmindError::Parse("summary response is empty".to_string()));
    }

    let reminder_content = section(&parsed, "Reminder content:");
    let reminder = if is_none_token(&reminder_content) {
        None
    } else {
        let raw_date = section(&parsed, "Reminder due date:");
        let due_date = if is_none_token(&raw_date) {
            None
        } else {
            if !DATE_RE.is_match(&raw_date) {
                warn!(fp = %fp, date = %raw_date, "reminder due date not YYYY-MM-DD, keeping verbatim");
            }
            Some(raw_date)
        };
        let raw_time = section(&parsed, "Reminder due time:");
        let due_time = if is_none_token(&raw_time) {
            None
        } else {
            if !TIME_RE.is_match(&raw_time) {
                warn!(fp = %fp, time = %raw_time, "reminder due time not HH:MM, keeping verbatim");
            }
            Some(raw_time)
        };
        Some(ReminderNote {
            content: reminder_content,
            due_date,
            due_time,
        })
    };

    Ok(Summary {
        blurb,
        detailed,
        todos,
        reminder,
        id: fp.clone(),
    })
}

/// `Foo.\nBar` -> `• Foo\n• Bar`.
fn bulletize(todos: &str) -> String {
    if is_none_token(todos) {
        return String::new();
    }
    todos
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("none"))
        .map(|l| {
            let item = l
                .trim_start_matches(['-', '•', '*'])
                .trim()
                .trim_end_matches('.');
            format!("• {item}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const ACTION_LABELS: &[&str] = &["Action:", "Justification:"];

/// Parse a classification response: an `Action:` line naming one of
/// reply/archive/delete/none plus a `Justification:` section.
pub fn parse_action(text: &str) -> Result<ActionVerdict, MailmindError> {
    let parsed = sections(text, ACTION_LABELS);
    let action_raw = section(&parsed, "Action:");
    if action_raw.is_empty() {
        return Err(MailmindError::Parse(
            "action response has no Action: line".to_string(),
        ));
    }
    let classification = action_raw
        .parse::<Classification>()
        .map_err(|_| MailmindError::Parse(format!("unknown classification: {action_raw}")))?;
    Ok(ActionVerdict {
        classification,
        justification: section(&parsed, "Justification:"),
    })
}

/// A reply response is the draft body itself.
pub fn parse_reply(text: &str) -> Result<String, MailmindError> {
    let body = text.trim();
    if body.is_empty() {
        return Err(MailmindError::Parse("reply response is empty".to_string()));
    }
    Ok(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp() -> Fingerprint {
        Fingerprint::from_raw("xyz")
    }

    #[test]
    fn parses_the_standard_shape() {
        let text = "Todos: Foo.\nTwo-line summary: Bar.\nReminder due date: none\nReminder content: none";
        let s = parse_summary(text, &fp()).unwrap();
        assert_eq!(s.blurb, "Bar.");
        assert_eq!(s.detailed, "");
        assert_eq!(s.todos, "• Foo");
        assert!(s.reminder.is_none());
    }

    #[test]
    fn reminder_with_valid_date() {
        let text = "Two-line summary: B.\nReminder due date: 2030-01-02\nReminder content: Pay the invoice";
        let s = parse_summary(text, &fp()).unwrap();
        let r = s.reminder.unwrap();
        assert_eq!(r.content, "Pay the invoice");
        assert_eq!(r.due_date.as_deref(), Some("2030-01-02"));
        assert_eq!(r.due_time, None);
    }

    #[test]
    fn malformed_date_kept_verbatim() {
        let text = "Two-line summary: B.\nReminder due date: next Tuesday\nReminder content: Call Sam";
        let s = parse_summary(text, &fp()).unwrap();
        assert_eq!(s.reminder.unwrap().due_date.as_deref(), Some("next Tuesday"));
    }

    #[test]
    fn none_reminder_content_means_no_reminder() {
        let text = "Two-line summary: B.\nReminder due date: 2030-01-01\nReminder content: NONE";
        let s = parse_summary(text, &fp()).unwrap();
        assert!(s.reminder.is_none());
    }

    #[test]
    fn multi_line_todos_bulletized() {
        let text = "Todos: Reply to Kim.\nBook flights.\nTwo-line summary: B.";
        let s = parse_summary(text, &fp()).unwrap();
        assert_eq!(s.todos, "• Reply to Kim\n• Book flights");
    }

    #[test]
    fn unlabelled_response_is_parse_error() {
        let err = parse_summary("total garbage", &fp()).unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }

    #[test]
    fn action_parses_classification() {
        let v = parse_action("Action: archive\nJustification: Routine newsletter.").unwrap();
        assert_eq!(v.classification, Classification::Archive);
        assert_eq!(v.justification, "Routine newsletter.");
    }

    #[test]
    fn action_rejects_unknown_class() {
        let err = parse_action("Action: incinerate\nJustification: ...").unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }

    #[test]
    fn empty_reply_is_parse_error() {
        assert!(parse_reply("  \n ").is_err());
        assert_eq!(parse_reply("Hi Bob,\n\nSure.").unwrap(), "Hi Bob,\n\nSure.");
    }
}
