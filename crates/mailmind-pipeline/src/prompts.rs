//! Prompt assembly for the three artifact kinds. Each processor sends a
//! single structured system message; the expansion on the server side is
//! opaque to the core.

use mailmind_core::types::{MessageHeader, Summary};

const MAX_BODY_CHARS: usize = 24_000;

fn header_block(header: &MessageHeader) -> String {
    format!(
        "From: {}\nTo: {}\nSubject: {}\nFolder: {}",
        header.author,
        header.recipients.join(", "),
        header.subject,
        header.folder
    )
}

fn clipped_body(body: &str) -> &str {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Summary request: asks for the labelled sections the parser expects.
pub fn summary_prompt(header: &MessageHeader, body: &str, user_kb: &str) -> String {
    format!(
        "Summarize the email below for its recipient.\n\
         Respond with exactly these labelled sections:\n\
         Todos: <action items, one per line, or none>\n\
         Two-line summary: <at most two lines>\n\
         Detailed summary: <a short paragraph>\n\
         Reminder due date: <YYYY-MM-DD or none>\n\
         Reminder due time: <HH:MM or none>\n\
         Reminder content: <reminder text or none>\n\n\
         What is known about the user:\n{user_kb}\n\n\
         {header}\n\n{body}",
        user_kb = user_kb,
        header = header_block(header),
        body = clipped_body(body),
    )
}

/// Action request: classify against the user's rules document.
pub fn action_prompt(header: &MessageHeader, body: &str, action_rules: &str) -> String {
    format!(
        "Classify the email below using the user's rules.\n\
         Respond with exactly these labelled sections:\n\
         Action: <reply|archive|delete|none>\n\
         Justification: <one sentence>\n\n\
         User rules:\n{rules}\n\n{header}\n\n{body}",
        rules = action_rules,
        header = header_block(header),
        body = clipped_body(body),
    )
}

/// Reply request: draft a reply, optionally informed by the cached
/// summary of the same message.
pub fn reply_prompt(
    header: &MessageHeader,
    body: &str,
    user_kb: &str,
    sibling_summary: Option<&Summary>,
) -> String {
    let summary_block = sibling_summary
        .map(|s| format!("Existing summary of this email:\n{}\n\n", s.blurb))
        .unwrap_or_default();
    format!(
        "Draft a reply to the email below, written as the recipient.\n\
         Respond with the reply body only.\n\n\
         What is known about the user:\n{user_kb}\n\n\
         {summary_block}{header}\n\n{body}",
        user_kb = user_kb,
        summary_block = summary_block,
        header = header_block(header),
        body = clipped_body(body),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailmind_core::types::Fingerprint;

    fn header() -> MessageHeader {
        MessageHeader {
            id: "1".to_string(),
            message_id: "<m@x>".to_string(),
            folder: "INBOX".to_string(),
            subject: "Quarterly numbers".to_string(),
            author: "kim@example.com".to_string(),
            recipients: vec!["me@example.com".to_string()],
            date_ms: 0,
        }
    }

    #[test]
    fn summary_prompt_carries_labels_and_body() {
        let p = summary_prompt(&header(), "body text", "- Works at Acme.");
        assert!(p.contains("Two-line summary:"));
        assert!(p.contains("Quarterly numbers"));
        assert!(p.contains("body text"));
        assert!(p.contains("Works at Acme"));
    }

    #[test]
    fn reply_prompt_includes_sibling_blurb() {
        let s = Summary {
            blurb: "Numbers look fine.".to_string(),
            detailed: String::new(),
            todos: String::new(),
            reminder: None,
            id: Fingerprint::from_raw("abc"),
        };
        let p = reply_prompt(&header(), "body", "", Some(&s));
        assert!(p.contains("Numbers look fine."));
    }

    #[test]
    fn oversized_body_is_clipped() {
        let body = "x".repeat(MAX_BODY_CHARS + 500);
        let p = action_prompt(&header(), &body, "rules");
        assert!(p.len() < body.len() + 1_000);
    }
}
