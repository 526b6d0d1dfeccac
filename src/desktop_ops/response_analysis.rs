//! Response analysis for the Desktop Ops loop.
//!
//! When a model turn carries no tool calls the loop has to decide what the
//! text means. Checks run in this order:
//! 1. explicit completion marker ([`is_done`])
//! 2. "task appears complete" heuristic ([`appears_complete`])
//! 3. clarification request ([`extract_question`])
//!
//! Anything else is either a GUIDE-mode stop or a nudge.

/// Nudges issued before the loop gives up and stops.
pub const MAX_NUDGES: u32 = 3;

/// System instruction sent when the model neither acts nor finishes.
pub const NUDGE_MESSAGE: &str = "You must either call a tool to make progress or reply with \
DONE and a brief completion summary. Do not describe what you would do; do it.";

const DONE_PREFIXES: &[&str] = &["DONE", "COMPLETE", "FINISHED"];

const DONE_PHRASES: &[&str] = &[
    "task complete",
    "task completed",
    "task is complete",
    "task has been completed",
    "all done",
];

const CLARIFY_MARKERS: &[&str] = &["QUESTION:", "CLARIFY:", "NEED INPUT:"];

/// The model offering a follow-up instead of acting.
const NEXT_STEP_PHRASES: &[&str] = &[
    "anything else",
    "would you like",
    "do you want",
    "shall i",
    "should i",
    "next step",
    "what's next",
    "what else",
    "can i help",
];

/// The model reporting that the work already happened.
const SUCCESS_PHRASES: &[&str] = &[
    "successfully",
    "has been created",
    "have been created",
    "was created",
    "is now",
    "completed",
    "finished",
    "all set",
    "is ready",
    "passed",
];

/// Explicit completion marker: leading `DONE` / `COMPLETE` / `FINISHED`,
/// or a "task complete" phrase anywhere.
pub fn is_done(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    let upper = trimmed.to_uppercase();
    if DONE_PREFIXES.iter().any(|p| upper.starts_with(p)) {
        return true;
    }
    let lower = trimmed.to_lowercase();
    DONE_PHRASES.iter().any(|p| lower.contains(p))
}

/// Heuristic completion: at least one tool call already succeeded, the text
/// ends in a question mark, and it offers a next step or reports success.
///
/// Catches "I've created notes.txt successfully. Anything else?" so the run
/// is not spent asking the operator questions after the work is done.
pub fn appears_complete(text: &str, successful_calls: usize) -> bool {
    if successful_calls == 0 {
        return false;
    }
    let trimmed = text.trim();
    if !trimmed.ends_with('?') {
        return false;
    }
    let lower = trimmed.to_lowercase();
    NEXT_STEP_PHRASES.iter().any(|p| lower.contains(p))
        || SUCCESS_PHRASES.iter().any(|p| lower.contains(p))
}

/// The question to put to the operator, if the text asks one.
///
/// An explicit marker returns the text after it; otherwise a trailing `?`
/// returns the last sentence.
pub fn extract_question(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    // ASCII uppercasing keeps byte offsets aligned with `trimmed`.
    let upper = trimmed.to_ascii_uppercase();
    for marker in CLARIFY_MARKERS {
        if let Some(pos) = upper.find(marker) {
            let question = trimmed[pos + marker.len()..].trim();
            return Some(if question.is_empty() {
                trimmed.to_string()
            } else {
                question.to_string()
            });
        }
    }
    if trimmed.ends_with('?') {
        let body = &trimmed[..trimmed.len() - 1];
        let start = body
            .rfind(|c: char| matches!(c, '.' | '!' | '?' | '\n'))
            .map(|i| i + 1)
            .unwrap_or(0);
        return Some(trimmed[start..].trim().to_string());
    }
    None
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_markers() {
        assert!(is_done("DONE: wrote the file"));
        assert!(is_done("complete. all files listed"));
        assert!(is_done("Finished"));
        assert!(is_done("The task complete signal"));
        assert!(!is_done("I will now list the files"));
        assert!(!is_done(""));
    }

    #[test]
    fn test_appears_complete_requires_prior_success() {
        let text = "I created notes.txt successfully. Anything else?";
        assert!(!appears_complete(text, 0));
        assert!(appears_complete(text, 1));
    }

    #[test]
    fn test_appears_complete_requires_trailing_question() {
        assert!(!appears_complete("The file was created successfully.", 2));
        assert!(!appears_complete("Which directory do you mean?", 2));
    }

    #[test]
    fn test_extract_question_markers() {
        assert_eq!(
            extract_question("QUESTION: which branch?").as_deref(),
            Some("which branch?")
        );
        assert_eq!(
            extract_question("I need more. need input: the path").as_deref(),
            Some("the path")
        );
    }

    #[test]
    fn test_extract_question_trailing_sentence() {
        assert_eq!(
            extract_question("I looked around. Which folder should I use?").as_deref(),
            Some("Which folder should I use?")
        );
        assert_eq!(extract_question("Nothing to ask."), None);
    }
}
