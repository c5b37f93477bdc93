use crate::models::label::Label;

/// Prompt sent alongside every image, listing the known labels.
pub fn classification_prompt() -> String {
    let labels: Vec<String> = Label::all().map(|l| l.to_string()).collect();
    format!(
        "What's in this image? Answer with exactly one of: {}. \
         If none of them fits, answer Unclassified.",
        labels.join(", ")
    )
}

/// Token the prompt asks the model to answer with when no label fits.
const UNCLASSIFIED_TOKEN: &str = "unclassified";

/// Map free-form model output onto a known label.
///
/// Output is split into lowercase alphanumeric tokens; the first token that
/// is a keyword of some label (optionally with a plural "s") wins. An
/// `Unclassified` answer before any keyword ends the match. Returns `None`
/// when nothing matches, which callers store as unclassified.
pub fn match_label(text: &str) -> Option<Label> {
    let lowered = text.to_lowercase();
    for token in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
    {
        if token == UNCLASSIFIED_TOKEN {
            return None;
        }
        if let Some(label) = label_for_token(token) {
            return Some(label);
        }
    }
    None
}

fn label_for_token(token: &str) -> Option<Label> {
    let singular = token.strip_suffix('s').unwrap_or(token);
    Label::all().find(|label| {
        label
            .keywords()
            .iter()
            .any(|kw| *kw == token || *kw == singular)
    })
}
