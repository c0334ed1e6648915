use std::sync::OnceLock;

use facture_core::NormalizeMode;
use regex::Regex;

fn re_disallowed() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"[^\w\s.,:]").expect("invalid regex"))
}

/// Clean raw OCR output into its display form.
///
/// Every whitespace run (spaces, tabs, newlines) becomes a single space and the
/// result is trimmed. In [`NormalizeMode::Strict`] symbols other than word
/// characters and `.`, `,`, `:` are dropped first, so that their removal can
/// never leave a double space behind. The function is idempotent in both modes.
pub fn normalize(raw: &str, mode: NormalizeMode) -> String {
    match mode {
        NormalizeMode::Basic => collapse_whitespace(raw),
        NormalizeMode::Strict => collapse_whitespace(&re_disallowed().replace_all(raw, "")),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
