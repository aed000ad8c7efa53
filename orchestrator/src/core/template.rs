//! Placeholder substitution for stage prompt templates.
//!
//! Only the keys in [`PromptVars`] are replaced. Any other `{...}` text,
//! including placeholders with no value, is left verbatim.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([a-z_]+)\}").expect("placeholder regex should be valid")
});

/// Values available to stage prompts.
#[derive(Debug, Clone, Default)]
pub struct PromptVars<'a> {
    pub step_num: u32,
    pub history: Option<&'a Value>,
    pub draft: Option<&'a Value>,
    pub review: Option<&'a Value>,
}

impl PromptVars<'_> {
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "step_num" => Some(self.step_num.to_string()),
            "history_json" => self.history.map(compact_json),
            "draft_json" => self.draft.map(pretty_json),
            "review_json" => self.review.map(pretty_json),
            _ => None,
        }
    }
}

/// Result of rendering one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub text: String,
    /// Placeholders left in the output because no value was available.
    pub unresolved: Vec<String>,
}

/// Substitute the known placeholders of `template` in a single pass.
///
/// Substituted values are never re-scanned, so JSON containing `{step_num}`
/// is inserted literally.
pub fn render(template: &str, vars: &PromptVars<'_>) -> RenderedPrompt {
    let mut unresolved = Vec::new();
    let mut text = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        text.push_str(&template[last..whole.start()]);
        match vars.lookup(key.as_str()) {
            Some(value) => text.push_str(&value),
            None => {
                text.push_str(whole.as_str());
                if !unresolved.iter().any(|k| k == key.as_str()) {
                    unresolved.push(key.as_str().to_string());
                }
            }
        }
        last = whole.end();
    }
    text.push_str(&template[last..]);

    RenderedPrompt { text, unresolved }
}

fn compact_json(value: &Value) -> String {
    value.to_string()
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_known_keys() {
        let history = json!([{"step": 1, "summary": "listed files"}]);
        let vars = PromptVars {
            step_num: 2,
            history: Some(&history),
            ..PromptVars::default()
        };
        let rendered = render("Step {step_num}. History: {history_json}", &vars);
        assert_eq!(
            rendered.text,
            r#"Step 2. History: [{"step":1,"summary":"listed files"}]"#
        );
        assert!(rendered.unresolved.is_empty());
    }

    #[test]
    fn leaves_unresolved_placeholders_verbatim() {
        let vars = PromptVars {
            step_num: 1,
            ..PromptVars::default()
        };
        let rendered = render("{step_num} {draft_json} {unknown} {draft_json}", &vars);
        assert_eq!(rendered.text, "1 {draft_json} {unknown} {draft_json}");
        assert_eq!(rendered.unresolved, vec!["draft_json", "unknown"]);
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let draft = json!({"thought": "use {step_num}"});
        let vars = PromptVars {
            step_num: 7,
            draft: Some(&draft),
            ..PromptVars::default()
        };
        let rendered = render("{draft_json}", &vars);
        assert!(rendered.text.contains("use {step_num}"));
        assert!(rendered.unresolved.is_empty());
    }

    #[test]
    fn literal_json_braces_in_template_survive() {
        let vars = PromptVars::default();
        let template = r#"Reply as {"commands": [{"type": "powershell", "code": "..."}]}"#;
        assert_eq!(render(template, &vars).text, template);
    }
}
