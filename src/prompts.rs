//! Prompts sent to the analysis model.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: the report schema the model is asked for
//!    lives next to the schema the validator enforces, in one place.
//!
//! 2. **Testability**: unit tests inspect prompts directly without a model.
//!
//! Callers can override the system prompt via
//! [`crate::config::AnalysisConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

/// JSON shape the model must return. Mirrors [`crate::output::InspectionReport`].
pub const REPORT_SCHEMA: &str = r#"{
  "summary": "1-line car condition",
  "risk_level": "Low|Medium|High|Critical",
  "issues": ["bullet points"],
  "maintenance": ["action items"],
  "recommendation": "final advice"
}"#;

/// Default system prompt, shared by the text and vision paths.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are Scanno, a senior vehicle inspection engineer.
You read vehicle inspection reports and judge how safe the vehicle is to drive.

Rules:
- Base every finding on the report content only. Do not invent defects.
- risk_level is exactly one of: Low, Medium, High, Critical.
- issues lists the defects found, one short sentence each. Use [] when there are none.
- maintenance lists the concrete actions to take, most urgent first. Use [] when there are none.
- Answer in the language the user asks in; default to English.

Output ONLY one JSON object with exactly these keys and no other text,
no markdown fences, no commentary:
{
  "summary": "1-line car condition",
  "risk_level": "Low|Medium|High|Critical",
  "issues": ["bullet points"],
  "maintenance": ["action items"],
  "recommendation": "final advice"
}"#;

/// User message for the text path.
pub fn text_prompt(report_text: &str, query: Option<&str>) -> String {
    let mut prompt = format!(
        "Analyze this vehicle inspection report and return ONLY valid JSON:\n\n{REPORT_SCHEMA}\n\nReport:\n{report_text}\n"
    );
    push_query(&mut prompt, query);
    prompt
}

/// User message accompanying the page images on the vision path.
///
/// When only the first pages of a longer document are attached the model is
/// told so, to keep it from asserting that nothing else was found.
pub fn vision_prompt(
    image_count: usize,
    total_pages: usize,
    truncated: bool,
    query: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Analyze the vehicle inspection report in the attached image{} and return ONLY valid JSON:\n\n{REPORT_SCHEMA}\n",
        if image_count == 1 { "" } else { "s" }
    );
    if truncated {
        prompt.push_str(&format!(
            "\nOnly the first {image_count} of {total_pages} pages are attached. \
             Mention in the summary that the remaining pages were not reviewed.\n"
        ));
    }
    push_query(&mut prompt, query);
    prompt
}

/// Follow-up message asking the model to re-emit a malformed answer as JSON.
pub fn repair_prompt(previous_output: &str) -> String {
    format!(
        "Your previous answer was not a single valid JSON object. \
         Re-emit the same analysis as ONLY valid JSON with exactly these keys:\n\n\
         {REPORT_SCHEMA}\n\nPrevious answer:\n\"\"\"{previous_output}\"\"\""
    )
}

fn push_query(prompt: &mut String, query: Option<&str>) {
    if let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) {
        prompt.push_str(&format!("\nUser question: {q}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_every_report_field() {
        for key in ["summary", "risk_level", "issues", "maintenance", "recommendation"] {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(key), "missing {key}");
            assert!(REPORT_SCHEMA.contains(key), "missing {key}");
        }
    }

    #[test]
    fn text_prompt_embeds_report_and_query() {
        let p = text_prompt("Brake pads 20%.", Some("Is it safe for a long trip?"));
        assert!(p.contains("Report:\nBrake pads 20%."));
        assert!(p.contains("User question: Is it safe for a long trip?"));
    }

    #[test]
    fn blank_query_is_omitted() {
        let p = text_prompt("x", Some("   "));
        assert!(!p.contains("User question"));
    }

    #[test]
    fn vision_prompt_signals_truncation() {
        let p = vision_prompt(3, 7, true, None);
        assert!(p.contains("first 3 of 7 pages"));
        assert!(p.contains("attached images"));

        let single = vision_prompt(1, 1, false, None);
        assert!(single.contains("attached image and"));
        assert!(!single.contains("pages are attached"));
    }

    #[test]
    fn repair_prompt_quotes_previous_output() {
        let p = repair_prompt("Sure! Here is the report: risk is low");
        assert!(p.contains("\"\"\"Sure! Here is the report: risk is low\"\"\""));
    }
}
