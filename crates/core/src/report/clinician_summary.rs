//! Structured clinician summary: response schema, parsing and markdown rendering.

use crate::{IntakeError, IntakeResult};
use serde_json::{json, Value};

const REVIEW_BANNER: &str = "AI-assisted draft — clinician review required.";
const EMPTY_SECTION: &str = "—";

const PLAN_SECTIONS: [(&str, &str); 5] = [
    ("Hands-on", "handsOn"),
    ("Movement / load", "movementLoad"),
    ("Education", "education"),
    ("Self-care", "selfCare"),
    ("Reassess", "reassess"),
];

/// The strict JSON-schema response format sent with clinician summary requests.
pub fn response_format() -> Value {
    let string_list = json!({ "type": "array", "items": { "type": "string" } });
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "clinician_summary",
            "strict": true,
            "schema": {
                "type": "object",
                "additionalProperties": false,
                "required": [
                    "presentingSnapshot",
                    "workingHypothesis",
                    "differentials",
                    "plan",
                    "referralTriggers"
                ],
                "properties": {
                    "presentingSnapshot": { "type": "string" },
                    "workingHypothesis": { "type": "string" },
                    "differentials": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["name", "rationale"],
                            "properties": {
                                "name": { "type": "string" },
                                "rationale": { "type": "string" }
                            }
                        }
                    },
                    "plan": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["handsOn", "movementLoad", "education", "selfCare", "reassess"],
                        "properties": {
                            "handsOn": string_list,
                            "movementLoad": string_list,
                            "education": string_list,
                            "selfCare": string_list,
                            "reassess": string_list
                        }
                    },
                    "referralTriggers": string_list
                }
            }
        }
    })
}

/// Parse model output as a clinician summary.
///
/// The whole text is tried first; failing that, the span from the first `{` to the last `}`.
///
/// # Errors
///
/// Returns `MalformedResponse` if no JSON object can be parsed or it lacks the required shape.
pub fn parse(raw: &str) -> IntakeResult<Value> {
    let parsed = match serde_json::from_str::<Value>(raw) {
        Ok(v) => v,
        Err(_) => {
            let span = match (raw.find('{'), raw.rfind('}')) {
                (Some(first), Some(last)) if last > first => &raw[first..=last],
                _ => {
                    return Err(IntakeError::MalformedResponse(
                        "clinician summary is not valid JSON".into(),
                    ))
                }
            };
            serde_json::from_str(span).map_err(|e| {
                IntakeError::MalformedResponse(format!("clinician summary JSON: {e}"))
            })?
        }
    };

    if !has_required_shape(&parsed) {
        return Err(IntakeError::MalformedResponse(
            "clinician summary does not match the expected schema".into(),
        ));
    }
    Ok(parsed)
}

fn has_required_shape(v: &Value) -> bool {
    v.get("presentingSnapshot").is_some_and(Value::is_string)
        && v.get("workingHypothesis").is_some_and(Value::is_string)
        && v.get("differentials").is_some_and(Value::is_array)
        && v.get("plan").is_some_and(Value::is_object)
        && v.get("referralTriggers").is_some_and(Value::is_array)
}

/// Render a parsed summary as markdown under a review banner.
pub fn render_markdown(summary: &Value) -> String {
    let mut lines: Vec<String> = vec![REVIEW_BANNER.into(), String::new()];

    let prose = |key: &str| {
        summary
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(EMPTY_SECTION)
            .to_owned()
    };

    lines.push("## Presenting Snapshot".into());
    lines.push(prose("presentingSnapshot"));
    lines.push(String::new());
    lines.push("## Working Hypothesis".into());
    lines.push(prose("workingHypothesis"));
    lines.push(String::new());

    lines.push("## Differentials".into());
    match summary.get("differentials").and_then(Value::as_array) {
        Some(items) if !items.is_empty() => {
            for d in items {
                let name = trimmed(d.get("name"));
                let rationale = trimmed(d.get("rationale"));
                match (name.is_empty(), rationale.is_empty()) {
                    (false, false) => lines.push(format!("- **{name}**: {rationale}")),
                    (false, true) => lines.push(format!("- **{name}**")),
                    _ => {}
                }
            }
        }
        _ => lines.push(EMPTY_SECTION.into()),
    }
    lines.push(String::new());

    lines.push("## Plan".into());
    let plan = summary.get("plan");
    for (title, key) in PLAN_SECTIONS {
        lines.push(format!("### {title}"));
        push_bullets(&mut lines, plan.and_then(|p| p.get(key)));
        lines.push(String::new());
    }

    lines.push("## Referral Triggers".into());
    push_bullets(&mut lines, summary.get("referralTriggers"));
    lines.push(String::new());

    lines.join("\n")
}

fn trimmed(value: Option<&Value>) -> &str {
    value.and_then(Value::as_str).map(str::trim).unwrap_or("")
}

fn push_bullets(lines: &mut Vec<String>, items: Option<&Value>) {
    match items.and_then(Value::as_array) {
        Some(items) if !items.is_empty() => {
            for item in items {
                let text = trimmed(Some(item));
                if !text.is_empty() {
                    lines.push(format!("- {text}"));
                }
            }
        }
        _ => lines.push(EMPTY_SECTION.into()),
    }
}
