//! Client intake submission.
//!
//! A submission is validated and sanitised as a whole: every rule violation is collected and
//! reported in one invalid-argument error, and nothing is written unless the submission is
//! clean. Free text is trimmed and capped but otherwise stored as given; identifier scrubbing
//! happens later, when a report is generated.

use crate::constants::DEFAULT_FORM_VERSION;
use crate::store::DocumentStore;
use crate::{IntakeError, IntakeResult};
use intake_types::Caller;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const SHORT_TEXT: usize = 120;
const MEDIUM_TEXT: usize = 280;
const LONG_TEXT: usize = 2000;
const FORM_VERSION_MAX: usize = 40;

const MARKER_VIEWS: [&str; 4] = ["front", "back", "left", "right"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakePayload {
    pub client: ClientDetails,
    pub problem: Problem,
    pub medical: Medical,
    pub lifestyle: Lifestyle,
    pub body_map: BodyMap,
    pub consent: Consent,
    #[serde(rename = "submittedAtClientISO")]
    pub submitted_at_client_iso: String,
    pub form_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDetails {
    pub full_name: String,
    pub dob: String,
    pub email: String,
    pub phone: String,
    pub under18: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian: Option<Guardian>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guardian {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub relationship: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub main_concern: String,
    pub onset: String,
    pub location_text: String,
    pub pain_now: Option<f64>,
    pub aggravators: String,
    pub easers: String,
    pub goals: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medical {
    pub conditions: String,
    pub surgeries: String,
    pub medications: String,
    pub allergies: String,
    pub checkboxes: BTreeMap<String, bool>,
    pub red_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifestyle {
    pub activity: String,
    pub weekly_load: String,
    pub sleep_hours: String,
    pub stress_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyMap {
    pub markers: Vec<BodyMarker>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyMarker {
    pub view: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    pub health_data_consent: bool,
    pub confirm_truthful: bool,
    pub contact_prefs: ContactPrefs,
    pub ai_draft_consent: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPrefs {
    pub email: bool,
    pub sms: bool,
    pub phone: bool,
}

/// Stored intake document, as written to `intakes/{intakeId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeDocument {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub created_by_uid: String,
    pub status: String,
    pub email_lower: String,
    pub form_version: String,
    #[serde(rename = "submittedAtClientISO")]
    pub submitted_at_client_iso: Option<String>,
    pub payload: IntakePayload,
}

/// Accepts intake submissions and stores them.
#[derive(Clone)]
pub struct IntakeService {
    store: Arc<dyn DocumentStore>,
}

impl IntakeService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Validate, sanitise and store a submission, returning the new intake id.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` if there is no caller.
    /// - `InvalidArgument` listing every violated rule, joined with `"; "`.
    /// - Storage errors if the document cannot be written.
    pub fn submit(&self, caller: Option<&Caller>, data: &Value) -> IntakeResult<String> {
        let caller = caller.ok_or(IntakeError::Unauthenticated)?;
        let payload = validate_and_sanitise(data)
            .map_err(|errors| IntakeError::InvalidArgument(errors.join("; ")))?;

        let document = IntakeDocument {
            created_at: self.store.now(),
            created_by_uid: caller.uid().to_owned(),
            status: "submitted".into(),
            email_lower: payload.client.email.clone(),
            form_version: payload.form_version.clone(),
            submitted_at_client_iso: Some(payload.submitted_at_client_iso.clone())
                .filter(|s| !s.is_empty()),
            payload,
        };
        let value = serde_json::to_value(&document).map_err(IntakeError::Serialization)?;
        let intake_id = self.store.create_intake(&value)?;

        tracing::info!(
            intake_id = %intake_id,
            form_version = %document.form_version,
            "intake submitted"
        );
        Ok(intake_id)
    }
}

/// Check a raw submission against the intake rules and return its sanitised form.
///
/// # Errors
///
/// Returns every violated rule, in form order.
pub fn validate_and_sanitise(data: &Value) -> Result<IntakePayload, Vec<String>> {
    let mut errors = Vec::new();
    let section = |name: &str| data.get(name).filter(|v| v.is_object());
    let client = section("client");
    let problem = section("problem");
    let medical = section("medical");
    let lifestyle = section("lifestyle");
    let body_map = section("bodyMap");
    let consent = section("consent");

    let full_name = text(client, "fullName", SHORT_TEXT);
    if full_name.is_empty() {
        errors.push("client.fullName is required".to_string());
    }
    let dob = text(client, "dob", usize::MAX);
    if !is_iso_date(&dob) {
        errors.push("client.dob is required in yyyy-mm-dd".to_string());
    }
    let email = email_lower(field(client, "email"));
    if !is_valid_email(&email) {
        errors.push("client.email is required and must be valid".to_string());
    }
    let phone = text(client, "phone", SHORT_TEXT);
    let under18 = flag(field(client, "under18"));

    let guardian_section = field(client, "guardian").filter(|v| v.is_object());
    let guardian = Guardian {
        full_name: text(guardian_section, "fullName", SHORT_TEXT),
        email: email_lower(field(guardian_section, "email")),
        phone: text(guardian_section, "phone", SHORT_TEXT),
        relationship: text(guardian_section, "relationship", SHORT_TEXT),
    };
    if under18 {
        if guardian.full_name.is_empty() {
            errors.push("guardian.fullName is required when under18".to_string());
        }
        if !is_valid_email(&guardian.email) {
            errors.push("guardian.email is required and must be valid when under18".to_string());
        }
        if guardian.phone.is_empty() {
            errors.push("guardian.phone is required when under18".to_string());
        }
    }

    let main_concern = text(problem, "mainConcern", LONG_TEXT);
    if main_concern.is_empty() {
        errors.push("problem.mainConcern is required".to_string());
    }
    let pain_now = number_or_none(field(problem, "painNow"));
    if pain_now.is_some_and(|p| !(0.0..=10.0).contains(&p)) {
        errors.push("problem.painNow must be 0..10".to_string());
    }

    let stress_score = number_or_none(field(lifestyle, "stressScore"));
    if stress_score.is_some_and(|s| !(0.0..=10.0).contains(&s)) {
        errors.push("lifestyle.stressScore must be 0..10".to_string());
    }

    let health_data_consent = flag(field(consent, "healthDataConsent"));
    let confirm_truthful = flag(field(consent, "confirmTruthful"));
    if !health_data_consent {
        errors.push("consent.healthDataConsent must be true".to_string());
    }
    if !confirm_truthful {
        errors.push("consent.confirmTruthful must be true".to_string());
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let prefs = field(consent, "contactPrefs");
    let form_version = text(Some(data), "formVersion", FORM_VERSION_MAX);

    Ok(IntakePayload {
        client: ClientDetails {
            full_name,
            dob,
            email,
            phone,
            under18,
            guardian: under18.then_some(guardian),
        },
        problem: Problem {
            main_concern,
            onset: text(problem, "onset", MEDIUM_TEXT),
            location_text: text(problem, "locationText", MEDIUM_TEXT),
            pain_now,
            aggravators: text(problem, "aggravators", LONG_TEXT),
            easers: text(problem, "easers", LONG_TEXT),
            goals: text(problem, "goals", LONG_TEXT),
        },
        medical: Medical {
            conditions: text(medical, "conditions", LONG_TEXT),
            surgeries: text(medical, "surgeries", LONG_TEXT),
            medications: text(medical, "medications", LONG_TEXT),
            allergies: text(medical, "allergies", LONG_TEXT),
            checkboxes: field(medical, "checkboxes")
                .and_then(Value::as_object)
                .map(|boxes| {
                    boxes
                        .iter()
                        .map(|(k, v)| (k.clone(), flag(Some(v))))
                        .collect()
                })
                .unwrap_or_default(),
            red_flags: field(medical, "redFlags")
                .and_then(Value::as_array)
                .map(|flags| {
                    flags
                        .iter()
                        .map(|f| capped(f, MEDIUM_TEXT))
                        .filter(|f| !f.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        },
        lifestyle: Lifestyle {
            activity: text(lifestyle, "activity", MEDIUM_TEXT),
            weekly_load: text(lifestyle, "weeklyLoad", MEDIUM_TEXT),
            sleep_hours: text(lifestyle, "sleepHours", SHORT_TEXT),
            stress_score,
        },
        body_map: BodyMap {
            markers: field(body_map, "markers")
                .and_then(Value::as_array)
                .map(|markers| markers.iter().filter_map(body_marker).collect())
                .unwrap_or_default(),
        },
        consent: Consent {
            health_data_consent,
            confirm_truthful,
            contact_prefs: ContactPrefs {
                email: flag(field(prefs, "email")),
                sms: flag(field(prefs, "sms")),
                phone: flag(field(prefs, "phone")),
            },
            ai_draft_consent: flag(field(consent, "aiDraftConsent")),
        },
        submitted_at_client_iso: text(Some(data), "submittedAtClientISO", SHORT_TEXT),
        form_version: if form_version.is_empty() {
            DEFAULT_FORM_VERSION.to_string()
        } else {
            form_version
        },
    })
}

fn field<'a>(obj: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    obj.and_then(|o| o.get(key))
}

/// Trimmed string capped at `max` characters; non-strings become empty.
fn capped(value: &Value, max: usize) -> String {
    value
        .as_str()
        .map(|s| s.trim().chars().take(max).collect())
        .unwrap_or_default()
}

fn text(obj: Option<&Value>, key: &str, max: usize) -> String {
    field(obj, key).map(|v| capped(v, max)).unwrap_or_default()
}

fn email_lower(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase().chars().take(SHORT_TEXT).collect())
        .unwrap_or_default()
}

fn flag(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Bool(true)))
}

fn is_valid_email(email: &str) -> bool {
    email.contains('@') && email.contains('.')
}

fn is_iso_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// Numbers and numeric strings; blanks and anything else read as absent.
fn number_or_none(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn body_marker(marker: &Value) -> Option<BodyMarker> {
    let view = marker.get("view")?.as_str()?;
    if !MARKER_VIEWS.contains(&view) {
        return None;
    }
    let coord = |key: &str| {
        marker
            .get(key)
            .and_then(Value::as_f64)
            .filter(|c| (0.0..=1.0).contains(c))
    };
    Some(BodyMarker {
        view: view.to_owned(),
        x: coord("x")?,
        y: coord("y")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use intake_types::NonEmptyText;
    use serde_json::json;

    fn caller() -> Caller {
        Caller::new(NonEmptyText::new("client-uid").unwrap(), None)
    }

    fn submission() -> Value {
        json!({
            "client": {
                "fullName": "  Sam Example  ",
                "dob": "1988-02-29",
                "email": " Sam@Example.COM ",
                "phone": "07946095812"
            },
            "problem": { "mainConcern": "Tight calves", "painNow": "4" },
            "medical": {
                "checkboxes": { "diabetes": true, "pregnant": "no" },
                "redFlags": ["  ", "numbness", 7]
            },
            "lifestyle": { "stressScore": 3 },
            "bodyMap": { "markers": [
                { "view": "back", "x": 0.4, "y": 0.6, "label": "calf" },
                { "view": "side", "x": 0.4, "y": 0.6 }
            ] },
            "consent": {
                "healthDataConsent": true,
                "confirmTruthful": true,
                "aiDraftConsent": true,
                "contactPrefs": { "email": true, "sms": "yes" }
            },
            "submittedAtClientISO": "2025-06-01T10:00:00.000Z"
        })
    }

    #[test]
    fn test_valid_submission_is_sanitised() {
        let payload = validate_and_sanitise(&submission()).unwrap();
        assert_eq!(payload.client.full_name, "Sam Example");
        assert_eq!(payload.client.email, "sam@example.com");
        assert_eq!(payload.client.guardian, None);
        assert_eq!(payload.problem.pain_now, Some(4.0));
        assert_eq!(payload.medical.red_flags, vec!["numbness".to_string()]);
        assert_eq!(payload.medical.checkboxes.get("pregnant"), Some(&false));
        assert_eq!(payload.body_map.markers.len(), 1);
        assert_eq!(
            payload.consent.contact_prefs,
            ContactPrefs {
                email: true,
                sms: false,
                phone: false
            }
        );
        assert!(payload.consent.ai_draft_consent);
        assert_eq!(payload.form_version, "intake-v2");
    }

    #[test]
    fn test_all_violations_are_reported_together() {
        let errors = validate_and_sanitise(&json!({
            "client": { "dob": "02/29/1988", "email": "nope", "under18": true },
            "problem": { "painNow": 11 },
            "lifestyle": { "stressScore": -1 },
            "consent": {}
        }))
        .unwrap_err();
        assert_eq!(
            errors,
            vec![
                "client.fullName is required",
                "client.dob is required in yyyy-mm-dd",
                "client.email is required and must be valid",
                "guardian.fullName is required when under18",
                "guardian.email is required and must be valid when under18",
                "guardian.phone is required when under18",
                "problem.mainConcern is required",
                "problem.painNow must be 0..10",
                "lifestyle.stressScore must be 0..10",
                "consent.healthDataConsent must be true",
                "consent.confirmTruthful must be true",
            ]
        );
    }

    #[test]
    fn test_under18_requires_and_keeps_guardian() {
        let mut data = submission();
        data["client"]["under18"] = json!(true);
        data["client"]["guardian"] = json!({
            "fullName": "Alex Example",
            "email": "ALEX@example.com",
            "phone": "07700900123",
            "relationship": "Parent"
        });
        let payload = validate_and_sanitise(&data).unwrap();
        let guardian = payload.client.guardian.unwrap();
        assert_eq!(guardian.email, "alex@example.com");
        assert_eq!(guardian.relationship, "Parent");
    }

    #[test]
    fn test_long_text_is_capped() {
        let mut data = submission();
        data["problem"]["mainConcern"] = json!("a".repeat(2500));
        data["formVersion"] = json!("v".repeat(60));
        let payload = validate_and_sanitise(&data).unwrap();
        assert_eq!(payload.problem.main_concern.chars().count(), 2000);
        assert_eq!(payload.form_version.len(), 40);
    }

    #[test]
    fn test_submission_without_health_consent_creates_nothing() {
        let store = Arc::new(MemoryStore::new());
        let service = IntakeService::new(store.clone());
        let mut data = submission();
        data["consent"]["healthDataConsent"] = json!(false);

        let err = service.submit(Some(&caller()), &data).unwrap_err();
        assert!(
            matches!(&err, IntakeError::InvalidArgument(m) if m == "consent.healthDataConsent must be true")
        );
        assert_eq!(store.intake_count(), 0);
    }

    #[test]
    fn test_submission_requires_caller() {
        let service = IntakeService::new(Arc::new(MemoryStore::new()));
        let err = service.submit(None, &submission()).unwrap_err();
        assert!(matches!(err, IntakeError::Unauthenticated));
    }

    #[test]
    fn test_stored_document_shape() {
        let store = Arc::new(MemoryStore::new());
        let service = IntakeService::new(store.clone());
        let id = service.submit(Some(&caller()), &submission()).unwrap();

        let doc = store.get_intake(&id).unwrap().expect("intake stored");
        assert_eq!(doc["status"], json!("submitted"));
        assert_eq!(doc["createdByUid"], json!("client-uid"));
        assert_eq!(doc["emailLower"], json!("sam@example.com"));
        assert_eq!(doc["formVersion"], json!("intake-v2"));
        assert_eq!(doc["submittedAtClientISO"], json!("2025-06-01T10:00:00.000Z"));
        assert_eq!(doc["payload"]["problem"]["mainConcern"], json!("Tight calves"));
        assert!(doc["payload"]["client"].get("guardian").is_none());
    }
}
