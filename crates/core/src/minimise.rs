//! Reduction of an intake record to the context sent to the model.
//!
//! Only fields relevant to drafting a clinical note survive: the client becomes an anonymous
//! descriptor (age and under-18 flag), free text is scrubbed field by field, and the whole
//! projection is scrubbed again and scanned before it is handed back. A record whose projection
//! still looks identifiable is refused outright.

use crate::constants::{MAX_PLAUSIBLE_AGE, MAX_RED_FLAGS};
use crate::scrub::{scrub_text_value, scrub_value, IdentifierDetector};
use crate::{IntakeError, IntakeResult};
use chrono::{DateTime, Datelike, NaiveDate};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const MARKER_VIEWS: [&str; 4] = ["front", "back", "left", "right"];

/// The scrubbed, identifier-free projection of one intake.
///
/// Only [`minimise`] can build one, so holding a `MinimisedContext` means the identifier scan
/// has passed.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimisedContext {
    value: Value,
    serialized: String,
}

impl MinimisedContext {
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// Compact JSON, exactly as scanned.
    pub fn as_json(&self) -> &str {
        &self.serialized
    }
}

/// Result of [`minimise`], with the derived demographics for optional write-back.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimised {
    pub context: MinimisedContext,
    pub age_years: Option<u32>,
    pub under18: Option<bool>,
}

impl Minimised {
    /// Derived fields to merge back into the intake, if any are known.
    pub fn derived_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(age) = self.age_years {
            fields.insert("ageYears".into(), Value::from(age));
        }
        if let Some(under18) = self.under18 {
            fields.insert("under18".into(), Value::Bool(under18));
        }
        fields
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextDoc {
    status: String,
    form_version: String,
    client: ClientDescriptor,
    problem: ProblemSection,
    medical: MedicalSection,
    lifestyle: LifestyleSection,
    consent: ConsentFlags,
    body_map: BodyMapSection,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientDescriptor {
    label: &'static str,
    age_years: Option<u32>,
    under18: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProblemSection {
    main_concern: String,
    onset: String,
    location_text: String,
    pain_now: Option<f64>,
    aggravators: String,
    easers: String,
    goals: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MedicalSection {
    conditions: String,
    surgeries: String,
    medications: String,
    allergies: String,
    red_flags: Vec<String>,
    checkboxes: BTreeMap<String, bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LifestyleSection {
    activity: String,
    weekly_load: String,
    sleep_hours: String,
    stress_score: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsentFlags {
    health_data_consent: bool,
    confirm_truthful: bool,
    ai_draft_consent: bool,
}

#[derive(Serialize)]
struct BodyMapSection {
    markers: Vec<Marker>,
}

#[derive(Serialize)]
struct Marker {
    view: String,
    x: f64,
    y: f64,
    label: String,
}

/// Build the minimised context for `record`, computing ages relative to `today`.
///
/// # Errors
///
/// - `MalformedIntake` if the record is not a JSON object.
/// - `IdentifiersDetected` if the scrubbed projection still matches an identifier pattern.
/// - `Serialization` if the projection cannot be encoded.
pub fn minimise(
    detector: &dyn IdentifierDetector,
    record: &Value,
    today: NaiveDate,
) -> IntakeResult<Minimised> {
    if !record.is_object() {
        return Err(IntakeError::MalformedIntake(
            "intake record is not an object".into(),
        ));
    }

    let payload = payload_root(record);
    let section = |name: &str| payload.get(name).filter(|v| v.is_object());
    let client = section("client");
    let problem = section("problem");
    let medical = section("medical");
    let lifestyle = section("lifestyle");
    let consent = section("consent");
    let body_map = section("bodyMap")
        .or_else(|| problem.and_then(|p| p.get("bodyMap")).filter(|v| v.is_object()));

    let text = |obj: Option<&Value>, key: &str| scrub_text_value(detector, field(obj, key));

    let age_years = match field(client, "ageYears").and_then(plausible_age) {
        Some(age) => Some(age),
        None => [
            field(client, "dob"),
            record.get("dob"),
            payload.get("dob"),
        ]
        .into_iter()
        .flatten()
        .find(|v| !v.is_null())
        .and_then(parse_dob)
        .and_then(|dob| age_on(dob, today)),
    };
    let under18 = match field(client, "under18") {
        Some(Value::Bool(b)) => Some(*b),
        _ => age_years.map(|age| age < 18),
    };

    let doc = ContextDoc {
        status: non_empty_str(record.get("status"))
            .unwrap_or("submitted")
            .to_owned(),
        form_version: non_empty_str(record.get("formVersion"))
            .or_else(|| non_empty_str(payload.get("formVersion")))
            .unwrap_or("unknown")
            .to_owned(),
        client: ClientDescriptor {
            label: "client",
            age_years,
            under18,
        },
        problem: ProblemSection {
            main_concern: text(problem, "mainConcern"),
            onset: text(problem, "onset"),
            location_text: text(problem, "locationText"),
            pain_now: field(problem, "painNow").and_then(Value::as_f64),
            aggravators: text(problem, "aggravators"),
            easers: text(problem, "easers"),
            goals: text(problem, "goals"),
        },
        medical: MedicalSection {
            conditions: text(medical, "conditions"),
            surgeries: text(medical, "surgeries"),
            medications: text(medical, "medications"),
            allergies: text(medical, "allergies"),
            red_flags: field(medical, "redFlags")
                .and_then(Value::as_array)
                .map(|flags| {
                    flags
                        .iter()
                        .filter_map(Value::as_str)
                        .take(MAX_RED_FLAGS)
                        .map(|f| detector.scrub(f))
                        .collect()
                })
                .unwrap_or_default(),
            checkboxes: field(medical, "checkboxes")
                .and_then(Value::as_object)
                .map(|boxes| {
                    boxes
                        .iter()
                        .filter_map(|(k, v)| v.as_bool().map(|b| (k.clone(), b)))
                        .collect()
                })
                .unwrap_or_default(),
        },
        lifestyle: LifestyleSection {
            activity: text(lifestyle, "activity"),
            weekly_load: text(lifestyle, "weeklyLoad"),
            sleep_hours: text(lifestyle, "sleepHours"),
            stress_score: field(lifestyle, "stressScore").and_then(Value::as_f64),
        },
        consent: ConsentFlags {
            health_data_consent: truthy(field(consent, "healthDataConsent")),
            confirm_truthful: truthy(field(consent, "confirmTruthful")),
            ai_draft_consent: truthy(field(consent, "aiDraftConsent")),
        },
        body_map: BodyMapSection {
            markers: field(body_map, "markers")
                .and_then(Value::as_array)
                .map(|markers| {
                    markers
                        .iter()
                        .filter_map(|m| valid_marker(detector, m))
                        .collect()
                })
                .unwrap_or_default(),
        },
    };

    let value = serde_json::to_value(&doc).map_err(IntakeError::Serialization)?;
    let value = scrub_value(detector, value);
    let serialized = serde_json::to_string(&value).map_err(IntakeError::Serialization)?;
    if detector.contains_identifiers(&serialized) {
        return Err(IntakeError::IdentifiersDetected);
    }

    Ok(Minimised {
        context: MinimisedContext { value, serialized },
        age_years,
        under18,
    })
}

/// The object holding the intake sections: `payload`, legacy `data`, or the record itself.
fn payload_root(record: &Value) -> &Value {
    ["payload", "data"]
        .into_iter()
        .filter_map(|k| record.get(k))
        .find(|v| v.is_object())
        .unwrap_or(record)
}

fn field<'a>(obj: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    obj.and_then(|o| o.get(key))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

fn truthy(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Bool(true)))
}

fn plausible_age(value: &Value) -> Option<u32> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n <= MAX_PLAUSIBLE_AGE)
}

/// Accepts `YYYY-MM-DD`, an RFC 3339 timestamp, or a stored timestamp object with
/// `seconds`/`_seconds`.
fn parse_dob(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| {
                    DateTime::parse_from_rfc3339(s)
                        .ok()
                        .map(|dt| dt.date_naive())
                })
        }
        Value::Object(obj) => {
            let secs = obj
                .get("seconds")
                .or_else(|| obj.get("_seconds"))
                .and_then(Value::as_i64)?;
            DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
        }
        _ => None,
    }
}

/// Whole years between `dob` and `today`, or `None` outside `0..=120`.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> Option<u32> {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    u32::try_from(age).ok().filter(|a| *a <= MAX_PLAUSIBLE_AGE)
}

fn valid_marker(detector: &dyn IdentifierDetector, marker: &Value) -> Option<Marker> {
    let view = marker.get("view")?.as_str()?;
    if !MARKER_VIEWS.contains(&view) {
        return None;
    }
    let coord = |key: &str| {
        marker
            .get(key)
            .and_then(Value::as_f64)
            .filter(|c| (0.0..=1.0).contains(c))
            .map(|c| (c * 1000.0).round() / 1000.0)
    };
    Some(Marker {
        view: view.to_owned(),
        x: coord("x")?,
        y: coord("y")?,
        label: scrub_text_value(detector, marker.get("label")),
    })
}
