use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};

use crate::limits::*;
use crate::model::*;

/// Field name → messages, rendered as the envelope's `errors` map.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

pub const OVERLAP_MESSAGE: &str = "This callsign already has a booking during this time period";

pub fn field_error(field: &str, message: impl Into<String>) -> FieldErrors {
    let mut errors = FieldErrors::new();
    errors.insert(field.to_string(), vec![message.into()]);
    errors
}

fn push(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    errors.entry(field.to_string()).or_default().push(message.into());
}

/// Present-and-null becomes `Some(None)`; absent stays `None` via `#[serde(default)]`.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Raw booking body, shared by create (all required) and update (all optional).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingInput {
    pub cid: Option<String>,
    pub callsign: Option<String>,
    #[serde(rename = "type")]
    pub category: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub division: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub subdivision: Option<Option<String>>,
    /// Only honoured for administrators.
    pub organization_id: Option<u64>,
}

/// Shape-checked fields. `None` means "not supplied".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckedFields {
    pub cid: Option<String>,
    pub callsign: Option<String>,
    pub category: Option<BookingCategory>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub division: Option<String>,
    pub subdivision: Option<Option<String>>,
}

pub fn parse_instant(raw: &str) -> Option<Ms> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc).timestamp_millis())
}

pub fn format_instant(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn is_valid_cid(cid: &str) -> bool {
    !cid.is_empty() && cid.len() <= MAX_CID_DIGITS && cid.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_valid_callsign(callsign: &str) -> bool {
    let upper = callsign.to_ascii_uppercase();
    CALLSIGN_SUFFIXES.iter().any(|suffix| upper.ends_with(suffix))
}

/// Schema stage. With `require_all` every field except subdivision and type
/// must be present.
pub fn check_fields(input: &BookingInput, require_all: bool) -> Result<CheckedFields, FieldErrors> {
    let mut errors = FieldErrors::new();
    let mut out = CheckedFields::default();

    match input.cid.as_deref() {
        None if require_all => push(&mut errors, "cid", "CID is required"),
        None => {}
        Some(cid) if !is_valid_cid(cid) => {
            push(&mut errors, "cid", "CID must be a valid numeric VATSIM CID")
        }
        Some(cid) => out.cid = Some(cid.to_string()),
    }

    match input.callsign.as_deref().map(str::trim) {
        None if require_all => push(&mut errors, "callsign", "Callsign is required"),
        None => {}
        Some("") => push(&mut errors, "callsign", "Callsign is required"),
        Some(c) if c.len() > MAX_CALLSIGN_LEN => push(&mut errors, "callsign", "Callsign is too long"),
        Some(c) if !is_valid_callsign(c) => push(
            &mut errors,
            "callsign",
            "Callsign must end with: _DEL, _GND, _TWR, _APP, _DEP, _CTR, or _FSS",
        ),
        Some(c) => out.callsign = Some(c.to_ascii_uppercase()),
    }

    match input.category.as_deref() {
        None if require_all => out.category = Some(BookingCategory::default()),
        None => {}
        Some(raw) => match raw.parse::<BookingCategory>() {
            Ok(c) => out.category = Some(c),
            Err(_) => push(
                &mut errors,
                "type",
                "Type must be one of standard, event, exam, training",
            ),
        },
    }

    for (field, raw, slot) in [
        ("start", &input.start, &mut out.start),
        ("end", &input.end, &mut out.end),
    ] {
        match raw.as_deref() {
            None if require_all => push(&mut errors, field, format!("Invalid {field} date format")),
            None => {}
            Some(raw) => match parse_instant(raw) {
                Some(ms) => *slot = Some(ms),
                None => push(&mut errors, field, format!("Invalid {field} date format")),
            },
        }
    }

    match input.division.as_deref().map(str::trim) {
        None if require_all => push(&mut errors, "division", "Division is required"),
        None => {}
        Some("") => push(&mut errors, "division", "Division is required"),
        Some(d) if d.len() > MAX_CODE_LEN => push(&mut errors, "division", "Division is too long"),
        Some(d) => out.division = Some(d.to_string()),
    }

    match &input.subdivision {
        Some(Some(s)) if s.trim().len() > MAX_CODE_LEN => {
            push(&mut errors, "subdivision", "Subdivision is too long")
        }
        Some(Some(s)) if s.trim().is_empty() => out.subdivision = Some(None),
        Some(Some(s)) => out.subdivision = Some(Some(s.trim().to_string())),
        Some(None) => out.subdivision = Some(None),
        None => {}
    }

    if errors.is_empty() { Ok(out) } else { Err(errors) }
}

/// Time-sanity stage: `start < end` and `end` not already past.
pub fn check_times(start: Ms, end: Ms, now: Ms) -> Result<Span, FieldErrors> {
    if start >= end {
        return Err(field_error("time", "End time must be after start time"));
    }
    if end < now {
        return Err(field_error("time", "Booking end time cannot be in the past"));
    }
    Ok(Span::new(start, end))
}

/// Query string of the public booking listing.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingQuery {
    pub callsign: Option<String>,
    pub division: Option<String>,
    pub subdivision: Option<String>,
    #[serde(rename = "type")]
    pub category: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub order: Option<String>,
}

impl BookingQuery {
    pub fn into_filter(self) -> Result<BookingFilter, FieldErrors> {
        let mut errors = FieldErrors::new();
        let mut filter = BookingFilter {
            callsign: self.callsign.filter(|s| !s.is_empty()),
            division: self.division.filter(|s| !s.is_empty()),
            subdivision: self.subdivision.filter(|s| !s.is_empty()),
            ..Default::default()
        };
        if let Some(raw) = self.category {
            match raw.parse() {
                Ok(c) => filter.category = Some(c),
                Err(_) => push(&mut errors, "type", "Invalid booking type"),
            }
        }
        if let Some(raw) = self.start_date {
            match parse_instant(&raw) {
                Some(ms) => filter.start_from = Some(ms),
                None => push(&mut errors, "startDate", "Invalid datetime"),
            }
        }
        if let Some(raw) = self.end_date {
            match parse_instant(&raw) {
                Some(ms) => filter.end_until = Some(ms),
                None => push(&mut errors, "endDate", "Invalid datetime"),
            }
        }
        match self.order.as_deref() {
            None => {}
            Some("current") => filter.time = Some(TimeFilter::Current),
            Some("past") => filter.time = Some(TimeFilter::Past),
            Some("future") => filter.time = Some(TimeFilter::Future),
            Some(_) => push(&mut errors, "order", "Order must be one of current, past, future"),
        }
        if errors.is_empty() { Ok(filter) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_input() -> BookingInput {
        BookingInput {
            cid: Some("1234567".into()),
            callsign: Some("kjfk_twr".into()),
            category: None,
            start: Some("2030-01-01T10:00:00Z".into()),
            end: Some("2030-01-01T12:00:00Z".into()),
            division: Some("USA".into()),
            subdivision: None,
            organization_id: None,
        }
    }

    #[test]
    fn create_normalizes_callsign_and_defaults_type() {
        let fields = check_fields(&full_input(), true).unwrap();
        assert_eq!(fields.callsign.as_deref(), Some("KJFK_TWR"));
        assert_eq!(fields.category, Some(BookingCategory::Standard));
        assert_eq!(fields.end.unwrap() - fields.start.unwrap(), 2 * 3_600_000);
    }

    #[test]
    fn create_reports_every_missing_field() {
        let errors = check_fields(&BookingInput::default(), true).unwrap_err();
        for key in ["cid", "callsign", "start", "end", "division"] {
            assert!(errors.contains_key(key), "missing error for {key}");
        }
        assert!(!errors.contains_key("type"));
    }

    #[test]
    fn update_accepts_empty_body() {
        assert_eq!(check_fields(&BookingInput::default(), false).unwrap(), CheckedFields::default());
    }

    #[test]
    fn cid_must_be_numeric_and_short() {
        for bad in ["", "12a4", "12345678901", "-1"] {
            let input = BookingInput { cid: Some(bad.into()), ..Default::default() };
            let errors = check_fields(&input, false).unwrap_err();
            assert_eq!(errors["cid"], vec!["CID must be a valid numeric VATSIM CID"]);
        }
        assert!(is_valid_cid("1"));
        assert!(is_valid_cid("1234567890"));
    }

    #[test]
    fn callsign_suffix_is_case_insensitive() {
        assert!(is_valid_callsign("egll_app"));
        assert!(is_valid_callsign("EDGG_CTR"));
        assert!(!is_valid_callsign("KJFK_ATIS"));
        assert!(!is_valid_callsign("KJFK"));
    }

    #[test]
    fn unknown_type_is_rejected_and_alias_accepted() {
        let input = BookingInput { category: Some("party".into()), ..Default::default() };
        assert!(check_fields(&input, false).unwrap_err().contains_key("type"));
        let input = BookingInput { category: Some("booking".into()), ..Default::default() };
        assert_eq!(
            check_fields(&input, false).unwrap().category,
            Some(BookingCategory::Standard)
        );
    }

    #[test]
    fn bad_instants_are_field_errors() {
        let input = BookingInput { start: Some("tomorrow".into()), ..Default::default() };
        let errors = check_fields(&input, false).unwrap_err();
        assert_eq!(errors["start"], vec!["Invalid start date format"]);
    }

    #[test]
    fn subdivision_null_clears_absent_keeps() {
        let clear: BookingInput = serde_json::from_str(r#"{"subdivision": null}"#).unwrap();
        assert_eq!(clear.subdivision, Some(None));
        let absent: BookingInput = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.subdivision, None);
        assert_eq!(check_fields(&clear, false).unwrap().subdivision, Some(None));
    }

    #[test]
    fn time_sanity() {
        let now = 1_000_000;
        assert!(check_times(now + 10, now + 10, now).is_err());
        assert!(check_times(now + 20, now + 10, now).is_err());
        let past = check_times(now - 100, now - 1, now).unwrap_err();
        assert_eq!(past["time"], vec!["Booking end time cannot be in the past"]);
        // Ending exactly now is still acceptable.
        assert!(check_times(now - 100, now, now).is_ok());
    }

    #[test]
    fn query_parses_filters() {
        let query = BookingQuery {
            callsign: Some("KJFK".into()),
            order: Some("future".into()),
            start_date: Some("2030-01-01T00:00:00Z".into()),
            category: Some("exam".into()),
            ..Default::default()
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.time, Some(TimeFilter::Future));
        assert_eq!(filter.category, Some(BookingCategory::Exam));
        assert!(filter.start_from.is_some());

        let bad = BookingQuery { order: Some("soon".into()), ..Default::default() };
        assert!(bad.into_filter().unwrap_err().contains_key("order"));
    }

    #[test]
    fn instants_round_trip_through_rfc3339() {
        let ms = parse_instant("2030-01-01T10:00:00.250+02:00").unwrap();
        assert_eq!(format_instant(ms), "2030-01-01T08:00:00.250Z");
    }
}
