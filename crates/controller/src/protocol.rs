use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigurationError;

// ---------------------------------------------------------------------------
// Wire message types
// ---------------------------------------------------------------------------

/// Telemetry and actuator snapshot sent to the coordinator once per
/// aggregation window.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerReport {
    /// Median moisture per sensor, 0.0..=1.0.
    pub moisture: BTreeMap<String, f32>,
    /// Median temperature per probe, °C.
    pub temperature: BTreeMap<String, f32>,
    /// Tank fill level, 0..=100.
    pub tanks: BTreeMap<String, f32>,
    /// Pump name -> is on.
    pub pumps: BTreeMap<String, bool>,
    /// Valve name -> is open.
    pub valves: BTreeMap<String, bool>,
}

/// Desired actuator state returned by the coordinator. An empty value is the
/// fail-safe: every pump off, every valve closed.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instructions {
    #[serde(default)]
    pub pumps: BTreeMap<String, bool>,
    #[serde(default)]
    pub valves: BTreeMap<String, bool>,
}

impl Instructions {
    /// Instructions that turn everything off.
    pub fn fail_safe() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// `{base}/updateControllerState/{controller}` with exactly one slash at the
/// join, whether or not `base` ends in one. The controller name is always a
/// single percent-encoded path segment.
pub fn state_url(base: &str, controller: &str) -> Result<Url, ConfigurationError> {
    let mut url = Url::parse(base).map_err(|e| {
        ConfigurationError::InvalidConfiguration(format!("service_base_url '{base}': {e}"))
    })?;
    url.path_segments_mut()
        .map_err(|()| {
            ConfigurationError::InvalidConfiguration(format!(
                "service_base_url '{base}' cannot carry a path"
            ))
        })?
        .pop_if_empty()
        .extend(["updateControllerState", controller]);
    Ok(url)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- state_url ----------------------------------------------------------

    fn url(base: &str, controller: &str) -> String {
        state_url(base, controller).unwrap().to_string()
    }

    #[test]
    fn state_url_with_trailing_slash() {
        assert_eq!(
            url("http://gerty:8080/api/", "controller1"),
            "http://gerty:8080/api/updateControllerState/controller1"
        );
    }

    #[test]
    fn state_url_without_trailing_slash() {
        assert_eq!(
            url("http://gerty:8080/api", "c2"),
            "http://gerty:8080/api/updateControllerState/c2"
        );
    }

    #[test]
    fn state_url_on_bare_host() {
        assert_eq!(
            url("http://gerty:8080", "c3"),
            "http://gerty:8080/updateControllerState/c3"
        );
    }

    #[test]
    fn state_url_escapes_reserved_characters_in_name() {
        let u = state_url("http://gerty/api/", "bed#2").unwrap();
        assert_eq!(u.path(), "/api/updateControllerState/bed%232");
        assert!(u.fragment().is_none());

        let u = state_url("http://gerty/api/", "x?y").unwrap();
        assert_eq!(u.path(), "/api/updateControllerState/x%3Fy");
        assert!(u.query().is_none());

        let u = state_url("http://gerty/api/", "a/b").unwrap();
        assert_eq!(u.path(), "/api/updateControllerState/a%2Fb");
    }

    #[test]
    fn state_url_rejects_unusable_base() {
        assert!(state_url("not a url", "c").is_err());
        assert!(state_url("mailto:ops@example.com", "c").is_err());
    }

    // -- ControllerReport serialization -------------------------------------

    #[test]
    fn report_serializes_all_five_sections() {
        let mut report = ControllerReport::default();
        report.moisture.insert("moisture1".into(), 0.25);
        report.temperature.insert("temperature1".into(), 18.5);
        report.tanks.insert("tank1".into(), 75.0);
        report.pumps.insert("pump1".into(), false);
        report.valves.insert("valve1".into(), true);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 5);
        assert_eq!(json["moisture"]["moisture1"], 0.25);
        assert_eq!(json["temperature"]["temperature1"], 18.5);
        assert_eq!(json["tanks"]["tank1"], 75.0);
        assert_eq!(json["pumps"]["pump1"], false);
        assert_eq!(json["valves"]["valve1"], true);
    }

    #[test]
    fn empty_report_keeps_empty_objects() {
        let json = serde_json::to_string(&ControllerReport::default()).unwrap();
        assert_eq!(
            json,
            r#"{"moisture":{},"temperature":{},"tanks":{},"pumps":{},"valves":{}}"#
        );
    }

    // -- Instructions deserialization ---------------------------------------

    #[test]
    fn instructions_deserialize_valid() {
        let json = r#"{"pumps":{"pump1":true},"valves":{"valve1":true,"valve2":false}}"#;
        let i: Instructions = serde_json::from_str(json).unwrap();
        assert!(i.pumps["pump1"]);
        assert_eq!(i.valves.len(), 2);
    }

    #[test]
    fn instructions_missing_sections_are_empty() {
        let i: Instructions = serde_json::from_str(r#"{"pumps":{"pump1":true}}"#).unwrap();
        assert!(i.valves.is_empty());
        let i: Instructions = serde_json::from_str("{}").unwrap();
        assert_eq!(i, Instructions::fail_safe());
    }

    #[test]
    fn instructions_extra_fields_ignored() {
        let i: Instructions =
            serde_json::from_str(r#"{"pumps":{},"valves":{},"tanks":{"t":1}}"#).unwrap();
        assert!(i.pumps.is_empty());
    }

    #[test]
    fn instructions_non_bool_value_fails() {
        assert!(serde_json::from_str::<Instructions>(r#"{"pumps":{"pump1":"ON"}}"#).is_err());
    }

    #[test]
    fn instructions_not_an_object_fails() {
        assert!(serde_json::from_str::<Instructions>("[1,2,3]").is_err());
        assert!(serde_json::from_str::<Instructions>("").is_err());
    }
}
