use serde_json::Value;

use crate::error::FailureCause;

/// Label recorded when the service answered without a usable classification.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Label the presentation layer shows for a failed detection. Never stored in
/// history.
pub const FAILED_LABEL: &str = "Detection failed";

/// Response fields that may carry the label, in priority order.
pub const LABEL_FIELDS: [&str; 3] = ["color", "detected_color", "dominant_color"];

/// Result of one submitted frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassificationOutcome {
    Success { label: String },
    Unknown,
    Failure { cause: FailureCause },
}

impl ClassificationOutcome {
    /// Classify a raw label string.
    ///
    /// Blank labels and the sentinel strings collapse to `Unknown`.
    pub fn from_label(label: &str) -> Self {
        if is_reportable_label(label) {
            ClassificationOutcome::Success {
                label: label.trim().to_string(),
            }
        } else {
            ClassificationOutcome::Unknown
        }
    }

    /// Map a 2xx response body to an outcome.
    ///
    /// The first of `LABEL_FIELDS` holding a non-blank string wins. Bodies
    /// that are not JSON objects, or carry none of the fields, are `Unknown`.
    pub fn from_response_body(body: &str) -> Self {
        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(err) => {
                log::debug!("detect: response is not json: {}", err);
                return ClassificationOutcome::Unknown;
            }
        };
        LABEL_FIELDS
            .iter()
            .filter_map(|field| value.get(field).and_then(Value::as_str))
            .find(|label| !label.trim().is_empty())
            .map(Self::from_label)
            .unwrap_or(ClassificationOutcome::Unknown)
    }

    pub fn failure(cause: FailureCause) -> Self {
        ClassificationOutcome::Failure { cause }
    }
}

/// True for labels that may be shown as a detection and kept in history.
pub fn is_reportable_label(label: &str) -> bool {
    let trimmed = label.trim();
    !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case(UNKNOWN_LABEL) && trimmed != FAILED_LABEL
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(label: &str) -> ClassificationOutcome {
        ClassificationOutcome::Success {
            label: label.to_string(),
        }
    }

    #[test]
    fn picks_fields_in_priority_order() {
        assert_eq!(
            ClassificationOutcome::from_response_body(r#"{"dominant_color":"blue"}"#),
            success("blue")
        );
        assert_eq!(
            ClassificationOutcome::from_response_body(
                r#"{"detected_color":"Green","dominant_color":"blue"}"#
            ),
            success("Green")
        );
        assert_eq!(
            ClassificationOutcome::from_response_body(
                r#"{"color":"Brown","detected_color":"Green","pixel_count":4100}"#
            ),
            success("Brown")
        );
    }

    #[test]
    fn empty_or_missing_fields_are_unknown() {
        assert_eq!(
            ClassificationOutcome::from_response_body("{}"),
            ClassificationOutcome::Unknown
        );
        assert_eq!(
            ClassificationOutcome::from_response_body("not json"),
            ClassificationOutcome::Unknown
        );
        assert_eq!(
            ClassificationOutcome::from_response_body(r#"["color"]"#),
            ClassificationOutcome::Unknown
        );
    }

    #[test]
    fn blank_or_non_string_field_falls_through() {
        assert_eq!(
            ClassificationOutcome::from_response_body(r#"{"color":"","dominant_color":"blue"}"#),
            success("blue")
        );
        assert_eq!(
            ClassificationOutcome::from_response_body(r#"{"color":7,"detected_color":"Yellow"}"#),
            success("Yellow")
        );
    }

    #[test]
    fn sentinel_labels_collapse_to_unknown() {
        assert_eq!(
            ClassificationOutcome::from_response_body(r#"{"detected_color":"Unknown"}"#),
            ClassificationOutcome::Unknown
        );
        assert_eq!(
            ClassificationOutcome::from_label("unknown"),
            ClassificationOutcome::Unknown
        );
        assert_eq!(
            ClassificationOutcome::from_label("Detection failed"),
            ClassificationOutcome::Unknown
        );
        assert_eq!(
            ClassificationOutcome::from_label("  Blue Card "),
            success("Blue Card")
        );
    }
}
