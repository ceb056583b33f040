//! Telemetry accumulation for one pipeline run
//!
//! Counters accumulate by `+=` and string properties are last-write-wins.
//! The pipeline never flushes; the embedding caller reads the final state
//! off the WorkItem after the run completes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Measurement names. Every classified compile-error category has a dedicated
// counter so fix-hint coverage can be tracked per category.
pub const MEASUREMENT_CODEGEN_ATTEMPT_COUNT: &str = "codegen-attempt-count";
pub const MEASUREMENT_CODEGEN_TIME_TOTAL_SEC: &str = "codegen-time-in-total-sec";
pub const MEASUREMENT_CODEGEN_PRESCAN_TIME_SEC: &str = "codegen-prescan-time-in-total-sec";
pub const MEASUREMENT_CODEGEN_GET_SAMPLE_TIME_SEC: &str = "codegen-get-sample-time-in-total-sec";
pub const MEASUREMENT_CODEGEN_BREAKDOWN_TIME_SEC: &str = "codegen-task-breakdown-time-in-total-sec";
pub const MEASUREMENT_CODEGEN_BREAKDOWN_FAILED_COUNT: &str = "codegen-task-breakdown-failed-count";

pub const MEASUREMENT_SELF_REFLECTION_ATTEMPT_COUNT: &str = "self-reflection-attempt-count";
pub const MEASUREMENT_SELF_REFLECTION_TIME_TOTAL_SEC: &str = "self-reflection-time-in-total-sec";
pub const MEASUREMENT_ERRORS_AFTER_CORRECTION: &str = "errors-after-correction";

pub const PROPERTY_CODEGEN_RESULT: &str = "codegen-result";
pub const PROPERTY_SELF_REFLECTION_SUCCEEDED: &str = "self-reflection-succeeded";
pub const PROPERTY_RELATED_SAMPLE: &str = "related-sample";

pub const MEASUREMENT_COMPILE_ERROR_PROPERTY_WITH_SUGGESTION_COUNT: &str =
    "compile-error-property-not-exist-with-suggestion-count";
pub const MEASUREMENT_COMPILE_ERROR_PROPERTY_NOT_EXIST_COUNT: &str =
    "compile-error-property-not-exist-count";
pub const MEASUREMENT_COMPILE_ERROR_NO_FUNCTION_RETURN_COUNT: &str =
    "compile-error-no-function-return-count";
pub const MEASUREMENT_COMPILE_ERROR_CANNOT_FIND_MODULE_COUNT: &str =
    "compile-error-cannot-find-module-count";
pub const MEASUREMENT_COMPILE_ERROR_ARGUMENT_COUNT_MISMATCH_COUNT: &str =
    "compile-error-argument-count-mismatch-count";
pub const MEASUREMENT_COMPILE_ERROR_ARGUMENT_TYPE_MISMATCH_COUNT: &str =
    "compile-error-argument-type-mismatch-count";
pub const MEASUREMENT_COMPILE_ERROR_OPERATOR_MISMATCH_COUNT: &str =
    "compile-error-operator-type-mismatch-count";
pub const MEASUREMENT_COMPILE_ERROR_TYPE_NOT_ASSIGNABLE_COUNT: &str =
    "compile-error-type-not-assignable-count";
pub const MEASUREMENT_COMPILE_ERROR_CONVERT_TYPE_MISTAKE_COUNT: &str =
    "compile-error-convert-type-mistake-count";
pub const MEASUREMENT_COMPILE_ERROR_OVERLOAD_MISMATCH_COUNT: &str =
    "compile-error-overload-mismatch-count";
pub const MEASUREMENT_COMPILE_ERROR_CANNOT_FIND_NAME_COUNT: &str =
    "compile-error-cannot-find-name-count";
pub const MEASUREMENT_COMPILE_ERROR_CANNOT_ASSIGN_READONLY_COUNT: &str =
    "compile-error-cannot-assign-readonly-count";
pub const MEASUREMENT_COMPILE_ERROR_TOP_LEVEL_EXPRESSION_COUNT: &str =
    "compile-error-top-level-expression-count";
pub const MEASUREMENT_COMPILE_ERROR_EXPRESSION_EXPECTED_COUNT: &str =
    "compile-error-expression-expected-count";
pub const MEASUREMENT_COMPILE_ERROR_OTHERS_COUNT: &str = "compile-error-others-count";

/// Counters and string properties accumulated over one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryData {
    pub measurements: HashMap<String, f64>,
    pub properties: HashMap<String, String>,
}

impl TelemetryData {
    /// Add `delta` to a measurement, creating it at zero first.
    pub fn add_measurement(&mut self, name: &str, delta: f64) {
        *self.measurements.entry(name.to_string()).or_insert(0.0) += delta;
    }

    /// Overwrite a measurement with an absolute value.
    pub fn set_measurement(&mut self, name: &str, value: f64) {
        self.measurements.insert(name.to_string(), value);
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<String>) {
        self.properties.insert(name.to_string(), value.into());
    }

    pub fn measurement(&self, name: &str) -> f64 {
        self.measurements.get(name).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurements_accumulate() {
        let mut data = TelemetryData::default();
        data.add_measurement(MEASUREMENT_CODEGEN_ATTEMPT_COUNT, 1.0);
        data.add_measurement(MEASUREMENT_CODEGEN_ATTEMPT_COUNT, 1.0);
        assert_eq!(data.measurement(MEASUREMENT_CODEGEN_ATTEMPT_COUNT), 2.0);
    }

    #[test]
    fn test_properties_last_write_wins() {
        let mut data = TelemetryData::default();
        data.set_property(PROPERTY_CODEGEN_RESULT, "false");
        data.set_property(PROPERTY_CODEGEN_RESULT, "true");
        assert_eq!(
            data.properties
                .get(PROPERTY_CODEGEN_RESULT)
                .map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_round_trips_through_json() {
        let mut data = TelemetryData::default();
        data.add_measurement(MEASUREMENT_CODEGEN_ATTEMPT_COUNT, 2.0);
        let json = serde_json::to_string(&data).unwrap();
        let back: TelemetryData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.measurement(MEASUREMENT_CODEGEN_ATTEMPT_COUNT), 2.0);
    }

    #[test]
    fn test_missing_measurement_reads_zero() {
        let data = TelemetryData::default();
        assert_eq!(data.measurement("never-set"), 0.0);
    }
}
