use std::collections::HashSet;

use tracing::info;

use crate::domain::error::{IngestError, Result};
use crate::domain::{SchemaDefinition, SCHEMAS};

/// Picks the first registered schema whose full column set appears in a
/// normalized header. Extra columns are allowed.
pub struct SchemaDetector {
    schemas: &'static [SchemaDefinition],
}

impl Default for SchemaDetector {
    fn default() -> Self {
        Self { schemas: SCHEMAS }
    }
}

impl SchemaDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect against a custom ordered schema list.
    pub fn with_schemas(schemas: &'static [SchemaDefinition]) -> Self {
        Self { schemas }
    }

    pub fn detect(&self, headers: &[String]) -> Result<&'static SchemaDefinition> {
        let observed: HashSet<&str> = headers.iter().map(String::as_str).collect();

        let schema = self
            .schemas
            .iter()
            .find(|schema| schema.columns.iter().all(|column| observed.contains(column)))
            .ok_or_else(|| IngestError::UnrecognizedSchema {
                observed: headers.to_vec(),
            })?;

        info!(schema = schema.name, "detected dataset schema");
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::{SCHOOL, TEACHER};

    fn headers(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_teacher_header_is_detected() {
        let h = headers(&[
            "school_code",
            "school_name",
            "employee_name",
            "employee_code",
            "designation",
        ]);
        assert_eq!(SchemaDetector::new().detect(&h).unwrap().name, "teacher");
    }

    #[test]
    fn test_missing_designation_is_unrecognized() {
        let h = headers(&["school_code", "school_name", "employee_name", "employee_code"]);
        match SchemaDetector::new().detect(&h) {
            Err(IngestError::UnrecognizedSchema { observed }) => assert_eq!(observed, h),
            other => panic!("expected UnrecognizedSchema, got {other:?}"),
        }
    }

    #[test]
    fn test_extra_columns_do_not_change_detection() {
        for schema in SCHEMAS {
            let mut h = headers(schema.columns);
            let detected = SchemaDetector::new().detect(&h).unwrap().name;
            h.insert(0, "remarks".to_string());
            h.push("phone_number".to_string());
            h.push(String::new());
            assert_eq!(SchemaDetector::new().detect(&h).unwrap().name, detected);
        }
    }

    #[test]
    fn test_removing_any_required_column_fails() {
        for schema in [&SCHOOL, &TEACHER] {
            for skip in 0..schema.columns.len() {
                let h: Vec<String> = schema
                    .columns
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != skip)
                    .map(|(_, c)| c.to_string())
                    .collect();
                assert!(
                    SchemaDetector::new().detect(&h).is_err(),
                    "{} without {}",
                    schema.name,
                    schema.columns[skip]
                );
            }
        }
    }

    #[test]
    fn test_first_declared_schema_wins_ambiguity() {
        let mut h = headers(SCHOOL.columns);
        h.extend(headers(TEACHER.columns));
        assert_eq!(SchemaDetector::new().detect(&h).unwrap().name, "teacher");

        static REVERSED: &[SchemaDefinition] = &[SCHOOL, TEACHER];
        let reversed = SchemaDetector::with_schemas(REVERSED);
        assert_eq!(reversed.detect(&h).unwrap().name, "school");
    }

    #[test]
    fn test_column_order_is_irrelevant() {
        let mut h = headers(TEACHER.columns);
        h.reverse();
        assert_eq!(SchemaDetector::new().detect(&h).unwrap().name, "teacher");
    }
}
