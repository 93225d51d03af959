//! Deterministic document identifiers
//!
//! An identifier is `<resource-label>-<job-id>-<end-time>`. It depends only
//! on the record and its file name, never on when or in what order the
//! record was read, so submitting it in create mode twice is harmless.

use crate::config::TransformConfig;
use crate::discovery::SourceFile;
use jobdex_common::{Document, FieldPath};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// The file stem has no entry in the resource table
    #[error("No resource label for '{stem}' (file '{file}'). Add it to [transform.resources].")]
    UnknownResource { stem: String, file: String },

    /// The record lacks a scalar value for an identifier field
    #[error("Missing identifier field '{field}'")]
    MissingField { field: String },
}

impl IdentifierError {
    /// An unknown resource is a configuration problem and stops the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IdentifierError::UnknownResource { .. })
    }
}

/// Filename stem to human-readable resource label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTable {
    labels: BTreeMap<String, String>,
}

impl ResourceTable {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }

    pub fn label(&self, source: &SourceFile) -> Result<&str, IdentifierError> {
        self.labels
            .get(source.stem())
            .map(String::as_str)
            .ok_or_else(|| IdentifierError::UnknownResource {
                stem: source.stem().to_string(),
                file: source.name().to_string(),
            })
    }

    /// Check every file before anything is submitted
    pub fn validate(&self, files: &[SourceFile]) -> Result<(), IdentifierError> {
        files.iter().try_for_each(|file| self.label(file).map(|_| ()))
    }
}

/// Join the three identifier parts
pub fn compose(label: &str, job_id: &str, end_time: &str) -> String {
    format!("{label}-{job_id}-{end_time}")
}

/// Derives identifiers from transformed records
#[derive(Debug, Clone)]
pub struct DocumentIdentifier {
    resources: ResourceTable,
    job_id: FieldPath,
    end_time: FieldPath,
}

impl DocumentIdentifier {
    pub fn new(config: &TransformConfig) -> Self {
        Self {
            resources: ResourceTable::new(config.resources.clone()),
            job_id: FieldPath::parse(&config.job_id_field),
            end_time: FieldPath::parse(&config.end_time_field),
        }
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn derive(&self, doc: &Document, source: &SourceFile) -> Result<String, IdentifierError> {
        let label = self.resources.label(source)?;
        let job_id = field_text(doc, &self.job_id)?;
        let end_time = field_text(doc, &self.end_time)?;
        Ok(compose(label, &job_id, &end_time))
    }
}

/// Strings as-is, numbers in decimal; anything else counts as missing.
fn field_text(doc: &Document, path: &FieldPath) -> Result<String, IdentifierError> {
    match path.get(doc) {
        Some(Document::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Document::Int(n)) => Ok(n.to_string()),
        Some(Document::Float(f)) if f.is_finite() => Ok(float_text(*f)),
        _ => Err(IdentifierError::MissingField {
            field: path.to_string(),
        }),
    }
}

/// Shortest round-trip decimal, always with a fractional part or exponent.
///
/// Decimal exponents below -4 or from 16 up use `1.5e-05` style, so ids
/// match those written by earlier loaders for the same records.
fn float_text(f: f64) -> String {
    let scientific = format!("{f:e}");
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if (-4..16).contains(&exponent) {
        let fixed = f.to_string();
        if fixed.contains('.') {
            fixed
        } else {
            format!("{fixed}.0")
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn identifier() -> DocumentIdentifier {
        DocumentIdentifier::new(&TransformConfig::default())
    }

    #[test]
    fn test_compose_from_record() {
        let doc = Document::from(json!({"acct": {"id": "12345", "end_time": 1_600_000_000}}));
        let id = identifier()
            .derive(&doc, &SourceFile::new("/data/documents/resource_8.bson.gz"))
            .unwrap();
        assert_eq!(id, "chemistry-12345-1600000000");
    }

    #[test]
    fn test_float_fields_keep_fractional_form() {
        let doc = Document::from(json!({"acct": {"id": 77, "end_time": 1_600_000_000.0}}));
        let id = identifier()
            .derive(&doc, &SourceFile::new("resource_8.bson.gz"))
            .unwrap();
        assert_eq!(id, "chemistry-77-1600000000.0");

        assert_eq!(float_text(2.5), "2.5");
        assert_eq!(float_text(-0.0), "-0.0");
        assert_eq!(float_text(0.0001), "0.0001");
        assert_eq!(float_text(0.000015), "1.5e-05");
        assert_eq!(float_text(1e16), "1e+16");
        assert_eq!(float_text(1234567890123456.0), "1234567890123456.0");
    }

    #[test]
    fn test_unknown_resource_is_fatal() {
        let doc = Document::from(json!({"acct": {"id": "1", "end_time": 2}}));
        let err = identifier()
            .derive(&doc, &SourceFile::new("resource_77.bson.gz"))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, IdentifierError::UnknownResource { ref stem, .. } if stem == "resource_77"));
    }

    #[test]
    fn test_missing_or_non_scalar_fields() {
        let source = SourceFile::new("resource_9.bson.gz");
        let no_end = Document::from(json!({"acct": {"id": "1"}}));
        let err = identifier().derive(&no_end, &source).unwrap_err();
        assert_eq!(
            err,
            IdentifierError::MissingField {
                field: "acct.end_time".to_string()
            }
        );
        assert!(!err.is_fatal());

        let nested_id = Document::from(json!({"acct": {"id": {"x": 1}, "end_time": 3}}));
        assert!(identifier().derive(&nested_id, &source).is_err());
    }

    #[test]
    fn test_validate_files() {
        let table = identifier().resources().clone();
        assert!(table
            .validate(&[SourceFile::new("resource_8.bson.gz"), SourceFile::new("resource_15.bson.gz")])
            .is_ok());
        assert!(table
            .validate(&[SourceFile::new("resource_8.bson.gz"), SourceFile::new("other.bson.gz")])
            .is_err());
    }

    proptest! {
        #[test]
        fn prop_identifier_is_deterministic(job in "[0-9A-Za-z_]{1,12}", end in any::<i64>()) {
            let doc = Document::from(json!({"acct": {"id": job.clone(), "end_time": end}}));
            let source = SourceFile::new("resource_13.bson.gz");
            let first = identifier().derive(&doc, &source).unwrap();
            let second = identifier().derive(&doc.clone(), &source).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first, compose("ub-hpc", &job, &end.to_string()));
        }
    }
}
