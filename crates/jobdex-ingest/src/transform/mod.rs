//! Record normalization
//!
//! [`FieldTransformer`] turns one decoded record into a document whose
//! field types do not drift between records. Rules run in a fixed order:
//!
//! 1. `_id` is renamed to `id`
//! 2. source-specific preprocessing ([`SourceVariant`])
//! 3. configured fields are deleted
//! 4. NaN and infinite floats are purged
//! 5. configured mappings are consolidated into tagged lists
//! 6. configured paths, then configured key names, are flattened to JSON text
//!
//! [`FieldTransformer::finalize`] then attaches the target index, write
//! mode and derived identifier. No rule fails; absent fields are skipped.

pub mod accounting;
pub mod rules;

pub use accounting::AccountingRules;

use crate::config::{SourceVariant, TransformConfig, WriteMode};
use crate::discovery::SourceFile;
use crate::error::Result;
use jobdex_common::{Document, FieldPath};

/// A normalized record ready for bulk submission
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedDocument {
    pub index: String,
    pub write_mode: WriteMode,
    pub id: String,
    pub body: Document,
}

/// Preprocessing selected once at startup from [`SourceVariant`]
#[derive(Debug, Clone)]
enum Preprocessor {
    Accounting(AccountingRules),
    Passthrough,
}

impl Preprocessor {
    fn for_variant(variant: SourceVariant) -> Result<Self> {
        Ok(match variant {
            SourceVariant::Accounting => Preprocessor::Accounting(AccountingRules::new()?),
            SourceVariant::Passthrough => Preprocessor::Passthrough,
        })
    }

    fn apply(&self, doc: &mut Document, source: &SourceFile) {
        match self {
            Preprocessor::Accounting(rules) => rules.apply(doc, source),
            Preprocessor::Passthrough => {},
        }
    }
}

/// Applies the configured rule chain to decoded records
#[derive(Debug, Clone)]
pub struct FieldTransformer {
    preprocessor: Preprocessor,
    delete: Vec<FieldPath>,
    nested: Vec<FieldPath>,
    flatten: Vec<FieldPath>,
    flatten_keys: Vec<String>,
    index: String,
    write_mode: WriteMode,
}

impl FieldTransformer {
    pub fn new(config: &TransformConfig) -> Result<Self> {
        let paths = |fields: &[String]| -> Vec<FieldPath> {
            fields
                .iter()
                .map(|f| FieldPath::parse(f))
                .filter(|p| !p.is_empty())
                .collect()
        };

        Ok(Self {
            preprocessor: Preprocessor::for_variant(config.variant)?,
            delete: paths(&config.delete_fields),
            nested: paths(&config.nested_fields),
            flatten: paths(&config.flatten_fields),
            flatten_keys: config.flatten_keys.clone(),
            index: config.index.clone(),
            write_mode: config.write_mode,
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// Run rules 1 to 6 on one record from `source`
    pub fn transform(&self, mut doc: Document, source: &SourceFile) -> Document {
        rules::rename_identity(&mut doc);

        self.preprocessor.apply(&mut doc, source);

        for path in &self.delete {
            path.remove(&mut doc);
        }

        rules::purge_non_finite(&mut doc);

        for path in &self.nested {
            rules::consolidate(&mut doc, path);
        }

        for path in &self.flatten {
            rules::flatten_path(&mut doc, path);
        }
        if !self.flatten_keys.is_empty() {
            rules::flatten_named_keys(&mut doc, &self.flatten_keys);
        }

        doc
    }

    /// Attach index, write mode and identifier
    pub fn finalize(&self, body: Document, id: String) -> TransformedDocument {
        TransformedDocument {
            index: self.index.clone(),
            write_mode: self.write_mode,
            id,
            body,
        }
    }
}
