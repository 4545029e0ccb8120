//! Rule corpora stored as Parquet tables (`rules::rule_schema()`).

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Date32Array, LargeListArray, LargeStringArray, ListArray,
    ListBuilder, StringArray, StringBuilder, UInt8Array,
};
use arrow::datatypes::{DataType, Date32Type, UInt8Type};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::NaiveDate;
use clausewise_core::{CorpusVersion, RegulatoryRule, RuleCorpus, RuleId, rules};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::info;

use crate::corpus::{InMemoryCorpusProvider, RuleCorpusProvider};
use crate::error::StoreError;

/// Read all record batches from a Parquet file.
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(batches?)
}

/// Write rules to a Parquet file using the rule table schema.
pub fn write_parquet(path: &Path, rules: &[RegulatoryRule]) -> Result<(), StoreError> {
    let batch = rules_to_batch(rules)?;
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Decode rule rows. Expects at least `rules::REQUIRED_COLUMNS`; `keywords`
/// and the effective dates are optional.
pub fn rules_from_batches(batches: &[RecordBatch]) -> Result<Vec<RegulatoryRule>, StoreError> {
    let mut out = Vec::new();
    for batch in batches {
        for name in rules::REQUIRED_COLUMNS {
            if batch.column_by_name(name).is_none() {
                return Err(StoreError::Other(format!("missing '{name}' column")));
            }
        }
        let col = |name: &str| batch.column_by_name(name);
        let required = |name: &str| {
            col(name).ok_or_else(|| StoreError::Other(format!("missing '{name}' column")))
        };

        let severity = arrow::compute::cast(required("severity")?, &DataType::UInt8)?;
        let severity = severity.as_primitive::<UInt8Type>();
        let from = col("effective_from").and_then(|c| c.as_primitive_opt::<Date32Type>().cloned());
        let to = col("effective_to").and_then(|c| c.as_primitive_opt::<Date32Type>().cloned());

        for row in 0..batch.num_rows() {
            let text = |name: &str| -> Result<String, StoreError> {
                get_string(required(name)?.as_ref(), row)
                    .ok_or_else(|| StoreError::Other(format!("row {row}: '{name}' is null")))
            };
            if severity.is_null(row) {
                return Err(StoreError::Other(format!(
                    "row {row}: 'severity' is null or out of range"
                )));
            }
            out.push(RegulatoryRule {
                id: RuleId::new(text("rule_id")?),
                regulation: text("regulation")?,
                jurisdiction: text("jurisdiction")?,
                category: text("category")?,
                severity: severity.value(row),
                description: text("description")?,
                keywords: col("keywords")
                    .and_then(|c| get_string_list(c.as_ref(), row))
                    .unwrap_or_default(),
                effective_from: from.as_ref().and_then(|a| get_date(a, row)),
                effective_to: to.as_ref().and_then(|a| get_date(a, row)),
            });
        }
    }
    Ok(out)
}

/// Encode rules as one batch with the rule table schema.
pub fn rules_to_batch(rules_in: &[RegulatoryRule]) -> Result<RecordBatch, StoreError> {
    let strings = |f: fn(&RegulatoryRule) -> &str| -> ArrayRef {
        Arc::new(StringArray::from_iter_values(rules_in.iter().map(f)))
    };
    let mut keywords = ListBuilder::new(StringBuilder::new());
    for rule in rules_in {
        for k in &rule.keywords {
            keywords.values().append_value(k);
        }
        keywords.append(true);
    }
    let dates = |f: fn(&RegulatoryRule) -> Option<NaiveDate>| -> ArrayRef {
        Arc::new(Date32Array::from(
            rules_in
                .iter()
                .map(|r| f(r).map(Date32Type::from_naive_date))
                .collect::<Vec<_>>(),
        ))
    };

    let columns: Vec<ArrayRef> = vec![
        strings(|r| r.id.as_str()),
        strings(|r| r.regulation.as_str()),
        strings(|r| r.jurisdiction.as_str()),
        strings(|r| r.category.as_str()),
        Arc::new(UInt8Array::from_iter_values(rules_in.iter().map(|r| r.severity))),
        strings(|r| r.description.as_str()),
        Arc::new(keywords.finish()),
        dates(|r| r.effective_from),
        dates(|r| r.effective_to),
    ];
    Ok(RecordBatch::try_new(Arc::new(rules::rule_schema()), columns)?)
}

/// Provider over a directory of `<version>.parquet` files, loaded eagerly.
/// The latest version in release order is current.
pub struct ParquetCorpusProvider {
    inner: InMemoryCorpusProvider,
}

impl ParquetCorpusProvider {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let mut files: Vec<(CorpusVersion, PathBuf)> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == "parquet"))
            .filter_map(|p| {
                let stem = p.file_stem()?.to_str()?;
                Some((CorpusVersion::new(stem), p.clone()))
            })
            .collect();
        files.sort();

        let inner = InMemoryCorpusProvider::new();
        for (version, path) in files {
            let rules = rules_from_batches(&read_parquet(&path)?)?;
            let corpus = RuleCorpus::new(version, rules)?;
            inner.publish(corpus)?;
        }
        info!(dir = %dir.display(), versions = inner.versions().len(), "parquet corpora loaded");
        Ok(Self { inner })
    }
}

#[async_trait]
impl RuleCorpusProvider for ParquetCorpusProvider {
    async fn current_version(&self) -> Result<CorpusVersion, StoreError> {
        self.inner.current_version().await
    }

    async fn get_corpus(
        &self,
        version: Option<&CorpusVersion>,
    ) -> Result<Arc<RuleCorpus>, StoreError> {
        self.inner.get_corpus(version).await
    }
}

// ── Arrow extraction helpers ──

/// Extract a string value from an Arrow array (handles Utf8 and LargeUtf8).
fn get_string(col: &dyn Array, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    col.as_any()
        .downcast_ref::<StringArray>()
        .map(|arr| arr.value(row).to_string())
        .or_else(|| {
            col.as_any()
                .downcast_ref::<LargeStringArray>()
                .map(|arr| arr.value(row).to_string())
        })
}

/// Extract a list of strings from a List or LargeList column.
fn get_string_list(col: &dyn Array, row: usize) -> Option<Vec<String>> {
    if col.is_null(row) {
        return None;
    }
    if let Some(list) = col.as_any().downcast_ref::<ListArray>() {
        return Some(strings_from_array(list.value(row).as_ref()));
    }
    if let Some(list) = col.as_any().downcast_ref::<LargeListArray>() {
        return Some(strings_from_array(list.value(row).as_ref()));
    }
    None
}

fn strings_from_array(arr: &dyn Array) -> Vec<String> {
    (0..arr.len()).filter_map(|i| get_string(arr, i)).collect()
}

fn get_date(arr: &Date32Array, row: usize) -> Option<NaiveDate> {
    if arr.is_null(row) {
        return None;
    }
    arr.value_as_date(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{Field, Schema};
    use tempfile::TempDir;

    fn rule(id: &str, severity: u8) -> RegulatoryRule {
        RegulatoryRule {
            id: RuleId::new(id),
            regulation: "HIPAA".into(),
            jurisdiction: "US".into(),
            category: "health_privacy".into(),
            severity,
            description: format!("requirement {id}"),
            keywords: vec!["protected health information".into(), "disclosure".into()],
            effective_from: NaiveDate::from_ymd_opt(2013, 9, 23),
            effective_to: None,
        }
    }

    #[test]
    fn batch_round_trip_preserves_rules() {
        let rules_in = vec![rule("HIPAA-1", 5), rule("HIPAA-2", 2)];
        let batch = rules_to_batch(&rules_in).unwrap();
        assert_eq!(batch.num_rows(), 2);
        let back = rules_from_batches(&[batch]).unwrap();
        assert_eq!(back, rules_in);
    }

    #[test]
    fn missing_required_column_is_reported() {
        let schema = Schema::new(vec![Field::new("rule_id", DataType::Utf8, false)]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(StringArray::from(vec!["R1"]))],
        )
        .unwrap();
        let err = rules_from_batches(&[batch]).unwrap_err();
        assert!(err.to_string().contains("regulation"));
    }

    #[test]
    fn integer_severity_is_cast() {
        let schema = Schema::new(vec![
            Field::new("rule_id", DataType::Utf8, false),
            Field::new("regulation", DataType::Utf8, false),
            Field::new("jurisdiction", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("severity", DataType::Int64, false),
            Field::new("description", DataType::Utf8, false),
        ]);
        let s = |v: &str| -> ArrayRef { Arc::new(StringArray::from(vec![v])) };
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                s("R1"),
                s("GDPR"),
                s("EU"),
                s("data_protection"),
                Arc::new(Int64Array::from(vec![4])),
                s("keep records short"),
            ],
        )
        .unwrap();
        let back = rules_from_batches(&[batch]).unwrap();
        assert_eq!(back[0].severity, 4);
        assert!(back[0].keywords.is_empty());
        assert_eq!(back[0].effective_from, None);
    }

    #[tokio::test]
    async fn provider_loads_versions_from_directory() {
        let tmp = TempDir::new().unwrap();
        write_parquet(&tmp.path().join("2024.4.parquet"), &[rule("HIPAA-1", 5)]).unwrap();
        write_parquet(
            &tmp.path().join("2025.1.parquet"),
            &[rule("HIPAA-1", 5), rule("HIPAA-2", 3)],
        )
        .unwrap();

        let provider = ParquetCorpusProvider::open(tmp.path()).unwrap();
        assert_eq!(provider.current_version().await.unwrap().as_str(), "2025.1");
        let old = provider
            .get_corpus(Some(&CorpusVersion::new("2024.4")))
            .await
            .unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old.rules()[0].effective_from, NaiveDate::from_ymd_opt(2013, 9, 23));
    }

    #[tokio::test]
    async fn latest_release_is_current() {
        let tmp = TempDir::new().unwrap();
        for version in ["2025.9", "2025.10"] {
            write_parquet(&tmp.path().join(format!("{version}.parquet")), &[rule("HIPAA-1", 5)])
                .unwrap();
        }
        let provider = ParquetCorpusProvider::open(tmp.path()).unwrap();
        assert_eq!(provider.current_version().await.unwrap().as_str(), "2025.10");
    }
}
