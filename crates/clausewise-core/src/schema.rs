/// Arrow schema definitions for tabular rule corpora.
pub mod rules {
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    /// Schema for a rule corpus table, one row per regulatory rule.
    ///
    /// `severity` is stored as `UInt8`; effective dates as `Date32` (days
    /// since the Unix epoch), null when the bound is open.
    pub fn rule_schema() -> Schema {
        Schema::new(vec![
            Field::new("rule_id", DataType::Utf8, false),
            Field::new("regulation", DataType::Utf8, false),
            Field::new("jurisdiction", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("severity", DataType::UInt8, false),
            Field::new("description", DataType::Utf8, false),
            Field::new(
                "keywords",
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
                true,
            ),
            Field::new("effective_from", DataType::Date32, true),
            Field::new("effective_to", DataType::Date32, true),
        ])
    }

    /// Columns a batch must carry to be read as rules.
    pub const REQUIRED_COLUMNS: &[&str] = &[
        "rule_id",
        "regulation",
        "jurisdiction",
        "category",
        "severity",
        "description",
    ];
}
