// ============================================================
// Layer 3 — Core Traits
// ============================================================
// The application layer asks for customer records without
// knowing where they come from. Two sources exist:
//   - SyntheticGenerator → draws records from fixed distributions
//   - CsvRecordSource    → imports an original Telco-format CSV
// Both are combined into the Bronze dataset.

use anyhow::Result;

use crate::domain::record::CustomerRecord;

/// Any component that can produce raw customer records.
pub trait RecordSource {
    /// Short label used in logs ("synthetic", "csv:path").
    fn describe(&self) -> String;

    /// Produce every record this source holds.
    fn load_all(&self) -> Result<Vec<CustomerRecord>>;
}
