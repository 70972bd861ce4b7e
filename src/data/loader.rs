// ============================================================
// Layer 4 — Record Loader
// ============================================================
// Imports an "original" customer table in the classic Telco CSV
// layout and combines it with synthetic records into the single
// raw dataset that lands in the Bronze layer.
//
// CSV conventions handled here:
//   - blank cells (TotalCharges is " " for new customers) → missing
//   - SeniorCitizen is 0/1 in the export → "No"/"Yes"
//   - Churn is "Yes"/"No"
// A non-blank numeric cell that does not parse is NOT coerced:
// it fails with a DataQualityError naming the row and column.
//
// Reference: csv crate documentation
//            Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{collections::HashSet, fs::File, path::PathBuf};

use crate::domain::dataset::{Dataset, PartitionTag, Unpartitioned};
use crate::domain::error::PipelineError;
use crate::domain::record::{columns, CustomerRecord};
use crate::domain::traits::RecordSource;

/// Reads a Telco-format CSV file.
pub struct CsvRecordSource {
    path: PathBuf,
}

impl CsvRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// One CSV line, exactly as exported. Everything is text until parsed.
#[derive(Debug, Deserialize)]
struct TelcoCsvRow {
    #[serde(rename = "customerID")]
    customer_id: String,
    gender: String,
    #[serde(rename = "SeniorCitizen")]
    senior_citizen: String,
    #[serde(rename = "Partner")]
    partner: String,
    #[serde(rename = "Dependents")]
    dependents: String,
    tenure: String,
    #[serde(rename = "PhoneService")]
    phone_service: String,
    #[serde(rename = "MultipleLines")]
    multiple_lines: String,
    #[serde(rename = "InternetService")]
    internet_service: String,
    #[serde(rename = "OnlineSecurity")]
    online_security: String,
    #[serde(rename = "OnlineBackup")]
    online_backup: String,
    #[serde(rename = "DeviceProtection")]
    device_protection: String,
    #[serde(rename = "TechSupport")]
    tech_support: String,
    #[serde(rename = "StreamingTV")]
    streaming_tv: String,
    #[serde(rename = "StreamingMovies")]
    streaming_movies: String,
    #[serde(rename = "Contract")]
    contract: String,
    #[serde(rename = "PaperlessBilling")]
    paperless_billing: String,
    #[serde(rename = "PaymentMethod")]
    payment_method: String,
    #[serde(rename = "MonthlyCharges")]
    monthly_charges: String,
    #[serde(rename = "TotalCharges")]
    total_charges: String,
    #[serde(rename = "Churn")]
    churn: String,
}

fn text(cell: &str) -> Option<String> {
    let t = cell.trim();
    if t.is_empty() { None } else { Some(t.to_string()) }
}

fn number(cell: &str, row_id: &str, column: &str) -> Result<Option<f64>, PipelineError> {
    let t = cell.trim();
    if t.is_empty() {
        return Ok(None);
    }
    t.parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
        .map(Some)
        .ok_or_else(|| {
            PipelineError::data_quality(
                PartitionTag::Unpartitioned,
                column,
                format!("row '{row_id}' holds unparseable number '{t}'"),
            )
        })
}

impl TelcoCsvRow {
    fn into_record(self) -> Result<CustomerRecord, PipelineError> {
        let id = self.customer_id.trim().to_string();

        let senior_citizen = match self.senior_citizen.trim() {
            ""          => None,
            "1" | "Yes" => Some("Yes".to_string()),
            "0" | "No"  => Some("No".to_string()),
            other => {
                return Err(PipelineError::data_quality(
                    PartitionTag::Unpartitioned,
                    columns::SENIOR_CITIZEN,
                    format!("row '{id}' holds '{other}', expected 0/1"),
                ))
            }
        };

        let churn = match self.churn.trim() {
            "Yes" | "1" => true,
            "No" | "0"  => false,
            other => {
                return Err(PipelineError::data_quality(
                    PartitionTag::Unpartitioned,
                    "churn",
                    format!("row '{id}' holds label '{other}', expected Yes/No"),
                ))
            }
        };

        Ok(CustomerRecord {
            tenure:            number(&self.tenure, &id, columns::TENURE)?,
            monthly_charges:   number(&self.monthly_charges, &id, columns::MONTHLY_CHARGES)?,
            total_charges:     number(&self.total_charges, &id, columns::TOTAL_CHARGES)?,
            gender:            text(&self.gender),
            senior_citizen,
            partner:           text(&self.partner),
            dependents:        text(&self.dependents),
            phone_service:     text(&self.phone_service),
            multiple_lines:    text(&self.multiple_lines),
            internet_service:  text(&self.internet_service),
            online_security:   text(&self.online_security),
            online_backup:     text(&self.online_backup),
            device_protection: text(&self.device_protection),
            tech_support:      text(&self.tech_support),
            streaming_tv:      text(&self.streaming_tv),
            streaming_movies:  text(&self.streaming_movies),
            contract:          text(&self.contract),
            paperless_billing: text(&self.paperless_billing),
            payment_method:    text(&self.payment_method),
            customer_id:       id,
            churn,
        })
    }
}

impl RecordSource for CsvRecordSource {
    fn describe(&self) -> String {
        format!("csv({})", self.path.display())
    }

    fn load_all(&self) -> Result<Vec<CustomerRecord>> {
        // A missing original file is not fatal: the run continues on
        // synthetic data only.
        if !self.path.exists() {
            tracing::warn!(
                "Original CSV '{}' does not exist, continuing without it",
                self.path.display()
            );
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open '{}'", self.path.display()))?;
        let mut reader = csv::Reader::from_reader(file);

        let mut records = Vec::new();
        for (line, row) in reader.deserialize::<TelcoCsvRow>().enumerate() {
            let row = row.with_context(|| {
                format!("Malformed CSV line {} in '{}'", line + 2, self.path.display())
            })?;
            records.push(row.into_record()?);
        }

        tracing::info!("Imported {} original records from '{}'", records.len(), self.path.display());
        Ok(records)
    }
}

/// Concatenate every source into one raw dataset.
/// Customer ids must be unique across sources.
pub fn combine_sources(sources: &[&dyn RecordSource]) -> Result<Dataset<Unpartitioned>> {
    let mut records = Vec::new();
    for source in sources {
        let batch = source
            .load_all()
            .with_context(|| format!("Cannot load records from {}", source.describe()))?;
        tracing::info!("{} contributed {} records", source.describe(), batch.len());
        records.extend(batch);
    }
    Ok(records_to_dataset(&records)?)
}

/// Convert records into a raw dataset, rejecting duplicate ids.
pub fn records_to_dataset(records: &[CustomerRecord]) -> Result<Dataset<Unpartitioned>, PipelineError> {
    let mut seen = HashSet::with_capacity(records.len());
    for r in records {
        if !seen.insert(r.customer_id.as_str()) {
            return Err(PipelineError::data_quality(
                PartitionTag::Unpartitioned,
                "customer_id",
                format!("duplicate customer id '{}'", r.customer_id),
            ));
        }
    }
    Dataset::new(
        CustomerRecord::schema(),
        records.iter().map(CustomerRecord::to_row).collect(),
    )
}
