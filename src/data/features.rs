// ============================================================
// Layer 4 — Domain Feature Derivation
// ============================================================
// Adds churn-relevant columns computed row by row from columns
// that already exist. No fitted state: the same function runs on
// train and test after the split, so nothing can leak.
//
//   charge_ratio       monthly_charges / total_charges
//   avg_monthly_spend  total_charges / tenure
//   active_services    number of subscribed services (0..=9)
//   has_internet       1.0 when internet_service != "No"
//   tenure_group       "0-12" | "13-24" | "25-48" | "49+"
//
// A derived cell is Missing whenever an input it needs is Missing
// (or a denominator is zero); the cleaner fills it afterwards with
// a training statistic like any other missing cell.
//
// Reference: Rust Book §6 (Enums and Pattern Matching)

use crate::domain::dataset::{Dataset, Partition, Row};
use crate::domain::error::PipelineResult;
use crate::domain::record::columns;
use crate::domain::schema::{Column, ColumnKind, Value};

pub const CHARGE_RATIO:      &str = "charge_ratio";
pub const AVG_MONTHLY_SPEND: &str = "avg_monthly_spend";
pub const ACTIVE_SERVICES:   &str = "active_services";
pub const HAS_INTERNET:      &str = "has_internet";
pub const TENURE_GROUP:      &str = "tenure_group";

/// Columns the derivation reads.
fn required_columns() -> Vec<(&'static str, ColumnKind)> {
    let mut required = vec![
        (columns::TENURE,           ColumnKind::Numeric),
        (columns::MONTHLY_CHARGES,  ColumnKind::Numeric),
        (columns::TOTAL_CHARGES,    ColumnKind::Numeric),
        (columns::INTERNET_SERVICE, ColumnKind::Categorical),
    ];
    required.extend(columns::SERVICES.iter().map(|c| (*c, ColumnKind::Categorical)));
    required
}

fn ratio(num: Option<f64>, den: Option<f64>) -> Value {
    match (num, den) {
        (Some(n), Some(d)) if d != 0.0 => Value::Number(n / d),
        _ => Value::Missing,
    }
}

fn tenure_group(tenure: f64) -> &'static str {
    match tenure {
        t if t <= 12.0 => "0-12",
        t if t <= 24.0 => "13-24",
        t if t <= 48.0 => "25-48",
        _              => "49+",
    }
}

/// Append the derived columns to every row of `dataset`.
pub fn derive_domain_features<P: Partition>(dataset: Dataset<P>) -> PipelineResult<Dataset<P>> {
    let schema = dataset.schema();
    schema.require(P::TAG, &required_columns())?;

    let idx = |name: &str| schema.index_of(name).unwrap_or_default();
    let tenure_i   = idx(columns::TENURE);
    let monthly_i  = idx(columns::MONTHLY_CHARGES);
    let total_i    = idx(columns::TOTAL_CHARGES);
    let internet_i = idx(columns::INTERNET_SERVICE);
    let service_i: Vec<usize> = columns::SERVICES.iter().map(|c| idx(c)).collect();

    let extended = schema
        .clone()
        .with_column(Column::numeric(CHARGE_RATIO))
        .with_column(Column::numeric(AVG_MONTHLY_SPEND))
        .with_column(Column::numeric(ACTIVE_SERVICES))
        .with_column(Column::numeric(HAS_INTERNET))
        .with_column(Column::categorical(TENURE_GROUP));

    let rows = dataset
        .into_rows()
        .into_iter()
        .map(|row| {
            let tenure   = row.values[tenure_i].as_number();
            let monthly  = row.values[monthly_i].as_number();
            let total    = row.values[total_i].as_number();
            let internet = row.values[internet_i].as_category().map(str::to_string);

            let charge_ratio = ratio(monthly, total);
            let avg_spend    = ratio(total, tenure);

            let has_internet = match internet.as_deref() {
                Some("No") => Value::Number(0.0),
                Some(_)    => Value::Number(1.0),
                None       => Value::Missing,
            };

            let services: Option<Vec<&str>> = service_i
                .iter()
                .map(|&i| row.values[i].as_category())
                .collect();
            let active = match (services, internet.as_deref()) {
                (Some(s), Some(net)) => {
                    let add_ons = s.iter().filter(|v| **v == "Yes").count();
                    let net     = usize::from(net != "No");
                    Value::Number((add_ons + net) as f64)
                }
                _ => Value::Missing,
            };

            let group = tenure
                .map(|t| Value::category(tenure_group(t)))
                .unwrap_or(Value::Missing);

            let mut values = row.values;
            values.extend([charge_ratio, avg_spend, active, has_internet, group]);
            Row { id: row.id, values, churn: row.churn }
        })
        .collect();

    Dataset::checked(extended, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::records_to_dataset;
    use crate::domain::dataset::{Test, Unpartitioned};
    use crate::domain::error::PipelineError;
    use crate::domain::record::tests::sample_record;
    use crate::domain::schema::Schema;

    fn value(ds: &Dataset<Unpartitioned>, row: usize, col: &str) -> Value {
        let idx = ds.schema().index_of(col).unwrap();
        ds.rows()[row].values[idx].clone()
    }

    #[test]
    fn test_derives_all_columns() {
        let ds = records_to_dataset(&[sample_record("c1", true)]).unwrap();
        let before = ds.schema().len();
        let ds = derive_domain_features(ds).unwrap();
        assert_eq!(ds.schema().len(), before + 5);

        // 80 / 960
        assert_eq!(value(&ds, 0, CHARGE_RATIO), Value::Number(80.0 / 960.0));
        // 960 / 12
        assert_eq!(value(&ds, 0, AVG_MONTHLY_SPEND), Value::Number(80.0));
        // phone, backup, tv + internet
        assert_eq!(value(&ds, 0, ACTIVE_SERVICES), Value::Number(4.0));
        assert_eq!(value(&ds, 0, HAS_INTERNET), Value::Number(1.0));
        assert_eq!(value(&ds, 0, TENURE_GROUP), Value::category("0-12"));
    }

    #[test]
    fn test_missing_inputs_give_missing_features() {
        let mut rec = sample_record("c1", false);
        rec.total_charges = None;
        rec.tenure = Some(0.0);
        rec.online_backup = None;
        let ds = derive_domain_features(records_to_dataset(&[rec]).unwrap()).unwrap();
        assert!(value(&ds, 0, CHARGE_RATIO).is_missing());
        assert!(value(&ds, 0, AVG_MONTHLY_SPEND).is_missing());
        assert!(value(&ds, 0, ACTIVE_SERVICES).is_missing());
        assert_eq!(value(&ds, 0, TENURE_GROUP), Value::category("0-12"));
    }

    #[test]
    fn test_no_internet_customer() {
        let mut rec = sample_record("c1", false);
        rec.internet_service = Some("No".into());
        for field in [
            &mut rec.online_security,
            &mut rec.online_backup,
            &mut rec.device_protection,
            &mut rec.tech_support,
            &mut rec.streaming_tv,
            &mut rec.streaming_movies,
        ] {
            *field = Some("No internet service".into());
        }
        let ds = derive_domain_features(records_to_dataset(&[rec]).unwrap()).unwrap();
        assert_eq!(value(&ds, 0, HAS_INTERNET), Value::Number(0.0));
        // phone only
        assert_eq!(value(&ds, 0, ACTIVE_SERVICES), Value::Number(1.0));
    }

    #[test]
    fn test_tenure_groups() {
        assert_eq!(tenure_group(0.0), "0-12");
        assert_eq!(tenure_group(13.0), "13-24");
        assert_eq!(tenure_group(48.0), "25-48");
        assert_eq!(tenure_group(72.0), "49+");
    }

    #[test]
    fn test_missing_required_column_is_schema_error() {
        let ds: Dataset<Test> = Dataset::<Unpartitioned>::new(Schema::default(), vec![])
            .unwrap()
            .into_partition();
        let err = derive_domain_features(ds).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
        assert!(err.to_string().contains("test partition"));
    }

    #[test]
    fn test_derivation_is_pure() {
        let recs = [sample_record("a", true), sample_record("b", false)];
        let a = derive_domain_features(records_to_dataset(&recs).unwrap()).unwrap();
        let b = derive_domain_features(records_to_dataset(&recs).unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
