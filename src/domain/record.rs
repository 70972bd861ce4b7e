// ============================================================
// Layer 3 — Customer Record
// ============================================================
// One telecom customer, shaped after the classic Telco churn
// table. Attributes are Option so that missing values survive
// from generation / import all the way to the cleaner, which is
// the only place allowed to fill them.

use serde::{Deserialize, Serialize};

use crate::domain::dataset::Row;
use crate::domain::schema::{Column, Schema, Value};

/// Column names shared by the generator, loader, cleaner and feature engineer.
pub mod columns {
    pub const GENDER:            &str = "gender";
    pub const SENIOR_CITIZEN:    &str = "senior_citizen";
    pub const PARTNER:           &str = "partner";
    pub const DEPENDENTS:        &str = "dependents";
    pub const TENURE:            &str = "tenure";
    pub const PHONE_SERVICE:     &str = "phone_service";
    pub const MULTIPLE_LINES:    &str = "multiple_lines";
    pub const INTERNET_SERVICE:  &str = "internet_service";
    pub const ONLINE_SECURITY:   &str = "online_security";
    pub const ONLINE_BACKUP:     &str = "online_backup";
    pub const DEVICE_PROTECTION: &str = "device_protection";
    pub const TECH_SUPPORT:      &str = "tech_support";
    pub const STREAMING_TV:      &str = "streaming_tv";
    pub const STREAMING_MOVIES:  &str = "streaming_movies";
    pub const CONTRACT:          &str = "contract";
    pub const PAPERLESS_BILLING: &str = "paperless_billing";
    pub const PAYMENT_METHOD:    &str = "payment_method";
    pub const MONTHLY_CHARGES:   &str = "monthly_charges";
    pub const TOTAL_CHARGES:     &str = "total_charges";

    /// Add-on services counted by the `active_services` feature.
    pub const SERVICES: [&str; 8] = [
        PHONE_SERVICE,
        MULTIPLE_LINES,
        ONLINE_SECURITY,
        ONLINE_BACKUP,
        DEVICE_PROTECTION,
        TECH_SUPPORT,
        STREAMING_TV,
        STREAMING_MOVIES,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_id:       String,
    pub gender:            Option<String>,
    pub senior_citizen:    Option<String>,
    pub partner:           Option<String>,
    pub dependents:        Option<String>,
    pub tenure:            Option<f64>,
    pub phone_service:     Option<String>,
    pub multiple_lines:    Option<String>,
    pub internet_service:  Option<String>,
    pub online_security:   Option<String>,
    pub online_backup:     Option<String>,
    pub device_protection: Option<String>,
    pub tech_support:      Option<String>,
    pub streaming_tv:      Option<String>,
    pub streaming_movies:  Option<String>,
    pub contract:          Option<String>,
    pub paperless_billing: Option<String>,
    pub payment_method:    Option<String>,
    pub monthly_charges:   Option<f64>,
    pub total_charges:     Option<f64>,
    pub churn:             bool,
}

impl CustomerRecord {
    /// The raw (Bronze) schema. Column order matches `to_row`.
    pub fn schema() -> Schema {
        use columns::*;
        Schema::new(vec![
            Column::categorical(GENDER),
            Column::categorical(SENIOR_CITIZEN),
            Column::categorical(PARTNER),
            Column::categorical(DEPENDENTS),
            Column::numeric(TENURE),
            Column::categorical(PHONE_SERVICE),
            Column::categorical(MULTIPLE_LINES),
            Column::categorical(INTERNET_SERVICE),
            Column::categorical(ONLINE_SECURITY),
            Column::categorical(ONLINE_BACKUP),
            Column::categorical(DEVICE_PROTECTION),
            Column::categorical(TECH_SUPPORT),
            Column::categorical(STREAMING_TV),
            Column::categorical(STREAMING_MOVIES),
            Column::categorical(CONTRACT),
            Column::categorical(PAPERLESS_BILLING),
            Column::categorical(PAYMENT_METHOD),
            Column::numeric(MONTHLY_CHARGES),
            Column::numeric(TOTAL_CHARGES),
        ])
    }

    pub fn to_row(&self) -> Row {
        Row {
            id: self.customer_id.clone(),
            values: vec![
                self.gender.clone().into(),
                self.senior_citizen.clone().into(),
                self.partner.clone().into(),
                self.dependents.clone().into(),
                Value::from(self.tenure),
                self.phone_service.clone().into(),
                self.multiple_lines.clone().into(),
                self.internet_service.clone().into(),
                self.online_security.clone().into(),
                self.online_backup.clone().into(),
                self.device_protection.clone().into(),
                self.tech_support.clone().into(),
                self.streaming_tv.clone().into(),
                self.streaming_movies.clone().into(),
                self.contract.clone().into(),
                self.paperless_billing.clone().into(),
                self.payment_method.clone().into(),
                Value::from(self.monthly_charges),
                Value::from(self.total_charges),
            ],
            churn: self.churn,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A fully populated record, reused by tests in other modules.
    pub(crate) fn sample_record(id: &str, churn: bool) -> CustomerRecord {
        let s = |v: &str| Some(v.to_string());
        CustomerRecord {
            customer_id:       id.to_string(),
            gender:            s("Female"),
            senior_citizen:    s("No"),
            partner:           s("Yes"),
            dependents:        s("No"),
            tenure:            Some(12.0),
            phone_service:     s("Yes"),
            multiple_lines:    s("No"),
            internet_service:  s("Fiber optic"),
            online_security:   s("No"),
            online_backup:     s("Yes"),
            device_protection: s("No"),
            tech_support:      s("No"),
            streaming_tv:      s("Yes"),
            streaming_movies:  s("No"),
            contract:          s("Month-to-month"),
            paperless_billing: s("Yes"),
            payment_method:    s("Electronic check"),
            monthly_charges:   Some(80.0),
            total_charges:     Some(960.0),
            churn,
        }
    }

    #[test]
    fn test_row_matches_schema_width_and_kinds() {
        let schema = CustomerRecord::schema();
        let row    = sample_record("c1", true).to_row();
        assert_eq!(row.values.len(), schema.len());
        for (v, c) in row.values.iter().zip(schema.columns()) {
            assert!(v.fits(c.kind), "column {} holds {:?}", c.name, v);
        }
    }

    #[test]
    fn test_missing_attribute_becomes_missing_value() {
        let mut rec = sample_record("c2", false);
        rec.total_charges = None;
        let row = rec.to_row();
        let idx = CustomerRecord::schema().index_of(columns::TOTAL_CHARGES).unwrap();
        assert!(row.values[idx].is_missing());
    }
}
