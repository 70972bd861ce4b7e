// ============================================================
// Layer 4 — Synthetic Customer Generator
// ============================================================
// Draws Telco-style customer records from fixed distributions.
// The churn label comes from a logistic model so that it is
// correlated with the attributes a churn model should find:
//
//   month-to-month contract   → churn more
//   short tenure              → churn more
//   high monthly charges      → churn more
//   fiber optic internet      → churn more
//   electronic check payment  → churn more
//
// On top of the clean draw, two kinds of noise are injected so
// the cleaner has real work to do:
//   - missing cells at `missing_rate`
//   - inflated charges at `outlier_rate`
// TotalCharges is always missing for tenure 0, as in the classic
// Telco export.
//
// Everything is driven by a seeded ChaCha8Rng: same seed, same data.
//
// Why generate data at all?
//   The pipeline has to run end to end without downloading the
//   Telco export. Generated customers follow the same schema, and
//   churn is drawn from a logistic score over contract, tenure
//   and charges, so there is real signal for the model to find.
//
// Reference: rand / rand_chacha crate documentation

use anyhow::Result;
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::domain::record::CustomerRecord;
use crate::domain::traits::RecordSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub n_records:    usize,
    pub seed:         u64,
    /// Chance that a customer gets one attribute blanked
    pub missing_rate: f64,
    /// Chance that a customer's charges are inflated
    pub outlier_rate: f64,
    /// Ids look like `SYN-000001`
    pub id_prefix:    String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            n_records:    5000,
            seed:         42,
            missing_rate: 0.02,
            outlier_rate: 0.01,
            id_prefix:    "SYN".to_string(),
        }
    }
}

pub struct SyntheticGenerator {
    config: GeneratorConfig,
}

impl SyntheticGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Generate `n` records. Deterministic for a fixed seed.
    pub fn generate(&self, n: usize) -> Vec<CustomerRecord> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let records: Vec<CustomerRecord> = (0..n)
            .map(|i| {
                let mut rec = draw_customer(&mut rng, format!("{}-{:06}", self.config.id_prefix, i + 1));
                inject_noise(&mut rec, &mut rng, self.config.missing_rate, self.config.outlier_rate);
                rec
            })
            .collect();

        let churners = records.iter().filter(|r| r.churn).count();
        tracing::debug!(
            "Generated {} synthetic customers, {} churners ({:.1}%)",
            records.len(),
            churners,
            100.0 * churners as f64 / records.len().max(1) as f64,
        );
        records
    }
}

impl RecordSource for SyntheticGenerator {
    fn describe(&self) -> String {
        format!("synthetic(n={}, seed={})", self.config.n_records, self.config.seed)
    }

    fn load_all(&self) -> Result<Vec<CustomerRecord>> {
        Ok(self.generate(self.config.n_records))
    }
}

fn yes_no(rng: &mut ChaCha8Rng, p_yes: f64) -> String {
    let answer = if rng.gen_bool(p_yes) { "Yes" } else { "No" };
    answer.to_string()
}

fn pick<'a>(rng: &mut ChaCha8Rng, weighted: &[(&'a str, f64)]) -> &'a str {
    weighted
        .choose_weighted(rng, |(_, w)| *w)
        .map(|(v, _)| *v)
        .unwrap_or(weighted[0].0)
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn draw_customer(rng: &mut ChaCha8Rng, customer_id: String) -> CustomerRecord {
    let senior  = rng.gen_bool(0.16);
    let partner = rng.gen_bool(0.48);
    let dependents = rng.gen_bool(if partner { 0.45 } else { 0.15 });

    let contract = pick(rng, &[("Month-to-month", 0.55), ("One year", 0.21), ("Two year", 0.24)]);

    // Longer contracts belong to longer-standing customers.
    let u: f64 = rng.gen();
    let tenure = match contract {
        "Month-to-month" => (u.powf(1.6) * 72.0).round(),
        "One year"       => (6.0 + u * 66.0).round(),
        _                => (18.0 + u.powf(0.7) * 54.0).round(),
    };

    let internet = pick(rng, &[("DSL", 0.34), ("Fiber optic", 0.44), ("No", 0.22)]);
    let phone    = rng.gen_bool(0.9);

    let multiple_lines = if phone {
        yes_no(rng, 0.45)
    } else {
        "No phone service".to_string()
    };

    // security, backup, protection, support, tv, movies
    const ADD_ON_RATES: [f64; 6] = [0.29, 0.34, 0.34, 0.29, 0.38, 0.39];
    let add_ons: [String; 6] = std::array::from_fn(|i| {
        if internet == "No" {
            "No internet service".to_string()
        } else {
            yes_no(rng, ADD_ON_RATES[i])
        }
    });
    let n_add_ons   = add_ons.iter().filter(|s| s.as_str() == "Yes").count() as f64;
    let has_support = add_ons[3] == "Yes";

    let payment = pick(
        rng,
        &[
            ("Electronic check", 0.34),
            ("Mailed check", 0.23),
            ("Bank transfer (automatic)", 0.22),
            ("Credit card (automatic)", 0.21),
        ],
    );

    let internet_fee = match internet {
        "DSL"         => 25.0,
        "Fiber optic" => 50.0,
        _             => 0.0,
    };
    let monthly = round2(
        (if phone { 20.0 } else { 0.0 })
            + internet_fee
            + 5.0 * n_add_ons
            + if multiple_lines == "Yes" { 5.0 } else { 0.0 }
            + rng.gen_range(-3.0..3.0),
    )
    .max(18.25);

    let total = if tenure > 0.0 {
        Some(round2(tenure * monthly * rng.gen_range(0.92..1.08)))
    } else {
        None
    };

    let logit = -1.6
        + match contract {
            "Month-to-month" => 1.4,
            "One year"       => 0.0,
            _                => -1.4,
        }
        - 0.035 * tenure
        + 0.02 * (monthly - 65.0)
        + if internet == "Fiber optic" { 0.5 } else { 0.0 }
        + if payment == "Electronic check" { 0.45 } else { 0.0 }
        + if senior { 0.3 } else { 0.0 }
        + if has_support { -0.4 } else { 0.0 };
    let p_churn = 1.0 / (1.0 + (-logit).exp());
    let churn   = rng.gen_bool(p_churn.clamp(0.0, 1.0));

    let [security, backup, protection, support, tv, movies] = add_ons;

    CustomerRecord {
        customer_id,
        gender:            Some(if rng.gen_bool(0.5) { "Male" } else { "Female" }.to_string()),
        senior_citizen:    Some(if senior { "Yes" } else { "No" }.to_string()),
        partner:           Some(if partner { "Yes" } else { "No" }.to_string()),
        dependents:        Some(if dependents { "Yes" } else { "No" }.to_string()),
        tenure:            Some(tenure),
        phone_service:     Some(if phone { "Yes" } else { "No" }.to_string()),
        multiple_lines:    Some(multiple_lines),
        internet_service:  Some(internet.to_string()),
        online_security:   Some(security),
        online_backup:     Some(backup),
        device_protection: Some(protection),
        tech_support:      Some(support),
        streaming_tv:      Some(tv),
        streaming_movies:  Some(movies),
        contract:          Some(contract.to_string()),
        paperless_billing: Some(yes_no(rng, 0.59)),
        payment_method:    Some(payment.to_string()),
        monthly_charges:   Some(monthly),
        total_charges:     total,
        churn,
    }
}

fn inject_noise(rec: &mut CustomerRecord, rng: &mut ChaCha8Rng, missing_rate: f64, outlier_rate: f64) {
    if rng.gen_bool(missing_rate.clamp(0.0, 1.0)) {
        match rng.gen_range(0..5) {
            0 => rec.monthly_charges = None,
            1 => rec.total_charges = None,
            2 => rec.payment_method = None,
            3 => rec.online_security = None,
            _ => rec.dependents = None,
        }
    }
    if rng.gen_bool(outlier_rate.clamp(0.0, 1.0)) {
        let factor = rng.gen_range(3.0..6.0);
        rec.monthly_charges = rec.monthly_charges.map(|m| round2(m * factor));
        rec.total_charges   = rec.total_charges.map(|t| round2(t * factor));
    }
}
