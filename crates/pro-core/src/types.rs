//! External response shapes (§6), unchanged from `spec.md` save for being
//! given concrete Rust types.

use chrono::{DateTime, NaiveDate, Utc};
use clinical_interp::{ChangeDirection, ChangeReason};
use common::ids::{CompositeConstructScaleId, ConstructScaleId, ItemId, PatientId, QuestionnaireId};
use common::model::Gender;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    pub id: PatientId,
    pub gender: Gender,
    pub birth_date: NaiveDate,
    pub registration_date: NaiveDate,
    pub has_anchor: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionnaireOverview {
    pub id: QuestionnaireId,
    pub display_name_key: String,
    pub submission_count: usize,
    pub last_submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub t: DateTime<Utc>,
    pub v: Option<f64>,
}

/// The current-score and change classification for one construct, or all
/// `None` when calibration is insufficient to classify ("not classified").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Interpretation {
    pub current_significant: Option<bool>,
    pub change_significant: Option<bool>,
    pub change_direction: Option<ChangeDirection>,
    pub reason_used: Option<ChangeReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructResult {
    pub construct_id: ConstructScaleId,
    pub current: Option<f64>,
    pub previous: Option<f64>,
    pub series: Vec<SeriesPoint>,
    pub interpretation: Interpretation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeResult {
    pub composite_id: CompositeConstructScaleId,
    pub current: Option<f64>,
    pub previous: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: ItemId,
    pub series: Vec<SeriesPoint>,
}

/// The full response of `GetPatientReview` (§6). The `pscores:*`/
/// `pitem:*`/`pcomp:*` key families are realized as one cached bundle per
/// (patient, FilterContext) — see DESIGN.md.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientReview {
    pub patient_summary: PatientSummary,
    pub questionnaires_overview: Vec<QuestionnaireOverview>,
    pub construct_scores: Vec<ConstructResult>,
    pub composite_scores: Vec<CompositeResult>,
    pub items: Vec<ItemResult>,
}
