//! `FilterContext` and the small vocabulary types it's built from (§6).

use serde::{Deserialize, Serialize};

use crate::ids::{DiagnosisId, ItemId, QuestionnaireId, TreatmentId};
use crate::model::Gender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    Day,
    Week,
    Month,
}

/// Which date a patient's bucket indices are anchored to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorKind {
    Registration,
    Diagnosis(DiagnosisId),
    TreatmentStart(TreatmentId),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionWindow {
    pub upper_bound_date: Option<chrono::NaiveDate>,
    pub max_intervals: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterContext {
    pub anchor: AnchorKind,
    pub granularity: Granularity,
    pub submission_window: SubmissionWindow,
    pub item_filter: Option<Vec<ItemId>>,
    pub questionnaire_filter: Option<Vec<QuestionnaireId>>,
}

/// Predicates narrowing a cohort within one Institution (§4.E step 1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CohortPredicates {
    pub gender: Option<Gender>,
    pub diagnosis_category: Option<String>,
    pub treatment_type: Option<String>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationType {
    MedianIqr,
    MeanCi95,
    MeanSd(SdWidth),
}

/// The five supported standard-deviation band widths (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdWidth {
    Half,
    One,
    OneAndHalf,
    Two,
    TwoAndHalf,
}

impl SdWidth {
    pub fn multiplier(self) -> f64 {
        match self {
            SdWidth::Half => 0.5,
            SdWidth::One => 1.0,
            SdWidth::OneAndHalf => 1.5,
            SdWidth::Two => 2.0,
            SdWidth::TwoAndHalf => 2.5,
        }
    }
}

/// Either a ConstructScale or an Item, the two targets a cohort
/// aggregation (or a per-item series) can be computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationTarget {
    Construct(crate::ids::ConstructScaleId),
    Item(ItemId),
}
