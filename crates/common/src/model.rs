//! Domain entities as plain data. No object-graph back-pointers: every
//! relationship is expressed as an id field, resolved through the Store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{
    CompositeConstructScaleId, ConstructScaleId, DiagnosisId, InstitutionId, ItemId,
    LikertScaleId, PatientId, PatientQuestionnaireId, QuestionnaireId, RangeScaleId,
    SubmissionId, TreatmentId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Female,
    Male,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Institution {
    pub id: InstitutionId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub institution_id: InstitutionId,
    pub birth_date: NaiveDate,
    pub gender: Gender,
    pub registration_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    pub id: DiagnosisId,
    pub patient_id: PatientId,
    pub category: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Treatment {
    pub id: TreatmentId,
    pub diagnosis_id: DiagnosisId,
    pub treatment_types: Vec<String>,
    pub start_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Questionnaire {
    pub id: QuestionnaireId,
    pub display_name_key: String,
    pub item_ids: Vec<ItemId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    Text,
    Number,
    Likert,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    HigherBetter,
    LowerBetter,
    MiddleBetter,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikertOption {
    pub option_value: i64,
    pub display_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikertScale {
    pub id: LikertScaleId,
    pub options: Vec<LikertOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeScale {
    pub id: RangeScaleId,
    pub min: f64,
    pub max: f64,
}

/// An Item's position within its owning ConstructScale's equation,
/// i.e. the `N` in `{qN}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub item_number: u32,
    pub response_type: ResponseType,
    pub likert_scale_id: Option<LikertScaleId>,
    pub range_scale_id: Option<RangeScaleId>,
    pub direction: Direction,
    pub normative_mean: Option<f64>,
    pub normative_sd: Option<f64>,
    pub threshold: Option<f64>,
    pub mid: Option<f64>,
    pub construct_scale_id: Option<ConstructScaleId>,
    /// Resolved value to use in place of an absent Likert response, per
    /// the item's registration-time choice (see the "item_missing_value"
    /// open question). `None` means an absent response is `Value::Null`.
    pub item_missing_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructScale {
    pub id: ConstructScaleId,
    pub name: String,
    pub direction: Direction,
    pub normative_mean: Option<f64>,
    pub normative_sd: Option<f64>,
    pub threshold: Option<f64>,
    pub mid: Option<f64>,
    pub minimum_number_of_items: u32,
    pub equation_source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combiner {
    Sum,
    Product,
    Mean,
    Median,
    Mode,
    Min,
    Max,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeConstructScale {
    pub id: CompositeConstructScaleId,
    pub name: String,
    pub construct_scale_ids: Vec<ConstructScaleId>,
    pub combiner: Combiner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientQuestionnaire {
    pub id: PatientQuestionnaireId,
    pub patient_id: PatientId,
    pub questionnaire_id: QuestionnaireId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionnaireSubmission {
    pub id: SubmissionId,
    pub patient_id: PatientId,
    pub patient_questionnaire_id: PatientQuestionnaireId,
    pub questionnaire_id: QuestionnaireId,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionnaireItemResponse {
    pub submission_id: SubmissionId,
    pub item_id: ItemId,
    pub response_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructScore {
    pub submission_id: SubmissionId,
    pub construct_id: ConstructScaleId,
    pub score: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeScore {
    pub submission_id: SubmissionId,
    pub composite_id: CompositeConstructScaleId,
    pub score: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

/// A response classified into a typed evaluation input, per the
/// "classify at the boundary" design note: Number items yield `Number`,
/// Likert items yield their `option_value` (or `item_missing_value` when
/// absent), Range items yield their numeric value, Text items and
/// unanswered items yield `Null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TypedResponse {
    Number(f64),
    Null,
}

impl TypedResponse {
    pub fn as_f64(self) -> Option<f64> {
        match self {
            TypedResponse::Number(v) => Some(v),
            TypedResponse::Null => None,
        }
    }
}

/// Classifies a raw `response_value` string against an Item's response
/// type. Pure and deterministic; never panics on malformed input — a
/// value that fails to parse is treated as unanswered (`Null`).
pub fn classify_response(item: &Item, raw: Option<&str>) -> TypedResponse {
    let Some(raw) = raw else {
        return match item.item_missing_value {
            Some(v) => TypedResponse::Number(v),
            None => TypedResponse::Null,
        };
    };

    match item.response_type {
        ResponseType::Text => TypedResponse::Null,
        ResponseType::Number | ResponseType::Range => raw
            .trim()
            .parse::<f64>()
            .map(TypedResponse::Number)
            .unwrap_or(TypedResponse::Null),
        ResponseType::Likert => raw
            .trim()
            .parse::<i64>()
            .map(|v| TypedResponse::Number(v as f64))
            .unwrap_or(TypedResponse::Null),
    }
}
