//! The abstract, read-only Domain Store capability (§4.A). Everything
//! downstream of it depends only on this trait, never on a concrete
//! backend, matching the "pass a capability explicitly" design note.

use async_trait::async_trait;
use chrono::NaiveDate;
use common::filter::CohortPredicates;
use common::ids::{
    CompositeConstructScaleId, ConstructScaleId, DiagnosisId, InstitutionId, ItemId, PatientId,
    QuestionnaireId, SubmissionId, TreatmentId,
};
use common::model::{
    CompositeConstructScale, ConstructScale, Diagnosis, Item, Patient, Questionnaire,
    QuestionnaireItemResponse, QuestionnaireSubmission, Treatment,
};

use crate::error::StoreResult;

/// A minimal patient summary for cohort resolution — no PII beyond what
/// predicates need to filter on.
#[derive(Debug, Clone)]
pub struct PatientSummary {
    pub id: PatientId,
    pub institution_id: InstitutionId,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_patient(&self, id: PatientId) -> StoreResult<Patient>;

    async fn get_institution_id(&self, patient_id: PatientId) -> StoreResult<InstitutionId> {
        Ok(self.get_patient(patient_id).await?.institution_id)
    }

    async fn list_submissions(
        &self,
        patient_id: PatientId,
        within_window: Option<(NaiveDate, NaiveDate)>,
    ) -> StoreResult<Vec<QuestionnaireSubmission>>;

    async fn get_submission(&self, id: SubmissionId) -> StoreResult<QuestionnaireSubmission>;

    async fn list_responses(
        &self,
        submission_id: SubmissionId,
    ) -> StoreResult<Vec<QuestionnaireItemResponse>>;

    async fn get_item(&self, id: ItemId) -> StoreResult<Item>;

    async fn get_questionnaire(&self, id: QuestionnaireId) -> StoreResult<Questionnaire>;

    async fn get_construct_scale(&self, id: ConstructScaleId) -> StoreResult<ConstructScale>;

    async fn get_composite_scale(
        &self,
        id: CompositeConstructScaleId,
    ) -> StoreResult<CompositeConstructScale>;

    /// Every distinct ConstructScale with at least one Item in this
    /// questionnaire, the Items belonging to it, and the composites that
    /// reference any of those constructs.
    async fn list_scales_for_questionnaire(
        &self,
        questionnaire_id: QuestionnaireId,
    ) -> StoreResult<QuestionnaireScales>;

    async fn get_patient_diagnoses(&self, patient_id: PatientId) -> StoreResult<Vec<Diagnosis>>;

    async fn get_patient_treatments(&self, patient_id: PatientId) -> StoreResult<Vec<Treatment>>;

    async fn get_diagnosis(&self, id: DiagnosisId) -> StoreResult<Diagnosis>;

    async fn get_treatment(&self, id: TreatmentId) -> StoreResult<Treatment>;

    /// Patients within one Institution matching the given predicates,
    /// evaluated as of `as_of` (age math needs a reference date to stay
    /// deterministic under test).
    async fn list_cohort_patients(
        &self,
        institution_id: InstitutionId,
        predicates: &CohortPredicates,
        as_of: NaiveDate,
    ) -> StoreResult<Vec<PatientSummary>>;
}

#[derive(Debug, Clone, Default)]
pub struct QuestionnaireScales {
    pub constructs: Vec<ConstructScale>,
    pub items_by_construct: std::collections::HashMap<ConstructScaleId, Vec<Item>>,
    pub composites: Vec<CompositeConstructScale>,
}
