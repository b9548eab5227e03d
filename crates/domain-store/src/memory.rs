//! An in-memory reference `Store` implementation. Used by every test in
//! this workspace and by the CLI demo, the way the teacher's test suite
//! leans on `SurrealDbClient::memory()`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use common::filter::CohortPredicates;
use common::ids::{
    CompositeConstructScaleId, ConstructScaleId, DiagnosisId, InstitutionId, ItemId, PatientId,
    QuestionnaireId, SubmissionId, TreatmentId,
};
use common::model::{
    CompositeConstructScale, ConstructScale, Diagnosis, Item, Patient, Questionnaire,
    QuestionnaireItemResponse, QuestionnaireSubmission, Treatment,
};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::{PatientSummary, QuestionnaireScales, Store};

#[derive(Debug, Default)]
struct Data {
    patients: HashMap<PatientId, Patient>,
    diagnoses: HashMap<DiagnosisId, Diagnosis>,
    patient_diagnoses: HashMap<PatientId, Vec<DiagnosisId>>,
    treatments: HashMap<TreatmentId, Treatment>,
    diagnosis_treatments: HashMap<DiagnosisId, Vec<TreatmentId>>,
    questionnaires: HashMap<QuestionnaireId, Questionnaire>,
    items: HashMap<ItemId, Item>,
    construct_scales: HashMap<ConstructScaleId, ConstructScale>,
    composite_scales: HashMap<CompositeConstructScaleId, CompositeConstructScale>,
    submissions: HashMap<SubmissionId, QuestionnaireSubmission>,
    patient_submissions: HashMap<PatientId, Vec<SubmissionId>>,
    responses: HashMap<SubmissionId, Vec<QuestionnaireItemResponse>>,
}

/// An in-memory, `RwLock`-guarded reference implementation of `Store`.
/// Populate it through the `seed_*` methods before handing it to
/// `pro-core`; it is never mutated by anything downstream of `Store`
/// itself (recomputation writes only `ConstructScore`/`CompositeScore`
/// rows, which this store doesn't own).
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    data: std::sync::Arc<RwLock<Data>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_patient(&self, patient: Patient) {
        let mut data = self.data.write().await;
        data.patients.insert(patient.id, patient);
    }

    pub async fn seed_diagnosis(&self, diagnosis: Diagnosis) {
        let mut data = self.data.write().await;
        data.patient_diagnoses
            .entry(diagnosis.patient_id)
            .or_default()
            .push(diagnosis.id);
        data.diagnoses.insert(diagnosis.id, diagnosis);
    }

    pub async fn seed_treatment(&self, treatment: Treatment) {
        let mut data = self.data.write().await;
        data.diagnosis_treatments
            .entry(treatment.diagnosis_id)
            .or_default()
            .push(treatment.id);
        data.treatments.insert(treatment.id, treatment);
    }

    pub async fn seed_questionnaire(&self, questionnaire: Questionnaire) {
        let mut data = self.data.write().await;
        data.questionnaires
            .insert(questionnaire.id, questionnaire);
    }

    pub async fn seed_item(&self, item: Item) {
        let mut data = self.data.write().await;
        data.items.insert(item.id, item);
    }

    pub async fn seed_construct_scale(&self, scale: ConstructScale) {
        let mut data = self.data.write().await;
        data.construct_scales.insert(scale.id, scale);
    }

    pub async fn seed_composite_scale(&self, scale: CompositeConstructScale) {
        let mut data = self.data.write().await;
        data.composite_scales.insert(scale.id, scale);
    }

    pub async fn seed_submission(
        &self,
        submission: QuestionnaireSubmission,
        responses: Vec<QuestionnaireItemResponse>,
    ) {
        let mut data = self.data.write().await;
        data.patient_submissions
            .entry(submission.patient_id)
            .or_default()
            .push(submission.id);
        data.responses.insert(submission.id, responses);
        data.submissions.insert(submission.id, submission);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_patient(&self, id: PatientId) -> StoreResult<Patient> {
        let data = self.data.read().await;
        data.patients
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("patient {id}")))
    }

    async fn list_submissions(
        &self,
        patient_id: PatientId,
        within_window: Option<(NaiveDate, NaiveDate)>,
    ) -> StoreResult<Vec<QuestionnaireSubmission>> {
        let data = self.data.read().await;
        let ids = data
            .patient_submissions
            .get(&patient_id)
            .cloned()
            .unwrap_or_default();
        let mut subs: Vec<QuestionnaireSubmission> = ids
            .into_iter()
            .filter_map(|id| data.submissions.get(&id).cloned())
            .filter(|s| match within_window {
                Some((lo, hi)) => {
                    let d = s.submitted_at.date_naive();
                    d >= lo && d <= hi
                }
                None => true,
            })
            .collect();
        subs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(subs)
    }

    async fn get_submission(&self, id: SubmissionId) -> StoreResult<QuestionnaireSubmission> {
        let data = self.data.read().await;
        data.submissions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("submission {id}")))
    }

    async fn list_responses(
        &self,
        submission_id: SubmissionId,
    ) -> StoreResult<Vec<QuestionnaireItemResponse>> {
        let data = self.data.read().await;
        Ok(data.responses.get(&submission_id).cloned().unwrap_or_default())
    }

    async fn get_item(&self, id: ItemId) -> StoreResult<Item> {
        let data = self.data.read().await;
        data.items
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("item {id}")))
    }

    async fn get_questionnaire(&self, id: QuestionnaireId) -> StoreResult<Questionnaire> {
        let data = self.data.read().await;
        data.questionnaires
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("questionnaire {id}")))
    }

    async fn get_construct_scale(&self, id: ConstructScaleId) -> StoreResult<ConstructScale> {
        let data = self.data.read().await;
        data.construct_scales
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("construct scale {id}")))
    }

    async fn get_composite_scale(
        &self,
        id: CompositeConstructScaleId,
    ) -> StoreResult<CompositeConstructScale> {
        let data = self.data.read().await;
        data.composite_scales
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("composite scale {id}")))
    }

    async fn list_scales_for_questionnaire(
        &self,
        questionnaire_id: QuestionnaireId,
    ) -> StoreResult<QuestionnaireScales> {
        let data = self.data.read().await;
        let questionnaire = data
            .questionnaires
            .get(&questionnaire_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("questionnaire {questionnaire_id}")))?;

        let mut items_by_construct: HashMap<ConstructScaleId, Vec<Item>> = HashMap::new();
        for item_id in &questionnaire.item_ids {
            if let Some(item) = data.items.get(item_id) {
                if let Some(construct_id) = item.construct_scale_id {
                    items_by_construct
                        .entry(construct_id)
                        .or_default()
                        .push(item.clone());
                }
            }
        }

        let mut constructs: Vec<ConstructScale> = items_by_construct
            .keys()
            .filter_map(|id| data.construct_scales.get(id).cloned())
            .collect();
        constructs.sort_by(|a, b| a.id.cmp(&b.id));

        let construct_ids: std::collections::HashSet<ConstructScaleId> =
            constructs.iter().map(|c| c.id).collect();
        let mut composites: Vec<CompositeConstructScale> = data
            .composite_scales
            .values()
            .filter(|c| c.construct_scale_ids.iter().any(|id| construct_ids.contains(id)))
            .cloned()
            .collect();
        composites.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(QuestionnaireScales {
            constructs,
            items_by_construct,
            composites,
        })
    }

    async fn get_patient_diagnoses(&self, patient_id: PatientId) -> StoreResult<Vec<Diagnosis>> {
        let data = self.data.read().await;
        Ok(data
            .patient_diagnoses
            .get(&patient_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| data.diagnoses.get(&id).cloned())
            .collect())
    }

    async fn get_patient_treatments(&self, patient_id: PatientId) -> StoreResult<Vec<Treatment>> {
        let data = self.data.read().await;
        let diag_ids = data
            .patient_diagnoses
            .get(&patient_id)
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::new();
        for diag_id in diag_ids {
            if let Some(tx_ids) = data.diagnosis_treatments.get(&diag_id) {
                for tx_id in tx_ids {
                    if let Some(t) = data.treatments.get(tx_id) {
                        out.push(t.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    async fn get_diagnosis(&self, id: DiagnosisId) -> StoreResult<Diagnosis> {
        let data = self.data.read().await;
        data.diagnoses
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("diagnosis {id}")))
    }

    async fn get_treatment(&self, id: TreatmentId) -> StoreResult<Treatment> {
        let data = self.data.read().await;
        data.treatments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("treatment {id}")))
    }

    async fn list_cohort_patients(
        &self,
        institution_id: InstitutionId,
        predicates: &CohortPredicates,
        as_of: NaiveDate,
    ) -> StoreResult<Vec<PatientSummary>> {
        let data = self.data.read().await;
        let mut out = Vec::new();
        for patient in data.patients.values() {
            if patient.institution_id != institution_id {
                continue;
            }
            if let Some(gender) = predicates.gender {
                if patient.gender != gender {
                    continue;
                }
            }
            if let Some(age_years) = age_in_years(patient.birth_date, as_of) {
                if let Some(min_age) = predicates.min_age {
                    if age_years < min_age {
                        continue;
                    }
                }
                if let Some(max_age) = predicates.max_age {
                    if age_years > max_age {
                        continue;
                    }
                }
            }

            let diag_ids = data
                .patient_diagnoses
                .get(&patient.id)
                .cloned()
                .unwrap_or_default();
            let diagnoses: Vec<&Diagnosis> =
                diag_ids.iter().filter_map(|id| data.diagnoses.get(id)).collect();

            if let Some(category) = &predicates.diagnosis_category {
                if !diagnoses.iter().any(|d| &d.category == category) {
                    continue;
                }
            }

            if let Some(tx_type) = &predicates.treatment_type {
                let has_type = diagnoses.iter().any(|d| {
                    data.diagnosis_treatments
                        .get(&d.id)
                        .map(|tx_ids| {
                            tx_ids.iter().any(|tx_id| {
                                data.treatments
                                    .get(tx_id)
                                    .map(|t| t.treatment_types.iter().any(|t2| t2 == tx_type))
                                    .unwrap_or(false)
                            })
                        })
                        .unwrap_or(false)
                });
                if !has_type {
                    continue;
                }
            }

            out.push(PatientSummary {
                id: patient.id,
                institution_id: patient.institution_id,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

fn age_in_years(birth_date: NaiveDate, as_of: NaiveDate) -> Option<u32> {
    if as_of < birth_date {
        return None;
    }
    let mut years = as_of.year() - birth_date.year();
    let anniversary_passed = (as_of.month(), as_of.day()) >= (birth_date.month(), birth_date.day());
    if !anniversary_passed {
        years -= 1;
    }
    u32::try_from(years).ok()
}
