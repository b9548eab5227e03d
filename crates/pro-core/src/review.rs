//! Builds one `PatientReview` bundle (§6): patient summary, questionnaire
//! overview, and per-construct/composite/item results with series and
//! clinical interpretation. Pure assembly over Store + score-compute +
//! time-bucket + clinical-interp; no caching here (the facade owns that).

use std::collections::{HashMap, HashSet};

use common::error::CoreError;
use common::filter::FilterContext;
use common::ids::{CompositeConstructScaleId, ConstructScaleId, ItemId, PatientId, QuestionnaireId, SubmissionId};
use common::model::{classify_response, CompositeConstructScale, ConstructScale, Item, QuestionnaireSubmission};
use domain_store::Store;

use crate::types::{
    CompositeResult, ConstructResult, Interpretation, ItemResult, PatientReview, PatientSummary,
    QuestionnaireOverview, SeriesPoint,
};

pub(crate) async fn build(
    store: &dyn Store,
    patient_id: PatientId,
    filter: &FilterContext,
    change_fallback_ratio: f64,
) -> Result<PatientReview, CoreError> {
    let patient = store.get_patient(patient_id).await?;
    let diagnoses = store.get_patient_diagnoses(patient_id).await?;
    let treatments = store.get_patient_treatments(patient_id).await?;
    let anchor = time_bucket::resolve_anchor(&filter.anchor, &patient, &diagnoses, &treatments);

    let mut submissions = store.list_submissions(patient_id, None).await?;
    if let Some(allowed) = &filter.questionnaire_filter {
        let allowed: HashSet<_> = allowed.iter().copied().collect();
        submissions.retain(|s| allowed.contains(&s.questionnaire_id));
    }
    submissions.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));

    let latest = submissions.first().cloned();
    let previous = submissions.get(1).cloned();

    let windowed: Vec<QuestionnaireSubmission> = match anchor {
        Some(anchor_date) => {
            let window_upper = time_bucket::window_upper_bound(anchor_date, filter.granularity, &filter.submission_window);
            let mut windowed: Vec<_> = submissions
                .iter()
                .filter(|s| time_bucket::in_window(anchor_date, window_upper, s.submitted_at.date_naive()))
                .cloned()
                .collect();
            windowed.sort_by_key(|s| s.submitted_at);
            windowed
        }
        None => Vec::new(),
    };

    let mut questionnaire_ids: Vec<QuestionnaireId> = submissions.iter().map(|s| s.questionnaire_id).collect();
    questionnaire_ids.sort();
    questionnaire_ids.dedup();

    let mut constructs_by_id: HashMap<ConstructScaleId, ConstructScale> = HashMap::new();
    let mut composites_by_id: HashMap<CompositeConstructScaleId, CompositeConstructScale> = HashMap::new();
    let mut items_by_id: HashMap<ItemId, Item> = HashMap::new();
    let mut questionnaires_overview = Vec::with_capacity(questionnaire_ids.len());

    for q_id in &questionnaire_ids {
        let questionnaire = store.get_questionnaire(*q_id).await?;
        let scales = store.list_scales_for_questionnaire(*q_id).await?;
        for c in scales.constructs {
            constructs_by_id.entry(c.id).or_insert(c);
        }
        for comp in scales.composites {
            composites_by_id.entry(comp.id).or_insert(comp);
        }
        for items in scales.items_by_construct.into_values() {
            for item in items {
                items_by_id.entry(item.id).or_insert(item);
            }
        }
        let q_submissions: Vec<_> = submissions.iter().filter(|s| s.questionnaire_id == *q_id).collect();
        questionnaires_overview.push(QuestionnaireOverview {
            id: *q_id,
            display_name_key: questionnaire.display_name_key,
            submission_count: q_submissions.len(),
            last_submitted_at: q_submissions.iter().map(|s| s.submitted_at).max(),
        });
    }

    let mut computed: HashMap<SubmissionId, score_compute::ScoreComputation> = HashMap::new();
    for s in submissions.iter().chain(windowed.iter()) {
        if let std::collections::hash_map::Entry::Vacant(slot) = computed.entry(s.id) {
            let result = score_compute::compute_for_submission(store, s.id).await.map_err(map_score_error)?;
            slot.insert(result);
        }
    }

    let mut construct_ids: Vec<ConstructScaleId> = constructs_by_id.keys().copied().collect();
    construct_ids.sort();

    let mut construct_scores = Vec::with_capacity(construct_ids.len());
    for construct_id in &construct_ids {
        let construct = constructs_by_id.get(construct_id).expect("key sourced from this map");
        let current = construct_score_of(&computed, latest.as_ref(), *construct_id);
        let previous_score = construct_score_of(&computed, previous.as_ref(), *construct_id);

        let series = windowed
            .iter()
            .filter_map(|s| {
                let value = computed
                    .get(&s.id)?
                    .construct_scores
                    .iter()
                    .find(|cs| cs.construct_id == *construct_id)?
                    .score;
                Some(SeriesPoint { t: s.submitted_at, v: value })
            })
            .collect();

        let current_significant = current.and_then(|score| {
            clinical_interp::classify_current(
                construct.direction,
                score,
                construct.threshold,
                construct.mid,
                construct.normative_mean,
                construct.normative_sd,
            )
        });
        let (change_significant, change_direction, reason_used) = match (current, previous_score) {
            (Some(cur), Some(prev)) => {
                let result = clinical_interp::classify_change(
                    construct.direction,
                    cur,
                    prev,
                    construct.threshold,
                    construct.mid,
                    construct.normative_mean,
                    construct.normative_sd,
                    change_fallback_ratio,
                );
                (Some(result.change_significant), Some(result.change_direction), Some(result.reason_used))
            }
            _ => (None, None, None),
        };

        construct_scores.push(ConstructResult {
            construct_id: *construct_id,
            current,
            previous: previous_score,
            series,
            interpretation: Interpretation { current_significant, change_significant, change_direction, reason_used },
        });
    }

    let mut composite_ids: Vec<CompositeConstructScaleId> = composites_by_id.keys().copied().collect();
    composite_ids.sort();
    let composite_scores = composite_ids
        .iter()
        .map(|composite_id| CompositeResult {
            composite_id: *composite_id,
            current: composite_score_of(&computed, latest.as_ref(), *composite_id),
            previous: composite_score_of(&computed, previous.as_ref(), *composite_id),
        })
        .collect();

    let mut item_ids: Vec<ItemId> = items_by_id.keys().copied().collect();
    if let Some(filter_items) = &filter.item_filter {
        let allowed: HashSet<_> = filter_items.iter().copied().collect();
        item_ids.retain(|id| allowed.contains(id));
    }
    item_ids.sort();

    let mut items: Vec<ItemResult> = item_ids.iter().map(|id| ItemResult { item_id: *id, series: Vec::new() }).collect();
    for s in &windowed {
        let responses = store.list_responses(s.id).await?;
        for item_result in &mut items {
            let item = items_by_id.get(&item_result.item_id).expect("key sourced from this map");
            let raw = responses.iter().find(|r| r.item_id == item.id).map(|r| r.response_value.as_str());
            let value = classify_response(item, raw).as_f64();
            item_result.series.push(SeriesPoint { t: s.submitted_at, v: value });
        }
    }

    Ok(PatientReview {
        patient_summary: PatientSummary {
            id: patient.id,
            gender: patient.gender,
            birth_date: patient.birth_date,
            registration_date: patient.registration_date,
            has_anchor: anchor.is_some(),
        },
        questionnaires_overview,
        construct_scores,
        composite_scores,
        items,
    })
}

fn construct_score_of(
    computed: &HashMap<SubmissionId, score_compute::ScoreComputation>,
    submission: Option<&QuestionnaireSubmission>,
    construct_id: ConstructScaleId,
) -> Option<f64> {
    let s = submission?;
    computed.get(&s.id)?.construct_scores.iter().find(|cs| cs.construct_id == construct_id)?.score
}

fn composite_score_of(
    computed: &HashMap<SubmissionId, score_compute::ScoreComputation>,
    submission: Option<&QuestionnaireSubmission>,
    composite_id: CompositeConstructScaleId,
) -> Option<f64> {
    let s = submission?;
    computed.get(&s.id)?.composite_scores.iter().find(|cs| cs.composite_id == composite_id)?.score
}

fn map_score_error(e: score_compute::ScoreComputeError) -> CoreError {
    match e {
        score_compute::ScoreComputeError::Store(store_err) => store_err.into(),
        score_compute::ScoreComputeError::InvalidExpression(id) => {
            CoreError::InvalidExpression(format!("construct {id} has an invalid equation"))
        }
    }
}
