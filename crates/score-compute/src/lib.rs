//! Recomputes `ConstructScore`/`CompositeScore` rows for a submission
//! (§4.C). Construct scores are evaluated from the submission's typed
//! responses through `expr_engine`; composites fold over the construct
//! scores the submission's questionnaire produced.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use common::ids::{ConstructScaleId, SubmissionId};
use common::model::{classify_response, Combiner, CompositeScore, ConstructScore};
use domain_store::Store;
use expr_engine::{CompiledExpression, Value};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ScoreComputeError {
    #[error(transparent)]
    Store(#[from] domain_store::StoreError),
    #[error("construct {0} has an invalid equation and cannot be evaluated")]
    InvalidExpression(ConstructScaleId),
}

#[derive(Debug, Clone, Default)]
pub struct ScoreComputation {
    pub construct_scores: Vec<ConstructScore>,
    pub composite_scores: Vec<CompositeScore>,
}

/// Computes construct and composite scores for one submission, in the
/// order §4.C requires: constructs first (their equations only ever see
/// this submission's own item responses), composites folded over them.
/// Idempotent: the same submission's responses always produce the same
/// output, since both constructs and composites are iterated in id order.
#[tracing::instrument(skip(store), fields(submission_id = %submission_id))]
pub async fn compute_for_submission(
    store: &dyn Store,
    submission_id: SubmissionId,
) -> Result<ScoreComputation, ScoreComputeError> {
    let submission = store.get_submission(submission_id).await?;
    let responses = store.list_responses(submission_id).await?;
    let scales = store.list_scales_for_questionnaire(submission.questionnaire_id).await?;

    let response_by_item: HashMap<_, _> =
        responses.iter().map(|r| (r.item_id, r.response_value.as_str())).collect();

    let mut constructs = scales.constructs.clone();
    constructs.sort_by_key(|c| c.id);

    let mut construct_scores = Vec::with_capacity(constructs.len());
    let mut values: HashMap<ConstructScaleId, Option<f64>> = HashMap::new();

    for construct in &constructs {
        let mut items = scales.items_by_construct.get(&construct.id).cloned().unwrap_or_default();
        items.sort_by_key(|i| i.item_number);

        let valid_items: HashSet<u32> = items.iter().map(|i| i.item_number).collect();
        let compiled = CompiledExpression::compile(&construct.equation_source, &valid_items)
            .map_err(|_| ScoreComputeError::InvalidExpression(construct.id))?;

        let mut inputs = HashMap::with_capacity(items.len());
        let mut answered = 0usize;
        for item in &items {
            let raw = response_by_item.get(&item.id).copied();
            let typed = classify_response(item, raw);
            if let Some(n) = typed.as_f64() {
                inputs.insert(item.item_number, Value::Number(n));
                answered += 1;
            } else {
                inputs.insert(item.item_number, Value::Null);
            }
        }

        let score = match compiled.evaluate(&inputs) {
            Ok(Value::Number(n)) => Some(n),
            Ok(Value::Null) => None,
            Ok(Value::Bool(_)) => {
                tracing::warn!(construct_id = %construct.id, %submission_id, "construct evaluation error: non-numeric result");
                None
            }
            Err(e) => {
                tracing::warn!(construct_id = %construct.id, %submission_id, error = %e, "construct evaluation error");
                None
            }
        };

        let score = if answered < construct.minimum_number_of_items as usize { None } else { score };
        values.insert(construct.id, score);
        construct_scores.push(ConstructScore {
            submission_id,
            construct_id: construct.id,
            score,
            computed_at: Utc::now(),
        });
    }

    let mut composites = scales.composites.clone();
    composites.sort_by_key(|c| c.id);

    let composite_scores = composites
        .iter()
        .map(|composite| {
            let inputs: Vec<f64> = composite
                .construct_scale_ids
                .iter()
                .filter_map(|id| values.get(id).copied().flatten())
                .collect();
            CompositeScore {
                submission_id,
                composite_id: composite.id,
                score: combine(composite.combiner, &inputs),
                computed_at: Utc::now(),
            }
        })
        .collect();

    Ok(ScoreComputation { construct_scores, composite_scores })
}

/// Folds non-null construct inputs with the composite's combiner;
/// `null` when all inputs are null (§4.C step 3).
fn combine(combiner: Combiner, inputs: &[f64]) -> Option<f64> {
    if inputs.is_empty() {
        return None;
    }
    match combiner {
        Combiner::Sum => Some(inputs.iter().sum()),
        Combiner::Product => Some(inputs.iter().product()),
        Combiner::Mean => Some(inputs.iter().sum::<f64>() / inputs.len() as f64),
        Combiner::Min => inputs.iter().copied().reduce(f64::min),
        Combiner::Max => inputs.iter().copied().reduce(f64::max),
        Combiner::Median => Some(median(inputs)),
        Combiner::Mode => Some(mode(inputs)),
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("non-NaN construct scores"));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Most frequent value; ties broken toward the smallest value, so the
/// result is a deterministic function of the (unordered) input multiset.
fn mode(values: &[f64]) -> f64 {
    let mut counts: Vec<(f64, usize)> = Vec::new();
    for &v in values {
        match counts.iter_mut().find(|(existing, _)| (*existing - v).abs() < f64::EPSILON) {
            Some((_, count)) => *count += 1,
            None => counts.push((v, 1)),
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.partial_cmp(&a.0).expect("non-NaN construct scores")))
        .map(|(v, _)| v)
        .expect("inputs is non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc as ChronoUtc};
    use common::ids::*;
    use common::model::*;
    use domain_store::InMemoryStore;

    fn likert_item(item_number: u32, construct_id: ConstructScaleId) -> Item {
        Item {
            id: ItemId::new(),
            item_number,
            response_type: ResponseType::Likert,
            likert_scale_id: None,
            range_scale_id: None,
            direction: Direction::HigherBetter,
            normative_mean: None,
            normative_sd: None,
            threshold: None,
            mid: None,
            construct_scale_id: Some(construct_id),
            item_missing_value: None,
        }
    }

    async fn seed_scenario_1(store: &InMemoryStore) -> (SubmissionId, ConstructScaleId) {
        let construct_id = ConstructScaleId::new();
        let construct = ConstructScale {
            id: construct_id,
            name: "C1".into(),
            direction: Direction::HigherBetter,
            normative_mean: None,
            normative_sd: None,
            threshold: Some(3.0),
            mid: Some(0.5),
            minimum_number_of_items: 3,
            equation_source: "sum({q1},{q2},{q3},{q4}) / count_available({q1},{q2},{q3},{q4})".into(),
        };
        store.seed_construct_scale(construct).await;

        let items: Vec<Item> = (1..=4).map(|n| likert_item(n, construct_id)).collect();
        for item in &items {
            store.seed_item(item.clone()).await;
        }

        let questionnaire_id = QuestionnaireId::new();
        store
            .seed_questionnaire(Questionnaire {
                id: questionnaire_id,
                display_name_key: "q".into(),
                item_ids: items.iter().map(|i| i.id).collect(),
            })
            .await;

        let patient_id = PatientId::new();
        store
            .seed_patient(Patient {
                id: patient_id,
                institution_id: InstitutionId::new(),
                birth_date: NaiveDate::from_ymd_opt(1990, 1, 1).expect("valid date"),
                gender: Gender::Other,
                registration_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            })
            .await;

        let submission_id = SubmissionId::new();
        let responses = vec![
            QuestionnaireItemResponse { submission_id, item_id: items[0].id, response_value: "4".into() },
            QuestionnaireItemResponse { submission_id, item_id: items[1].id, response_value: "5".into() },
            QuestionnaireItemResponse { submission_id, item_id: items[2].id, response_value: "4".into() },
        ];
        store
            .seed_submission(
                QuestionnaireSubmission {
                    id: submission_id,
                    patient_id,
                    patient_questionnaire_id: PatientQuestionnaireId::new(),
                    questionnaire_id,
                    submitted_at: ChronoUtc::now(),
                },
                responses,
            )
            .await;

        (submission_id, construct_id)
    }

    #[tokio::test]
    async fn scenario_1_mean_over_available_construct_score() {
        let store = InMemoryStore::new();
        let (submission_id, construct_id) = seed_scenario_1(&store).await;

        let result = compute_for_submission(&store, submission_id).await.expect("computation succeeds");
        let score = result
            .construct_scores
            .iter()
            .find(|s| s.construct_id == construct_id)
            .expect("construct score present");
        assert!((score.score.expect("non-null score") - 4.333333333333333).abs() < 1e-9);
    }

    #[tokio::test]
    async fn composite_is_mean_of_non_null_constructs() {
        let store = InMemoryStore::new();
        let construct_a = ConstructScaleId::new();
        let construct_b = ConstructScaleId::new();
        let composite_id = CompositeConstructScaleId::new();

        let item_a = likert_item(1, construct_a);
        let item_b = likert_item(1, construct_b);

        store
            .seed_construct_scale(ConstructScale {
                id: construct_a,
                name: "A".into(),
                direction: Direction::HigherBetter,
                normative_mean: None,
                normative_sd: None,
                threshold: None,
                mid: None,
                minimum_number_of_items: 1,
                equation_source: "{q1}".into(),
            })
            .await;
        store
            .seed_construct_scale(ConstructScale {
                id: construct_b,
                name: "B".into(),
                direction: Direction::HigherBetter,
                normative_mean: None,
                normative_sd: None,
                threshold: None,
                mid: None,
                minimum_number_of_items: 1,
                equation_source: "{q1}".into(),
            })
            .await;
        store
            .seed_composite_scale(CompositeConstructScale {
                id: composite_id,
                name: "X".into(),
                construct_scale_ids: vec![construct_a, construct_b],
                combiner: Combiner::Mean,
            })
            .await;
        store.seed_item(item_a.clone()).await;
        store.seed_item(item_b.clone()).await;

        let questionnaire_id = QuestionnaireId::new();
        store
            .seed_questionnaire(Questionnaire {
                id: questionnaire_id,
                display_name_key: "q".into(),
                item_ids: vec![item_a.id, item_b.id],
            })
            .await;

        let patient_id = PatientId::new();
        store
            .seed_patient(Patient {
                id: patient_id,
                institution_id: InstitutionId::new(),
                birth_date: NaiveDate::from_ymd_opt(1990, 1, 1).expect("valid date"),
                gender: Gender::Other,
                registration_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            })
            .await;

        let submission_id = SubmissionId::new();
        // item_b is unanswered -> construct B is null -> composite mean over {4.0} = 4.0
        let responses = vec![QuestionnaireItemResponse {
            submission_id,
            item_id: item_a.id,
            response_value: "4".into(),
        }];
        store
            .seed_submission(
                QuestionnaireSubmission {
                    id: submission_id,
                    patient_id,
                    patient_questionnaire_id: PatientQuestionnaireId::new(),
                    questionnaire_id,
                    submitted_at: ChronoUtc::now(),
                },
                responses,
            )
            .await;

        let result = compute_for_submission(&store, submission_id).await.expect("computation succeeds");
        let composite = result.composite_scores.first().expect("composite score present");
        assert_eq!(composite.score, Some(4.0));
    }

    #[tokio::test]
    async fn idempotent_on_retry() {
        let store = InMemoryStore::new();
        let (submission_id, _) = seed_scenario_1(&store).await;
        let first = compute_for_submission(&store, submission_id).await.expect("computation succeeds");
        let second = compute_for_submission(&store, submission_id).await.expect("computation succeeds");
        assert_eq!(
            first.construct_scores.iter().map(|s| s.score).collect::<Vec<_>>(),
            second.construct_scores.iter().map(|s| s.score).collect::<Vec<_>>()
        );
    }
}
