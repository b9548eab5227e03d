//! Given a target (construct or item) and a filter cohort, produces
//! per-bucket summary statistics excluding the index patient (§4.E).

use std::collections::HashMap;

use chrono::NaiveDate;
use common::filter::{AggregationTarget, AggregationType, CohortPredicates, FilterContext, SdWidth};
use common::ids::PatientId;
use common::model::classify_response;
use domain_store::Store;
use serde::{Deserialize, Serialize};

const FAN_OUT_CHUNK_SIZE: usize = 16;
const CI_Z_SCORE: f64 = 1.96;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CohortAggregateError {
    #[error(transparent)]
    Store(#[from] domain_store::StoreError),
}

/// A single bucket's summary statistic, ready to overlay as a reference
/// band on the index patient's own series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStat {
    pub bucket_index: i64,
    pub center: Option<f64>,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub n: usize,
    pub insufficient_samples: bool,
}

/// Runs the six-step cohort aggregation algorithm of §4.E. Returns an
/// empty series when the index patient itself has no resolvable anchor
/// (there are then no index buckets to key the aggregation on).
#[tracing::instrument(skip(store, filter, predicates), fields(%index_patient))]
pub async fn aggregate(
    store: &dyn Store,
    target: AggregationTarget,
    filter: &FilterContext,
    predicates: &CohortPredicates,
    agg_type: AggregationType,
    index_patient: PatientId,
    cohort_min_samples: usize,
    as_of: NaiveDate,
) -> Result<Vec<BucketStat>, CohortAggregateError> {
    let index = store.get_patient(index_patient).await?;
    let index_diagnoses = store.get_patient_diagnoses(index_patient).await?;
    let index_treatments = store.get_patient_treatments(index_patient).await?;

    let Some(index_anchor) =
        time_bucket::resolve_anchor(&filter.anchor, &index, &index_diagnoses, &index_treatments)
    else {
        return Ok(Vec::new());
    };
    let window_upper = time_bucket::window_upper_bound(index_anchor, filter.granularity, &filter.submission_window);

    let index_buckets = submission_buckets(store, index_patient, index_anchor, window_upper, filter).await?;
    if index_buckets.is_empty() {
        return Ok(Vec::new());
    }

    let cohort = store
        .list_cohort_patients(index.institution_id, predicates, as_of)
        .await?
        .into_iter()
        .filter(|p| p.id != index_patient)
        .collect::<Vec<_>>();

    let mut values_by_bucket: HashMap<i64, Vec<f64>> = HashMap::new();
    for chunk in cohort.chunks(FAN_OUT_CHUNK_SIZE) {
        let futures = chunk.iter().map(|patient| {
            patient_bucket_values(store, patient.id, filter, target)
        });
        let results = futures::future::join_all(futures).await;
        for result in results {
            let patient_buckets = result?;
            for (bucket, mut values) in patient_buckets {
                values_by_bucket.entry(bucket).or_default().append(&mut values);
            }
        }
    }

    let mut out = Vec::with_capacity(index_buckets.len());
    let mut sorted_index_buckets: Vec<i64> = index_buckets.into_iter().collect();
    sorted_index_buckets.sort_unstable();
    for bucket_index in sorted_index_buckets {
        let values = values_by_bucket.remove(&bucket_index).unwrap_or_default();
        out.push(statistic(bucket_index, &values, agg_type, cohort_min_samples));
    }
    Ok(out)
}

/// The set of bucket indices at which the patient has a submission
/// landing within the window — the domain over which cohort statistics
/// are computed (§4.D "index patient's buckets").
async fn submission_buckets(
    store: &dyn Store,
    patient_id: PatientId,
    anchor: NaiveDate,
    window_upper: Option<NaiveDate>,
    filter: &FilterContext,
) -> Result<std::collections::HashSet<i64>, CohortAggregateError> {
    let window = (anchor, window_upper.unwrap_or(NaiveDate::MAX));
    let submissions = store.list_submissions(patient_id, Some(window)).await?;
    Ok(submissions
        .iter()
        .filter_map(|s| time_bucket::bucket_index(anchor, filter.granularity, s.submitted_at.date_naive()))
        .collect())
}

/// Resolves one cohort patient's anchor, clips their submissions to the
/// window, and buckets their target values. Patients with `NoAnchor` are
/// skipped (empty map), per §4.E step 2.
async fn patient_bucket_values(
    store: &dyn Store,
    patient_id: PatientId,
    filter: &FilterContext,
    target: AggregationTarget,
) -> Result<HashMap<i64, Vec<f64>>, CohortAggregateError> {
    let patient = store.get_patient(patient_id).await?;
    let diagnoses = store.get_patient_diagnoses(patient_id).await?;
    let treatments = store.get_patient_treatments(patient_id).await?;

    let Some(anchor) = time_bucket::resolve_anchor(&filter.anchor, &patient, &diagnoses, &treatments) else {
        return Ok(HashMap::new());
    };
    let window_upper = time_bucket::window_upper_bound(anchor, filter.granularity, &filter.submission_window);
    let window = (anchor, window_upper.unwrap_or(NaiveDate::MAX));
    let submissions = store.list_submissions(patient_id, Some(window)).await?;

    let mut out: HashMap<i64, Vec<f64>> = HashMap::new();
    for submission in &submissions {
        let Some(bucket) = time_bucket::bucket_index(anchor, filter.granularity, submission.submitted_at.date_naive())
        else {
            continue;
        };
        if let Some(value) = target_value(store, submission.id, target).await? {
            out.entry(bucket).or_default().push(value);
        }
    }
    Ok(out)
}

async fn target_value(
    store: &dyn Store,
    submission_id: common::ids::SubmissionId,
    target: AggregationTarget,
) -> Result<Option<f64>, CohortAggregateError> {
    match target {
        AggregationTarget::Item(item_id) => {
            let item = store.get_item(item_id).await?;
            let responses = store.list_responses(submission_id).await?;
            let raw = responses.iter().find(|r| r.item_id == item_id).map(|r| r.response_value.as_str());
            Ok(classify_response(&item, raw).as_f64())
        }
        AggregationTarget::Construct(construct_id) => {
            let computation = score_compute::compute_for_submission(store, submission_id)
                .await
                .map_err(|e| match e {
                    score_compute::ScoreComputeError::Store(s) => CohortAggregateError::Store(s),
                    score_compute::ScoreComputeError::InvalidExpression(_) => {
                        CohortAggregateError::Store(domain_store::StoreError::Unavailable(
                            "construct has an invalid equation".into(),
                        ))
                    }
                })?;
            Ok(computation
                .construct_scores
                .into_iter()
                .find(|s| s.construct_id == construct_id)
                .and_then(|s| s.score))
        }
    }
}

/// Computes the requested statistic over one bucket's non-null cohort
/// values (§4.E "tie-break and numeric policy").
fn statistic(bucket_index: i64, values: &[f64], agg_type: AggregationType, cohort_min_samples: usize) -> BucketStat {
    let n = values.len();
    if n == 0 {
        return BucketStat { bucket_index, center: None, low: None, high: None, n: 0, insufficient_samples: false };
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("non-NaN cohort values"));

    match agg_type {
        AggregationType::MedianIqr => {
            let center = percentile(&sorted, 0.5);
            let low = percentile(&sorted, 0.25);
            let high = percentile(&sorted, 0.75);
            BucketStat { bucket_index, center: Some(center), low: Some(low), high: Some(high), n, insufficient_samples: false }
        }
        AggregationType::MeanCi95 => {
            let mean = sorted.iter().sum::<f64>() / n as f64;
            if n < cohort_min_samples {
                BucketStat { bucket_index, center: Some(mean), low: Some(mean), high: Some(mean), n, insufficient_samples: true }
            } else {
                let sd = sample_sd(&sorted, mean);
                let margin = CI_Z_SCORE * sd / (n as f64).sqrt();
                BucketStat {
                    bucket_index,
                    center: Some(mean),
                    low: Some(mean - margin),
                    high: Some(mean + margin),
                    n,
                    insufficient_samples: false,
                }
            }
        }
        AggregationType::MeanSd(width) => {
            let mean = sorted.iter().sum::<f64>() / n as f64;
            let sd = sample_sd(&sorted, mean);
            let span = width.multiplier() * sd;
            BucketStat {
                bucket_index,
                center: Some(mean),
                low: Some(mean - span),
                high: Some(mean + span),
                n,
                insufficient_samples: false,
            }
        }
    }
}

/// Linear interpolation between order statistics (§4.E). `sorted` must
/// already be ascending.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] + frac * (sorted[upper] - sorted[lower])
    }
}

fn sample_sd(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// `AggregationType::MeanSd` variants, for callers building a request.
pub fn sd_widths() -> [SdWidth; 5] {
    [SdWidth::Half, SdWidth::One, SdWidth::OneAndHalf, SdWidth::Two, SdWidth::TwoAndHalf]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use common::filter::{AnchorKind, Granularity, SubmissionWindow};
    use common::ids::*;
    use common::model::*;
    use domain_store::InMemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    async fn seed_patient_with_item_response(
        store: &InMemoryStore,
        institution_id: InstitutionId,
        item_id: ItemId,
        questionnaire_id: QuestionnaireId,
        registration: NaiveDate,
        submission_date: NaiveDate,
        value: &str,
    ) -> PatientId {
        let patient_id = PatientId::new();
        store
            .seed_patient(Patient {
                id: patient_id,
                institution_id,
                birth_date: date(1990, 1, 1),
                gender: Gender::Other,
                registration_date: registration,
            })
            .await;
        let submission_id = SubmissionId::new();
        store
            .seed_submission(
                QuestionnaireSubmission {
                    id: submission_id,
                    patient_id,
                    patient_questionnaire_id: PatientQuestionnaireId::new(),
                    questionnaire_id,
                    submitted_at: submission_date
                        .and_hms_opt(0, 0, 0)
                        .expect("valid time")
                        .and_utc(),
                },
                vec![QuestionnaireItemResponse { submission_id, item_id, response_value: value.into() }],
            )
            .await;
        patient_id
    }

    #[tokio::test]
    async fn scenario_3_excludes_index_patient() {
        let store = InMemoryStore::new();
        let institution_id = InstitutionId::new();
        let item_id = ItemId::new();
        store
            .seed_item(Item {
                id: item_id,
                item_number: 1,
                response_type: ResponseType::Number,
                likert_scale_id: None,
                range_scale_id: None,
                direction: Direction::HigherBetter,
                normative_mean: None,
                normative_sd: None,
                threshold: None,
                mid: None,
                construct_scale_id: None,
                item_missing_value: None,
            })
            .await;
        let questionnaire_id = QuestionnaireId::new();
        store
            .seed_questionnaire(Questionnaire { id: questionnaire_id, display_name_key: "q".into(), item_ids: vec![item_id] })
            .await;

        let registration = date(2024, 1, 1);
        let submission_date = registration + chrono::Duration::days(28); // week 4

        let _p1 = seed_patient_with_item_response(&store, institution_id, item_id, questionnaire_id, registration, submission_date, "10").await;
        let _p2 = seed_patient_with_item_response(&store, institution_id, item_id, questionnaire_id, registration, submission_date, "20").await;
        let index = seed_patient_with_item_response(&store, institution_id, item_id, questionnaire_id, registration, submission_date, "9999").await;
        let _p4 = seed_patient_with_item_response(&store, institution_id, item_id, questionnaire_id, registration, submission_date, "30").await;

        let filter = FilterContext {
            anchor: AnchorKind::Registration,
            granularity: Granularity::Week,
            submission_window: SubmissionWindow::default(),
            item_filter: None,
            questionnaire_filter: None,
        };
        let result = aggregate(
            &store,
            AggregationTarget::Item(item_id),
            &filter,
            &CohortPredicates::default(),
            AggregationType::MedianIqr,
            index,
            8,
            date(2024, 6, 1),
        )
        .await
        .expect("aggregation succeeds");

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].bucket_index, 4);
        // median of {10, 20, 30} = 20, never influenced by index's 9999.
        assert_eq!(result[0].center, Some(20.0));
        assert_eq!(result[0].n, 3);
    }

    #[tokio::test]
    async fn no_anchor_yields_empty_series() {
        let store = InMemoryStore::new();
        let patient_id = PatientId::new();
        store
            .seed_patient(Patient {
                id: patient_id,
                institution_id: InstitutionId::new(),
                birth_date: date(1990, 1, 1),
                gender: Gender::Other,
                registration_date: date(2024, 1, 1),
            })
            .await;
        let filter = FilterContext {
            anchor: AnchorKind::TreatmentStart(TreatmentId::new()),
            granularity: Granularity::Week,
            submission_window: SubmissionWindow::default(),
            item_filter: None,
            questionnaire_filter: None,
        };
        let result = aggregate(
            &store,
            AggregationTarget::Item(ItemId::new()),
            &filter,
            &CohortPredicates::default(),
            AggregationType::MedianIqr,
            patient_id,
            8,
            date(2024, 6, 1),
        )
        .await
        .expect("aggregation succeeds");
        assert!(result.is_empty());
    }

    #[test]
    fn percentile_matches_linear_interpolation() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.5), 2.5);
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 1.0), 4.0);
    }

    #[test]
    fn mean_ci_flags_insufficient_samples_below_floor() {
        let stat = statistic(0, &[1.0, 2.0, 3.0], AggregationType::MeanCi95, 8);
        assert!(stat.insufficient_samples);
        assert_eq!(stat.low, stat.center);
        assert_eq!(stat.high, stat.center);
    }
}
