//! The facade wiring components A-G together (§4, §5, §6): `ProCore`
//! exposes `GetPatientReview`, `GetCohortAggregate`, and
//! `OnSubmissionWritten` over an injected `Store` and `CoreConfig`, never
//! global state.

mod filter_key;
mod review;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use common::config::CoreConfig;
use common::error::CoreError;
use common::filter::{AggregationTarget, AggregationType, CohortPredicates, FilterContext};
use common::ids::{InstitutionId, PatientId, SubmissionId};
use cohort_aggregate::BucketStat;
use domain_store::Store;
use tokio::sync::Mutex;

pub use types::PatientReview;

/// Constructor-injected facade; never a global singleton (§9 design
/// note). One `ProCore` owns its own caches and per-patient lock table.
pub struct ProCore {
    store: Arc<dyn Store>,
    config: CoreConfig,
    review_cache: Arc<pro_cache::Cache<PatientReview>>,
    cohort_cache: Arc<pro_cache::Cache<Vec<BucketStat>>>,
    patient_locks: Mutex<HashMap<PatientId, Arc<Mutex<()>>>>,
}

impl ProCore {
    pub fn new(store: Arc<dyn Store>, config: CoreConfig) -> Self {
        let population_ttl = Duration::from_secs(config.cache_ttl_population_secs);
        let patient_ttl = Duration::from_secs(config.cache_ttl_patient_secs);
        Self {
            store,
            review_cache: Arc::new(pro_cache::Cache::new(population_ttl, patient_ttl)),
            cohort_cache: Arc::new(pro_cache::Cache::new(population_ttl, patient_ttl)),
            config,
            patient_locks: Mutex::new(HashMap::new()),
        }
    }

    /// `GetPatientReview(patient_id, FilterContext) -> PatientReview` (§6).
    #[tracing::instrument(skip(self, filter), fields(%patient_id))]
    pub async fn get_patient_review(
        &self,
        patient_id: PatientId,
        filter: &FilterContext,
        requesting_institution_id: InstitutionId,
    ) -> Result<PatientReview, CoreError> {
        let deadline = Duration::from_millis(self.config.read_timeout_ms);
        tokio::time::timeout(deadline, self.get_patient_review_inner(patient_id, filter, requesting_institution_id))
            .await
            .map_err(|_| CoreError::Unavailable("patient review timed out".into()))?
    }

    async fn get_patient_review_inner(
        &self,
        patient_id: PatientId,
        filter: &FilterContext,
        requesting_institution_id: InstitutionId,
    ) -> Result<PatientReview, CoreError> {
        let patient = self.store.get_patient(patient_id).await?;
        if patient.institution_id != requesting_institution_id {
            return Err(CoreError::Unauthorized(format!(
                "patient {patient_id} is not in institution {requesting_institution_id}"
            )));
        }

        let mut parts = vec![patient_id.to_string()];
        parts.extend(filter_key::encode(filter));
        let part_refs: Vec<&str> = parts.iter().map(String::as_str).collect();

        let store = self.store.clone();
        let filter_owned = filter.clone();
        let change_fallback_ratio = self.config.change_fallback_ratio;
        let failure: Arc<Mutex<Option<CoreError>>> = Arc::new(Mutex::new(None));
        let failure_slot = failure.clone();

        let result = self
            .review_cache
            .get_or_compute_patient("preview", patient_id, &part_refs, move || async move {
                match review::build(store.as_ref(), patient_id, &filter_owned, change_fallback_ratio).await {
                    Ok(review) => Ok(review),
                    Err(e) => {
                        let message = e.to_string();
                        *failure_slot.lock().await = Some(e);
                        Err(pro_cache::CacheError::Upstream(message))
                    }
                }
            })
            .await;

        match result {
            Ok(review) => Ok(review),
            Err(_) => {
                let mut guard = failure.lock().await;
                Err(guard.take().unwrap_or(CoreError::Unavailable("patient review computation failed".into())))
            }
        }
    }

    /// `GetCohortAggregate(target, FilterContext, cohort_predicates,
    /// aggregation_type, index_patient) -> [BucketStat]` (§6). Always
    /// excludes `index_patient` from the cohort (enforced in
    /// `cohort_aggregate::aggregate`).
    #[tracing::instrument(skip(self, filter, predicates), fields(%index_patient))]
    #[allow(clippy::too_many_arguments)]
    pub async fn get_cohort_aggregate(
        &self,
        target: AggregationTarget,
        filter: &FilterContext,
        predicates: &CohortPredicates,
        agg_type: AggregationType,
        index_patient: PatientId,
        requesting_institution_id: InstitutionId,
        as_of: NaiveDate,
    ) -> Result<Vec<BucketStat>, CoreError> {
        let deadline = Duration::from_millis(self.config.read_timeout_ms);
        tokio::time::timeout(
            deadline,
            self.get_cohort_aggregate_inner(target, filter, predicates, agg_type, index_patient, requesting_institution_id, as_of),
        )
        .await
        .map_err(|_| CoreError::Unavailable("cohort aggregate timed out".into()))?
    }

    #[allow(clippy::too_many_arguments)]
    async fn get_cohort_aggregate_inner(
        &self,
        target: AggregationTarget,
        filter: &FilterContext,
        predicates: &CohortPredicates,
        agg_type: AggregationType,
        index_patient: PatientId,
        requesting_institution_id: InstitutionId,
        as_of: NaiveDate,
    ) -> Result<Vec<BucketStat>, CoreError> {
        let index = self.store.get_patient(index_patient).await?;
        if index.institution_id != requesting_institution_id {
            return Err(CoreError::Unauthorized(format!(
                "patient {index_patient} is not in institution {requesting_institution_id}"
            )));
        }

        let mut parts = vec![index_patient.to_string(), filter_key::encode_target(target), format!("{agg_type:?}")];
        parts.extend(filter_key::encode(filter));
        parts.extend(filter_key::encode_predicates(predicates));
        let part_refs: Vec<&str> = parts.iter().map(String::as_str).collect();

        let store = self.store.clone();
        let filter_owned = filter.clone();
        let predicates_owned = predicates.clone();
        let cohort_min_samples = self.config.cohort_min_samples;
        let failure: Arc<Mutex<Option<CoreError>>> = Arc::new(Mutex::new(None));
        let failure_slot = failure.clone();

        let result = self
            .cohort_cache
            .get_or_compute_population("agg", &part_refs, move || async move {
                let outcome = cohort_aggregate::aggregate(
                    store.as_ref(),
                    target,
                    &filter_owned,
                    &predicates_owned,
                    agg_type,
                    index_patient,
                    cohort_min_samples,
                    as_of,
                )
                .await;
                match outcome {
                    Ok(stats) => Ok(stats),
                    Err(cohort_aggregate::CohortAggregateError::Store(store_err)) => {
                        let core_err: CoreError = store_err.into();
                        let message = core_err.to_string();
                        *failure_slot.lock().await = Some(core_err);
                        Err(pro_cache::CacheError::Upstream(message))
                    }
                }
            })
            .await;

        match result {
            Ok(stats) => Ok(stats),
            Err(_) => {
                let mut guard = failure.lock().await;
                Err(guard.take().unwrap_or(CoreError::Unavailable("cohort aggregate computation failed".into())))
            }
        }
    }

    /// `OnSubmissionWritten(submission_id)` (§6): idempotent invalidation
    /// hook invoked by the write path after commit. Recomputes the
    /// submission's scores (surfacing `InvalidExpression`/store failures)
    /// under the submitting patient's lock, then invalidates that
    /// patient's review cache and fires a detached, fire-and-forget
    /// population-cache invalidation (§5 concurrency model).
    #[tracing::instrument(skip(self), fields(%submission_id))]
    pub async fn on_submission_written(&self, submission_id: SubmissionId) -> Result<(), CoreError> {
        let submission = self.store.get_submission(submission_id).await?;
        let patient_id = submission.patient_id;

        let lock = self.patient_lock(patient_id).await;
        let _guard = lock.lock().await;

        score_compute::compute_for_submission(self.store.as_ref(), submission_id).await.map_err(|e| match e {
            score_compute::ScoreComputeError::Store(store_err) => store_err.into(),
            score_compute::ScoreComputeError::InvalidExpression(id) => {
                CoreError::InvalidExpression(format!("construct {id} has an invalid equation"))
            }
        })?;

        self.review_cache.invalidate_patient(patient_id).await;

        let cohort_cache = self.cohort_cache.clone();
        tokio::spawn(async move {
            cohort_cache.invalidate_population();
        });

        Ok(())
    }

    async fn patient_lock(&self, patient_id: PatientId) -> Arc<Mutex<()>> {
        let mut locks = self.patient_locks.lock().await;
        locks.entry(patient_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}
