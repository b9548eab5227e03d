//! Demo binary: seeds an in-memory Store with a small sample patient
//! population, then drives `ProCore`'s three operations the way a real
//! caller would, printing each response as JSON.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use common::config::get_config;
use common::filter::{
    AggregationTarget, AggregationType, AnchorKind, CohortPredicates, FilterContext, Granularity,
    SubmissionWindow,
};
use common::ids::{
    ConstructScaleId, InstitutionId, ItemId, PatientId, PatientQuestionnaireId, QuestionnaireId,
    SubmissionId,
};
use common::model::{
    ConstructScale, Direction, Gender, Item, Patient, Questionnaire, QuestionnaireItemResponse,
    QuestionnaireSubmission, ResponseType,
};
use domain_store::InMemoryStore;
use pro_core::ProCore;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid demo date")
}

async fn seed_demo_data(store: &InMemoryStore) -> (InstitutionId, PatientId, ConstructScaleId) {
    let institution_id = InstitutionId::new();
    let patient = Patient {
        id: PatientId::new(),
        institution_id,
        birth_date: date(1985, 6, 12),
        gender: Gender::Female,
        registration_date: date(2024, 1, 1),
    };
    store.seed_patient(patient.clone()).await;

    let construct_id = ConstructScaleId::new();
    let item = Item {
        id: ItemId::new(),
        item_number: 1,
        response_type: ResponseType::Number,
        likert_scale_id: None,
        range_scale_id: None,
        direction: Direction::LowerBetter,
        normative_mean: Some(8.0),
        normative_sd: Some(2.0),
        threshold: None,
        mid: None,
        construct_scale_id: Some(construct_id),
        item_missing_value: None,
    };
    store.seed_item(item.clone()).await;

    store
        .seed_construct_scale(ConstructScale {
            id: construct_id,
            name: "Distress Index".to_string(),
            direction: Direction::LowerBetter,
            normative_mean: Some(8.0),
            normative_sd: Some(2.0),
            threshold: None,
            mid: Some(1.0),
            minimum_number_of_items: 1,
            equation_source: "{q1}".to_string(),
        })
        .await;

    let questionnaire = Questionnaire {
        id: QuestionnaireId::new(),
        display_name_key: "distress_questionnaire".to_string(),
        item_ids: vec![item.id],
    };
    store.seed_questionnaire(questionnaire.clone()).await;

    for (days_ago, value) in [(60i64, 9.5), (30, 7.0), (0, 5.5)] {
        let submission = QuestionnaireSubmission {
            id: SubmissionId::new(),
            patient_id: patient.id,
            patient_questionnaire_id: PatientQuestionnaireId::new(),
            questionnaire_id: questionnaire.id,
            submitted_at: Utc::now() - chrono::Duration::days(days_ago),
        };
        store
            .seed_submission(
                submission.clone(),
                vec![QuestionnaireItemResponse {
                    submission_id: submission.id,
                    item_id: item.id,
                    response_value: value.to_string(),
                }],
            )
            .await;
    }

    (institution_id, patient.id, construct_id)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    info!(?config, "loaded pro-core config");

    let store = InMemoryStore::new();
    let (institution_id, patient_id, construct_id) = seed_demo_data(&store).await;

    let core = ProCore::new(Arc::new(store), config);

    let filter = FilterContext {
        anchor: AnchorKind::Registration,
        granularity: Granularity::Month,
        submission_window: SubmissionWindow::default(),
        item_filter: None,
        questionnaire_filter: None,
    };

    let review = core.get_patient_review(patient_id, &filter, institution_id).await?;
    println!("{}", serde_json::to_string_pretty(&review)?);

    let aggregate = core
        .get_cohort_aggregate(
            AggregationTarget::Construct(construct_id),
            &filter,
            &CohortPredicates::default(),
            AggregationType::MedianIqr,
            patient_id,
            institution_id,
            Utc::now().date_naive(),
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(&aggregate)?);

    Ok(())
}
