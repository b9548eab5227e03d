//! Canonical string encoding of a `FilterContext`/cohort request, fed to
//! `pro_cache::key::stable_hash` through `Cache::get_or_compute_*`. Lists
//! are sorted first so equivalent requests always land on the same key.

use common::filter::{AggregationTarget, AnchorKind, CohortPredicates, FilterContext, Granularity};

pub(crate) fn encode(filter: &FilterContext) -> Vec<String> {
    let anchor = match &filter.anchor {
        AnchorKind::Registration => "anchor:registration".to_string(),
        AnchorKind::Diagnosis(id) => format!("anchor:diagnosis:{id}"),
        AnchorKind::TreatmentStart(id) => format!("anchor:treatment:{id}"),
    };
    let granularity = match filter.granularity {
        Granularity::Day => "granularity:day",
        Granularity::Week => "granularity:week",
        Granularity::Month => "granularity:month",
    };

    let mut items: Vec<String> = filter.item_filter.as_ref().map_or_else(Vec::new, |v| v.iter().map(ToString::to_string).collect());
    items.sort();
    let mut questionnaires: Vec<String> =
        filter.questionnaire_filter.as_ref().map_or_else(Vec::new, |v| v.iter().map(ToString::to_string).collect());
    questionnaires.sort();

    vec![
        anchor,
        granularity.to_string(),
        format!("upper:{:?}", filter.submission_window.upper_bound_date),
        format!("intervals:{:?}", filter.submission_window.max_intervals),
        format!("items:{}", items.join(",")),
        format!("questionnaires:{}", questionnaires.join(",")),
    ]
}

pub(crate) fn encode_target(target: AggregationTarget) -> String {
    match target {
        AggregationTarget::Construct(id) => format!("construct:{id}"),
        AggregationTarget::Item(id) => format!("item:{id}"),
    }
}

pub(crate) fn encode_predicates(predicates: &CohortPredicates) -> Vec<String> {
    vec![
        format!("gender:{:?}", predicates.gender),
        format!("diagnosis_category:{:?}", predicates.diagnosis_category),
        format!("treatment_type:{:?}", predicates.treatment_type),
        format!("min_age:{:?}", predicates.min_age),
        format!("max_age:{:?}", predicates.max_age),
    ]
}
