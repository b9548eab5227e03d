//! Maps absolute submission timestamps to integer bucket indices relative
//! to a chosen anchor date at a chosen granularity (§4.D). Pure CPU, no
//! Store access — the caller resolves the anchor's source entities first.

use chrono::{Datelike, NaiveDate};
use common::filter::{Granularity, SubmissionWindow};
use common::model::{Diagnosis, Patient, Treatment};
use common::filter::AnchorKind;
use common::ids::{DiagnosisId, TreatmentId};

/// Resolves a FilterContext anchor against a patient's already-loaded
/// diagnoses/treatments. Returns `None` ("NoAnchor") when the referenced
/// entity, or its date, is missing.
pub fn resolve_anchor(
    anchor: &AnchorKind,
    patient: &Patient,
    diagnoses: &[Diagnosis],
    treatments: &[Treatment],
) -> Option<NaiveDate> {
    match anchor {
        AnchorKind::Registration => Some(patient.registration_date),
        AnchorKind::Diagnosis(id) => find_diagnosis(diagnoses, *id).map(|d| d.date),
        AnchorKind::TreatmentStart(id) => find_treatment(treatments, *id).map(|t| t.start_date),
    }
}

fn find_diagnosis(diagnoses: &[Diagnosis], id: DiagnosisId) -> Option<&Diagnosis> {
    diagnoses.iter().find(|d| d.id == id)
}

fn find_treatment(treatments: &[Treatment], id: TreatmentId) -> Option<&Treatment> {
    treatments.iter().find(|t| t.id == id)
}

/// `floor((date - anchor) / granularity)` using calendar-aware month
/// arithmetic. Submissions before the anchor are excluded (`None`), per
/// the negative-interval policy.
pub fn bucket_index(anchor: NaiveDate, granularity: Granularity, date: NaiveDate) -> Option<i64> {
    if date < anchor {
        return None;
    }
    match granularity {
        Granularity::Day => Some((date - anchor).num_days()),
        Granularity::Week => Some((date - anchor).num_days() / 7),
        Granularity::Month => Some(calendar_months_between(anchor, date)),
    }
}

/// Whole calendar months elapsed from `anchor` to `date` (`date >=
/// anchor`): the month count advances only once the day-of-month has been
/// reached, mirroring how a person would say "it's been 3 months".
fn calendar_months_between(anchor: NaiveDate, date: NaiveDate) -> i64 {
    let mut months = i64::from(date.year() - anchor.year()) * 12
        + i64::from(date.month()) - i64::from(anchor.month());
    if date.day() < anchor.day() {
        months -= 1;
    }
    months.max(0)
}

/// The last bucket-aligned date of the window `[anchor, anchor +
/// max_intervals * granularity]`, further clipped by an explicit
/// `upper_bound_date` if present. `None` for `max_intervals` means no
/// interval-count bound (only the explicit date bound, if any, applies).
pub fn window_upper_bound(
    anchor: NaiveDate,
    granularity: Granularity,
    submission_window: &SubmissionWindow,
) -> Option<NaiveDate> {
    let from_intervals = submission_window.max_intervals.map(|n| {
        let n = i64::from(n);
        match granularity {
            Granularity::Day => anchor + chrono::Duration::days(n),
            Granularity::Week => anchor + chrono::Duration::days(n * 7),
            Granularity::Month => add_months(anchor, n),
        }
    });

    match (from_intervals, submission_window.upper_bound_date) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn add_months(date: NaiveDate, months: i64) -> NaiveDate {
    let total = i64::from(date.year()) * 12 + i64::from(date.month() - 1) + months;
    let year = (total.div_euclid(12)) as i32;
    let month = (total.rem_euclid(12)) as u32 + 1;
    let last_day = last_day_of_month(year, month);
    NaiveDate::from_ymd_opt(year, month, date.day().min(last_day))
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, last_day).expect("valid calendar month"))
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid calendar month")
        .pred_opt()
        .expect("valid calendar day")
        .day()
}

/// Clips `date` to the window `[anchor, upper]` (`upper` from
/// `window_upper_bound`, `None` meaning unbounded above).
pub fn in_window(anchor: NaiveDate, upper: Option<NaiveDate>, date: NaiveDate) -> bool {
    date >= anchor && upper.is_none_or(|u| date <= u)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid test date")
    }

    #[test]
    fn day_bucketing() {
        let anchor = d(2025, 1, 1);
        assert_eq!(bucket_index(anchor, Granularity::Day, d(2025, 1, 1)), Some(0));
        assert_eq!(bucket_index(anchor, Granularity::Day, d(2025, 1, 2)), Some(1));
        assert_eq!(bucket_index(anchor, Granularity::Day, d(2024, 12, 31)), None);
    }

    #[test]
    fn week_bucketing() {
        let anchor = d(2025, 1, 1);
        assert_eq!(bucket_index(anchor, Granularity::Week, d(2025, 1, 7)), Some(0));
        assert_eq!(bucket_index(anchor, Granularity::Week, d(2025, 1, 8)), Some(1));
    }

    #[test]
    fn month_bucketing_is_calendar_aware() {
        let anchor = d(2025, 1, 31);
        // Feb has no 31st: a month hasn't elapsed until Mar 3 in a 28-day Feb.
        assert_eq!(bucket_index(anchor, Granularity::Month, d(2025, 2, 28)), Some(0));
        assert_eq!(bucket_index(anchor, Granularity::Month, d(2025, 3, 2)), Some(1));
        assert_eq!(bucket_index(anchor, Granularity::Month, d(2025, 3, 31)), Some(2));
    }

    #[test]
    fn resolve_anchor_missing_entity_is_none() {
        let patient = Patient {
            id: common::ids::PatientId::new(),
            institution_id: common::ids::InstitutionId::new(),
            birth_date: d(1990, 1, 1),
            gender: common::model::Gender::Other,
            registration_date: d(2024, 1, 1),
        };
        let missing_tx = common::ids::TreatmentId::new();
        assert_eq!(
            resolve_anchor(&AnchorKind::TreatmentStart(missing_tx), &patient, &[], &[]),
            None
        );
        assert_eq!(
            resolve_anchor(&AnchorKind::Registration, &patient, &[], &[]),
            Some(d(2024, 1, 1))
        );
    }

    #[test]
    fn window_upper_bound_takes_the_tighter_of_the_two_bounds() {
        let anchor = d(2025, 1, 1);
        let sw = SubmissionWindow { upper_bound_date: Some(d(2025, 1, 10)), max_intervals: Some(30) };
        assert_eq!(window_upper_bound(anchor, Granularity::Day, &sw), Some(d(2025, 1, 10)));
    }
}
