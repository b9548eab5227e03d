//! Classifies current scores and score changes as clinically significant
//! under tiered direction-dependent rules (§4.F).

use common::model::Direction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Improving,
    Worsening,
    Unchanged,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    Mid,
    NormativeSd,
    FallbackRatio,
    ThresholdCrossing,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeResult {
    pub change_significant: bool,
    pub change_direction: ChangeDirection,
    pub reason_used: ChangeReason,
}

/// Current-score significance (§4.F table). Returns `None` when direction
/// is `None` or calibration is insufficient ("not classified").
pub fn classify_current(
    direction: Direction,
    score: f64,
    threshold: Option<f64>,
    mid: Option<f64>,
    normative_mean: Option<f64>,
    normative_sd: Option<f64>,
) -> Option<bool> {
    match direction {
        Direction::HigherBetter => {
            tail_significant(score, threshold, mid, normative_mean, normative_sd, true)
        }
        Direction::LowerBetter => {
            tail_significant(score, threshold, mid, normative_mean, normative_sd, false)
        }
        Direction::MiddleBetter => {
            let lower = tail_significant(score, threshold, mid, normative_mean, normative_sd, true);
            let upper = tail_significant(score, threshold, mid, normative_mean, normative_sd, false);
            match (lower, upper) {
                (Some(l), Some(u)) => Some(l || u),
                _ => None,
            }
        }
        Direction::None => None,
    }
}

/// One directional tail of the rule table, in precedence order: MID+
/// threshold, then normative mean+SD, then threshold alone, then
/// normative mean alone. `worse_is_lower` selects Higher-Better's sense
/// (`true`) or its mirror, Lower-Better (`false`); Middle-Better unions
/// both.
fn tail_significant(
    score: f64,
    threshold: Option<f64>,
    mid: Option<f64>,
    mean: Option<f64>,
    sd: Option<f64>,
    worse_is_lower: bool,
) -> Option<bool> {
    match (threshold, mid) {
        (Some(t), Some(m)) => {
            Some(if worse_is_lower { score <= t - m } else { score >= t + m })
        }
        _ => match (mean, sd) {
            (Some(mu), Some(sigma)) => {
                Some(if worse_is_lower { score <= mu - 0.5 * sigma } else { score >= mu + 0.5 * sigma })
            }
            _ => match threshold {
                Some(t) => Some(if worse_is_lower { score < t } else { score > t }),
                None => mean.map(|mu| if worse_is_lower { score < mu } else { score > mu }),
            },
        },
    }
}

/// Change significance vs. the immediately prior score of the same
/// construct (§4.F). Middle-Better with a known threshold is classified
/// purely by threshold crossing, per the design note; otherwise all
/// directions fall through the MID / normative-σ / fallback-ratio tiers.
#[allow(clippy::too_many_arguments)]
pub fn classify_change(
    direction: Direction,
    current: f64,
    previous: f64,
    threshold: Option<f64>,
    mid: Option<f64>,
    normative_mean: Option<f64>,
    normative_sd: Option<f64>,
    change_fallback_ratio: f64,
) -> ChangeResult {
    let delta = current - previous;
    let change_direction = classify_change_direction(direction, current, previous, threshold, normative_mean);

    if direction == Direction::MiddleBetter {
        if let Some(t) = threshold {
            let crossed = (previous < t) != (current < t);
            return ChangeResult { change_significant: crossed, change_direction, reason_used: ChangeReason::ThresholdCrossing };
        }
    }

    if let Some(m) = mid {
        let worsening_delta = match direction {
            Direction::HigherBetter => -delta,
            Direction::LowerBetter => delta,
            Direction::MiddleBetter | Direction::None => delta.abs(),
        };
        return ChangeResult { change_significant: worsening_delta >= m, change_direction, reason_used: ChangeReason::Mid };
    }

    if let Some(sigma) = normative_sd {
        return ChangeResult { change_significant: delta.abs() >= sigma, change_direction, reason_used: ChangeReason::NormativeSd };
    }

    let change_significant = if previous == 0.0 {
        delta != 0.0
    } else {
        (delta.abs() / previous.abs()) >= change_fallback_ratio
    };
    ChangeResult { change_significant, change_direction, reason_used: ChangeReason::FallbackRatio }
}

fn classify_change_direction(
    direction: Direction,
    current: f64,
    previous: f64,
    threshold: Option<f64>,
    normative_mean: Option<f64>,
) -> ChangeDirection {
    if current == previous {
        return ChangeDirection::Unchanged;
    }
    match direction {
        Direction::HigherBetter => {
            if current > previous { ChangeDirection::Improving } else { ChangeDirection::Worsening }
        }
        Direction::LowerBetter => {
            if current < previous { ChangeDirection::Improving } else { ChangeDirection::Worsening }
        }
        Direction::MiddleBetter => match threshold.or(normative_mean) {
            Some(center) => {
                let (before, after) = ((previous - center).abs(), (current - center).abs());
                match before.partial_cmp(&after) {
                    Some(std::cmp::Ordering::Greater) => ChangeDirection::Improving,
                    Some(std::cmp::Ordering::Less) => ChangeDirection::Worsening,
                    _ => ChangeDirection::Unchanged,
                }
            }
            None => ChangeDirection::Unknown,
        },
        Direction::None => ChangeDirection::Unknown,
    }
}

/// One construct's classification, as consumed by a "topline" view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToplineEntry {
    pub construct_name: String,
    pub current_significant: bool,
    pub change_significant: bool,
}

/// Orders significant constructs per §4.F's ordering contract: those
/// significant on both axes rank first, then alphabetical by name.
pub fn rank_topline(mut entries: Vec<ToplineEntry>) -> Vec<ToplineEntry> {
    entries.sort_by(|a, b| {
        let both_a = a.current_significant && a.change_significant;
        let both_b = b.current_significant && b.change_significant;
        both_b.cmp(&both_a).then_with(|| a.construct_name.cmp(&b.construct_name))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_current_score_not_significant_above_threshold() {
        // threshold 3.0, MID 0.5, Higher-Better, score 4.333
        let significant = classify_current(Direction::HigherBetter, 4.333333333333333, Some(3.0), Some(0.5), None, None);
        assert_eq!(significant, Some(false));
    }

    #[test]
    fn scenario_2_mid_based_worsening_change() {
        let result = classify_change(Direction::HigherBetter, 3.4, 4.0, Some(3.0), Some(0.5), None, None, 0.10);
        assert!(result.change_significant);
        assert_eq!(result.change_direction, ChangeDirection::Worsening);
        assert_eq!(result.reason_used, ChangeReason::Mid);
    }

    #[test]
    fn higher_better_mid_rule() {
        assert_eq!(classify_current(Direction::HigherBetter, 2.4, Some(3.0), Some(0.5), None, None), Some(true));
        assert_eq!(classify_current(Direction::HigherBetter, 2.6, Some(3.0), Some(0.5), None, None), Some(false));
    }

    #[test]
    fn lower_better_mirrors_higher_better() {
        // flipping Higher-Better's mirrored input to Lower-Better inverts the classification (§8 property 5)
        let higher = classify_current(Direction::HigherBetter, 2.4, Some(3.0), Some(0.5), None, None).unwrap();
        let lower = classify_current(Direction::LowerBetter, 3.6, Some(3.0), Some(0.5), None, None).unwrap();
        assert_eq!(higher, lower);
    }

    #[test]
    fn middle_better_unions_both_tails() {
        // normative mean only, no sd: any deviation is significant (resolved open question)
        assert_eq!(classify_current(Direction::MiddleBetter, 10.0, None, None, Some(10.0), None), Some(false));
        assert_eq!(classify_current(Direction::MiddleBetter, 10.1, None, None, Some(10.0), None), Some(true));
        assert_eq!(classify_current(Direction::MiddleBetter, 9.9, None, None, Some(10.0), None), Some(true));
    }

    #[test]
    fn no_calibration_is_not_classified() {
        assert_eq!(classify_current(Direction::HigherBetter, 5.0, None, None, None, None), None);
        assert_eq!(classify_current(Direction::None, 5.0, Some(3.0), Some(0.5), None, None), None);
    }

    #[test]
    fn middle_better_change_is_threshold_crossing() {
        let result = classify_change(Direction::MiddleBetter, 11.0, 9.0, Some(10.0), None, None, None, 0.10);
        assert!(result.change_significant);
        assert_eq!(result.reason_used, ChangeReason::ThresholdCrossing);

        let result = classify_change(Direction::MiddleBetter, 9.0, 8.0, Some(10.0), None, None, None, 0.10);
        assert!(!result.change_significant);
    }

    #[test]
    fn fallback_ratio_used_when_no_mid_or_sd() {
        let result = classify_change(Direction::HigherBetter, 9.0, 10.0, None, None, None, None, 0.10);
        assert!(result.change_significant); // |−1|/10 = 0.10 >= 0.10
        assert_eq!(result.reason_used, ChangeReason::FallbackRatio);
    }

    #[test]
    fn topline_ranks_both_axes_significant_first_then_alphabetical() {
        let entries = vec![
            ToplineEntry { construct_name: "Zeta".into(), current_significant: true, change_significant: true },
            ToplineEntry { construct_name: "Alpha".into(), current_significant: true, change_significant: false },
            ToplineEntry { construct_name: "Beta".into(), current_significant: false, change_significant: true },
        ];
        let ranked = rank_topline(entries);
        assert_eq!(ranked[0].construct_name, "Zeta");
        assert_eq!(ranked[1].construct_name, "Alpha");
        assert_eq!(ranked[2].construct_name, "Beta");
    }
}
