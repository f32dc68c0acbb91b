//! Threshold evaluation over the latest analytics record.
//!
//! Evaluation is a pure function of one record: no cooldown and no memory of previous
//! alerts, so a breach that persists fires every cycle.

use crate::{
    error::ConfigError,
    record::{AlertEvent, AlertKind, AnalyticsRecord, Metric},
};
use serde::{Deserialize, Serialize};

/// Enable flag plus bound for one alert kind.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct AlertRule {
    pub enabled: bool,
    pub bound: f64,
}

impl AlertRule {
    pub fn enabled(bound: f64) -> Self {
        Self {
            enabled: true,
            bound,
        }
    }

    pub fn disabled(bound: f64) -> Self {
        Self {
            enabled: false,
            bound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Fires when |z| >= bound
    pub z_score: AlertRule,
    /// Fires when correlation < bound
    pub correlation: AlertRule,
    /// Fires when the ADF p-value >= bound
    pub adf_p_value: AlertRule,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            z_score: AlertRule::enabled(2.0),
            correlation: AlertRule::disabled(0.5),
            adf_p_value: AlertRule::disabled(0.05),
        }
    }
}

impl AlertThresholds {
    pub fn with_z_score(mut self, rule: AlertRule) -> Self {
        self.z_score = rule;
        self
    }

    pub fn with_correlation(mut self, rule: AlertRule) -> Self {
        self.correlation = rule;
        self
    }

    pub fn with_adf_p_value(mut self, rule: AlertRule) -> Self {
        self.adf_p_value = rule;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rules = [
            ("z_score", self.z_score),
            ("correlation", self.correlation),
            ("adf_p_value", self.adf_p_value),
        ];
        match rules.into_iter().find(|(_, rule)| !rule.bound.is_finite()) {
            Some((metric, _)) => Err(ConfigError::NonFiniteBound { metric }),
            None => Ok(()),
        }
    }
}

/// Compare `record` against `thresholds`, returning every breach.
///
/// Absent metrics never fire.
pub fn evaluate(record: &AnalyticsRecord, thresholds: &AlertThresholds) -> Vec<AlertEvent> {
    [
        check(record, AlertKind::ZScore, thresholds.z_score, &record.z_score, |value, bound| {
            value.abs() >= bound
        }),
        check(
            record,
            AlertKind::CorrelationBreakdown,
            thresholds.correlation,
            &record.rolling_correlation,
            |value, bound| value < bound,
        ),
        check(
            record,
            AlertKind::StationarityLoss,
            thresholds.adf_p_value,
            &record.adf_p_value,
            |value, bound| value >= bound,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn check(
    record: &AnalyticsRecord,
    kind: AlertKind,
    rule: AlertRule,
    metric: &Metric,
    breached: impl Fn(f64, f64) -> bool,
) -> Option<AlertEvent> {
    if !rule.enabled {
        return None;
    }
    let value = metric_value(metric)?;

    breached(value, rule.bound).then(|| AlertEvent {
        timestamp: record.timestamp,
        pair: record.pair.clone(),
        source: record.source,
        kind,
        message: message(kind, record, value, rule.bound),
        metric_value: value,
        threshold: rule.bound,
    })
}

fn metric_value(metric: &Metric) -> Option<f64> {
    metric.value().filter(|value| value.is_finite())
}

fn message(kind: AlertKind, record: &AnalyticsRecord, value: f64, bound: f64) -> String {
    match kind {
        AlertKind::ZScore => format!(
            "{} [{}] spread z-score {value:.2} beyond ±{bound:.2}",
            record.pair, record.source
        ),
        AlertKind::CorrelationBreakdown => format!(
            "{} [{}] correlation {value:.3} below {bound:.3}",
            record.pair, record.source
        ),
        AlertKind::StationarityLoss => format!(
            "{} [{}] ADF p-value {value:.3} at or above {bound:.3}, spread not mean-reverting",
            record.pair, record.source
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::AnalyticsError,
        types::{AnalyticsSource, Pair, Symbol},
    };

    fn record(z: Metric, corr: Metric, p: Metric) -> AnalyticsRecord {
        let mut record = AnalyticsRecord::all_absent(
            1_000,
            Pair::new(Symbol::new("ES"), Symbol::new("NQ")),
            AnalyticsSource::Ticks,
            AnalyticsError::insufficient(2, 0),
        );
        record.z_score = z;
        record.rolling_correlation = corr;
        record.adf_p_value = p;
        record
    }

    #[test]
    fn test_evaluate() {
        struct TestCase {
            z: Metric,
            corr: Metric,
            p: Metric,
            expected: Vec<AlertKind>,
        }

        let thresholds = AlertThresholds::default()
            .with_correlation(AlertRule::enabled(0.5))
            .with_adf_p_value(AlertRule::enabled(0.05));
        let absent = || Metric::absent(AnalyticsError::degenerate("flat"));

        let tests = vec![
            TestCase {
                // TC0: nothing breached
                z: Metric::computed(1.0),
                corr: Metric::computed(0.9),
                p: Metric::computed(0.01),
                expected: vec![],
            },
            TestCase {
                // TC1: negative z at the bound
                z: Metric::computed(-2.0),
                corr: Metric::computed(0.9),
                p: Metric::computed(0.01),
                expected: vec![AlertKind::ZScore],
            },
            TestCase {
                // TC2: all three breached
                z: Metric::computed(3.1),
                corr: Metric::computed(0.2),
                p: Metric::computed(0.3),
                expected: vec![
                    AlertKind::ZScore,
                    AlertKind::CorrelationBreakdown,
                    AlertKind::StationarityLoss,
                ],
            },
            TestCase {
                // TC3: absent metrics never fire
                z: absent(),
                corr: absent(),
                p: absent(),
                expected: vec![],
            },
            TestCase {
                // TC4: computed zero correlation is a breach, not an absence
                z: Metric::computed(0.0),
                corr: Metric::computed(0.0),
                p: absent(),
                expected: vec![AlertKind::CorrelationBreakdown],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual: Vec<AlertKind> = evaluate(&record(test.z, test.corr, test.p), &thresholds)
                .into_iter()
                .map(|alert| alert.kind)
                .collect();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_disabled_rules_never_fire() {
        let record = record(
            Metric::computed(10.0),
            Metric::computed(-1.0),
            Metric::computed(0.9),
        );
        let thresholds = AlertThresholds::default().with_z_score(AlertRule::disabled(2.0));

        assert!(evaluate(&record, &thresholds).is_empty());
    }

    #[test]
    fn test_alert_carries_value_and_threshold() {
        let record = record(
            Metric::computed(2.5),
            Metric::computed(0.9),
            Metric::computed(0.01),
        );

        let alerts = evaluate(&record, &AlertThresholds::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric_value, 2.5);
        assert_eq!(alerts[0].threshold, 2.0);
        assert_eq!(alerts[0].timestamp, 1_000);
        assert!(alerts[0].message.contains("NQ/ES"));
    }

    #[test]
    fn test_validate_rejects_non_finite_bound() {
        let thresholds = AlertThresholds::default().with_z_score(AlertRule::enabled(f64::NAN));
        assert_eq!(
            thresholds.validate(),
            Err(ConfigError::NonFiniteBound { metric: "z_score" })
        );
    }
}
