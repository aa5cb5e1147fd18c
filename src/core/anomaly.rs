//! Anomaly flags and a coarse 0-100 risk score for the analysis view.

use crate::core::classifier::{ClassificationResult, Verdict};
use crate::core::features::{BurstReport, ModelFeatures};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn penalty(self) -> u32 {
        match self {
            Severity::High => 20,
            Severity::Medium => 10,
            Severity::Low => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    HighZeroDwell,
    LowTimingVariance,
    HighSymbolUsage,
    BurstRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub description: String,
    pub evidence: String,
}

/// Scan the model features and burst report for patterns worth a look.
pub fn detect_anomalies(features: &ModelFeatures, burst: &BurstReport) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    if features.zero_dwell_ratio > 0.5 {
        anomalies.push(Anomaly {
            kind: AnomalyKind::HighZeroDwell,
            severity: Severity::High,
            description: "High proportion of zero-duration keystrokes".to_string(),
            evidence: format!(
                "{:.1}% of keystrokes have zero dwell time",
                features.zero_dwell_ratio * 100.0
            ),
        });
    }

    // Only meaningful once there are dwell samples to vary.
    if features.total_keystrokes >= 2.0 && features.std_dwell_time < 5.0 {
        anomalies.push(Anomaly {
            kind: AnomalyKind::LowTimingVariance,
            severity: Severity::Medium,
            description: "Unusually consistent keystroke timing".to_string(),
            evidence: format!("dwell standard deviation {:.2}ms", features.std_dwell_time),
        });
    }

    if features.symbol_ratio > 0.3 {
        anomalies.push(Anomaly {
            kind: AnomalyKind::HighSymbolUsage,
            severity: Severity::Low,
            description: "High symbol usage".to_string(),
            evidence: format!(
                "{:.1}% of key presses are symbols; consistent with code or technical writing",
                features.symbol_ratio * 100.0
            ),
        });
    }

    if burst.has_burst {
        anomalies.push(Anomaly {
            kind: AnomalyKind::BurstRun,
            severity: Severity::High,
            description: "Keys typed faster than a person can".to_string(),
            evidence: format!(
                "{} run(s) covering {} of {} keys, longest {}",
                burst.run_count, burst.covered_keys, burst.total_keys, burst.max_run_length
            ),
        });
    }

    anomalies
}

/// Overall risk in [0, 100]: a base from the verdict plus a penalty per
/// anomaly, discounted by confidence when the verdict is human.
pub fn risk_score(result: &ClassificationResult, anomalies: &[Anomaly]) -> u8 {
    let base: u32 = match result.verdict {
        Verdict::Paste | Verdict::PasteDominant => 60,
        Verdict::AssistantAssisted | Verdict::BurstDetected => 40,
        Verdict::MixedInput => 30,
        Verdict::HumanVerified | Verdict::Uncertain | Verdict::InsufficientData => 0,
    };
    let penalties: u32 = anomalies.iter().map(|a| a.severity.penalty()).sum();
    let mut score = f64::from(base + penalties);
    if result.verdict == Verdict::HumanVerified {
        score *= 1.0 - result.confidence * 0.5;
    }
    score.clamp(0.0, 100.0) as u8
}
