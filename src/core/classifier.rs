//! Hybrid verdict cascade.
//!
//! Volume ratios, burst timing and an optional model prediction are combined
//! by an ordered first-match-wins rule list. A weighted consensus score is
//! computed alongside for display only; it never changes the label.

use crate::core::features::BurstReport;
use crate::core::model::{ModelLabel, Prediction};
use crate::session::ledger::{CharacterLedger, VolumeRatios};
use serde::{Deserialize, Serialize};

/// Thresholds and weights for the cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Paste/assistant share above which the volume rules fire (strict `>`)
    pub volume_threshold: f64,
    /// Paste share above which the verdict becomes `paste_dominant`
    pub strong_paste_threshold: f64,
    /// Paste/assistant share that raises a suspicion signal
    pub suspicious_volume: f64,
    /// Burst severity above which the burst rule fires
    pub burst_severity_threshold: f64,
    /// Minimum model confidence for a non-human label to win
    pub model_confidence_threshold: f64,
    /// Typed share required for `human_verified`
    pub human_ratio_threshold: f64,
    /// Below this many classified characters the result is `insufficient_data`
    pub min_characters: u64,
    /// Below this many genuine key presses the model is not consulted
    pub min_model_keys: usize,
    /// Confidence for `uncertain` when there is no prior result
    pub fallback_confidence: f64,
    pub volume_weight: f64,
    pub model_weight: f64,
    pub burst_weight: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 0.10,
            strong_paste_threshold: 0.50,
            suspicious_volume: 0.05,
            burst_severity_threshold: 0.05,
            model_confidence_threshold: 0.65,
            human_ratio_threshold: 0.90,
            min_characters: 20,
            min_model_keys: 10,
            fallback_confidence: 0.4,
            volume_weight: 0.5,
            model_weight: 0.3,
            burst_weight: 0.2,
        }
    }
}

/// Final label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Not enough input yet; neutral, never a failed check
    InsufficientData,
    HumanVerified,
    Paste,
    PasteDominant,
    AssistantAssisted,
    BurstDetected,
    MixedInput,
    Uncertain,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::InsufficientData => "insufficient_data",
            Verdict::HumanVerified => "human_verified",
            Verdict::Paste => "paste",
            Verdict::PasteDominant => "paste_dominant",
            Verdict::AssistantAssisted => "assistant_assisted",
            Verdict::BurstDetected => "burst_detected",
            Verdict::MixedInput => "mixed_input",
            Verdict::Uncertain => "uncertain",
        }
    }

    /// True for verdicts that flag non-human input.
    pub fn is_flagged(self) -> bool {
        matches!(
            self,
            Verdict::Paste
                | Verdict::PasteDominant
                | Verdict::AssistantAssisted
                | Verdict::BurstDetected
                | Verdict::MixedInput
        )
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Basis {
    SampleGate,
    VolumeRule,
    BurstRule,
    ModelRule,
    Consensus,
}

/// Individual detection signals, reported for transparency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    VolumeHigh,
    VolumeSuspicious,
    BurstDetected,
    BurstSuspicious,
    ModelNonHuman,
    ModelSuspicious,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub verdict: Verdict,
    pub confidence: f64,
    pub ratios: VolumeRatios,
    pub basis: Basis,
    #[serde(default)]
    pub signals: Vec<Signal>,
    /// Diagnostic weighted score of human-likeness; not authoritative
    #[serde(default)]
    pub consensus_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Prediction>,
    #[serde(default)]
    pub feedback: String,
}

impl ClassificationResult {
    pub fn is_waiting(&self) -> bool {
        self.verdict == Verdict::InsufficientData
    }
}

/// Everything the cascade looks at.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    pub ratios: VolumeRatios,
    /// Classified characters behind `ratios`
    pub total_chars: u64,
    /// Volume counts for feedback text
    pub ledger: Option<&'a CharacterLedger>,
    pub burst: &'a BurstReport,
    pub prediction: Option<&'a Prediction>,
    /// Confidence of the previous result for this session
    pub prior_confidence: Option<f64>,
}

impl<'a> ClassifierInput<'a> {
    pub fn from_ledger(ledger: &'a CharacterLedger, burst: &'a BurstReport) -> Self {
        Self {
            ratios: ledger.ratios(),
            total_chars: ledger.total(),
            ledger: Some(ledger),
            burst,
            prediction: None,
            prior_confidence: None,
        }
    }

    pub fn with_prediction(mut self, prediction: Option<&'a Prediction>) -> Self {
        self.prediction = prediction;
        self
    }

    pub fn with_prior(mut self, prior_confidence: Option<f64>) -> Self {
        self.prior_confidence = prior_confidence;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct HybridClassifier {
    config: ClassifierConfig,
}

impl HybridClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Run the cascade.
    pub fn classify(&self, input: &ClassifierInput<'_>) -> ClassificationResult {
        let cfg = &self.config;
        let ratios = input.ratios;
        let signals = self.signals(input);
        let consensus_score = self.consensus(input);
        let model = input.prediction.cloned();

        let result = |verdict, confidence: f64, basis, feedback: String| ClassificationResult {
            verdict,
            confidence: confidence.clamp(0.0, 1.0),
            ratios,
            basis,
            signals: signals.clone(),
            consensus_score,
            model: model.clone(),
            feedback,
        };

        if input.total_chars < cfg.min_characters {
            return result(
                Verdict::InsufficientData,
                0.0,
                Basis::SampleGate,
                format!(
                    "Waiting for more input: {} of {} characters recorded.",
                    input.total_chars, cfg.min_characters
                ),
            );
        }

        if ratios.paste > cfg.volume_threshold {
            let verdict = if ratios.paste > cfg.strong_paste_threshold {
                Verdict::PasteDominant
            } else {
                Verdict::Paste
            };
            return result(
                verdict,
                (0.5 + ratios.paste * 0.5).min(0.99),
                Basis::VolumeRule,
                format!(
                    "Paste detected: {} of the content was pasted{}.",
                    percent(ratios.paste),
                    self.volume_detail(input, |l| l.pasted)
                ),
            );
        }

        if ratios.assistant > cfg.volume_threshold {
            return result(
                Verdict::AssistantAssisted,
                (0.5 + ratios.assistant * 0.5).min(0.99),
                Basis::VolumeRule,
                format!(
                    "Assistant insertion detected: {} of the content came from accepted suggestions{}.",
                    percent(ratios.assistant),
                    self.volume_detail(input, |l| l.assistant)
                ),
            );
        }

        if input.burst.severity > cfg.burst_severity_threshold {
            return result(
                Verdict::BurstDetected,
                (0.5 + input.burst.severity).min(0.95),
                Basis::BurstRule,
                format!(
                    "Rapid insertion detected: {} burst run(s), longest {} keys.",
                    input.burst.run_count, input.burst.max_run_length
                ),
            );
        }

        if let Some(prediction) = input.prediction {
            if !prediction.label.is_human() && prediction.confidence >= cfg.model_confidence_threshold {
                let verdict = match prediction.label {
                    ModelLabel::Paste => Verdict::Paste,
                    ModelLabel::AiAssisted => Verdict::AssistantAssisted,
                    _ => Verdict::MixedInput,
                };
                return result(
                    verdict,
                    prediction.confidence,
                    Basis::ModelRule,
                    format!(
                        "Timing model classified the pattern as '{}' with {} confidence.",
                        prediction.label,
                        percent(prediction.confidence)
                    ),
                );
            }
        }

        if ratios.human >= cfg.human_ratio_threshold {
            return result(
                Verdict::HumanVerified,
                (0.7 + ratios.human * 0.3).min(0.99),
                Basis::Consensus,
                format!("Human verified: {} of the content was typed.", percent(ratios.human)),
            );
        }

        result(
            Verdict::Uncertain,
            input.prior_confidence.unwrap_or(cfg.fallback_confidence),
            Basis::Consensus,
            format!(
                "Mixed signals: {} typed, {} pasted, {} from suggestions.",
                percent(ratios.human),
                percent(ratios.paste),
                percent(ratios.assistant)
            ),
        )
    }

    fn signals(&self, input: &ClassifierInput<'_>) -> Vec<Signal> {
        let cfg = &self.config;
        let mut signals = Vec::new();

        let inserted = input.ratios.paste.max(input.ratios.assistant);
        if inserted > cfg.volume_threshold {
            signals.push(Signal::VolumeHigh);
        } else if inserted > cfg.suspicious_volume {
            signals.push(Signal::VolumeSuspicious);
        }

        if input.burst.severity > cfg.burst_severity_threshold {
            signals.push(Signal::BurstDetected);
        } else if input.burst.has_burst {
            signals.push(Signal::BurstSuspicious);
        }

        if let Some(prediction) = input.prediction.filter(|p| !p.label.is_human()) {
            if prediction.confidence >= cfg.model_confidence_threshold {
                signals.push(Signal::ModelNonHuman);
            } else if prediction.confidence > 0.5 {
                signals.push(Signal::ModelSuspicious);
            }
        }

        signals
    }

    /// Weighted human-likeness in [0, 1].
    fn consensus(&self, input: &ClassifierInput<'_>) -> f64 {
        let cfg = &self.config;
        let volume = if input.total_chars == 0 {
            0.5
        } else {
            input.ratios.human
        };
        let model = match input.prediction {
            Some(p) if p.label.is_human() => p.confidence,
            Some(p) => 1.0 - p.confidence,
            None => 0.5,
        };
        let burst = 1.0 - input.burst.severity.min(1.0);
        let weights = cfg.volume_weight + cfg.model_weight + cfg.burst_weight;
        if weights <= 0.0 {
            return 0.0;
        }
        ((cfg.volume_weight * volume + cfg.model_weight * model + cfg.burst_weight * burst) / weights)
            .clamp(0.0, 1.0)
    }

    fn volume_detail(&self, input: &ClassifierInput<'_>, pick: impl Fn(&CharacterLedger) -> u64) -> String {
        match input.ledger {
            Some(ledger) => format!(" ({}/{} chars)", pick(ledger), ledger.total()),
            None => String::new(),
        }
    }
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classify_ledger(ledger: CharacterLedger) -> ClassificationResult {
        let burst = BurstReport::default();
        HybridClassifier::default().classify(&ClassifierInput::from_ledger(&ledger, &burst))
    }

    fn ledger(typed: u64, pasted: u64, assistant: u64) -> CharacterLedger {
        CharacterLedger {
            typed,
            pasted,
            assistant,
        }
    }

    #[test]
    fn test_below_gate_is_waiting() {
        let result = classify_ledger(ledger(15, 0, 0));
        assert_eq!(result.verdict, Verdict::InsufficientData);
        assert_eq!(result.basis, Basis::SampleGate);
        assert!(result.is_waiting());
        assert!(!result.verdict.is_flagged());
    }

    #[test]
    fn test_paste_boundary_is_strict() {
        let result = classify_ledger(ledger(90, 10, 0));
        assert_ne!(result.basis, Basis::VolumeRule);

        let burst = BurstReport::default();
        let input = ClassifierInput {
            ratios: VolumeRatios {
                human: 0.8999999,
                paste: 0.1000001,
                assistant: 0.0,
            },
            total_chars: 1000,
            ledger: None,
            burst: &burst,
            prediction: None,
            prior_confidence: None,
        };
        let result = HybridClassifier::default().classify(&input);
        assert_eq!(result.verdict, Verdict::Paste);
        assert_eq!(result.basis, Basis::VolumeRule);
    }

    #[test]
    fn test_paste_confidence_and_dominance() {
        let result = classify_ledger(ledger(40, 60, 0));
        assert_eq!(result.verdict, Verdict::PasteDominant);
        assert!((result.confidence - 0.8).abs() < 1e-12);
        assert!(result.signals.contains(&Signal::VolumeHigh));
    }

    #[test]
    fn test_assistant_volume_rule() {
        let result = classify_ledger(ledger(80, 0, 20));
        assert_eq!(result.verdict, Verdict::AssistantAssisted);
        assert!((result.confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_assistant_just_below_threshold_is_human() {
        let result = classify_ledger(ledger(91, 0, 9));
        assert_eq!(result.verdict, Verdict::HumanVerified);
        assert_eq!(result.basis, Basis::Consensus);
        assert!((result.confidence - (0.7 + 0.91 * 0.3)).abs() < 1e-12);
        assert!(result.signals.contains(&Signal::VolumeSuspicious));
    }

    #[test]
    fn test_burst_rule_after_volume() {
        let ledger = ledger(100, 0, 0);
        let burst = BurstReport {
            has_burst: true,
            run_count: 1,
            run_starts: vec![10],
            covered_keys: 10,
            total_keys: 100,
            max_run_length: 10,
            severity: 0.1,
        };
        let result = HybridClassifier::default().classify(&ClassifierInput::from_ledger(&ledger, &burst));
        assert_eq!(result.verdict, Verdict::BurstDetected);
        assert_eq!(result.basis, Basis::BurstRule);
        assert!((result.confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_model_rule() {
        let ledger = ledger(100, 0, 0);
        let burst = BurstReport::default();
        let prediction = Prediction::new(ModelLabel::CopyPasteHybrid, 0.8);
        let input = ClassifierInput::from_ledger(&ledger, &burst).with_prediction(Some(&prediction));
        let result = HybridClassifier::default().classify(&input);
        assert_eq!(result.verdict, Verdict::MixedInput);
        assert_eq!(result.basis, Basis::ModelRule);
        assert_eq!(result.confidence, 0.8);

        // A weak model opinion does not override.
        let weak = Prediction::new(ModelLabel::Paste, 0.6);
        let input = ClassifierInput::from_ledger(&ledger, &burst).with_prediction(Some(&weak));
        let result = HybridClassifier::default().classify(&input);
        assert_eq!(result.verdict, Verdict::HumanVerified);
        assert!(result.signals.contains(&Signal::ModelSuspicious));
    }

    #[test]
    fn test_uncertain_uses_prior() {
        let ledger = ledger(89, 6, 5);
        let burst = BurstReport::default();
        let result = HybridClassifier::default().classify(&ClassifierInput::from_ledger(&ledger, &burst));
        assert_eq!(result.verdict, Verdict::Uncertain);
        assert_eq!(result.confidence, 0.4);

        let input = ClassifierInput::from_ledger(&ledger, &burst).with_prior(Some(0.33));
        assert_eq!(HybridClassifier::default().classify(&input).confidence, 0.33);
    }

    #[test]
    fn test_consensus_never_overrides_label() {
        // Consensus strongly favours human, yet the volume rule wins.
        let ledger = ledger(85, 15, 0);
        let burst = BurstReport::default();
        let prediction = Prediction::new(ModelLabel::HumanOrganic, 0.99);
        let input = ClassifierInput::from_ledger(&ledger, &burst).with_prediction(Some(&prediction));
        let result = HybridClassifier::default().classify(&input);
        assert!(result.consensus_score > 0.8);
        assert_eq!(result.verdict, Verdict::Paste);
    }
}
