//! Boundary to externally trained classifiers.
//!
//! The pipeline never looks inside a model. Anything that maps the feature
//! vector to a label and a confidence can sit behind [`Predictor`].

use crate::core::features::ModelFeatures;
use serde::{Deserialize, Serialize};

/// Classes a model may predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLabel {
    HumanOrganic,
    Paste,
    AiAssisted,
    CopyPasteHybrid,
    HumanNonnative,
    HumanCoding,
}

impl ModelLabel {
    pub const ALL: [ModelLabel; 6] = [
        ModelLabel::HumanOrganic,
        ModelLabel::Paste,
        ModelLabel::AiAssisted,
        ModelLabel::CopyPasteHybrid,
        ModelLabel::HumanNonnative,
        ModelLabel::HumanCoding,
    ];

    pub fn is_human(self) -> bool {
        matches!(
            self,
            ModelLabel::HumanOrganic | ModelLabel::HumanNonnative | ModelLabel::HumanCoding
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelLabel::HumanOrganic => "human_organic",
            ModelLabel::Paste => "paste",
            ModelLabel::AiAssisted => "ai_assisted",
            ModelLabel::CopyPasteHybrid => "copy_paste_hybrid",
            ModelLabel::HumanNonnative => "human_nonnative",
            ModelLabel::HumanCoding => "human_coding",
        }
    }
}

impl std::fmt::Display for ModelLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: ModelLabel,
    /// Probability of `label`, in [0, 1]
    pub confidence: f64,
}

impl Prediction {
    pub fn new(label: ModelLabel, confidence: f64) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// `predict(features) -> (label, confidence)`.
///
/// Returning `None` means the model had no opinion (not loaded, failed, or
/// refused the input); the classifier then runs on local signals alone.
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &ModelFeatures) -> Option<Prediction>;
}

/// Used when no model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModel;

impl Predictor for NoModel {
    fn predict(&self, _features: &ModelFeatures) -> Option<Prediction> {
        None
    }
}

/// Always answers the same thing. Handy for wiring tests and replays.
#[derive(Debug, Clone)]
pub struct FixedPrediction(pub Prediction);

impl Predictor for FixedPrediction {
    fn predict(&self, _features: &ModelFeatures) -> Option<Prediction> {
        Some(self.0.clone())
    }
}

impl<F> Predictor for F
where
    F: Fn(&ModelFeatures) -> Option<Prediction> + Send + Sync,
{
    fn predict(&self, features: &ModelFeatures) -> Option<Prediction> {
        self(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_classes() {
        let human: Vec<_> = ModelLabel::ALL.iter().filter(|l| l.is_human()).collect();
        assert_eq!(human.len(), 3);
        assert!(!ModelLabel::CopyPasteHybrid.is_human());
    }

    #[test]
    fn test_closure_predictor() {
        let predictor = |f: &ModelFeatures| {
            (f.total_keystrokes > 0.0).then(|| Prediction::new(ModelLabel::Paste, 1.4))
        };
        let features = ModelFeatures {
            total_keystrokes: 3.0,
            ..ModelFeatures::default()
        };
        let prediction = predictor.predict(&features).unwrap();
        assert_eq!(prediction.confidence, 1.0);
        assert!(NoModel.predict(&features).is_none());
    }

    #[test]
    fn test_label_wire_names() {
        assert_eq!(
            serde_json::to_string(&ModelLabel::CopyPasteHybrid).unwrap(),
            "\"copy_paste_hybrid\""
        );
    }
}
