//! Analysis core for the HumanSign agent.
//!
//! This module contains:
//! - Feature extraction from the accepted event stream
//! - The external model boundary
//! - The hybrid verdict cascade and anomaly scoring
//! - A diagnostic statistical read of submitted text
//! - Report construction for signing and export

pub mod anomaly;
pub mod classifier;
pub mod content;
pub mod features;
pub mod model;
pub mod report;

// Re-export commonly used types
pub use anomaly::{detect_anomalies, risk_score, Anomaly, AnomalyKind, Severity};
pub use classifier::{
    Basis, ClassificationResult, ClassifierConfig, ClassifierInput, HybridClassifier, Signal,
    Verdict,
};
pub use content::{analyze_text, ContentAnalysis, ContentFeatures, ContentVerdict};
pub use features::{
    detect_bursts, BurstReport, FeatureConfig, FeatureSet, KeyTiming, ModelFeatures,
    TimingHistograms,
};
pub use model::{FixedPrediction, ModelLabel, NoModel, Prediction, Predictor};
pub use report::{content_hash, ReportBuilder, ReportMetrics, ReportSignature, SignedReport, REPORT_VERSION};
