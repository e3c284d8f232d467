//! Scores to ranked predictions

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};

/// Number of predictions returned by a scan
pub const TOP_K: usize = 3;

/// One ranked class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Display label, exactly as listed in the metadata
    pub condition: String,
    /// Softmax probability in `[0, 1]`
    pub confidence: f32,
    /// Stable identifier derived from the label
    pub id: String,
}

/// Coarse grouping used to pick how a result is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Healthy,
    PossiblyMalignant,
    Other,
}

impl Prediction {
    pub fn new(condition: impl Into<String>, confidence: f32) -> Self {
        let condition = condition.into();
        Self {
            id: condition_id(&condition),
            condition,
            confidence,
        }
    }

    pub fn kind(&self) -> ConditionKind {
        // "heathy" is how the label is spelled in the shipped dataset
        if self.id == "healthy" || self.id == "heathy" {
            return ConditionKind::Healthy;
        }
        if ["malignant", "carcinoma", "melanoma"]
            .iter()
            .any(|needle| self.id.contains(needle))
        {
            return ConditionKind::PossiblyMalignant;
        }
        ConditionKind::Other
    }

    /// Confidence in percent, as stored in scan history
    pub fn percentage(&self) -> f32 {
        self.confidence * 100.0
    }
}

/// Lowercase, whitespace runs become `_`, anything else non-alphanumeric is dropped
pub fn condition_id(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// Rank `scores` against `labels` and keep the best [`TOP_K`]
pub fn postprocess(scores: &[f32], labels: &[String]) -> ScanResult<Vec<Prediction>> {
    postprocess_top_k(scores, labels, TOP_K)
}

/// Rank `scores` against `labels` and keep the best `k`.
///
/// Ties keep label order.
pub fn postprocess_top_k(
    scores: &[f32],
    labels: &[String],
    k: usize,
) -> ScanResult<Vec<Prediction>> {
    if scores.len() != labels.len() {
        return Err(ScanError::LabelMismatch {
            labels: labels.len(),
            scores: scores.len(),
        });
    }

    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);

    Ok(ranked
        .into_iter()
        .map(|(idx, score)| Prediction::new(labels[idx].as_str(), score.clamp(0.0, 1.0)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ids_follow_label_text() {
        assert_eq!(condition_id("Acne And Rosacea"), "acne_and_rosacea");
        assert_eq!(condition_id("Vi Shingles"), "vi_shingles");
        assert_eq!(condition_id("  Eczema   Photos "), "eczema_photos");
        assert_eq!(condition_id("Light Diseases & Disorders"), "light_diseases__disorders");
    }

    #[test]
    fn returns_top_three_descending() {
        let labels = labels(&["A", "B", "C", "D", "E"]);
        let scores = [0.05, 0.4, 0.1, 0.3, 0.15];

        let predictions = postprocess(&scores, &labels).unwrap();
        let names: Vec<_> = predictions.iter().map(|p| p.condition.as_str()).collect();
        assert_eq!(names, ["B", "D", "E"]);
        assert!(
            predictions
                .windows(2)
                .all(|w| w[0].confidence >= w[1].confidence)
        );
    }

    #[test]
    fn fewer_labels_than_k() {
        let labels = labels(&["Only One", "Other"]);
        let predictions = postprocess(&[0.3, 0.7], &labels).unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].id, "other");
    }

    #[test]
    fn ties_keep_label_order() {
        let labels = labels(&["first", "second", "third", "fourth"]);
        let predictions = postprocess(&[0.25, 0.25, 0.25, 0.25], &labels).unwrap();
        let ids: Vec<_> = predictions.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["first", "second", "third"]);
    }

    #[test]
    fn mismatched_lengths_fail() {
        let labels: Vec<String> = (0..21).map(|i| format!("class {i}")).collect();
        let scores = [0.1; 10];

        match postprocess(&scores, &labels) {
            Err(ScanError::LabelMismatch { labels, scores }) => {
                assert_eq!(labels, 21);
                assert_eq!(scores, 10);
            }
            other => panic!("Expected label mismatch, got {other:?}"),
        }
    }

    #[test]
    fn confidence_is_clamped() {
        let labels = labels(&["a", "b"]);
        let predictions = postprocess(&[1.0000001, -0.0000001], &labels).unwrap();
        assert_eq!(predictions[0].confidence, 1.0);
        assert_eq!(predictions[1].confidence, 0.0);
    }

    #[test]
    fn classifies_kinds() {
        assert_eq!(Prediction::new("Heathy", 0.9).kind(), ConditionKind::Healthy);
        assert_eq!(Prediction::new("Healthy", 0.9).kind(), ConditionKind::Healthy);
        assert_eq!(
            Prediction::new("Melanoma Skin Cancer Nevi and Moles", 0.9).kind(),
            ConditionKind::PossiblyMalignant
        );
        assert_eq!(
            Prediction::new("Actinic Keratosis Basal Cell Carcinoma", 0.9).kind(),
            ConditionKind::PossiblyMalignant
        );
        assert_eq!(Prediction::new("Vi Shingles", 0.9).kind(), ConditionKind::Other);
    }

    #[test]
    fn percentage_scales_confidence() {
        let prediction = Prediction::new("Acne", 0.5);
        assert_eq!(prediction.percentage(), 50.0);
    }
}
