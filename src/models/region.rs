use serde::{Deserialize, Serialize};

/// Completeness classification of a detected region.
///
/// A region is `Complete` iff it does not touch a sequence edge AND its
/// length exceeds the configured threshold (default 30 000 bases, see
/// [`crate::parser::ParseOptions`]); everything else is `Incomplete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Incomplete,
}

impl Completeness {
    pub fn classify(length: u64, in_seq_edge: bool, length_threshold: u64) -> Self {
        if !in_seq_edge && length > length_threshold {
            Completeness::Complete
        } else {
            Completeness::Incomplete
        }
    }
}

impl std::fmt::Display for Completeness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completeness::Complete => write!(f, "complete"),
            Completeness::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// One gene call nested under a detected region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gene {
    pub gene_id: String,
    pub start: u64,
    pub end: u64,
    pub length: u64,
    /// +1 or -1 as reported by the tool.
    pub strand: i8,
    pub gc_content: f64,
    /// Functional annotation text; `"unannotated"` when the tool reports none.
    pub annotation: String,
    /// Best-effort taxonomic label; empty when nothing usable was found.
    pub taxonomy: String,
}

/// One parsed hit from the prophage tool output, immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRegion {
    /// 1-based index assigned in file order.
    pub region_index: usize,
    pub seq_name: String,
    pub source_seq: String,
    pub start: u64,
    /// Always >= `start`.
    pub end: u64,
    pub length: u64,
    /// Tool-defined score scale (v_vs_c_score, 0-100 for provirus output).
    pub score: f64,
    /// Normalized to [0, 1] via `min(score / score_scale_max, 1.0)`.
    pub confidence: f64,
    pub completeness: Completeness,
    pub in_seq_edge: bool,
    pub integrases: String,
    pub gene_count: usize,
    pub genes: Vec<Gene>,
    /// Extracted nucleotide sequence from the tool's provirus FASTA, when
    /// that file was emitted.
    #[serde(default)]
    pub sequence: Option<String>,
}

/// One row of the resistance-gene predictor output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgPrediction {
    /// 1-based index assigned in file order.
    pub index: usize,
    pub id: String,
    pub is_arg: bool,
    pub pred_prob: Option<f64>,
    pub arg_class: String,
    pub class_prob: Option<f64>,
    pub prob: Option<f64>,
}

/// Typed result of parsing one job's output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisReport {
    Prophage {
        /// Max region end offset seen across the output; 0 when no regions.
        genome_length: u64,
        regions: Vec<ResultRegion>,
    },
    ResistanceGene {
        predictions: Vec<ArgPrediction>,
    },
}

impl AnalysisReport {
    /// Number of result records, regardless of report flavor.
    pub fn record_count(&self) -> usize {
        match self {
            AnalysisReport::Prophage { regions, .. } => regions.len(),
            AnalysisReport::ResistanceGene { predictions } => predictions.len(),
        }
    }

    pub fn genome_length(&self) -> Option<u64> {
        match self {
            AnalysisReport::Prophage { genome_length, .. } => Some(*genome_length),
            AnalysisReport::ResistanceGene { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: u64 = 30_000;

    #[test]
    fn test_long_interior_region_is_complete() {
        assert_eq!(
            Completeness::classify(40_000, false, THRESHOLD),
            Completeness::Complete
        );
    }

    #[test]
    fn test_long_edge_region_is_incomplete() {
        assert_eq!(
            Completeness::classify(40_000, true, THRESHOLD),
            Completeness::Incomplete
        );
    }

    #[test]
    fn test_short_region_is_incomplete_regardless_of_edge() {
        assert_eq!(
            Completeness::classify(10_000, false, THRESHOLD),
            Completeness::Incomplete
        );
        assert_eq!(
            Completeness::classify(10_000, true, THRESHOLD),
            Completeness::Incomplete
        );
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // Exactly at the threshold does not qualify as complete.
        assert_eq!(
            Completeness::classify(THRESHOLD, false, THRESHOLD),
            Completeness::Incomplete
        );
        assert_eq!(
            Completeness::classify(THRESHOLD + 1, false, THRESHOLD),
            Completeness::Complete
        );
    }

    #[test]
    fn test_completeness_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&Completeness::Complete).unwrap(),
            "\"complete\""
        );
        assert_eq!(
            serde_json::to_string(&Completeness::Incomplete).unwrap(),
            "\"incomplete\""
        );
    }

    #[test]
    fn test_report_record_count() {
        let report = AnalysisReport::Prophage {
            genome_length: 120_000,
            regions: vec![],
        };
        assert_eq!(report.record_count(), 0);
        assert_eq!(report.genome_length(), Some(120_000));

        let report = AnalysisReport::ResistanceGene {
            predictions: vec![ArgPrediction {
                index: 1,
                id: "seq_001".to_string(),
                is_arg: true,
                pred_prob: Some(0.95),
                arg_class: "beta-lactamase".to_string(),
                class_prob: Some(0.9),
                prob: Some(0.92),
            }],
        };
        assert_eq!(report.record_count(), 1);
        assert_eq!(report.genome_length(), None);
    }
}
