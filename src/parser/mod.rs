use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::GenoflowError;
use crate::models::{AnalysisKind, AnalysisReport, ArgPrediction, Completeness, Gene, ResultRegion};

/// Score ceiling of the provirus table's v_vs_c_score column.
pub const PROVIRUS_SCORE_SCALE: f64 = 100.0;

/// Region length above which a non-edge region counts as complete.
pub const DEFAULT_COMPLETE_LENGTH_THRESHOLD: u64 = 30_000;

/// The two documented parser tunables, configurable per host through
/// `OrchestratorConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Exclusive lower bound on length for `Completeness::Complete`.
    #[serde(default = "default_complete_length_threshold")]
    pub complete_length_threshold: u64,
    /// Denominator for confidence normalization; confidence is clamped to 1.0.
    #[serde(default = "default_score_scale_max")]
    pub score_scale_max: f64,
}

fn default_complete_length_threshold() -> u64 {
    DEFAULT_COMPLETE_LENGTH_THRESHOLD
}

fn default_score_scale_max() -> f64 {
    PROVIRUS_SCORE_SCALE
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            complete_length_threshold: default_complete_length_threshold(),
            score_scale_max: default_score_scale_max(),
        }
    }
}

/// Parse the output directory of a finished job into a typed report.
pub fn parse_output(
    kind: AnalysisKind,
    output_dir: &Path,
    input_file_name: &str,
    options: &ParseOptions,
) -> Result<AnalysisReport, GenoflowError> {
    match kind {
        AnalysisKind::Prophage => parse_prophage_output(output_dir, input_file_name, options),
        AnalysisKind::ResistanceGene => parse_arg_output(output_dir),
    }
}

fn strip_fasta_extension(name: &str) -> &str {
    for ext in [".fna", ".fasta", ".fa"] {
        if let Some(stripped) = name.strip_suffix(ext) {
            return stripped;
        }
    }
    name
}

/// Non-header, non-blank lines of a TSV file, split on tabs.
fn data_rows(content: &str) -> Vec<Vec<String>> {
    content
        .lines()
        .skip(1)
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.split('\t').map(|f| f.trim().to_string()).collect())
        .collect()
}

fn parse_bool_cell(cell: &str) -> bool {
    matches!(cell.to_ascii_lowercase().as_str(), "true" | "yes" | "1")
}

/// Locate the provirus table. The expected location is
/// `{dir}/{base}_find_proviruses/{base}_provirus.tsv`; when the tool was
/// run against a renamed file the name will not match, so fall back to
/// scanning the directory tree one level deep for any `*_provirus.tsv`.
fn find_provirus_file(output_dir: &Path, base: &str) -> Option<PathBuf> {
    let expected = output_dir
        .join(format!("{}_find_proviruses", base))
        .join(format!("{}_provirus.tsv", base));
    if expected.is_file() {
        return Some(expected);
    }

    let mut dirs = vec![output_dir.to_path_buf()];
    if let Ok(entries) = std::fs::read_dir(output_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
    }
    let mut candidates: Vec<PathBuf> = Vec::new();
    for dir in dirs {
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n,
                    None => continue,
                };
                if name.ends_with("_provirus.tsv") && path.is_file() {
                    candidates.push(path);
                }
            }
        }
    }
    candidates.sort();
    candidates.into_iter().next()
}

/// Parse `{base}_provirus.tsv` plus its sibling genes table into regions.
///
/// Forgiving per row: a row missing any of the five mandatory columns is
/// logged and skipped. A missing file yields an empty report; a file whose
/// rows all fail yields `Parse`.
pub fn parse_prophage_output(
    output_dir: &Path,
    input_file_name: &str,
    options: &ParseOptions,
) -> Result<AnalysisReport, GenoflowError> {
    let base = strip_fasta_extension(input_file_name);

    let provirus_path = match find_provirus_file(output_dir, base) {
        Some(path) => path,
        None => {
            tracing::info!(
                "No provirus table under {}, reporting zero regions",
                output_dir.display()
            );
            return Ok(AnalysisReport::Prophage {
                genome_length: 0,
                regions: Vec::new(),
            });
        }
    };

    let content = std::fs::read_to_string(&provirus_path)?;
    let rows = data_rows(&content);
    let total_rows = rows.len();

    let genes_by_region = load_genes(&provirus_path);
    let sequences = load_region_sequences(&provirus_path);

    let mut regions = Vec::new();
    for (row_no, fields) in rows.into_iter().enumerate() {
        match parse_provirus_row(&fields, options, &genes_by_region, &sequences) {
            Some(mut region) => {
                region.region_index = regions.len() + 1;
                regions.push(region);
            }
            None => {
                tracing::warn!(
                    "Skipping malformed provirus row {} in {}",
                    row_no + 2,
                    provirus_path.display()
                );
            }
        }
    }

    if total_rows > 0 && regions.is_empty() {
        return Err(GenoflowError::Parse(format!(
            "No parseable rows out of {} in {}",
            total_rows,
            provirus_path.display()
        )));
    }

    let genome_length = regions.iter().map(|r| r.end).max().unwrap_or(0);
    Ok(AnalysisReport::Prophage {
        genome_length,
        regions,
    })
}

fn parse_provirus_row(
    fields: &[String],
    options: &ParseOptions,
    genes_by_region: &HashMap<String, Vec<Gene>>,
    sequences: &HashMap<String, String>,
) -> Option<ResultRegion> {
    if fields.len() < 5 {
        return None;
    }
    let seq_name = fields[0].clone();
    let source_seq = fields[1].clone();
    if seq_name.is_empty() || source_seq.is_empty() {
        return None;
    }
    let start: u64 = fields[2].parse().ok()?;
    let end: u64 = fields[3].parse().ok()?;
    let length: u64 = fields[4].parse().ok()?;
    if end < start {
        return None;
    }

    let gene_count: usize = fields.get(5).and_then(|f| f.parse().ok()).unwrap_or(0);
    let score: f64 = fields.get(6).and_then(|f| f.parse().ok()).unwrap_or(0.0);
    let in_seq_edge = fields.get(7).map(|f| parse_bool_cell(f)).unwrap_or(false);
    let integrases = fields.get(8).cloned().unwrap_or_default();

    let confidence = (score / options.score_scale_max).min(1.0);
    let completeness =
        Completeness::classify(length, in_seq_edge, options.complete_length_threshold);

    let region_key = format!("{}|provirus_{}_{}", source_seq, start, end);
    let genes = genes_by_region.get(&region_key).cloned().unwrap_or_default();
    let sequence = sequences.get(&seq_name).cloned();

    Some(ResultRegion {
        region_index: 0, // assigned by the caller in file order
        seq_name,
        source_seq,
        start,
        end,
        length,
        score,
        confidence,
        completeness,
        in_seq_edge,
        integrases,
        gene_count,
        genes,
        sequence,
    })
}

/// Read the provirus FASTA next to the table and index the extracted region
/// sequences by header. Missing or unreadable files degrade to no sequences.
fn load_region_sequences(provirus_path: &Path) -> HashMap<String, String> {
    let fna_path = provirus_path.with_extension("fna");
    let content = match std::fs::read_to_string(&fna_path) {
        Ok(c) => c,
        Err(_) => return HashMap::new(),
    };

    let mut map = HashMap::new();
    let mut current: Option<(String, String)> = None;
    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(header) = line.strip_prefix('>') {
            if let Some((name, seq)) = current.take() {
                map.insert(name, seq);
            }
            let name = header.split_whitespace().next().unwrap_or("").to_string();
            current = Some((name, String::new()));
        } else if let Some((_, seq)) = current.as_mut() {
            seq.push_str(line.trim());
        }
    }
    if let Some((name, seq)) = current.take() {
        map.insert(name, seq);
    }
    map
}

/// Read the genes table next to the provirus table and bucket genes by the
/// region id their gene id belongs to. Errors here degrade to no genes.
fn load_genes(provirus_path: &Path) -> HashMap<String, Vec<Gene>> {
    let genes_path = provirus_path.with_file_name(
        provirus_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.replace("_provirus.tsv", "_provirus_genes.tsv"))
            .unwrap_or_default(),
    );
    let content = match std::fs::read_to_string(&genes_path) {
        Ok(c) => c,
        Err(_) => return HashMap::new(),
    };

    let mut map: HashMap<String, Vec<Gene>> = HashMap::new();
    for fields in data_rows(&content) {
        let gene = match parse_gene_row(&fields) {
            Some(g) => g,
            None => {
                tracing::warn!("Skipping malformed gene row in {}", genes_path.display());
                continue;
            }
        };
        // Gene ids carry a trailing per-region ordinal: region id "_3" etc.
        let region_key = match gene.gene_id.rsplit_once('_') {
            Some((prefix, ordinal)) if ordinal.chars().all(|c| c.is_ascii_digit()) => {
                prefix.to_string()
            }
            _ => continue,
        };
        map.entry(region_key).or_default().push(gene);
    }
    map
}

fn parse_gene_row(fields: &[String]) -> Option<Gene> {
    if fields.len() < 6 {
        return None;
    }
    let gene_id = fields[0].clone();
    if gene_id.is_empty() {
        return None;
    }
    let start: u64 = fields[1].parse().ok()?;
    let end: u64 = fields[2].parse().ok()?;
    let length: u64 = fields[3].parse().ok()?;
    let strand: i8 = fields[4].parse().ok()?;
    let gc_content: f64 = fields[5].parse().ok()?;

    let annotation = match fields.last() {
        Some(cell) if !cell.is_empty() && cell != "NA" => cell.clone(),
        _ => "unannotated".to_string(),
    };
    let taxonomy = extract_taxonomy(fields);

    Some(Gene {
        gene_id,
        start,
        end,
        length,
        strand,
        gc_content,
        annotation,
        taxonomy,
    })
}

/// Best-effort taxonomy: the longest token in columns 13..18 that is not
/// numeric and not a placeholder.
fn extract_taxonomy(fields: &[String]) -> String {
    let hi = fields.len().min(18);
    let lo = 12.min(hi);
    fields[lo..hi]
        .iter()
        .filter(|cell| !cell.is_empty() && *cell != "NA" && *cell != "-")
        .filter(|cell| cell.parse::<f64>().is_err())
        .max_by_key(|cell| cell.len())
        .cloned()
        .unwrap_or_default()
}

/// Parse the resistance predictor output. Expected file is
/// `arg_predictions.tsv`; older tool versions named the file after the
/// input, so fall back to the first `*.tsv` in the directory.
pub fn parse_arg_output(output_dir: &Path) -> Result<AnalysisReport, GenoflowError> {
    let expected = output_dir.join("arg_predictions.tsv");
    let path = if expected.is_file() {
        Some(expected)
    } else {
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(output_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| {
                        p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("tsv")
                    })
                    .collect()
            })
            .unwrap_or_default();
        candidates.sort();
        candidates.into_iter().next()
    };

    let path = match path {
        Some(p) => p,
        None => {
            tracing::info!(
                "No prediction table under {}, reporting zero predictions",
                output_dir.display()
            );
            return Ok(AnalysisReport::ResistanceGene {
                predictions: Vec::new(),
            });
        }
    };

    let content = std::fs::read_to_string(&path)?;
    let rows = data_rows(&content);
    let total_rows = rows.len();

    let mut predictions = Vec::new();
    for (row_no, fields) in rows.into_iter().enumerate() {
        match parse_arg_row(&fields) {
            Some(mut prediction) => {
                prediction.index = predictions.len() + 1;
                predictions.push(prediction);
            }
            None => {
                tracing::warn!(
                    "Skipping malformed prediction row {} in {}",
                    row_no + 2,
                    path.display()
                );
            }
        }
    }

    if total_rows > 0 && predictions.is_empty() {
        return Err(GenoflowError::Parse(format!(
            "No parseable rows out of {} in {}",
            total_rows,
            path.display()
        )));
    }

    Ok(AnalysisReport::ResistanceGene { predictions })
}

fn parse_arg_row(fields: &[String]) -> Option<ArgPrediction> {
    let id = fields.first()?.clone();
    if id.is_empty() {
        return None;
    }
    let is_arg = fields.get(1).map(|f| parse_bool_cell(f)).unwrap_or(false);
    let pred_prob = fields.get(2).and_then(|f| f.parse().ok());
    let arg_class = fields.get(3).cloned().unwrap_or_default();
    let class_prob = fields.get(4).and_then(|f| f.parse().ok());
    let prob = fields.get(5).and_then(|f| f.parse().ok());

    Some(ArgPrediction {
        index: 0, // assigned by the caller in file order
        id,
        is_arg,
        pred_prob,
        arg_class,
        class_prob,
        prob,
    })
}
