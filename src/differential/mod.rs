//! Differential-expression helpers for simulated datasets.
//!
//! Simulations drive each gene's kinetic parameters (`kon`, `koff`, `s`) through
//! extrinsic variation factors (EVFs). Some EVFs differ between cell populations
//! ("DE" EVFs), others do not. These helpers relate that ground truth to the
//! observed counts of two populations:
//!
//! - **theoretical log fold change** from the kinetic parameters
//! - **number of differential EVFs** each gene responds to
//! - **Wilcoxon rank-sum** p-values on the counts, with Benjamini-Hochberg adjustment
//!
//! EVF labels (e.g. `kon_DE1`, `s_nonDE3`) are parsed once into [`EvfDescriptor`]
//! records when an [`EvfLayout`] is built.

use anyhow::{Context, anyhow};
use ndarray::Array2;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub mod correction;
pub mod wilcoxon;

pub use correction::benjamini_hochberg;
pub use wilcoxon::{RankSumResult, rank_sum_rows, rank_sum_test};

/// Minimum absolute gene effect for an EVF to count as acting on a gene.
pub const EFFECT_THRESHOLD: f64 = 0.001;

/// Kinetic parameter of the two-state promoter model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KineticParam {
    Kon,
    Koff,
    S,
}

impl KineticParam {
    pub const ALL: [KineticParam; 3] = [KineticParam::Kon, KineticParam::Koff, KineticParam::S];

    pub fn as_str(&self) -> &'static str {
        match self {
            KineticParam::Kon => "kon",
            KineticParam::Koff => "koff",
            KineticParam::S => "s",
        }
    }

    fn slot(&self) -> usize {
        match self {
            KineticParam::Kon => 0,
            KineticParam::Koff => 1,
            KineticParam::S => 2,
        }
    }
}

impl FromStr for KineticParam {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "kon" => Ok(KineticParam::Kon),
            "koff" => Ok(KineticParam::Koff),
            "s" => Ok(KineticParam::S),
            other => Err(anyhow!("Unknown kinetic parameter '{}'", other)),
        }
    }
}

/// Whether an EVF differs between populations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EvfKind {
    Differential,
    NonDifferential,
}

/// One EVF column, parsed from a label of the form `<param>_<DE|nonDE><n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EvfDescriptor {
    pub param: KineticParam,
    pub kind: EvfKind,
    pub ordinal: usize,
}

impl FromStr for EvfDescriptor {
    type Err = anyhow::Error;

    fn from_str(label: &str) -> anyhow::Result<Self> {
        let (param, rest) = label
            .split_once('_')
            .ok_or_else(|| anyhow!("EVF label '{}' has no parameter prefix", label))?;
        let param: KineticParam = param
            .parse()
            .with_context(|| format!("Invalid EVF label '{}'", label))?;

        let (kind, digits) = if let Some(d) = rest.strip_prefix("nonDE") {
            (EvfKind::NonDifferential, d)
        } else if let Some(d) = rest.strip_prefix("DE") {
            (EvfKind::Differential, d)
        } else {
            return Err(anyhow!("EVF label '{}' is neither DE nor nonDE", label));
        };
        let ordinal = digits
            .parse::<usize>()
            .with_context(|| format!("EVF label '{}' has no ordinal", label))?;

        Ok(EvfDescriptor {
            param,
            kind,
            ordinal,
        })
    }
}

impl fmt::Display for EvfDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EvfKind::Differential => "DE",
            EvfKind::NonDifferential => "nonDE",
        };
        write!(f, "{}_{}{}", self.param.as_str(), kind, self.ordinal)
    }
}

/// EVF columns of the gene-effect matrices, grouped by kinetic parameter.
///
/// Column `j` of the `param` gene-effect matrix belongs to `evfs(param)[j]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EvfLayout {
    evfs: [Vec<EvfDescriptor>; 3],
    differential: [Vec<usize>; 3],
}

impl EvfLayout {
    /// Parse labels once. Labels of each parameter keep their relative order.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> anyhow::Result<Self> {
        let mut evfs: [Vec<EvfDescriptor>; 3] = Default::default();
        for label in labels {
            let descriptor: EvfDescriptor = label.as_ref().parse()?;
            evfs[descriptor.param.slot()].push(descriptor);
        }

        let differential: [Vec<usize>; 3] = evfs.clone().map(|group| {
            group
                .iter()
                .enumerate()
                .filter(|(_, d)| d.kind == EvfKind::Differential)
                .map(|(col, _)| col)
                .collect()
        });

        Ok(EvfLayout { evfs, differential })
    }

    pub fn evfs(&self, param: KineticParam) -> &[EvfDescriptor] {
        &self.evfs[param.slot()]
    }

    /// Column indices of the differential EVFs of `param`.
    pub fn differential_columns(&self, param: KineticParam) -> &[usize] {
        &self.differential[param.slot()]
    }
}

/// Per-cell kinetic parameters, each genes × cells.
#[derive(Debug, Clone)]
pub struct KineticParams {
    pub kon: Array2<f64>,
    pub koff: Array2<f64>,
    pub s: Array2<f64>,
}

/// Gene effects of every EVF, genes × EVFs per kinetic parameter.
#[derive(Debug, Clone)]
pub struct GeneEffects {
    pub kon: Array2<f64>,
    pub koff: Array2<f64>,
    pub s: Array2<f64>,
}

impl GeneEffects {
    pub fn get(&self, param: KineticParam) -> &Array2<f64> {
        match param {
            KineticParam::Kon => &self.kon,
            KineticParam::Koff => &self.koff,
            KineticParam::S => &self.s,
        }
    }
}

/// Ground truth of a simulation needed to judge differential expression.
#[derive(Debug, Clone)]
pub struct SimulationTruth {
    pub kinetics: KineticParams,
    pub gene_effects: GeneEffects,
    pub layout: EvfLayout,
    /// Population label of every cell
    pub populations: Vec<usize>,
}

/// Differential-expression summary between two populations, one entry per gene.
#[derive(Debug, Clone, Serialize)]
pub struct DiffExpResult {
    pub n_diff_evf: Vec<usize>,
    pub log_fc_theoretical: Vec<f64>,
    pub p_values: Vec<f64>,
    pub adjusted_p_values: Vec<f64>,
}

/// Column indices of the cells labelled `population`.
pub fn population_indices(populations: &[usize], population: usize) -> Vec<usize> {
    populations
        .iter()
        .enumerate()
        .filter_map(|(i, &p)| if p == population { Some(i) } else { None })
        .collect()
}

/// `log2(mean_B / mean_A)` of the expected expression `s * kon / (kon + koff)`.
pub fn theoretical_log_fc(
    kinetics: &KineticParams,
    populations: &[usize],
    pop_a: usize,
    pop_b: usize,
) -> anyhow::Result<Vec<f64>> {
    let shape = kinetics.s.dim();
    if kinetics.kon.dim() != shape || kinetics.koff.dim() != shape {
        return Err(anyhow!(
            "Kinetic parameter matrices differ in shape: kon {:?}, koff {:?}, s {:?}",
            kinetics.kon.dim(),
            kinetics.koff.dim(),
            shape
        ));
    }
    if populations.len() != shape.1 {
        return Err(anyhow!(
            "Got {} population labels for {} cells",
            populations.len(),
            shape.1
        ));
    }

    let cells_a = population_indices(populations, pop_a);
    let cells_b = population_indices(populations, pop_b);
    if cells_a.is_empty() || cells_b.is_empty() {
        return Err(anyhow!(
            "Populations {} and {} must both contain cells",
            pop_a,
            pop_b
        ));
    }

    let expected = |gene: usize, cells: &[usize]| -> f64 {
        cells
            .iter()
            .map(|&c| {
                let kon = kinetics.kon[[gene, c]];
                let koff = kinetics.koff[[gene, c]];
                kinetics.s[[gene, c]] * kon / (kon + koff)
            })
            .sum::<f64>()
            / cells.len() as f64
    };

    Ok((0..shape.0)
        .map(|gene| (expected(gene, &cells_b) / expected(gene, &cells_a)).log2())
        .collect())
}

/// Number of differential EVFs with `|effect| > EFFECT_THRESHOLD`, summed over kon, koff and s.
pub fn n_diff_evf(layout: &EvfLayout, effects: &GeneEffects) -> anyhow::Result<Vec<usize>> {
    let n_genes = effects.kon.nrows();
    for param in KineticParam::ALL {
        let matrix = effects.get(param);
        if matrix.nrows() != n_genes {
            return Err(anyhow!(
                "Gene effects of {} cover {} genes, expected {}",
                param.as_str(),
                matrix.nrows(),
                n_genes
            ));
        }
        if matrix.ncols() != layout.evfs(param).len() {
            return Err(anyhow!(
                "Gene effects of {} have {} EVF columns but the layout lists {}",
                param.as_str(),
                matrix.ncols(),
                layout.evfs(param).len()
            ));
        }
    }

    Ok((0..n_genes)
        .map(|gene| {
            KineticParam::ALL
                .iter()
                .map(|&param| {
                    let matrix = effects.get(param);
                    layout
                        .differential_columns(param)
                        .iter()
                        .filter(|&&col| matrix[[gene, col]].abs() > EFFECT_THRESHOLD)
                        .count()
                })
                .sum()
        })
        .collect())
}

/// Differential-expression summary of `counts` (genes × cells) between `pop_a` and `pop_b`.
pub fn differential_expression(
    counts: &Array2<f64>,
    truth: &SimulationTruth,
    pop_a: usize,
    pop_b: usize,
) -> anyhow::Result<DiffExpResult> {
    if counts.dim() != truth.kinetics.s.dim() {
        return Err(anyhow!(
            "Counts {:?} and kinetic parameters {:?} differ in shape",
            counts.dim(),
            truth.kinetics.s.dim()
        ));
    }

    let log_fc_theoretical =
        theoretical_log_fc(&truth.kinetics, &truth.populations, pop_a, pop_b)?;
    let n_diff_evf = n_diff_evf(&truth.layout, &truth.gene_effects)?;
    if n_diff_evf.len() != counts.nrows() {
        return Err(anyhow!(
            "Gene effects cover {} genes, counts have {}",
            n_diff_evf.len(),
            counts.nrows()
        ));
    }

    let cells_a = population_indices(&truth.populations, pop_a);
    let cells_b = population_indices(&truth.populations, pop_b);
    let tests = rank_sum_rows(counts, &cells_a, &cells_b)?;
    let p_values: Vec<f64> = tests.iter().map(|t| t.p_value).collect();
    let adjusted_p_values = benjamini_hochberg(&p_values)?;

    debug!(
        "Tested {} genes between populations {} ({} cells) and {} ({} cells)",
        counts.nrows(),
        pop_a,
        cells_a.len(),
        pop_b,
        cells_b.len()
    );

    Ok(DiffExpResult {
        n_diff_evf,
        log_fc_theoretical,
        p_values,
        adjusted_p_values,
    })
}
