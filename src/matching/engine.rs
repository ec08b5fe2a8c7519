use crate::error::{Result, SimFitError};
use crate::matching::diagnostics::{DiagnosticSink, ProfileDiagnostic};
use crate::matching::diagonal::diag_distance;
use crate::matching::grid::{CandidateConfiguration, ReferenceGrid, Technology};
use crate::matching::MatchConfig;
use crate::summary::{ProfileKind, Scale, SummaryProfiles, SummaryStats};
use rayon::prelude::*;
use serde::Serialize;
use single_utilities::traits::FloatOpsTS;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Distance of one candidate to the query, per profile kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreComponents {
    pub mean: f64,
    pub nonzero: f64,
    pub sd: f64,
}

impl ScoreComponents {
    pub fn get(&self, kind: ProfileKind) -> f64 {
        match kind {
            ProfileKind::Mean => self.mean,
            ProfileKind::Nonzero => self.nonzero,
            ProfileKind::Sd => self.sd,
        }
    }

    /// Dissimilarity score: the sum of the three distances.
    pub fn total(&self) -> f64 {
        self.mean + self.nonzero + self.sd
    }
}

/// A candidate configuration at its position in the ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    /// 1-based position in the ranking
    pub rank: usize,
    pub configuration: CandidateConfiguration,
    /// Dissimilarity score (lower is better, never negative)
    pub score: f64,
    pub components: ScoreComponents,
}

/// Best configurations for a query, ascending by score.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub technology: Technology,
    /// Number of configurations that passed filtering and were scored
    pub n_considered: usize,
    pub matches: Vec<RankedMatch>,
    pub diagnostics: Vec<ProfileDiagnostic>,
}

impl MatchResult {
    pub fn best(&self) -> Option<&RankedMatch> {
        self.matches.first()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.matches.iter().map(|m| m.score).collect()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Hand every diagnostic to `sink`, in rank order.
    pub fn emit_diagnostics<S>(&self, sink: &mut S) -> Result<()>
    where
        S: DiagnosticSink + ?Sized,
    {
        for diagnostic in &self.diagnostics {
            sink.emit(diagnostic)?;
        }
        sink.finish()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Matcher bound to one reference grid.
pub struct GridMatcher<'a> {
    grid: &'a ReferenceGrid,
    config: MatchConfig,
}

impl<'a> GridMatcher<'a> {
    /// Create a matcher with the default configuration
    pub fn new(grid: &'a ReferenceGrid) -> Self {
        Self {
            grid,
            config: MatchConfig::default(),
        }
    }

    /// Create a matcher with a custom configuration
    pub fn with_config(grid: &'a ReferenceGrid, config: MatchConfig) -> Self {
        Self { grid, config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Rank the grid against precomputed query profiles.
    pub fn find_matches(
        &self,
        query: &SummaryProfiles,
        allowed_indices: Option<&[usize]>,
    ) -> Result<MatchResult> {
        best_match_params(query, self.grid, &self.config, allowed_indices)
    }

    /// Summarize `matrix` at the grid's quantile levels and rank the grid against it.
    ///
    /// Genes that never vary (all-zero genes included) have sd 0, which puts a 0 at the
    /// low end of the sd profile and fails with [`SimFitError::InvalidProfile`] on the
    /// log10 scale. Filter such genes out of `matrix` first.
    pub fn match_matrix<M, T>(
        &self,
        matrix: &M,
        allowed_indices: Option<&[usize]>,
    ) -> Result<MatchResult>
    where
        M: SummaryStats<T>,
        T: FloatOpsTS,
    {
        let query = matrix.summary_profiles(self.grid.levels())?;
        self.find_matches(&query, allowed_indices)
    }
}

/// Find the grid configurations whose simulated profiles best match `query`.
///
/// Candidates are filtered by `config.depth_range`, `config.alpha_range` and, when
/// given, `allowed_indices` (grid row indices). All inputs are validated before any
/// candidate is scored:
///
/// - [`SimFitError::ShapeMismatch`] when query and grid use different quantile levels
/// - [`SimFitError::EmptyCandidateSet`] when no configuration passes the filters
/// - [`SimFitError::InvalidProfile`] when a compared profile is not finite, or a mean
///   or sd profile holds a value ≤ 0 (undefined on the log10 scale)
pub fn best_match_params(
    query: &SummaryProfiles,
    grid: &ReferenceGrid,
    config: &MatchConfig,
    allowed_indices: Option<&[usize]>,
) -> Result<MatchResult> {
    config.validate()?;
    validate_shape(query, grid)?;

    let candidates = filter_candidates(grid, config, allowed_indices)?;
    debug!(
        "{} of {} {} configurations pass the depth/alpha/index filters",
        candidates.len(),
        grid.len(),
        grid.technology()
    );

    validate_profile("query", query.profile(ProfileKind::Mean).iter(), ProfileKind::Mean)?;
    validate_profile("query", query.profile(ProfileKind::Nonzero).iter(), ProfileKind::Nonzero)?;
    validate_profile("query", query.profile(ProfileKind::Sd).iter(), ProfileKind::Sd)?;
    for &index in &candidates {
        let label = format!("grid row {}", index);
        for kind in ProfileKind::ALL {
            validate_profile(&label, grid.profile(index, kind).iter(), kind)?;
        }
    }

    let scaled_query: Vec<Vec<f64>> = ProfileKind::ALL
        .iter()
        .map(|&kind| to_scale(query.profile(kind).iter(), kind.scale()))
        .collect();

    let scored: Vec<(usize, ScoreComponents)> = candidates
        .par_iter()
        .map(|&index| {
            score_candidate(grid, index, &scaled_query, config.nbins)
                .map(|components| (index, components))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut ranked = scored;
    ranked.sort_by(|a, b| {
        a.1.total()
            .partial_cmp(&b.1.total())
            .unwrap_or(Ordering::Equal)
    });
    ranked.truncate(config.n_optimal);

    let configurations = grid.configurations();
    let matches: Vec<RankedMatch> = ranked
        .into_iter()
        .enumerate()
        .map(|(position, (index, components))| RankedMatch {
            rank: position + 1,
            configuration: configurations[index].clone(),
            score: components.total(),
            components,
        })
        .collect();

    let n_diagnosed = config.diagnostics.n_matches(matches.len());
    let mut diagnostics = Vec::with_capacity(n_diagnosed * ProfileKind::ALL.len());
    for ranked_match in matches.iter().take(n_diagnosed) {
        let index = ranked_match.configuration.index;
        for (k, &kind) in ProfileKind::ALL.iter().enumerate() {
            diagnostics.push(ProfileDiagnostic {
                rank: ranked_match.rank,
                candidate_index: index,
                kind,
                scale: kind.scale(),
                label: format!(
                    "best match #{} (grid row {}): {} [{}]",
                    ranked_match.rank,
                    index,
                    kind,
                    kind.scale().as_str()
                ),
                levels: grid.levels().as_slice().to_vec(),
                candidate: to_scale(grid.profile(index, kind).iter(), kind.scale()),
                query: scaled_query[k].clone(),
            });
        }
    }

    if let Some(best) = matches.first() {
        info!(
            "Ranked {} {} configurations, best is grid row {} with score {:.4}",
            candidates.len(),
            grid.technology(),
            best.configuration.index,
            best.score
        );
    }

    Ok(MatchResult {
        technology: grid.technology(),
        n_considered: candidates.len(),
        matches,
        diagnostics,
    })
}

fn validate_shape(query: &SummaryProfiles, grid: &ReferenceGrid) -> Result<()> {
    let expected = grid.levels().len();
    for kind in ProfileKind::ALL {
        let actual = query.profile(kind).len();
        if actual != expected {
            return Err(SimFitError::ShapeMismatch {
                context: format!("query {} profile length vs grid levels", kind),
                expected,
                actual,
            });
        }
    }
    if !query.levels.matches(grid.levels()) {
        return Err(SimFitError::ShapeMismatch {
            context: "query quantile levels differ from the grid's".to_string(),
            expected,
            actual: query.levels.len(),
        });
    }
    Ok(())
}

/// Grid rows passing the depth, alpha and index filters, in grid order.
fn filter_candidates(
    grid: &ReferenceGrid,
    config: &MatchConfig,
    allowed_indices: Option<&[usize]>,
) -> Result<Vec<usize>> {
    let allowed: Option<BTreeSet<usize>> = allowed_indices.map(|idx| idx.iter().copied().collect());

    let candidates: Vec<usize> = grid
        .configurations()
        .iter()
        .filter(|c| config.depth_range.contains(c.depth_mean))
        .filter(|c| config.alpha_range.contains(c.alpha_mean))
        .filter(|c| allowed.as_ref().is_none_or(|set| set.contains(&c.index)))
        .map(|c| c.index)
        .collect();

    if candidates.is_empty() {
        return Err(SimFitError::EmptyCandidateSet(format!(
            "depth {:?}, alpha {:?}, {} of {} configurations",
            config.depth_range,
            config.alpha_range,
            allowed.map_or("no index subset".to_string(), |set| format!(
                "index subset of {}",
                set.len()
            )),
            grid.len()
        )));
    }
    Ok(candidates)
}

fn validate_profile<'a, I>(source: &str, values: I, kind: ProfileKind) -> Result<()>
where
    I: Iterator<Item = &'a f64>,
{
    let log_scale = kind.scale() == Scale::Log10;
    for (position, &value) in values.enumerate() {
        if !value.is_finite() || (log_scale && value <= 0.0) {
            return Err(SimFitError::InvalidProfile {
                kind: kind.to_string(),
                source_label: source.to_string(),
                position,
                value,
            });
        }
    }
    Ok(())
}

fn to_scale<'a, I>(values: I, scale: Scale) -> Vec<f64>
where
    I: Iterator<Item = &'a f64>,
{
    match scale {
        Scale::Log10 => values.map(|v| v.log10()).collect(),
        Scale::Linear => values.copied().collect(),
    }
}

fn score_candidate(
    grid: &ReferenceGrid,
    index: usize,
    scaled_query: &[Vec<f64>],
    nbins: usize,
) -> Result<ScoreComponents> {
    let mut distances = [0.0; 3];
    for (k, &kind) in ProfileKind::ALL.iter().enumerate() {
        let candidate = to_scale(grid.profile(index, kind).iter(), kind.scale());
        let query = &scaled_query[k];
        let mean_abs = candidate
            .iter()
            .zip(query.iter())
            .map(|(c, q)| (c - q).abs())
            .sum::<f64>()
            / candidate.len() as f64;
        distances[k] = mean_abs + diag_distance(&candidate, query, nbins)?;
    }

    Ok(ScoreComponents {
        mean: distances[0],
        nonzero: distances[1],
        sd: distances[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::diagnostics::DiagnosticScope;
    use crate::matching::grid::{ALPHA_COLUMN, DEPTH_COLUMN};
    use crate::summary::QuantileLevels;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use std::collections::BTreeMap;

    fn query_profiles(levels: &QuantileLevels) -> SummaryProfiles {
        let mean = levels.as_slice().iter().map(|p| 1.0 + 20.0 * p * p).collect();
        let sd = levels.as_slice().iter().map(|p| 0.1 + 5.0 * p).collect();
        let nonzero = levels.as_slice().iter().map(|p| 0.05 + 0.9 * p).collect();
        SummaryProfiles::new(levels.clone(), mean, sd, nonzero).unwrap()
    }

    /// Grid whose row `i` is the query scaled by `factors[i]` (nonzero left untouched).
    fn grid_from_factors(query: &SummaryProfiles, factors: &[f64], depths: &[f64]) -> ReferenceGrid {
        let n = factors.len();
        let l = query.len();
        let mean = Array2::from_shape_fn((n, l), |(i, j)| query.mean[j] * factors[i]);
        let sd = Array2::from_shape_fn((n, l), |(i, j)| query.sd[j] * factors[i]);
        let nonzero = Array2::from_shape_fn((n, l), |(_, j)| query.nonzero[j]);
        let configs = (0..n)
            .map(|i| {
                let params = BTreeMap::from([
                    (DEPTH_COLUMN.to_string(), depths[i]),
                    (ALPHA_COLUMN.to_string(), 0.1 * (i + 1) as f64),
                ]);
                CandidateConfiguration::from_parameters(i, params).unwrap()
            })
            .collect();
        ReferenceGrid::new(
            Technology::Umi,
            query.levels.clone(),
            configs,
            mean,
            sd,
            nonzero,
        )
        .unwrap()
    }

    #[test]
    fn test_scaled_candidates_rank_by_log_distance() {
        let levels = QuantileLevels::default();
        let query = query_profiles(&levels);
        let grid = grid_from_factors(&query, &[10.0, 1.0, 2.0, 0.5, 4.0], &[1e4; 5]);

        let result = best_match_params(&query, &grid, &MatchConfig::default(), None).unwrap();
        let order: Vec<usize> = result.matches.iter().map(|m| m.configuration.index).collect();
        // log10 distance is |log10(factor)| for each of mean and sd, twice (mean + diagonal)
        assert_eq!(order[0], 1);
        assert_eq!(order[4], 0);
        assert_abs_diff_eq!(result.matches[0].score, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(
            result.matches[4].score,
            4.0 * 10.0f64.log10(),
            epsilon = 1e-9
        );
        // factors 2 and 0.5 are equally far off on the log scale
        let mut middle = order[1..3].to_vec();
        middle.sort();
        assert_eq!(middle, vec![2, 3]);
        assert_eq!(order[3], 4);
        assert_abs_diff_eq!(result.matches[1].score, result.matches[2].score, epsilon = 1e-9);
        assert_eq!(result.n_considered, 5);
    }

    #[test]
    fn test_components_sum_to_score() {
        let levels = QuantileLevels::default();
        let query = query_profiles(&levels);
        let grid = grid_from_factors(&query, &[3.0], &[1e4]);
        let result = best_match_params(&query, &grid, &MatchConfig::default(), None).unwrap();
        let best = result.best().unwrap();
        assert_abs_diff_eq!(best.components.nonzero, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(best.components.mean, 2.0 * 3.0f64.log10(), epsilon = 1e-9);
        assert_abs_diff_eq!(best.score, best.components.total(), epsilon = 1e-12);
    }

    #[test]
    fn test_index_subset_restricts_candidates() {
        let levels = QuantileLevels::default();
        let query = query_profiles(&levels);
        let grid = grid_from_factors(&query, &[1.0, 2.0, 3.0], &[1e4; 3]);
        let result =
            best_match_params(&query, &grid, &MatchConfig::default(), Some(&[2, 0, 42])).unwrap();
        let order: Vec<usize> = result.matches.iter().map(|m| m.configuration.index).collect();
        assert_eq!(order, vec![0, 2]);
    }

    #[test]
    fn test_diagnostics_follow_scope() {
        let levels = QuantileLevels::default();
        let query = query_profiles(&levels);
        let grid = grid_from_factors(&query, &[1.0, 2.0, 3.0], &[1e4; 3]);

        let top = best_match_params(&query, &grid, &MatchConfig::default(), None).unwrap();
        assert_eq!(top.diagnostics.len(), 3);
        assert!(top.diagnostics.iter().all(|d| d.rank == 1 && d.len() == 501));
        let mean = &top.diagnostics[0];
        assert_eq!(mean.kind, ProfileKind::Mean);
        assert_abs_diff_eq!(mean.query[0], 0.0, epsilon = 1e-12); // log10(1)

        let config = MatchConfig::default().with_diagnostics(DiagnosticScope::AllMatches);
        let all = best_match_params(&query, &grid, &config, None).unwrap();
        assert_eq!(all.diagnostics.len(), 9);

        let config = MatchConfig::default().with_diagnostics(DiagnosticScope::None);
        let none = best_match_params(&query, &grid, &config, None).unwrap();
        assert!(none.diagnostics.is_empty());
    }

    #[test]
    fn test_negative_sd_in_unfiltered_row_is_ignored() {
        let levels = QuantileLevels::new(vec![0.0, 0.5, 1.0]).unwrap();
        let query = query_profiles(&levels);
        let mut grid_sd = Array2::from_shape_fn((2, 3), |(_, j)| query.sd[j]);
        grid_sd[[1, 0]] = -1.0;
        let configs = (0..2)
            .map(|i| {
                let params = BTreeMap::from([
                    (DEPTH_COLUMN.to_string(), 1e4 * (i + 1) as f64),
                    (ALPHA_COLUMN.to_string(), 0.1),
                ]);
                CandidateConfiguration::from_parameters(i, params).unwrap()
            })
            .collect();
        let grid = ReferenceGrid::new(
            Technology::NonUmi,
            levels.clone(),
            configs,
            Array2::from_shape_fn((2, 3), |(_, j)| query.mean[j]),
            grid_sd,
            Array2::from_shape_fn((2, 3), |(_, j)| query.nonzero[j]),
        )
        .unwrap();

        let all = best_match_params(&query, &grid, &MatchConfig::default(), None);
        assert!(matches!(all, Err(SimFitError::InvalidProfile { .. })));

        let config = MatchConfig::default().with_depth_range(0.0, 1.5e4);
        let filtered = best_match_params(&query, &grid, &config, None).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.technology, Technology::NonUmi);
    }

    #[test]
    fn test_mismatched_levels() {
        let levels = QuantileLevels::default();
        let query = query_profiles(&levels);
        let grid = grid_from_factors(&query, &[1.0], &[1e4]);

        let other_levels = QuantileLevels::evenly_spaced(0.01).unwrap();
        let short_query = query_profiles(&other_levels);
        let result = best_match_params(&short_query, &grid, &MatchConfig::default(), None);
        assert!(matches!(result, Err(SimFitError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_same_length_levels_with_different_values() {
        let grid_levels = QuantileLevels::new(vec![0.0, 0.5, 1.0]).unwrap();
        let grid = grid_from_factors(&query_profiles(&grid_levels), &[1.0], &[1e4]);

        let query_levels = QuantileLevels::new(vec![0.0, 0.25, 1.0]).unwrap();
        let query = query_profiles(&query_levels);
        let result = best_match_params(&query, &grid, &MatchConfig::default(), None);
        assert!(matches!(
            result,
            Err(SimFitError::ShapeMismatch {
                expected: 3,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_nan_in_candidate_nonzero_profile() {
        let levels = QuantileLevels::new(vec![0.0, 0.5, 1.0]).unwrap();
        let query = query_profiles(&levels);
        let mut nonzero = Array2::from_shape_fn((2, 3), |(_, j)| query.nonzero[j]);
        nonzero[[1, 2]] = f64::NAN;
        let configs = (0..2)
            .map(|i| {
                let params = BTreeMap::from([
                    (DEPTH_COLUMN.to_string(), 1e4),
                    (ALPHA_COLUMN.to_string(), 0.1),
                ]);
                CandidateConfiguration::from_parameters(i, params).unwrap()
            })
            .collect();
        let grid = ReferenceGrid::new(
            Technology::Umi,
            levels.clone(),
            configs,
            Array2::from_shape_fn((2, 3), |(_, j)| query.mean[j]),
            Array2::from_shape_fn((2, 3), |(_, j)| query.sd[j]),
            nonzero,
        )
        .unwrap();

        match best_match_params(&query, &grid, &MatchConfig::default(), None) {
            Err(SimFitError::InvalidProfile {
                kind,
                source_label,
                position,
                value,
            }) => {
                assert_eq!(kind, "nonzero");
                assert_eq!(source_label, "grid row 1");
                assert_eq!(position, 2);
                assert!(value.is_nan());
            }
            other => panic!("expected InvalidProfile, got {:?}", other.map(|r| r.scores())),
        }

        // Row 1 filtered out by index leaves only valid profiles
        let result =
            best_match_params(&query, &grid, &MatchConfig::default(), Some(&[0])).unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_nan_in_query_sd_profile() {
        let levels = QuantileLevels::new(vec![0.0, 0.5, 1.0]).unwrap();
        let mut query = query_profiles(&levels);
        let grid = grid_from_factors(&query, &[1.0, 2.0], &[1e4; 2]);

        query.sd[1] = f64::NAN;
        let result = best_match_params(&query, &grid, &MatchConfig::default(), None);
        assert!(matches!(
            result,
            Err(SimFitError::InvalidProfile { ref kind, position: 1, .. }) if kind == "sd"
        ));
    }

    #[test]
    fn test_constant_gene_gives_zero_sd_profile() {
        let counts = ndarray::array![[0.0, 0.0, 0.0], [1.0, 4.0, 2.0], [3.0, 0.0, 1.0]];
        let levels = QuantileLevels::new(vec![0.0, 0.5, 1.0]).unwrap();
        let profiles = counts.summary_profiles(&levels).unwrap();
        assert_eq!(profiles.sd[0], 0.0);

        let grid = grid_from_factors(&query_profiles(&levels), &[1.0], &[1e4]);
        let result = GridMatcher::new(&grid).match_matrix(&counts, None);
        assert!(matches!(
            result,
            Err(SimFitError::InvalidProfile { ref kind, ref source_label, position: 0, .. })
                if kind == "sd" && source_label == "query"
        ));

        // Dropping the constant gene makes the matrix matchable
        let varying = counts.slice(ndarray::s![1.., ..]).to_owned();
        assert!(GridMatcher::new(&grid).match_matrix(&varying, None).is_ok());
    }

    #[test]
    fn test_json_export() {
        let levels = QuantileLevels::new(vec![0.0, 0.5, 1.0]).unwrap();
        let query = query_profiles(&levels);
        let grid = grid_from_factors(&query, &[1.0, 2.0], &[1e4, 2e4]);
        let result = best_match_params(&query, &grid, &MatchConfig::default(), None).unwrap();
        let json = result.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["technology"], "Umi");
        assert_eq!(value["matches"][0]["configuration"]["depth_mean"], 1e4);
    }
}
