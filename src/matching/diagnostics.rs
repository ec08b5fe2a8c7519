//! Diagnostic profile pairs produced by parameter matching.
//!
//! Matching itself never renders anything. It returns [`ProfileDiagnostic`] records and
//! the caller decides whether to hand them to a [`DiagnosticSink`].

use crate::error::Result;
use crate::summary::{ProfileKind, Scale};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Which matches get diagnostic profile pairs attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticScope {
    None,
    #[default]
    TopMatch,
    AllMatches,
}

impl DiagnosticScope {
    /// Number of ranked matches that receive diagnostics.
    pub fn n_matches(&self, n_ranked: usize) -> usize {
        match self {
            DiagnosticScope::None => 0,
            DiagnosticScope::TopMatch => n_ranked.min(1),
            DiagnosticScope::AllMatches => n_ranked,
        }
    }
}

/// Candidate and query profiles of one kind, on the scale they were compared on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDiagnostic {
    /// 1-based rank of the match.
    pub rank: usize,
    pub candidate_index: usize,
    pub kind: ProfileKind,
    pub scale: Scale,
    pub label: String,
    pub levels: Vec<f64>,
    pub candidate: Vec<f64>,
    pub query: Vec<f64>,
}

impl ProfileDiagnostic {
    pub fn len(&self) -> usize {
        self.candidate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidate.is_empty()
    }
}

/// Consumer of diagnostic records, e.g. a plotting layer or a file writer.
pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: &ProfileDiagnostic) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects diagnostics in memory.
#[derive(Debug, Default)]
pub struct VecDiagnosticSink {
    pub diagnostics: Vec<ProfileDiagnostic>,
}

impl DiagnosticSink for VecDiagnosticSink {
    fn emit(&mut self, diagnostic: &ProfileDiagnostic) -> Result<()> {
        self.diagnostics.push(diagnostic.clone());
        Ok(())
    }
}

/// Writes one tab-separated row per profile point.
///
/// Columns: `label, rank, candidate_index, kind, scale, level, candidate, query`.
pub struct TsvDiagnosticSink<W: Write> {
    writer: csv::Writer<W>,
    header_written: bool,
}

impl<W: Write> TsvDiagnosticSink<W> {
    pub fn new(inner: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(inner);
        TsvDiagnosticSink {
            writer,
            header_written: false,
        }
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::error::SimFitError::Io(e.into_error()))
    }
}

impl<W: Write> DiagnosticSink for TsvDiagnosticSink<W> {
    fn emit(&mut self, diagnostic: &ProfileDiagnostic) -> Result<()> {
        if !self.header_written {
            self.writer.write_record([
                "label",
                "rank",
                "candidate_index",
                "kind",
                "scale",
                "level",
                "candidate",
                "query",
            ])?;
            self.header_written = true;
        }

        let rank = diagnostic.rank.to_string();
        let index = diagnostic.candidate_index.to_string();
        for ((level, candidate), query) in diagnostic
            .levels
            .iter()
            .zip(diagnostic.candidate.iter())
            .zip(diagnostic.query.iter())
        {
            self.writer.write_record([
                diagnostic.label.as_str(),
                rank.as_str(),
                index.as_str(),
                diagnostic.kind.as_str(),
                diagnostic.scale.as_str(),
                level.to_string().as_str(),
                candidate.to_string().as_str(),
                query.to_string().as_str(),
            ])?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
