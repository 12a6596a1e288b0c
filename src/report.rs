//! Run-scoped accumulation of data-quality problems and statistics.
//!
//! Data-quality problems (an unmatched screened-film title, a screening
//! without a resolvable screen) never halt a run; they are collected here
//! and reported at the end for human triage. Identity errors, by contrast,
//! surface as `ScraperError` and are never routed through this collector.

use std::fmt;
use tracing::warn;

/// A single recoverable problem found while scraping or resolving.
#[derive(Debug, Clone)]
pub struct DataQualityError {
    pub context: String,
    pub message: String,
}

impl fmt::Display for DataQualityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.context, self.message)
    }
}

/// Counters and collected errors for one festival run.
#[derive(Debug, Default)]
pub struct RunReport {
    errors: Vec<DataQualityError>,
    pub pages_parsed: u32,
    pub films_created: u32,
    pub screenings_added: u32,
    pub duplicate_screenings: u32,
    pub unmatched_screened_films: u32,
    pub screens_repaired: u32,
    pub durations_repaired: u32,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a recoverable data-quality problem. The run continues.
    pub fn data_quality(&mut self, context: impl Into<String>, message: impl Into<String>) {
        let err = DataQualityError {
            context: context.into(),
            message: message.into(),
        };
        warn!(context = %err.context, "data quality: {}", err.message);
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[DataQualityError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Human-readable end-of-run summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("   Pages parsed: {}\n", self.pages_parsed));
        out.push_str(&format!("   Films created: {}\n", self.films_created));
        out.push_str(&format!("   Screenings added: {}\n", self.screenings_added));
        out.push_str(&format!(
            "   Duplicate screenings dropped: {}\n",
            self.duplicate_screenings
        ));
        out.push_str(&format!(
            "   Unmatched screened films: {}\n",
            self.unmatched_screened_films
        ));
        out.push_str(&format!("   Screens repaired: {}\n", self.screens_repaired));
        out.push_str(&format!("   Durations repaired: {}\n", self.durations_repaired));
        out.push_str(&format!("   Data-quality errors: {}", self.errors.len()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_without_halting() {
        let mut report = RunReport::new();
        report.data_quality("resolver", "no film matches screened title 'X'");
        report.data_quality("idfa", "screening without start time");
        assert_eq!(report.errors().len(), 2);
        assert!(report.has_errors());
        assert!(report.errors()[0].to_string().contains("resolver"));
    }
}
