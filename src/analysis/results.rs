/*!
 * Collected analysis results
 */

use std::collections::BTreeMap;
use std::time::Duration;

use super::analyzer::AnalyzerOutput;
use crate::error::NebulaError;

/// Immutable outcome of a harness run. Every registered analyzer lands
/// in exactly one of the two maps.
#[derive(Debug)]
pub struct AnalysisResults {
    results: BTreeMap<String, AnalyzerOutput>,
    errors: BTreeMap<String, NebulaError>,
    processing_time: Duration,
}

impl AnalysisResults {
    pub(crate) fn new(
        results: BTreeMap<String, AnalyzerOutput>,
        errors: BTreeMap<String, NebulaError>,
        processing_time: Duration,
    ) -> Self {
        debug_assert!(
            results.keys().all(|id| !errors.contains_key(id)),
            "an analyzer appeared in both maps"
        );
        Self {
            results,
            errors,
            processing_time,
        }
    }

    /// Typed lookup of a successful analyzer's output
    pub fn get<T: 'static>(&self, analyzer_id: &str) -> Option<&T> {
        self.results
            .get(analyzer_id)
            .and_then(|output| output.downcast_ref::<T>())
    }

    /// The raw output for an analyzer, if it succeeded
    pub fn output(&self, analyzer_id: &str) -> Option<&AnalyzerOutput> {
        self.results.get(analyzer_id)
    }

    /// The error for an analyzer, if it failed
    pub fn error(&self, analyzer_id: &str) -> Option<&NebulaError> {
        self.errors.get(analyzer_id)
    }

    /// Ids that completed successfully, in deterministic order
    pub fn successful_ids(&self) -> Vec<&str> {
        self.results.keys().map(|s| s.as_str()).collect()
    }

    /// Ids that failed, in deterministic order
    pub fn failed_ids(&self) -> Vec<&str> {
        self.errors.keys().map(|s| s.as_str()).collect()
    }

    pub fn success_count(&self) -> usize {
        self.results.len()
    }

    pub fn failure_count(&self) -> usize {
        self.errors.len()
    }

    pub fn is_fully_successful(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn processing_time(&self) -> Duration {
        self.processing_time
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed in {:.1}s",
            self.results.len(),
            self.errors.len(),
            self.processing_time.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AnalysisResults {
        let mut results = BTreeMap::new();
        results.insert(
            "model_extractor".to_string(),
            AnalyzerOutput::new(vec![1.0f64, 2.0]),
        );
        let mut errors = BTreeMap::new();
        errors.insert(
            "broken".to_string(),
            NebulaError::Analyzer {
                id: "broken".to_string(),
                message: "boom".to_string(),
            },
        );
        AnalysisResults::new(results, errors, Duration::from_millis(1500))
    }

    #[test]
    fn test_typed_lookup() {
        let results = sample();
        assert_eq!(
            results.get::<Vec<f64>>("model_extractor"),
            Some(&vec![1.0, 2.0])
        );
        assert!(results.get::<String>("model_extractor").is_none());
        assert!(results.get::<Vec<f64>>("broken").is_none());
    }

    #[test]
    fn test_disjoint_views() {
        let results = sample();
        assert_eq!(results.successful_ids(), vec!["model_extractor"]);
        assert_eq!(results.failed_ids(), vec!["broken"]);
        assert!(!results.is_fully_successful());
        assert!(results.error("broken").is_some());
        assert!(results.error("model_extractor").is_none());
    }

    #[test]
    fn test_summary() {
        let results = sample();
        assert_eq!(results.summary(), "1 succeeded, 1 failed in 1.5s");
        assert_eq!(results.processing_time(), Duration::from_millis(1500));
    }
}
