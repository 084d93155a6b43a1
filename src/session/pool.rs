//! Per-stream set of active detectors.

use crate::engine::{InferenceBackend, WakeWordEngine};
use crate::error::Result;
use crate::models::catalog::{ModelCatalog, ModelRef};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One engine bound to one model for the lifetime of a stream.
pub struct Detector {
    model: ModelRef,
    engine: Box<dyn WakeWordEngine>,
    detected: bool,
    last_detected_at: Option<Instant>,
}

impl Detector {
    pub fn new(model: ModelRef, engine: Box<dyn WakeWordEngine>) -> Self {
        Self {
            model,
            engine,
            detected: false,
            last_detected_at: None,
        }
    }

    /// Construct the engine for `model` through the backend.
    pub fn load(model: ModelRef, backend: &dyn InferenceBackend) -> Result<Self> {
        let engine = match &model {
            ModelRef::Builtin(builtin) => backend.from_builtin(*builtin)?,
            ModelRef::Custom(custom) => backend.from_config(&custom.config_path)?,
        };
        Ok(Self::new(model, engine))
    }

    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn wake_word(&self) -> &str {
        self.engine.wake_word()
    }

    /// Whether this detector reported at least once during the stream.
    pub fn detected(&self) -> bool {
        self.detected
    }

    pub fn last_detected_at(&self) -> Option<Instant> {
        self.last_detected_at
    }

    pub(crate) fn engine_mut(&mut self) -> &mut dyn WakeWordEngine {
        self.engine.as_mut()
    }

    /// True while `now` is inside the refractory window of the last report.
    pub fn in_refractory(&self, now: Instant, refractory: Duration) -> bool {
        self.last_detected_at
            .is_some_and(|last| now.saturating_duration_since(last) < refractory)
    }

    /// Mark a reported detection.
    pub fn record_detection(&mut self, now: Instant) {
        self.detected = true;
        // Keep the timestamp monotonic even if a caller hands in an older instant.
        self.last_detected_at = Some(match self.last_detected_at {
            Some(last) if last > now => last,
            _ => now,
        });
    }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("model", &self.model.name())
            .field("detected", &self.detected)
            .field("last_detected_at", &self.last_detected_at)
            .finish()
    }
}

/// Resolve `names` in order, dropping unknown names and repeats.
pub fn resolve_selection(names: &[String], catalog: &ModelCatalog) -> Vec<ModelRef> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::new();

    for name in names {
        match catalog.resolve(name) {
            Some(model) => {
                if seen.insert(model.name().to_string()) {
                    resolved.push(model);
                }
            }
            None => warn!("Unknown model name: {}", name),
        }
    }

    resolved
}

/// Detectors for the active stream, in insertion order.
#[derive(Debug, Default)]
pub struct DetectorPool {
    detectors: Vec<Detector>,
}

impl DetectorPool {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build one detector per resolvable selected name.
    ///
    /// Falls back to `default_model` when nothing in the selection resolves.
    /// A model whose engine cannot be constructed is logged and left out; the
    /// rest of the pool is still built.
    pub fn build(
        selected: &[String],
        catalog: &ModelCatalog,
        default_model: &str,
        backend: &dyn InferenceBackend,
    ) -> Self {
        let mut models = resolve_selection(selected, catalog);
        if models.is_empty() {
            match catalog.resolve(default_model) {
                Some(model) => models.push(model),
                None => warn!("Default model {} is not in the catalog", default_model),
            }
        }

        let detectors = models
            .into_iter()
            .filter_map(|model| {
                let name = model.name().to_string();
                match Detector::load(model, backend) {
                    Ok(detector) => Some(detector),
                    Err(e) => {
                        warn!("Failed to load model {}: {}", name, e);
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "Loaded models: {:?}",
            detectors.iter().map(|d| d.name()).collect::<Vec<_>>()
        );

        Self { detectors }
    }

    /// Release every detector.
    pub fn teardown(&mut self) {
        self.detectors.clear();
    }

    /// True if any detector reported since the pool was built.
    pub fn any_detected(&self) -> bool {
        self.detectors.iter().any(|d| d.detected())
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    pub(crate) fn detectors_mut(&mut self) -> &mut [Detector] {
        &mut self.detectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Precedence;
    use crate::engine::mock::ScriptedBackend;
    use crate::models::builtin::BuiltinModel;
    use crate::models::catalog::ModelMetadata;
    use crate::models::custom::{CustomModel, MicroSettings};
    use std::path::PathBuf;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn catalog_with_custom(name: &str) -> ModelCatalog {
        let model = CustomModel {
            name: name.to_string(),
            config_path: PathBuf::from(format!("/models/{name}.json")),
            model_path: PathBuf::from(format!("/models/{name}.tflite")),
            metadata: ModelMetadata {
                description: name.to_string(),
                phrase: name.to_string(),
                author: "unknown".to_string(),
                url: String::new(),
                languages: Vec::new(),
                version: "unknown".to_string(),
            },
            micro: MicroSettings::default(),
        };
        ModelCatalog::from_custom_models(vec![model], Precedence::Builtin)
    }

    #[test]
    fn test_build_empty_selection_uses_default() {
        let catalog = ModelCatalog::builtin_only();
        let pool = DetectorPool::build(&[], &catalog, "okay_nabu", &ScriptedBackend::new());
        assert_eq!(pool.names(), vec!["okay_nabu"]);
    }

    #[test]
    fn test_build_unknown_names_fall_back_to_default() {
        let catalog = ModelCatalog::builtin_only();
        let pool = DetectorPool::build(
            &names(&["unknown_model"]),
            &catalog,
            "okay_nabu",
            &ScriptedBackend::new(),
        );
        assert_eq!(pool.names(), vec!["okay_nabu"]);
    }

    #[test]
    fn test_build_keeps_first_occurrence_order_and_dedups() {
        let catalog = catalog_with_custom("hey_test");
        let pool = DetectorPool::build(
            &names(&["hey_jarvis", "hey_test", "nope", "hey_jarvis", "alexa", "hey_test"]),
            &catalog,
            "okay_nabu",
            &ScriptedBackend::new(),
        );
        assert_eq!(pool.names(), vec!["hey_jarvis", "hey_test", "alexa"]);
    }

    #[test]
    fn test_build_skips_models_that_fail_to_load() {
        let catalog = ModelCatalog::builtin_only();
        let backend = ScriptedBackend::new().with_broken_model("hey_jarvis");
        let pool = DetectorPool::build(
            &names(&["hey_jarvis", "alexa"]),
            &catalog,
            "okay_nabu",
            &backend,
        );
        assert_eq!(pool.names(), vec!["alexa"]);
    }

    #[test]
    fn test_build_all_failing_gives_empty_pool() {
        let catalog = ModelCatalog::builtin_only();
        let backend = ScriptedBackend::new().with_broken_model("okay_nabu");
        let pool = DetectorPool::build(&[], &catalog, "okay_nabu", &backend);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_build_with_unresolvable_default_gives_empty_pool() {
        let catalog = ModelCatalog::builtin_only();
        let pool = DetectorPool::build(&[], &catalog, "missing", &ScriptedBackend::new());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_custom_model_uses_config_constructor() {
        let catalog = catalog_with_custom("hey_test");
        let backend = ScriptedBackend::new().with_broken_model("hey_test");
        let pool = DetectorPool::build(&names(&["hey_test"]), &catalog, "okay_nabu", &backend);
        // The only selected model failed, so nothing falls back either.
        assert!(pool.is_empty());
    }

    #[test]
    fn test_teardown_and_any_detected() {
        let catalog = ModelCatalog::builtin_only();
        let mut pool = DetectorPool::build(
            &names(&["alexa", "okay_nabu"]),
            &catalog,
            "okay_nabu",
            &ScriptedBackend::new(),
        );
        assert_eq!(pool.len(), 2);
        assert!(!pool.any_detected());

        pool.detectors_mut()[1].record_detection(Instant::now());
        assert!(pool.any_detected());
        assert!(!pool.detectors()[0].detected());

        pool.teardown();
        assert!(pool.is_empty());
        assert!(!pool.any_detected());
    }

    #[test]
    fn test_refractory_window() {
        let backend = ScriptedBackend::new();
        let mut detector =
            Detector::load(ModelRef::Builtin(BuiltinModel::OkayNabu), &backend).unwrap();
        let start = Instant::now();
        let window = Duration::from_secs(2);

        assert!(!detector.in_refractory(start, window));

        detector.record_detection(start);
        assert!(detector.in_refractory(start + Duration::from_millis(1999), window));
        assert!(!detector.in_refractory(start + Duration::from_secs(2), window));
    }

    #[test]
    fn test_last_detected_at_only_increases() {
        let backend = ScriptedBackend::new();
        let mut detector =
            Detector::load(ModelRef::Builtin(BuiltinModel::Alexa), &backend).unwrap();
        let start = Instant::now();

        detector.record_detection(start + Duration::from_secs(5));
        detector.record_detection(start);

        assert_eq!(detector.last_detected_at(), Some(start + Duration::from_secs(5)));
    }

    #[test]
    fn test_resolve_selection_drops_unknown() {
        let catalog = ModelCatalog::builtin_only();
        let resolved = resolve_selection(&names(&["x", "alexa", "y"]), &catalog);
        assert_eq!(resolved, vec![ModelRef::Builtin(BuiltinModel::Alexa)]);
    }
}
