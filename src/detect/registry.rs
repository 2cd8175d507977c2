use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::Device;

use super::backend::{Classifier, Detector, ModelRole};
use super::backends::StubLoader;

/// Turns a checkpoint location into a live model.
pub trait ModelLoader: Send + Sync {
    /// Loader identifier.
    fn name(&self) -> &'static str;

    /// Returns true when this loader understands `location`.
    fn handles(&self, location: &str) -> bool;

    fn load_detector(&self, location: &str, device: Device) -> Result<Box<dyn Detector>>;

    fn load_classifier(&self, location: &str, device: Device) -> Result<Box<dyn Classifier>>;
}

/// Ordered set of model loaders.
///
/// The first registered loader that handles a location wins, so more specific
/// loaders (e.g. the `stub://` scheme) must be registered before catch-alls.
pub struct ModelRegistry {
    loaders: Vec<Arc<dyn ModelLoader>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            loaders: Vec::new(),
        }
    }

    /// Stub loader, plus the ONNX loader when the `backend-tract` feature is on.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(StubLoader);
        #[cfg(feature = "backend-tract")]
        registry.register(super::backends::TractLoader::default());
        registry
    }

    pub fn register<L: ModelLoader + 'static>(&mut self, loader: L) {
        self.loaders.push(Arc::new(loader));
    }

    /// List registered loaders in resolution order.
    pub fn list(&self) -> Vec<&'static str> {
        self.loaders.iter().map(|loader| loader.name()).collect()
    }

    pub fn loader_for(&self, role: ModelRole, location: &str) -> Result<Arc<dyn ModelLoader>> {
        self.loaders
            .iter()
            .find(|loader| loader.handles(location))
            .cloned()
            .ok_or_else(|| {
                anyhow!(
                    "no registered backend loads {} checkpoint '{}' (registered: {:?})",
                    role,
                    location,
                    self.list()
                )
            })
    }

    pub fn load_detector(&self, location: &str, device: Device) -> Result<Arc<dyn Detector>> {
        let loader = self.loader_for(ModelRole::Detector, location)?;
        let detector = loader.load_detector(location, device)?;
        detector.warm_up()?;
        log::info!(
            "detector loaded from {} ({} backend, device {})",
            location,
            detector.name(),
            device
        );
        Ok(Arc::from(detector))
    }

    pub fn load_classifier(&self, location: &str, device: Device) -> Result<Arc<dyn Classifier>> {
        let loader = self.loader_for(ModelRole::Classifier, location)?;
        let classifier = loader.load_classifier(location, device)?;
        classifier.warm_up()?;
        log::info!(
            "classifier loaded from {} ({} backend, device {})",
            location,
            classifier.name(),
            device
        );
        Ok(Arc::from(classifier))
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
