//! Wake word model catalog.
//!
//! Built once at startup from the builtin table plus the custom model
//! directories, then shared read-only (behind an `Arc`) by every session.

use crate::config::Precedence;
use crate::models::builtin::{BUILTIN_MODELS, BuiltinModel};
use crate::models::custom::{self, CustomModel};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Descriptive information about a model, as reported to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub description: String,
    pub phrase: String,
    pub author: String,
    pub url: String,
    pub languages: Vec<String>,
    pub version: String,
}

/// A resolved model: either shipped with the backend or loaded from a config.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelRef {
    Builtin(BuiltinModel),
    Custom(Arc<CustomModel>),
}

impl ModelRef {
    /// Name clients use to select this model.
    pub fn name(&self) -> &str {
        match self {
            ModelRef::Builtin(model) => model.id(),
            ModelRef::Custom(model) => &model.name,
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, ModelRef::Builtin(_))
    }

    pub fn metadata(&self) -> ModelMetadata {
        match self {
            ModelRef::Builtin(model) => {
                let info = model.info();
                let (author, url) = BuiltinModel::attribution();
                let phrase = model.phrase();
                ModelMetadata {
                    description: phrase.clone(),
                    phrase,
                    author: author.to_string(),
                    url: url.to_string(),
                    languages: info.languages.iter().map(|l| l.to_string()).collect(),
                    version: info.version.to_string(),
                }
            }
            ModelRef::Custom(model) => model.metadata.clone(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRef::Builtin(model) => write!(f, "{} (builtin)", model.id()),
            ModelRef::Custom(model) => {
                write!(f, "{} ({})", model.name, model.config_path.display())
            }
        }
    }
}

/// Name → model mapping for builtin and custom models.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    custom: Vec<Arc<CustomModel>>,
    custom_index: HashMap<String, usize>,
    precedence: Precedence,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin_only()
    }
}

impl ModelCatalog {
    /// Catalog with only the builtin models.
    pub fn builtin_only() -> Self {
        Self::from_custom_models(Vec::new(), Precedence::Builtin)
    }

    /// Build a catalog by scanning `dirs` for custom model configs.
    ///
    /// Never fails: unusable configs are logged and left out.
    pub fn load(dirs: &[PathBuf], precedence: Precedence) -> Self {
        Self::from_custom_models(custom::discover(dirs), precedence)
    }

    /// Build a catalog from already validated custom models.
    ///
    /// Models are kept in the given order; a repeated name keeps the first.
    pub fn from_custom_models(models: Vec<CustomModel>, precedence: Precedence) -> Self {
        let mut custom = Vec::with_capacity(models.len());
        let mut custom_index = HashMap::with_capacity(models.len());

        for model in models {
            if custom_index.contains_key(&model.name) {
                continue;
            }
            custom_index.insert(model.name.clone(), custom.len());
            custom.push(Arc::new(model));
        }

        Self {
            custom,
            custom_index,
            precedence,
        }
    }

    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    /// Exact, case-sensitive lookup.
    ///
    /// When a name is both a builtin id and a custom model, the configured
    /// precedence decides which one is returned.
    pub fn resolve(&self, name: &str) -> Option<ModelRef> {
        let builtin = || BuiltinModel::from_id(name).map(ModelRef::Builtin);
        let custom = || {
            self.custom_index
                .get(name)
                .map(|&idx| ModelRef::Custom(Arc::clone(&self.custom[idx])))
        };

        match self.precedence {
            Precedence::Builtin => builtin().or_else(custom),
            Precedence::Custom => custom().or_else(builtin),
        }
    }

    /// Every model with its metadata: builtins in canonical order, then custom
    /// models in discovery order.
    pub fn list(&self) -> Vec<(ModelRef, ModelMetadata)> {
        BUILTIN_MODELS
            .iter()
            .map(|b| ModelRef::Builtin(b.model))
            .chain(self.custom.iter().cloned().map(ModelRef::Custom))
            .map(|model| {
                let metadata = model.metadata();
                (model, metadata)
            })
            .collect()
    }

    /// Number of custom models that were accepted.
    pub fn custom_count(&self) -> usize {
        self.custom.len()
    }

    pub fn len(&self) -> usize {
        BUILTIN_MODELS.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
