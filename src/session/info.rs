//! Capability descriptor returned for `describe`.

use crate::defaults::{ATTRIBUTION_NAME, ATTRIBUTION_URL, PROGRAM_DESCRIPTION, PROGRAM_NAME};
use crate::models::catalog::ModelCatalog;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub name: String,
    pub url: String,
}

/// One selectable wake word model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeModel {
    pub name: String,
    pub description: Option<String>,
    pub phrase: Option<String>,
    pub attribution: Attribution,
    pub installed: bool,
    pub languages: Vec<String>,
    pub version: Option<String>,
}

/// The detection program and everything it can listen for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeProgram {
    pub name: String,
    pub description: Option<String>,
    pub attribution: Attribution,
    pub installed: bool,
    pub version: Option<String>,
    pub models: Vec<WakeModel>,
}

/// Body of an `info` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub wake: Vec<WakeProgram>,
}

impl Info {
    /// Every model name across all programs, in listed order.
    pub fn model_names(&self) -> Vec<&str> {
        self.wake
            .iter()
            .flat_map(|program| program.models.iter().map(|m| m.name.as_str()))
            .collect()
    }
}

/// Projects the catalog into an [`Info`] descriptor.
#[derive(Debug, Clone)]
pub struct SessionInfoBuilder {
    catalog: Arc<ModelCatalog>,
}

impl SessionInfoBuilder {
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self { catalog }
    }

    pub fn build(&self) -> Info {
        let models = self
            .catalog
            .list()
            .into_iter()
            .map(|(model, metadata)| WakeModel {
                name: model.name().to_string(),
                description: Some(metadata.description),
                phrase: Some(metadata.phrase),
                attribution: Attribution {
                    name: metadata.author,
                    url: metadata.url,
                },
                installed: true,
                languages: metadata.languages,
                version: Some(metadata.version),
            })
            .collect();

        Info {
            wake: vec![WakeProgram {
                name: PROGRAM_NAME.to_string(),
                description: Some(PROGRAM_DESCRIPTION.to_string()),
                attribution: Attribution {
                    name: ATTRIBUTION_NAME.to_string(),
                    url: ATTRIBUTION_URL.to_string(),
                },
                installed: true,
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                models,
            }],
        }
    }
}
