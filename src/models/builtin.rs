//! Wake word models shipped with the inference backend.

use crate::defaults;

/// Builtin model identifiers, in canonical catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinModel {
    Alexa,
    HeyJarvis,
    HeyMycroft,
    OkayNabu,
}

/// Static metadata for a builtin model.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinInfo {
    pub model: BuiltinModel,
    pub id: &'static str,
    pub languages: &'static [&'static str],
    pub version: &'static str,
}

/// Builtin models in the order the catalog lists them.
pub const BUILTIN_MODELS: &[BuiltinInfo] = &[
    BuiltinInfo {
        model: BuiltinModel::Alexa,
        id: "alexa",
        languages: &["en"],
        version: "2.0.0",
    },
    BuiltinInfo {
        model: BuiltinModel::HeyJarvis,
        id: "hey_jarvis",
        languages: &["en"],
        version: "2.0.0",
    },
    BuiltinInfo {
        model: BuiltinModel::HeyMycroft,
        id: "hey_mycroft",
        languages: &["en"],
        version: "2.0.0",
    },
    BuiltinInfo {
        model: BuiltinModel::OkayNabu,
        id: "okay_nabu",
        languages: &["en"],
        version: "2.0.0",
    },
];

impl BuiltinModel {
    /// Look up a builtin by its exact id. Case-sensitive.
    pub fn from_id(id: &str) -> Option<Self> {
        BUILTIN_MODELS.iter().find(|b| b.id == id).map(|b| b.model)
    }

    /// All builtins in canonical order.
    pub fn all() -> impl Iterator<Item = BuiltinModel> {
        BUILTIN_MODELS.iter().map(|b| b.model)
    }

    pub fn info(self) -> &'static BuiltinInfo {
        // Table rows follow declaration order of the enum.
        &BUILTIN_MODELS[self as usize]
    }

    pub fn id(self) -> &'static str {
        self.info().id
    }

    /// Spoken phrase, e.g. "Okay Nabu" for `okay_nabu`.
    pub fn phrase(self) -> String {
        phrase_from_id(self.id())
    }

    pub fn attribution() -> (&'static str, &'static str) {
        (defaults::ATTRIBUTION_NAME, defaults::ATTRIBUTION_URL)
    }
}

/// Turn a snake_case model id into a capitalised phrase.
pub fn phrase_from_id(id: &str) -> String {
    id.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
