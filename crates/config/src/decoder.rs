//! Fragment decoding: raw bytes plus a format tag become a JSON tree.
//!
//! JSON goes straight through `serde_json`; YAML and TOML are parsed by
//! figment providers and extracted into the same tree shape, so the rest of
//! the pipeline only ever sees `serde_json::Value`.

use figment::{
    Figment,
    providers::{Format as _, Toml, Yaml},
};
use serde_json::{Map, Value as Json};
use std::sync::Arc;
use strata_types::{ConfigError, Fragment, error::Result};

/// Decodes one fragment into the target object.
pub type Decoder = Arc<dyn Fn(&Fragment, &mut Map<String, Json>) -> Result<()> + Send + Sync>;

/// Returns the decoder used when none is configured.
#[must_use]
pub fn default_decoder() -> Decoder {
    Arc::new(decode)
}

/// Decodes `fragment` according to its format.
///
/// A fragment without a format is a single string leaf whose dotted key
/// becomes a nested path, e.g. `db.host = "x"` → `{"db": {"host": "x"}}`.
///
/// # Errors
///
/// Returns [`ConfigError::UnsupportedFormat`] for unknown formats and
/// [`ConfigError::Decode`] when the payload does not parse or its root is
/// not a mapping.
pub fn decode(fragment: &Fragment, target: &mut Map<String, Json>) -> Result<()> {
    if fragment.format.is_empty() {
        let text = String::from_utf8_lossy(&fragment.value).into_owned();
        insert_path(target, &fragment.key, Json::String(text));
        return Ok(());
    }

    let tree = match fragment.format.to_ascii_lowercase().as_str() {
        "json" => serde_json::from_slice::<Json>(&fragment.value)
            .map_err(|e| decode_error(fragment, e))?,
        "yaml" | "yml" => extract(fragment, Figment::from(Yaml::string(utf8(fragment)?)))?,
        "toml" => extract(fragment, Figment::from(Toml::string(utf8(fragment)?)))?,
        other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
    };

    match tree {
        Json::Object(members) => {
            target.extend(members);
            Ok(())
        }
        other => Err(decode_error(
            fragment,
            format!("root must be a mapping, got {}", strata_types::Kind::of(&other)),
        )),
    }
}

/// Places `leaf` at the dotted `path`, creating intermediate objects.
pub(crate) fn insert_path(target: &mut Map<String, Json>, path: &str, leaf: Json) {
    let mut segments = path.split('.').peekable();
    let mut node = target;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            node.insert(segment.to_string(), leaf);
            return;
        }
        let child = node
            .entry(segment.to_string())
            .or_insert_with(|| Json::Object(Map::new()));
        if !child.is_object() {
            *child = Json::Object(Map::new());
        }
        node = match child.as_object_mut() {
            Some(next) => next,
            None => return,
        };
    }
}

fn extract(fragment: &Fragment, figment: Figment) -> Result<Json> {
    figment
        .extract::<Json>()
        .map_err(|e| decode_error(fragment, e))
}

fn utf8(fragment: &Fragment) -> Result<&str> {
    std::str::from_utf8(&fragment.value).map_err(|e| decode_error(fragment, e))
}

fn decode_error(fragment: &Fragment, message: impl std::fmt::Display) -> ConfigError {
    ConfigError::Decode {
        key: fragment.key.clone(),
        format: fragment.format.clone(),
        message: message.to_string(),
    }
}
