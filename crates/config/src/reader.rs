//! The production [`Reader`]: layered merge plus resolved snapshot.
//!
//! Every (source, fragment key) pair owns one layer. Layers are kept ordered
//! by source index, then by first-seen order within a source; re-merging a
//! pair replaces its layer in place. Two sources emitting the same fragment
//! key therefore never share a layer, and the later source always wins.

use crate::{decoder::Decoder, resolver::Resolver};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as Json};
use strata_types::{Fragment, Reader, error::Result};

struct Layer {
    source: usize,
    key: String,
    tree: Map<String, Json>,
}

struct State {
    layers: Vec<Layer>,
    merged: Json,
    resolved: Json,
}

/// Merges fragments into layers and publishes a resolved snapshot.
pub struct LayeredReader {
    decoder: Decoder,
    resolver: Resolver,
    state: RwLock<State>,
    // Held across a whole resolve so an older snapshot never overwrites a newer one.
    resolving: Mutex<()>,
}

impl LayeredReader {
    #[must_use]
    pub fn new(decoder: Decoder, resolver: Resolver) -> Self {
        Self {
            decoder,
            resolver,
            state: RwLock::new(State {
                layers: Vec::new(),
                merged: Json::Object(Map::new()),
                resolved: Json::Object(Map::new()),
            }),
            resolving: Mutex::new(()),
        }
    }

    /// Number of distinct (source, fragment key) layers merged so far.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.state.read().layers.len()
    }
}

impl Reader for LayeredReader {
    fn merge(&self, source: usize, fragments: &[Fragment]) -> Result<()> {
        // Decode everything before taking the lock so a bad fragment leaves
        // the previous layers untouched.
        let mut decoded = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let mut tree = Map::new();
            (self.decoder)(fragment, &mut tree)?;
            decoded.push(Layer {
                source,
                key: fragment.key.clone(),
                tree,
            });
        }

        let mut state = self.state.write();
        for layer in decoded {
            if let Some(i) = state
                .layers
                .iter()
                .position(|l| l.source == source && l.key == layer.key)
            {
                state.layers[i].tree = layer.tree;
            } else {
                let at = state.layers.partition_point(|l| l.source <= source);
                state.layers.insert(at, layer);
            }
        }
        let mut merged = Json::Object(Map::new());
        for layer in &state.layers {
            merge_into(&mut merged, Json::Object(layer.tree.clone()));
        }
        state.merged = merged;
        Ok(())
    }

    fn resolve(&self) -> Result<()> {
        let _guard = self.resolving.lock();
        let mut tree = self.state.read().merged.clone();
        (self.resolver)(&mut tree)?;
        self.state.write().resolved = tree;
        Ok(())
    }

    fn value(&self, key: &str) -> Option<Json> {
        crate::resolver::lookup(&self.state.read().resolved, key).cloned()
    }

    fn source(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.state.read().resolved)?)
    }
}

/// Deep-merges `src` over `dst`: objects merge key by key, anything else
/// replaces the destination.
pub fn merge_into(dst: &mut Json, src: Json) {
    match (dst, src) {
        (Json::Object(dst), Json::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        dst.insert(key, value);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decoder::default_decoder, resolver::placeholder_resolver};
    use serde_json::json;
    use strata_types::ConfigError;

    fn reader() -> LayeredReader {
        LayeredReader::new(default_decoder(), placeholder_resolver(false))
    }

    fn json_fragment(key: &str, body: &Json) -> Fragment {
        Fragment::new(key, body.to_string(), "json")
    }

    #[test]
    fn test_empty_reader_has_no_values() {
        let r = reader();
        assert!(r.value("anything").is_none());
        assert_eq!(r.source().unwrap(), b"{}");
    }

    #[test]
    fn test_values_invisible_until_resolved() {
        let r = reader();
        r.merge(0, &[json_fragment("a", &json!({"level": "info"}))])
            .unwrap();
        assert!(r.value("level").is_none());
        r.resolve().unwrap();
        assert_eq!(r.value("level"), Some(json!("info")));
    }

    #[test]
    fn test_later_layer_wins() {
        let r = reader();
        r.merge(0, &[json_fragment("a", &json!({"level": "info", "port": 1}))])
            .unwrap();
        r.merge(1, &[json_fragment("b", &json!({"level": "debug"}))])
            .unwrap();
        r.resolve().unwrap();
        assert_eq!(r.value("level"), Some(json!("debug")));
        assert_eq!(r.value("port"), Some(json!(1)));
    }

    #[test]
    fn test_remerge_keeps_layer_position() {
        let r = reader();
        r.merge(0, &[json_fragment("a", &json!({"level": "info"}))])
            .unwrap();
        r.merge(1, &[json_fragment("b", &json!({"level": "debug"}))])
            .unwrap();
        // An update from the earlier layer must not override the later one.
        r.merge(0, &[json_fragment("a", &json!({"level": "warn", "extra": true}))])
            .unwrap();
        r.resolve().unwrap();
        assert_eq!(r.value("level"), Some(json!("debug")));
        assert_eq!(r.value("extra"), Some(json!(true)));
        assert_eq!(r.layer_count(), 2);
    }

    #[test]
    fn test_remerge_drops_removed_keys() {
        let r = reader();
        r.merge(0, &[json_fragment("a", &json!({"x": 1, "y": 2}))])
            .unwrap();
        r.merge(0, &[json_fragment("a", &json!({"x": 1}))]).unwrap();
        r.resolve().unwrap();
        assert!(r.value("y").is_none());
    }

    #[test]
    fn test_same_fragment_key_from_different_sources_keeps_order() {
        let r = reader();
        r.merge(0, &[Fragment::plain("level", "a")]).unwrap();
        r.merge(1, &[json_fragment("b.json", &json!({"level": "b"}))])
            .unwrap();
        r.merge(2, &[Fragment::plain("level", "c")]).unwrap();
        r.resolve().unwrap();
        assert_eq!(r.value("level"), Some(json!("c")));
        assert_eq!(r.layer_count(), 3);

        // An update from the first source stays beneath the other two.
        r.merge(0, &[Fragment::plain("level", "a2")]).unwrap();
        r.resolve().unwrap();
        assert_eq!(r.value("level"), Some(json!("c")));
        assert_eq!(r.layer_count(), 3);
    }

    #[test]
    fn test_source_index_decides_precedence_not_arrival() {
        let r = reader();
        r.merge(2, &[json_fragment("late", &json!({"level": "late"}))])
            .unwrap();
        r.merge(0, &[json_fragment("early", &json!({"level": "early", "port": 1}))])
            .unwrap();
        r.resolve().unwrap();
        assert_eq!(r.value("level"), Some(json!("late")));
        assert_eq!(r.value("port"), Some(json!(1)));
    }

    #[test]
    fn test_nested_objects_deep_merge() {
        let r = reader();
        r.merge(0, &[
            json_fragment("a", &json!({"db": {"host": "a", "port": 1}})),
            json_fragment("b", &json!({"db": {"host": "b"}})),
        ])
        .unwrap();
        r.resolve().unwrap();
        assert_eq!(r.value("db"), Some(json!({"host": "b", "port": 1})));
    }

    #[test]
    fn test_failed_merge_leaves_state_untouched() {
        let r = reader();
        r.merge(0, &[json_fragment("a", &json!({"level": "info"}))])
            .unwrap();
        let err = r
            .merge(0, &[
                json_fragment("a", &json!({"level": "debug"})),
                Fragment::new("b", "{broken", "json"),
            ])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Decode { .. }));
        r.resolve().unwrap();
        assert_eq!(r.value("level"), Some(json!("info")));
        assert_eq!(r.layer_count(), 1);
    }

    #[test]
    fn test_resolve_twice_is_stable() {
        let r = reader();
        r.merge(0, &[json_fragment(
            "a",
            &json!({"host": "h", "url": "http://${host}", "port": "${listen.port:80}"}),
        )])
        .unwrap();
        r.resolve().unwrap();
        let first = (r.value("url"), r.value("port"), r.source().unwrap());
        r.resolve().unwrap();
        let second = (r.value("url"), r.value("port"), r.source().unwrap());
        assert_eq!(first, second);
        assert_eq!(first.0, Some(json!("http://h")));
        assert_eq!(first.1, Some(json!("80")));
    }

    #[test]
    fn test_failed_resolve_keeps_previous_snapshot() {
        let failing: Resolver =
            std::sync::Arc::new(|_: &mut Json| -> Result<()> { Err(ConfigError::Resolve("cycle".into())) });
        let r = LayeredReader::new(default_decoder(), failing);
        r.merge(0, &[json_fragment("a", &json!({"k": 1}))]).unwrap();
        assert!(matches!(r.resolve(), Err(ConfigError::Resolve(_))));
        assert!(r.value("k").is_none());
    }

    #[test]
    fn test_merge_into_scalar_over_object() {
        let mut dst = json!({"a": {"b": 1}});
        merge_into(&mut dst, json!({"a": 5}));
        assert_eq!(dst, json!({"a": 5}));
    }
}
