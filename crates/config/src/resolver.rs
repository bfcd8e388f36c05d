//! Placeholder resolution over the merged tree.
//!
//! String leaves may reference other keys as `${path}` or `${path:default}`.
//! References are looked up in the unresolved merged tree, so a single pass
//! is enough and running it again over the same input gives the same output.

use regex::{Captures, Regex};
use serde_json::{Number, Value as Json};
use std::sync::{Arc, LazyLock};
use strata_types::error::Result;

/// Rewrites the merged tree in place.
pub type Resolver = Arc<dyn Fn(&mut Json) -> Result<()> + Send + Sync>;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(.*?)\}").expect("placeholder pattern is valid"));

/// Returns the default `${...}` resolver.
///
/// With `actual_types`, a leaf whose substituted text parses as a bool,
/// integer or float is stored as that type instead of a string.
#[must_use]
pub fn placeholder_resolver(actual_types: bool) -> Resolver {
    Arc::new(move |tree: &mut Json| {
        resolve_placeholders(tree, actual_types);
        Ok(())
    })
}

/// Expands every placeholder in `tree`.
pub fn resolve_placeholders(tree: &mut Json, actual_types: bool) {
    let table = tree.clone();
    walk(tree, &table, actual_types);
}

/// Looks up a dotted path; numeric segments index into arrays.
#[must_use]
pub fn lookup<'a>(tree: &'a Json, path: &str) -> Option<&'a Json> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(tree, |node, segment| match node {
        Json::Object(members) => members.get(segment),
        Json::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn walk(node: &mut Json, table: &Json, actual_types: bool) {
    match node {
        Json::Object(members) => members
            .values_mut()
            .for_each(|child| walk(child, table, actual_types)),
        Json::Array(items) => items
            .iter_mut()
            .for_each(|child| walk(child, table, actual_types)),
        Json::String(text) => {
            if !text.contains("${") {
                return;
            }
            let replaced = PLACEHOLDER
                .replace_all(text, |caps: &Captures<'_>| render(table, &caps[1]))
                .into_owned();
            *node = if actual_types {
                typed(replaced)
            } else {
                Json::String(replaced)
            };
        }
        _ => {}
    }
}

fn render(table: &Json, expr: &str) -> String {
    let (path, default) = match expr.split_once(':') {
        Some((path, default)) => (path.trim(), Some(default)),
        None => (expr.trim(), None),
    };
    match lookup(table, path) {
        Some(Json::String(s)) => s.clone(),
        Some(Json::Null) | None => {
            if default.is_none() {
                tracing::debug!(key = path, "placeholder references a missing key");
            }
            default.unwrap_or_default().to_string()
        }
        Some(other) => other.to_string(),
    }
}

fn typed(text: String) -> Json {
    if let Ok(b) = text.parse::<bool>() {
        return Json::Bool(b);
    }
    if let Ok(i) = text.parse::<i64>() {
        return Json::Number(i.into());
    }
    if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
        return Json::Number(n);
    }
    Json::String(text)
}
