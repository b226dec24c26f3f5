//! Recursive merging of configuration layers.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Separators accepted in grouped override keys such as `disc_params_default:lr`.
const GROUP_SEPARATORS: [char; 2] = [':', '.'];

/// Merge `layer` into `acc`; `layer` wins on conflicts.
///
/// Existing mappings are merged recursively. A null incoming value defers to
/// whatever `acc` already holds rather than clearing it.
pub fn merge_into(acc: &mut Map<String, Value>, layer: &Map<String, Value>) {
    for (key, value) in layer {
        match (acc.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming)
            }
            (_, Value::Null) => {}
            (Some(existing), incoming) => {
                if existing != incoming {
                    tracing::trace!(key = %key, from = %existing, to = %incoming, "overwriting config value");
                }
                *existing = incoming.clone();
            }
            (None, incoming) => {
                acc.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Functional form of [`merge_into`].
pub fn merged(mut acc: Map<String, Value>, layer: &Map<String, Value>) -> Map<String, Value> {
    merge_into(&mut acc, layer);
    acc
}

/// Expand `group:key` entries into nested `{group: {key: value}}` mappings.
///
/// Every separator opens one more level, so `a:b:c` lands at `{a: {b: {c: ..}}}`.
pub fn expand_grouped_keys(flat: Map<String, Value>) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    let mut grouped = Vec::new();
    for (key, value) in flat {
        if key.contains(&GROUP_SEPARATORS[..]) {
            grouped.push((key, value));
        } else {
            out.insert(key, value);
        }
    }
    for (key, value) in grouped {
        let path: Vec<&str> = key.split(&GROUP_SEPARATORS[..]).collect();
        if path.iter().any(|part| part.is_empty()) {
            return Err(Error::Config(format!("override '{key}' has an empty path segment")));
        }
        insert_path(&mut out, &key, &path, value)?;
    }
    Ok(out)
}

fn insert_path(map: &mut Map<String, Value>, key: &str, path: &[&str], value: Value) -> Result<()> {
    let Some((last, groups)) = path.split_last() else {
        return Ok(());
    };
    let mut slot = map;
    for group in groups {
        let entry = slot
            .entry(group.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        slot = match entry {
            Value::Object(inner) => inner,
            other => {
                return Err(Error::Config(format!(
                    "override '{key}' targets non-mapping value {other} at '{group}'"
                )))
            }
        };
    }
    slot.insert(last.to_string(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn nested_mappings_merge_and_nulls_defer() {
        let base = obj(json!({"seed": 1, "params": {"lr": 0.1, "epochs": 10}, "keep": true}));
        let layer = obj(json!({"seed": null, "params": {"lr": 0.01}, "extra": "x"}));
        let out = merged(base, &layer);
        assert_eq!(
            Value::Object(out),
            json!({"seed": 1, "params": {"lr": 0.01, "epochs": 10}, "keep": true, "extra": "x"})
        );
    }

    #[test]
    fn grouped_keys_expand_into_existing_groups() {
        let flat = obj(json!({
            "disc_params_default:lr": 0.5,
            "disc_params_default": {"n_epochs": 3},
            "gen_params_default.epochs": 7,
            "seed": 4
        }));
        let out = expand_grouped_keys(flat).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({
                "disc_params_default": {"n_epochs": 3, "lr": 0.5},
                "seed": 4,
                "gen_params_default": {"epochs": 7}
            })
        );
    }

    #[test]
    fn every_separator_opens_a_level() {
        let flat = obj(json!({
            "gen_params_default:inner:epochs": 3,
            "gen_params_default:step_size": 0.1
        }));
        let out = expand_grouped_keys(flat).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({"gen_params_default": {"inner": {"epochs": 3}, "step_size": 0.1}})
        );
        assert!(expand_grouped_keys(obj(json!({"a::b": 1}))).is_err());
    }

    #[test]
    fn grouped_key_into_scalar_is_an_error() {
        let flat = obj(json!({"seed": 4, "seed:inner": 1}));
        assert!(matches!(expand_grouped_keys(flat), Err(Error::Config(_))));
    }
}
