//! YAML loading with `!include` resolution.
//!
//! A value tagged `!include path/to/file.yaml` is replaced by the parsed
//! content of that file. Paths are relative to the including file. When the
//! tagged value sits inside a sequence and the included file is itself a
//! sequence, its items are spliced into the parent sequence in place.

use crate::constants::MAX_INCLUDE_DEPTH;
use crate::error::{GridCheckError, Result};
use serde_yaml::Value;
use serde_yaml::value::TaggedValue;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const INCLUDE_TAG: &str = "include";

/// Read a YAML file and resolve every include below it
pub fn load_yaml(path: &Path) -> Result<Value> {
    load_nested(path, 0)
}

fn load_nested(path: &Path, depth: usize) -> Result<Value> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(GridCheckError::configuration(format!(
            "includes nested deeper than {MAX_INCLUDE_DEPTH} levels at {}",
            path.display()
        )));
    }

    let text = fs::read_to_string(path).map_err(|source| GridCheckError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_yaml::from_str(&text).map_err(|source| GridCheckError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;

    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    resolve(value, &base, depth)
}

fn include_target(tagged: &TaggedValue, base: &Path) -> Result<PathBuf> {
    match &tagged.value {
        Value::String(file) => Ok(base.join(file)),
        other => Err(GridCheckError::configuration(format!(
            "!include expects a file path, found {other:?}"
        ))),
    }
}

fn resolve(value: Value, base: &Path, depth: usize) -> Result<Value> {
    match value {
        Value::Tagged(tagged) if tagged.tag == INCLUDE_TAG => {
            let target = include_target(&tagged, base)?;
            debug!("Including {}", target.display());
            load_nested(&target, depth + 1)
        }
        Value::Tagged(mut tagged) => {
            tagged.value = resolve(tagged.value, base, depth)?;
            Ok(Value::Tagged(tagged))
        }
        Value::Sequence(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                let spliced = matches!(&item, Value::Tagged(t) if t.tag == INCLUDE_TAG);
                match resolve(item, base, depth)? {
                    Value::Sequence(included) if spliced => resolved.extend(included),
                    other => resolved.push(other),
                }
            }
            Ok(Value::Sequence(resolved))
        }
        Value::Mapping(mapping) => {
            let mut resolved = serde_yaml::Mapping::with_capacity(mapping.len());
            for (key, item) in mapping {
                resolved.insert(key, resolve(item, base, depth)?);
            }
            Ok(Value::Mapping(resolved))
        }
        other => Ok(other),
    }
}
