//! Command-line configuration patches.
//!
//! A patch has the form `dotted.path[index]=value`, for example
//! `LeadTimes[0].Stop=24:00:00` or `Tests[1].Test.Month=None`.

use crate::error::{GridCheckError, Result};
use serde_yaml::{Mapping, Value};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn invalid(patch: &str, reason: impl Into<String>) -> GridCheckError {
    GridCheckError::InvalidPatch {
        patch: patch.to_string(),
        reason: reason.into(),
    }
}

fn parse_path(patch: &str, path: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();

    for part in path.split('.') {
        let (name, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !name.is_empty() {
            segments.push(Segment::Key(name.to_string()));
        } else if rest.is_empty() {
            return Err(invalid(patch, "empty path component"));
        }

        while !rest.is_empty() {
            let close = rest
                .find(']')
                .ok_or_else(|| invalid(patch, "unclosed '['"))?;
            let index = rest[1..close]
                .parse::<usize>()
                .map_err(|_| invalid(patch, format!("invalid index '{}'", &rest[1..close])))?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(invalid(patch, format!("unexpected '{rest}'")));
            }
        }
    }

    Ok(segments)
}

/// Integer, then float, otherwise the raw string
fn cast(value: &str) -> Value {
    if let Ok(v) = value.parse::<i64>() {
        Value::from(v)
    } else if let Ok(v) = value.parse::<f64>() {
        Value::from(v)
    } else {
        Value::String(value.to_string())
    }
}

/// Apply one patch to a configuration tree
pub fn apply_patch(config: &mut Value, patch: &str) -> Result<()> {
    let (path, value) = patch
        .split_once('=')
        .ok_or_else(|| invalid(patch, "expected 'path=value'"))?;
    let segments = parse_path(patch, path)?;
    let Some((last, parents)) = segments.split_last() else {
        return Err(invalid(patch, "empty path"));
    };

    if value == "None" {
        unset(config, parents, last);
        return Ok(());
    }

    let mut node = config;
    for segment in parents {
        node = child_mut(node, segment, patch)?;
    }

    let value = cast(value);
    match last {
        Segment::Key(key) => {
            let mapping = as_mapping(node, patch)?;
            let key = Value::String(key.clone());
            if !mapping.contains_key(&key) {
                debug!("PATCH: Adding element {} to configuration", patch);
            }
            mapping.insert(key, value);
        }
        Segment::Index(index) => {
            let sequence = node
                .as_sequence_mut()
                .ok_or_else(|| invalid(patch, "indexed element is not a list"))?;
            let len = sequence.len();
            if *index < len {
                sequence[*index] = value;
            } else if *index == len {
                sequence.push(value);
            } else {
                return Err(invalid(patch, format!("index {index} out of range")));
            }
        }
    }

    Ok(())
}

fn as_mapping<'a>(node: &'a mut Value, patch: &str) -> Result<&'a mut Mapping> {
    if node.is_null() {
        *node = Value::Mapping(Mapping::new());
    }
    node.as_mapping_mut()
        .ok_or_else(|| invalid(patch, "element is not a mapping"))
}

/// Step into a child, creating missing intermediate mappings
fn child_mut<'a>(node: &'a mut Value, segment: &Segment, patch: &str) -> Result<&'a mut Value> {
    match segment {
        Segment::Key(key) => {
            let mapping = as_mapping(node, patch)?;
            Ok(mapping
                .entry(Value::String(key.clone()))
                .or_insert_with(|| Value::Mapping(Mapping::new())))
        }
        Segment::Index(index) => node
            .as_sequence_mut()
            .and_then(|s| s.get_mut(*index))
            .ok_or_else(|| invalid(patch, format!("index {index} out of range"))),
    }
}

fn unset(config: &mut Value, parents: &[Segment], last: &Segment) {
    let mut node = config;
    for segment in parents {
        let next = match segment {
            Segment::Key(key) => node.get_mut(key.as_str()),
            Segment::Index(index) => node.get_mut(*index),
        };
        match next {
            Some(child) => node = child,
            None => return,
        }
    }

    match last {
        Segment::Key(key) => {
            if let Some(mapping) = node.as_mapping_mut() {
                mapping.remove(key.as_str());
            }
        }
        Segment::Index(index) => {
            if let Some(sequence) = node.as_sequence_mut() {
                if *index < sequence.len() {
                    sequence.remove(*index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Value {
        serde_yaml::from_str(
            "LeadTimes:\n  - Start: 0h\n    Stop: 6h\n    Step: 1h\nTests:\n  - Name: a\n    Test:\n      Month: 6\n",
        )
        .unwrap()
    }

    #[test]
    fn test_set_indexed_value_as_string() {
        let mut value = config();
        apply_patch(&mut value, "LeadTimes[0].Stop=24:00:00").unwrap();
        assert_eq!(value["LeadTimes"][0]["Stop"].as_str(), Some("24:00:00"));
    }

    #[test]
    fn test_values_are_cast() {
        let mut value = config();
        apply_patch(&mut value, "Tests[0].Test.Month=3").unwrap();
        apply_patch(&mut value, "Tests[0].Test.MaxAllowed=0.5").unwrap();
        assert_eq!(value["Tests"][0]["Test"]["Month"].as_i64(), Some(3));
        assert_eq!(value["Tests"][0]["Test"]["MaxAllowed"].as_f64(), Some(0.5));
    }

    #[test]
    fn test_none_deletes() {
        let mut value = config();
        apply_patch(&mut value, "Tests[0].Test.Month=None").unwrap();
        assert!(value["Tests"][0]["Test"].get("Month").is_none());

        apply_patch(&mut value, "Nothing.Here=None").unwrap();
    }

    #[test]
    fn test_missing_intermediate_mappings_are_created() {
        let mut value = config();
        apply_patch(&mut value, "Tests[0].Sample.Extra=1").unwrap();
        assert_eq!(value["Tests"][0]["Sample"]["Extra"].as_i64(), Some(1));
    }

    #[test]
    fn test_indexed_leaf_replaces_or_appends() {
        let mut value: Value = serde_yaml::from_str("Names: [t2, tp]\n").unwrap();
        apply_patch(&mut value, "Names[1]=u10").unwrap();
        apply_patch(&mut value, "Names[2]=v10").unwrap();
        let names: Vec<&str> = value["Names"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(names, vec!["t2", "u10", "v10"]);

        assert!(matches!(
            apply_patch(&mut value, "Names[7]=x"),
            Err(GridCheckError::InvalidPatch { .. })
        ));
    }

    #[test]
    fn test_malformed_patches() {
        let mut value = config();
        for patch in ["LeadTimes", "LeadTimes[x].Stop=1", "LeadTimes[5].Stop=1", "LeadTimes[0=1"] {
            assert!(
                matches!(apply_patch(&mut value, patch), Err(GridCheckError::InvalidPatch { .. })),
                "{patch}"
            );
        }
    }
}
