use serde_yml::{Mapping, Number, Value as Yaml};
use treeseal_core::{Scalar, TreeBranch, TreesealError, TreesealResult, Value};

use super::Store;

/// YAML documents via `serde_yml`. Mapping order is preserved; tags,
/// non-string keys and integers outside i64 are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlStore;

impl Store for YamlStore {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn parse_document(&self, text: &str) -> TreesealResult<TreeBranch> {
        let document: Yaml =
            serde_yml::from_str(text).map_err(|e| TreesealError::Parse(format!("yaml: {e}")))?;
        match document {
            Yaml::Null => Ok(TreeBranch::new()),
            Yaml::Mapping(mapping) => branch_from_yaml(mapping),
            _ => Err(TreesealError::Parse(
                "yaml: top-level value must be a mapping".into(),
            )),
        }
    }

    fn emit_document(&self, tree: &TreeBranch) -> TreesealResult<String> {
        serde_yml::to_string(&Yaml::Mapping(branch_to_yaml(tree)))
            .map_err(|e| TreesealError::Serialize(format!("yaml: {e}")))
    }
}

fn branch_from_yaml(mapping: Mapping) -> TreesealResult<TreeBranch> {
    let mut branch = TreeBranch::new();
    for (key, value) in mapping {
        let Yaml::String(key) = key else {
            return Err(TreesealError::Parse(format!(
                "yaml: mapping keys must be strings, found {key:?}"
            )));
        };
        let value = value_from_yaml(value)?;
        branch.insert(key, value);
    }
    Ok(branch)
}

fn value_from_yaml(value: Yaml) -> TreesealResult<Value> {
    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Scalar(Scalar::Bool(b)),
        Yaml::Number(n) => Value::Scalar(number_from_yaml(&n)?),
        Yaml::String(s) => Value::Scalar(Scalar::Str(s)),
        Yaml::Sequence(seq) => Value::Sequence(
            seq.into_iter()
                .map(value_from_yaml)
                .collect::<TreesealResult<_>>()?,
        ),
        Yaml::Mapping(mapping) => Value::Branch(branch_from_yaml(mapping)?),
        Yaml::Tagged(tagged) => {
            return Err(TreesealError::Parse(format!(
                "yaml: tagged values are not supported ({})",
                tagged.tag
            )))
        }
    })
}

fn number_from_yaml(n: &Number) -> TreesealResult<Scalar> {
    if let Some(i) = n.as_i64() {
        Ok(Scalar::Int(i))
    } else if n.is_u64() {
        Err(TreesealError::Parse(format!(
            "yaml: integer {n} does not fit in 64 signed bits"
        )))
    } else {
        n.as_f64()
            .map(Scalar::Float)
            .ok_or_else(|| TreesealError::Parse(format!("yaml: unsupported number {n}")))
    }
}

fn branch_to_yaml(branch: &TreeBranch) -> Mapping {
    let mut mapping = Mapping::new();
    for item in branch {
        mapping.insert(Yaml::String(item.key.clone()), value_to_yaml(&item.value));
    }
    mapping
}

fn value_to_yaml(value: &Value) -> Yaml {
    match value {
        Value::Null => Yaml::Null,
        Value::Scalar(Scalar::Str(s)) => Yaml::String(s.clone()),
        Value::Scalar(Scalar::Int(i)) => Yaml::Number(Number::from(*i)),
        Value::Scalar(Scalar::Float(f)) => Yaml::Number(Number::from(*f)),
        Value::Scalar(Scalar::Bool(b)) => Yaml::Bool(*b),
        Value::Branch(b) => Yaml::Mapping(branch_to_yaml(b)),
        Value::Sequence(seq) => Yaml::Sequence(seq.iter().map(value_to_yaml).collect()),
    }
}
