use serde_json::{Map, Number, Value as Json};
use treeseal_core::{Scalar, TreeBranch, TreesealError, TreesealResult, Value};

use super::Store;

/// JSON documents via `serde_json` with `preserve_order`, emitted pretty.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStore;

impl Store for JsonStore {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse_document(&self, text: &str) -> TreesealResult<TreeBranch> {
        let document: Json =
            serde_json::from_str(text).map_err(|e| TreesealError::Parse(format!("json: {e}")))?;
        match document {
            Json::Object(object) => branch_from_json(object),
            _ => Err(TreesealError::Parse(
                "json: top-level value must be an object".into(),
            )),
        }
    }

    fn emit_document(&self, tree: &TreeBranch) -> TreesealResult<String> {
        let mut text = serde_json::to_string_pretty(&Json::Object(branch_to_json(tree)?))
            .map_err(|e| TreesealError::Serialize(format!("json: {e}")))?;
        text.push('\n');
        Ok(text)
    }
}

fn branch_from_json(object: Map<String, Json>) -> TreesealResult<TreeBranch> {
    let mut branch = TreeBranch::new();
    for (key, value) in object {
        branch.insert(key, value_from_json(value)?);
    }
    Ok(branch)
}

fn value_from_json(value: Json) -> TreesealResult<Value> {
    Ok(match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Scalar(Scalar::Bool(b)),
        Json::Number(n) => Value::Scalar(number_from_json(&n)?),
        Json::String(s) => Value::Scalar(Scalar::Str(s)),
        Json::Array(items) => Value::Sequence(
            items
                .into_iter()
                .map(value_from_json)
                .collect::<TreesealResult<_>>()?,
        ),
        Json::Object(object) => Value::Branch(branch_from_json(object)?),
    })
}

fn number_from_json(n: &Number) -> TreesealResult<Scalar> {
    if let Some(i) = n.as_i64() {
        Ok(Scalar::Int(i))
    } else if n.is_u64() {
        Err(TreesealError::Parse(format!(
            "json: integer {n} does not fit in 64 signed bits"
        )))
    } else {
        n.as_f64()
            .map(Scalar::Float)
            .ok_or_else(|| TreesealError::Parse(format!("json: unsupported number {n}")))
    }
}

fn branch_to_json(branch: &TreeBranch) -> TreesealResult<Map<String, Json>> {
    let mut object = Map::new();
    for item in branch {
        object.insert(item.key.clone(), value_to_json(&item.value)?);
    }
    Ok(object)
}

fn value_to_json(value: &Value) -> TreesealResult<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Scalar(Scalar::Str(s)) => Json::String(s.clone()),
        Value::Scalar(Scalar::Int(i)) => Json::Number(Number::from(*i)),
        Value::Scalar(Scalar::Float(f)) => Json::Number(Number::from_f64(*f).ok_or_else(|| {
            TreesealError::Serialize(format!("json: {f} has no JSON representation"))
        })?),
        Value::Scalar(Scalar::Bool(b)) => Json::Bool(*b),
        Value::Branch(b) => Json::Object(branch_to_json(b)?),
        Value::Sequence(seq) => Json::Array(
            seq.iter()
                .map(value_to_json)
                .collect::<TreesealResult<_>>()?,
        ),
    })
}
