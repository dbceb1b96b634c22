//! value representation
//!
//! Every template, patch file and manifest is read as YAML (JSON being a subset) and
//! converted into a [serde_json::Value] tree. The conversion also normalizes the
//! CloudFormation short-form tags into their long form so the rest of the crate only
//! has to know one spelling of an intrinsic function:
//!
//! | short form            | long form                              |
//! |-----------------------|----------------------------------------|
//! | `!Ref Bucket`         | `{ "Ref": "Bucket" }`                  |
//! | `!Condition IsProd`   | `{ "Condition": "IsProd" }`            |
//! | `!GetAtt Table.Arn`   | `{ "Fn::GetAtt": ["Table", "Arn"] }`   |
//! | `!Sub "${App}-x"`     | `{ "Fn::Sub": "${App}-x" }`            |
//! | `!<Name> ...`         | `{ "Fn::<Name>": ... }`                |
//!
//! Object keys keep their document order (`serde_json/preserve_order`).
use serde_json::{Map, Value};

#[derive(thiserror::Error, Debug)]
pub enum ValueError {
    #[error("unable to parse document: {0}")]
    Syntax(#[from] serde_yaml::Error),
    #[error("mapping key at {pointer:?} is not a scalar")]
    NonScalarKey { pointer: String },
    #[error("number at {pointer:?} cannot be represented")]
    UnrepresentableNumber { pointer: String },
}

/// Parse a YAML or JSON document into a normalized tree
pub fn parse_document(text: &str) -> Result<Value, ValueError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(text)?;
    from_yaml(yaml)
}

/// Convert a YAML tree, rewriting short-form intrinsic tags into their long form
pub fn from_yaml(value: serde_yaml::Value) -> Result<Value, ValueError> {
    convert(value, "")
}

fn convert(value: serde_yaml::Value, pointer: &str) -> Result<Value, ValueError> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => number(n, pointer)?,
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(sequence) => Value::Array(
            sequence
                .into_iter()
                .enumerate()
                .map(|(index, item)| convert(item, &format!("{pointer}/{index}")))
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut object = Map::new();
            for (key, item) in mapping {
                let Some(key) = scalar_key(key) else {
                    return Err(ValueError::NonScalarKey {
                        pointer: pointer.to_string(),
                    });
                };

                let child = format!("{pointer}/{}", escape_token(&key));
                object.insert(key, convert(item, &child)?);
            }
            Value::Object(object)
        }
        Yaml::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            let name = tag.trim_start_matches('!');
            let argument = convert(tagged.value, pointer)?;
            intrinsic(name, argument)
        }
    })
}

fn intrinsic(name: &str, argument: Value) -> Value {
    let (key, argument) = match name {
        "Ref" | "Condition" => (name.to_string(), argument),
        "GetAtt" => {
            let argument = match argument {
                Value::String(s) => match s.split_once('.') {
                    Some((resource, attribute)) => Value::Array(vec![
                        Value::String(resource.to_string()),
                        Value::String(attribute.to_string()),
                    ]),
                    None => Value::String(s),
                },
                other => other,
            };
            ("Fn::GetAtt".to_string(), argument)
        }
        _ => (format!("Fn::{name}"), argument),
    };

    let mut object = Map::new();
    object.insert(key, argument);
    Value::Object(object)
}

fn scalar_key(key: serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number(n: serde_yaml::Number, pointer: &str) -> Result<Value, ValueError> {
    if let Some(int) = n.as_i64() {
        return Ok(int.into());
    }
    if let Some(uint) = n.as_u64() {
        return Ok(uint.into());
    }

    n.as_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ValueError::UnrepresentableNumber {
            pointer: pointer.to_string(),
        })
}

/// Escape a key for use as a JSON pointer token (`~` → `~0`, `/` → `~1`)
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Reverse of [escape_token]
pub fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Render a value on a single line (compact JSON, which is also valid flow-style YAML)
pub fn inline(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("{value:?}"))
}
