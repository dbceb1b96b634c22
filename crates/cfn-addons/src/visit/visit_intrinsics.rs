use super::IntrinsicVisitor;
use crate::value::escape_token;
use serde_json::Value;

/// Recursively visit all intrinsic function calls
pub trait VisitIntrinsics {
    fn visit_intrinsics(&self, pointer: &str, visitor: &mut dyn IntrinsicVisitor);
}

impl VisitIntrinsics for Value {
    fn visit_intrinsics(&self, pointer: &str, visitor: &mut dyn IntrinsicVisitor) {
        match self {
            Value::Object(object) => {
                if object.len() == 1 {
                    if let Some((name, argument)) = object.iter().next() {
                        if is_intrinsic(name) {
                            visitor.visit_intrinsic(name, argument, pointer);
                        }
                    }
                }

                for (key, value) in object {
                    value.visit_intrinsics(&format!("{pointer}/{}", escape_token(key)), visitor);
                }
            }
            Value::Array(array) => {
                for (index, value) in array.iter().enumerate() {
                    value.visit_intrinsics(&format!("{pointer}/{index}"), visitor);
                }
            }
            _ => {}
        }
    }
}

fn is_intrinsic(key: &str) -> bool {
    key == "Ref" || key == "Condition" || key.starts_with("Fn::")
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn nested_intrinsics_are_visited() {
        let tree = json!({
            "Properties": {
                "Name": { "Fn::Join": ["-", [{ "Ref": "App" }, { "Fn::ImportValue": "shared-vpc" }]] },
                "Tags": [{ "Key": "a/b", "Value": { "Ref": "Env" } }],
                "Condition": "NotAnIntrinsicHere",
            }
        });

        let mut seen = vec![];
        tree.visit_intrinsics("/Resources/Table", &mut |name: &str, _: &Value, pointer: &str| {
            seen.push((name.to_string(), pointer.to_string()));
        });

        assert_eq!(
            seen,
            vec![
                ("Fn::Join".to_string(), "/Resources/Table/Properties/Name".to_string()),
                ("Ref".to_string(), "/Resources/Table/Properties/Name/Fn::Join/1/0".to_string()),
                (
                    "Fn::ImportValue".to_string(),
                    "/Resources/Table/Properties/Name/Fn::Join/1/1".to_string()
                ),
                ("Ref".to_string(), "/Resources/Table/Properties/Tags/0/Value".to_string()),
            ]
        );
    }
}
