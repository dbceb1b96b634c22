use crate::exports::NamePattern;
use crate::scope::Target;
use crate::visit;
use serde_json::{Map, Value};

/// Collects every `Fn::ImportValue` argument together with its pointer
#[derive(derive_new::new, Debug, Default)]
pub(crate) struct ImportCollector {
    #[new(default)]
    pub found: Vec<(String, Value)>,
}

impl visit::IntrinsicVisitor for ImportCollector {
    #[tracing::instrument(level = "trace", skip_all)]
    fn visit_intrinsic(&mut self, name: &str, argument: &Value, pointer: &str) {
        if name != "Fn::ImportValue" {
            return;
        }

        tracing::trace!(%pointer, "import found");
        self.found.push((pointer.to_string(), argument.clone()));
    }
}

/// Resolves name expressions that only depend on values known before deployment
///
/// Known values are the scope parameters (`App`, `Env` and for workloads `Name`) and,
/// within `Fn::Sub`, explicitly given variables that are themselves static.
#[derive(derive_new::new)]
pub(crate) struct StaticNames<'t> {
    target: &'t Target,
}

impl<'t> StaticNames<'t> {
    pub fn resolve(&self, expression: &Value) -> Option<String> {
        if let Value::String(s) = expression {
            return Some(s.clone());
        }

        let (name, argument) = single_intrinsic(expression)?;
        match name {
            "Ref" => self.target.parameter_value(argument.as_str()?).map(String::from),
            "Fn::Sub" => self.resolve_sub(argument),
            "Fn::Join" => self.resolve_join(argument),
            _ => None,
        }
    }

    /// Static shape of a `Fn::Sub` or `Fn::Join` name that [Self::resolve] cannot resolve
    ///
    /// Every unknown value becomes a wildcard, `!Sub "${AWS::StackName}-TableName"` gives
    /// `*-TableName`. `None` for other expressions and for shapes without any literal text.
    pub fn pattern(&self, expression: &Value) -> Option<NamePattern> {
        let (name, argument) = single_intrinsic(expression)?;
        let mut pattern = NamePattern::default();

        match name {
            "Fn::Sub" => {
                let (template, variables) = sub_arguments(argument)?;
                let mut rest = template;
                while let Some(start) = rest.find("${") {
                    pattern.push_literal(&rest[..start]);
                    let after = &rest[start + 2..];
                    let end = after.find('}')?;
                    let placeholder = &after[..end];

                    match placeholder.strip_prefix('!') {
                        Some(literal) => pattern.push_literal(&format!("${{{literal}}}")),
                        None => match self.sub_value(placeholder, variables) {
                            Some(value) => pattern.push_literal(&value),
                            None => pattern.push_wildcard(),
                        },
                    }
                    rest = &after[end + 1..];
                }
                pattern.push_literal(rest);
            }
            "Fn::Join" => {
                let [Value::String(delimiter), Value::Array(parts)] = argument.as_array()?.as_slice()
                else {
                    return None;
                };
                for (index, part) in parts.iter().enumerate() {
                    if index > 0 {
                        pattern.push_literal(delimiter);
                    }
                    match self.resolve(part) {
                        Some(value) => pattern.push_literal(&value),
                        None => pattern.push_wildcard(),
                    }
                }
            }
            _ => return None,
        }

        pattern.has_literal().then_some(pattern)
    }

    fn resolve_sub(&self, argument: &Value) -> Option<String> {
        let (template, variables) = sub_arguments(argument)?;
        substitute(template, |placeholder| self.sub_value(placeholder, variables))
    }

    fn sub_value(&self, placeholder: &str, variables: Option<&Map<String, Value>>) -> Option<String> {
        if let Some(value) = variables.and_then(|variables| variables.get(placeholder)) {
            return self.resolve(value);
        }
        self.target.parameter_value(placeholder).map(String::from)
    }

    fn resolve_join(&self, argument: &Value) -> Option<String> {
        let [Value::String(delimiter), Value::Array(parts)] = argument.as_array()?.as_slice() else {
            return None;
        };

        let parts = parts
            .iter()
            .map(|part| self.resolve(part))
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join(delimiter.as_str()))
    }
}

fn single_intrinsic(expression: &Value) -> Option<(&str, &Value)> {
    match expression {
        Value::Object(object) if object.len() == 1 => {
            let (name, argument) = object.iter().next()?;
            Some((name.as_str(), argument))
        }
        _ => None,
    }
}

/// `"template"` or `["template", { variables }]`
fn sub_arguments(argument: &Value) -> Option<(&str, Option<&Map<String, Value>>)> {
    match argument {
        Value::String(template) => Some((template.as_str(), None)),
        Value::Array(items) => match items.as_slice() {
            [Value::String(template), Value::Object(variables)] => {
                Some((template.as_str(), Some(variables)))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Replace every `${placeholder}` in a `Fn::Sub` template
///
/// `${!Literal}` is written out as `${Literal}`. Returns `None` as soon as a placeholder
/// cannot be resolved.
pub(crate) fn substitute(
    template: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> Option<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}')?;
        let placeholder = &after[..end];

        match placeholder.strip_prefix('!') {
            Some(literal) => {
                output.push_str("${");
                output.push_str(literal);
                output.push('}');
            }
            None => output.push_str(&lookup(placeholder)?),
        }

        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Some(output)
}
