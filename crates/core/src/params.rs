//! Task parameters and argument resolution
//!
//! A task declares [`Param`]s; a caller passes [`Args`] (positional values
//! followed by named values). Resolution binds the two into a name → value
//! map that becomes part of the task's resolved input.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Accepted value kind of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// JSON string
    String,
    /// JSON number
    Number,
    /// JSON boolean
    Bool,
    /// Any JSON value
    Json,
}

impl ParamKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Json => true,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Json => "json",
        }
    }
}

/// A parameter declared by a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Accepted kind
    pub kind: ParamKind,
    /// Human readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Value used when the caller does not pass one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Whether the parameter may be omitted without a default
    #[serde(default)]
    pub optional: bool,
    /// Whether the parameter binds a positional argument
    #[serde(default)]
    pub positional: bool,
}

impl Param {
    /// A parameter passed by name.
    pub fn named(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            default: None,
            optional: false,
            positional: false,
        }
    }

    /// A parameter bound from positional arguments, in declaration order.
    pub fn positional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            positional: true,
            ..Self::named(name, kind)
        }
    }

    /// Set a default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Allow the parameter to be omitted.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Attach a description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Arguments supplied by the caller of a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Args {
    /// Positional values
    #[serde(default)]
    pub positional: Vec<Value>,
    /// Named values
    #[serde(default)]
    pub named: BTreeMap<String, Value>,
}

impl Args {
    /// No arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional value.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a named value.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Whether no values were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

/// Argument binding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgsError {
    #[error("missing required argument '{name}'")]
    Missing { name: String },

    #[error("unknown argument '{name}'")]
    Unknown { name: String },

    #[error("argument '{name}' given both positionally and by name")]
    Duplicate { name: String },

    #[error("too many positional arguments: expected at most {expected}, got {got}")]
    TooManyPositional { expected: usize, got: usize },

    #[error("argument '{name}' expects a {expected} value")]
    WrongKind { name: String, expected: &'static str },
}

/// Bind caller arguments to declared parameters.
///
/// Positional values fill positional parameters in declaration order. Every
/// value is checked against its parameter's kind; defaults are applied to
/// anything left unbound and optional parameters may stay absent.
///
/// # Errors
///
/// Returns [`ArgsError`] for unknown, duplicated, missing or mistyped values.
pub fn resolve_args(params: &[Param], args: &Args) -> Result<BTreeMap<String, Value>, ArgsError> {
    let positional: Vec<&Param> = params.iter().filter(|p| p.positional).collect();
    if args.positional.len() > positional.len() {
        return Err(ArgsError::TooManyPositional {
            expected: positional.len(),
            got: args.positional.len(),
        });
    }

    if let Some(name) = args
        .named
        .keys()
        .find(|name| !params.iter().any(|p| &p.name == *name))
    {
        return Err(ArgsError::Unknown { name: name.clone() });
    }

    let mut bound = BTreeMap::new();
    for (param, value) in positional.iter().zip(&args.positional) {
        if args.named.contains_key(&param.name) {
            return Err(ArgsError::Duplicate {
                name: param.name.clone(),
            });
        }
        bound.insert(param.name.clone(), value.clone());
    }
    for (name, value) in &args.named {
        bound.insert(name.clone(), value.clone());
    }

    for param in params {
        match bound.get(&param.name) {
            Some(value) if !param.kind.accepts(value) => {
                return Err(ArgsError::WrongKind {
                    name: param.name.clone(),
                    expected: param.kind.as_str(),
                });
            }
            Some(_) => {}
            None => {
                if let Some(default) = &param.default {
                    bound.insert(param.name.clone(), default.clone());
                } else if !param.optional {
                    return Err(ArgsError::Missing {
                        name: param.name.clone(),
                    });
                }
            }
        }
    }

    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deploy_params() -> Vec<Param> {
        vec![
            Param::positional("unit", ParamKind::String),
            Param::named("mode", ParamKind::String).with_default("auto"),
            Param::named("verbose", ParamKind::Bool).optional(),
        ]
    }

    #[test]
    fn test_positional_and_defaults() {
        let resolved = resolve_args(&deploy_params(), &Args::new().arg("ledger")).unwrap();
        assert_eq!(resolved["unit"], json!("ledger"));
        assert_eq!(resolved["mode"], json!("auto"));
        assert!(!resolved.contains_key("verbose"));
    }

    #[test]
    fn test_named_overrides_default() {
        let args = Args::new().set("unit", "ledger").set("mode", "upgrade");
        let resolved = resolve_args(&deploy_params(), &args).unwrap();
        assert_eq!(resolved["mode"], json!("upgrade"));
    }

    #[test]
    fn test_missing_required() {
        let err = resolve_args(&deploy_params(), &Args::new()).unwrap_err();
        assert_eq!(
            err,
            ArgsError::Missing {
                name: "unit".into()
            }
        );
    }

    #[test]
    fn test_rejects_unknown_and_duplicates() {
        let unknown = Args::new().arg("a").set("color", "red");
        assert!(matches!(
            resolve_args(&deploy_params(), &unknown),
            Err(ArgsError::Unknown { .. })
        ));

        let duplicate = Args::new().arg("a").set("unit", "b");
        assert!(matches!(
            resolve_args(&deploy_params(), &duplicate),
            Err(ArgsError::Duplicate { .. })
        ));

        let extra = Args::new().arg("a").arg("b");
        assert!(matches!(
            resolve_args(&deploy_params(), &extra),
            Err(ArgsError::TooManyPositional {
                expected: 1,
                got: 2
            })
        ));
    }

    #[test]
    fn test_kind_checked() {
        let args = Args::new().arg("a").set("verbose", "yes");
        assert_eq!(
            resolve_args(&deploy_params(), &args).unwrap_err(),
            ArgsError::WrongKind {
                name: "verbose".into(),
                expected: "bool"
            }
        );
    }
}
