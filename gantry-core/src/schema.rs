//! Schema - Property metadata for resources and their nested blocks
//!
//! Plugins declare one schema per resource type with a builder; the
//! classifier, validator and differ read behaviour (required, updatable,
//! output, conflicts-with) from here instead of from the values themselves.

use std::collections::HashMap;
use std::fmt;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Integer within an inclusive range
    Range { min: i64, max: i64 },
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Handle to another resource, optionally restricted to one resource type
    Ref(Option<String>),
    /// Single nested block
    Block(Box<ResourceSchema>),
    /// Ordered list of nested blocks
    BlockList(Box<ResourceSchema>),
    /// Set of nested blocks keyed by their primary key
    BlockSet(Box<ResourceSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type.
    ///
    /// Block types only check the shape of the value; their members are
    /// validated against the nested schema by the validator.
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            // References resolve to strings at execution time
            (AttributeType::String, Value::String(_) | Value::Ref(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Range { min, max }, Value::Int(n)) => {
                if n >= min && n <= max {
                    Ok(())
                } else {
                    Err(TypeError::OutOfRange {
                        value: *n,
                        min: *min,
                        max: *max,
                    })
                }
            }

            (AttributeType::Custom { validate, base, .. }, v) => {
                if let Value::Ref(_) = v
                    && matches!(**base, AttributeType::String)
                {
                    return Ok(());
                }
                validate(v).map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Ref(expected), Value::Ref(r)) => match expected {
                Some(t) if *t != r.target.resource_type => Err(TypeError::RefTypeMismatch {
                    expected: t.clone(),
                    got: r.target.resource_type.clone(),
                }),
                _ => Ok(()),
            },

            (AttributeType::Block(_), Value::Block(_))
            | (AttributeType::BlockList(_), Value::BlockList(_))
            | (AttributeType::BlockSet(_), Value::BlockSet(_)) => Ok(()),

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    /// Nested schema for block-typed attributes
    pub fn block_schema(&self) -> Option<&ResourceSchema> {
        match self {
            AttributeType::Block(s) | AttributeType::BlockList(s) | AttributeType::BlockSet(s) => {
                Some(s)
            }
            _ => None,
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Range { min, max } => format!("Int({}..={})", min, max),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Ref(Some(t)) => format!("Ref<{}>", t),
            AttributeType::Ref(None) => "Ref".to_string(),
            AttributeType::Block(s) => format!("Block<{}>", s.resource_type),
            AttributeType::BlockList(s) => format!("BlockList<{}>", s.resource_type),
            AttributeType::BlockSet(s) => format!("BlockSet<{}>", s.resource_type),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Value {value} is out of range {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Reference must point to a {expected}, got {got}")]
    RefTypeMismatch { expected: String, got: String },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },
}

impl Value {
    pub(crate) fn type_name(&self) -> String {
        match self {
            Value::String(_) => "String".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::Ref(r) => format!("Ref({})", r.target),
            Value::Block(b) => format!("Block({})", b.block_type),
            Value::BlockList(_) => "BlockList".to_string(),
            Value::BlockSet(_) => "BlockSet".to_string(),
        }
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// Can be changed in place; otherwise a change forces replacement
    pub updatable: bool,
    /// Populated only from provider responses, never compared
    pub output: bool,
    /// Sibling attributes that must not be set together with this one
    pub conflicts_with: Vec<String>,
    /// Block set reconciled through per-member add/remove calls
    pub standalone: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            updatable: false,
            output: false,
            conflicts_with: Vec::new(),
            standalone: false,
            default: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    pub fn output(mut self) -> Self {
        self.output = true;
        self
    }

    pub fn conflicts_with<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conflicts_with.extend(names.into_iter().map(Into::into));
        self
    }

    /// Members of this block set are added and removed with their own calls
    pub fn standalone(mut self) -> Self {
        self.standalone = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// True when this is a standalone block set
    pub fn is_standalone_set(&self) -> bool {
        self.standalone && matches!(self.attr_type, AttributeType::BlockSet(_))
    }
}

/// Resource (or block) schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    /// Attributes forming the primary key of a block; empty for resources
    pub key_attributes: Vec<String>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            key_attributes: Vec::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_key<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_attributes = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.output)
    }

    /// Schemas of every nested block, depth-first
    pub fn nested_schemas(&self) -> Vec<&ResourceSchema> {
        let mut out = Vec::new();
        for attr in self.attributes.values() {
            if let Some(nested) = attr.attr_type.block_schema() {
                out.push(nested);
                out.extend(nested.nested_schemas());
            }
        }
        out
    }

    /// Standalone block set attributes, sorted by name
    pub fn standalone_sets(&self) -> Vec<&AttributeSchema> {
        let mut sets: Vec<_> = self
            .attributes
            .values()
            .filter(|a| a.is_standalone_set())
            .collect();
        sets.sort_by(|a, b| a.name.cmp(&b.name));
        sets
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| {
                if let Value::Int(n) = value {
                    if *n > 0 {
                        Ok(())
                    } else {
                        Err("Value must be positive".to_string())
                    }
                } else {
                    Err("Expected integer".to_string())
                }
            },
        }
    }

    /// Port number (0-65535)
    pub fn port_number() -> AttributeType {
        AttributeType::Range { min: 0, max: 65535 }
    }

    /// CIDR block type (e.g., "10.0.0.0/16")
    pub fn cidr() -> AttributeType {
        AttributeType::Custom {
            name: "Cidr".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                if let Value::String(s) = value {
                    validate_cidr(s)
                } else {
                    Err("Expected string".to_string())
                }
            },
        }
    }
}

/// Validate CIDR block format (e.g., "10.0.0.0/16")
pub fn validate_cidr(cidr: &str) -> Result<(), String> {
    let Some((ip, prefix)) = cidr.split_once('/') else {
        return Err(format!("Invalid CIDR format '{}': expected IP/prefix", cidr));
    };

    if ip.parse::<std::net::Ipv4Addr>().is_err() {
        return Err(format!("Invalid IP address '{}' in CIDR block", ip));
    }

    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(()),
        Ok(p) => Err(format!("Invalid prefix length '{}': must be 0-32", p)),
        Err(_) => Err(format!(
            "Invalid prefix length '{}': must be a number",
            prefix
        )),
    }
}
