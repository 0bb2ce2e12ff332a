//! Validation - Static checks on desired config before any provider call
//!
//! All errors are collected; validation never stops at the first one.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::provider::PluginRegistry;
use crate::resource::{Block, Diffable, Resource, ResourceId, Value};
use crate::schema::{AttributeType, ResourceSchema};

/// One problem found in desired config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub resource: ResourceId,
    /// Property path (e.g., "ingress[0].from_port"), if the error is about one
    pub property: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(resource: ResourceId, property: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            resource,
            property: property.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(p) => write!(f, "{}.{}: {}", self.resource, p, self.message),
            None => write!(f, "{}: {}", self.resource, self.message),
        }
    }
}

/// Validate every managed resource against its schema
pub fn validate(resources: &[Resource], registry: &PluginRegistry) -> Result<(), Vec<ValidationError>> {
    let declared: HashSet<&ResourceId> = resources.iter().map(|r| &r.id).collect();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for resource in resources {
        if !seen.insert(&resource.id) {
            errors.push(ValidationError::new(
                resource.id.clone(),
                None,
                "Resource is declared more than once",
            ));
            continue;
        }

        if resource.is_data_source() {
            continue;
        }

        let Some(schema) = registry.schema(&resource.id.resource_type) else {
            errors.push(ValidationError::new(
                resource.id.clone(),
                None,
                format!("Unknown resource type '{}'", resource.id.resource_type),
            ));
            continue;
        };

        let mut checker = Checker {
            id: &resource.id,
            declared: &declared,
            errors: &mut errors,
        };
        checker.check_attributes(schema, &resource.attributes, "");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn join(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name)
}

struct Checker<'a> {
    id: &'a ResourceId,
    declared: &'a HashSet<&'a ResourceId>,
    errors: &'a mut Vec<ValidationError>,
}

impl Checker<'_> {
    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.errors
            .push(ValidationError::new(self.id.clone(), Some(path), message));
    }

    fn check_attributes(&mut self, schema: &ResourceSchema, attributes: &HashMap<String, Value>, prefix: &str) {
        let mut required: Vec<_> = schema
            .attributes
            .values()
            .filter(|a| a.required && a.default.is_none() && !attributes.contains_key(&a.name))
            .map(|a| a.name.as_str())
            .collect();
        required.sort();
        for name in required {
            self.error(&join(prefix, name), "Required attribute is missing");
        }

        let mut names: Vec<_> = attributes.keys().collect();
        names.sort();

        let mut conflicts = BTreeSet::new();
        for name in names {
            let value = &attributes[name.as_str()];
            let Some(attr) = schema.get(name) else {
                self.error(&join(prefix, name), "Unknown attribute");
                continue;
            };

            if attr.output {
                self.error(&join(prefix, name), "Output attribute cannot be set in config");
                continue;
            }

            for other in &attr.conflicts_with {
                if attributes.contains_key(other) {
                    let pair = if name < other {
                        (name.clone(), other.clone())
                    } else {
                        (other.clone(), name.clone())
                    };
                    conflicts.insert(pair);
                }
            }

            if let Err(e) = attr.attr_type.validate(value) {
                self.error(&join(prefix, name), e.to_string());
                continue;
            }

            self.check_refs(&join(prefix, name), value);
            self.check_blocks(&attr.attr_type, value, &join(prefix, name));
        }

        for (a, b) in conflicts {
            self.error(
                &join(prefix, &a),
                format!("'{}' conflicts with '{}'; only one may be set", a, b),
            );
        }
    }

    fn check_blocks(&mut self, attr_type: &AttributeType, value: &Value, path: &str) {
        let Some(nested) = attr_type.block_schema() else {
            return;
        };
        match value {
            Value::Block(block) => self.check_block(nested, block, &format!("{}.", path)),
            Value::BlockList(blocks) => {
                for (i, block) in blocks.iter().enumerate() {
                    self.check_block(nested, block, &format!("{}[{}].", path, i));
                }
            }
            Value::BlockSet(blocks) => {
                let mut keys = HashSet::new();
                for (i, block) in blocks.iter().enumerate() {
                    self.check_block(nested, block, &format!("{}[{}].", path, i));
                    let key = block.primary_key(nested);
                    if !keys.insert(key.clone()) {
                        self.error(&format!("{}[{}]", path, i), format!("Duplicate member key '{}'", key));
                    }
                }
            }
            _ => {}
        }
    }

    fn check_block(&mut self, schema: &ResourceSchema, block: &Block, prefix: &str) {
        self.check_attributes(schema, &block.attributes, prefix);
    }

    fn check_refs(&mut self, path: &str, value: &Value) {
        // blocks are checked attribute by attribute
        if matches!(value, Value::Block(_) | Value::BlockList(_) | Value::BlockSet(_)) {
            return;
        }
        let mut refs = Vec::new();
        value.collect_refs(&mut refs);
        for r in refs {
            if !self.declared.contains(&r.target) {
                self.error(path, format!("Reference to undeclared resource {}", r.target));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceRef;
    use crate::schema::{AttributeSchema, types};
    use crate::testing::{self, SchemaPlugin};

    fn vpc_schema() -> ResourceSchema {
        ResourceSchema::new("ec2.vpc")
            .attribute(AttributeSchema::new("cidr_block", types::cidr()).required())
            .attribute(
                AttributeSchema::new("ipv4_ipam_pool", AttributeType::String)
                    .conflicts_with(["cidr_block_size"]),
            )
            .attribute(
                AttributeSchema::new("cidr_block_size", AttributeType::Int)
                    .conflicts_with(["ipv4_ipam_pool"]),
            )
            .attribute(AttributeSchema::new("vpc_id", AttributeType::String).output())
    }

    fn instance_schema() -> ResourceSchema {
        let ebs = ResourceSchema::new("ebs")
            .attribute(
                AttributeSchema::new(
                    "volume_type",
                    AttributeType::Enum(vec!["gp2".into(), "gp3".into(), "io1".into()]),
                )
                .required(),
            )
            .attribute(AttributeSchema::new("iops", AttributeType::Range { min: 100, max: 64000 }));
        ResourceSchema::new("ec2.instance")
            .attribute(AttributeSchema::new("vpc", AttributeType::Ref(Some("ec2.vpc".into()))))
            .attribute(AttributeSchema::new("ebs", AttributeType::BlockList(Box::new(ebs))))
    }

    fn security_group_schema() -> ResourceSchema {
        let rule = ResourceSchema::new("ingress")
            .attribute(AttributeSchema::new("port", AttributeType::Int))
            .attribute(AttributeSchema::new("description", AttributeType::String).updatable())
            .with_key(["port"]);
        ResourceSchema::new("ec2.security_group")
            .attribute(AttributeSchema::new("ingress", AttributeType::BlockSet(Box::new(rule))).updatable())
    }

    fn registry() -> PluginRegistry {
        testing::registry([
            SchemaPlugin::new(vpc_schema()),
            SchemaPlugin::new(instance_schema()),
            SchemaPlugin::new(security_group_schema()),
        ])
    }

    #[test]
    fn valid_config_passes() {
        let vpc = Resource::new("ec2.vpc", "main").with_attribute("cidr_block", Value::string("10.0.0.0/16"));
        let web = Resource::new("ec2.instance", "web")
            .with_attribute("vpc", Value::Ref(ResourceRef::to(vpc.id.clone())));
        assert!(validate(&[vpc, web], &registry()).is_ok());
    }

    #[test]
    fn conflicting_properties_are_reported_once() {
        let vpc = Resource::new("ec2.vpc", "main")
            .with_attribute("cidr_block", Value::string("10.0.0.0/16"))
            .with_attribute("ipv4_ipam_pool", Value::string("ipam-pool-1"))
            .with_attribute("cidr_block_size", Value::Int(16));

        let errors = validate(&[vpc], &registry()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].property.as_deref(), Some("cidr_block_size"));
        assert!(errors[0].message.contains("conflicts with 'ipv4_ipam_pool'"));
    }

    #[test]
    fn all_errors_are_collected() {
        let vpc = Resource::new("ec2.vpc", "main")
            .with_attribute("vpc_id", Value::string("vpc-1"))
            .with_attribute("colour", Value::string("blue"));
        let unknown = Resource::new("ec2.nat_gateway", "nat");

        let errors = validate(&[vpc, unknown], &registry()).unwrap_err();
        let messages: Vec<_> = errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "ec2.vpc.main.cidr_block: Required attribute is missing",
                "ec2.vpc.main.colour: Unknown attribute",
                "ec2.vpc.main.vpc_id: Output attribute cannot be set in config",
                "ec2.nat_gateway.nat: Unknown resource type 'ec2.nat_gateway'",
            ]
        );
    }

    #[test]
    fn nested_blocks_are_validated_with_paths() {
        let web = Resource::new("ec2.instance", "web").with_attribute(
            "ebs",
            Value::BlockList(vec![
                Block::new("ebs").with_attribute("volume_type", Value::string("gp3")),
                Block::new("ebs")
                    .with_attribute("volume_type", Value::string("sc9"))
                    .with_attribute("iops", Value::Int(10)),
            ]),
        );

        let errors = validate(&[web], &registry()).unwrap_err();
        let paths: Vec<_> = errors.iter().filter_map(|e| e.property.clone()).collect();
        assert_eq!(paths, vec!["ebs[1].iops", "ebs[1].volume_type"]);
    }

    #[test]
    fn set_members_must_have_distinct_keys() {
        let rule = |port: i64, description: &str| {
            Block::new("ingress")
                .with_attribute("port", Value::Int(port))
                .with_attribute("description", Value::string(description))
        };
        let sg = |rules| Resource::new("ec2.security_group", "web").with_attribute("ingress", Value::BlockSet(rules));

        assert!(validate(&[sg(vec![rule(80, "http"), rule(443, "https")])], &registry()).is_ok());

        let errors = validate(&[sg(vec![rule(443, "https"), rule(443, "tls")])], &registry()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].property.as_deref(), Some("ingress[1]"));
        assert_eq!(errors[0].message, "Duplicate member key '443'");
    }

    #[test]
    fn references_must_target_declared_resources_of_the_right_type() {
        let web = Resource::new("ec2.instance", "web")
            .with_attribute("vpc", Value::Ref(ResourceRef::to(ResourceId::new("ec2.vpc", "gone"))));
        let errors = validate(&[web], &registry()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("undeclared resource ec2.vpc.gone"));

        let subnet_ref = Resource::new("ec2.instance", "db").with_attribute(
            "vpc",
            Value::Ref(ResourceRef::to(ResourceId::new("ec2.subnet", "a"))),
        );
        let errors = validate(&[subnet_ref], &registry()).unwrap_err();
        assert!(errors[0].message.contains("Reference must point to a ec2.vpc"));
    }

    #[test]
    fn data_sources_are_not_validated() {
        let existing = Resource::new("ec2.vpc", "default").with_read_only(true);
        assert!(validate(&[existing], &registry()).is_ok());
    }

    #[test]
    fn duplicate_declarations_are_rejected() {
        let a = Resource::new("ec2.vpc", "main").with_attribute("cidr_block", Value::string("10.0.0.0/16"));
        let errors = validate(&[a.clone(), a], &registry()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("more than once"));
    }
}
