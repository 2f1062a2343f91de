//! CloudFormation template model and the intrinsic functions stacks use to
//! reference each other's resources.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const FORMAT_VERSION: &str = "2010-09-09";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Logical id {1} is already used in stack {0}")]
    DuplicateLogicalId(String, String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "is_empty_properties")]
    pub properties: Value,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(resource_type: &str, properties: Value) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: vec![],
        }
    }

    pub fn depends_on(mut self, logical_id: &str) -> Self {
        self.depends_on.push(logical_id.to_string());
        self
    }

    /// Looks up a top-level property, mostly useful when inspecting a synthesized stack.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

fn is_empty_properties(properties: &Value) -> bool {
    match properties {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportName>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    pub description: String,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,

    pub resources: BTreeMap<String, Resource>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

/// A value published by one stack for others to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    stack_name: String,
    name: String,
}

impl Export {
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A named, independently deployable template together with the stacks it imports from.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    name: String,
    template: Template,
    dependencies: BTreeSet<String>,
}

impl Stack {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            template: Template {
                format_version: FORMAT_VERSION.to_string(),
                description: description.to_string(),
                parameters: BTreeMap::new(),
                resources: BTreeMap::new(),
                outputs: BTreeMap::new(),
            },
            dependencies: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(String::as_str)
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.template.resources.get(logical_id)
    }

    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Resource)> + 'a {
        self.template
            .resources
            .iter()
            .filter(move |(_, resource)| resource.resource_type == resource_type)
            .map(|(id, resource)| (id.as_str(), resource))
    }

    /// Adds a resource and returns a `Ref` to it.
    pub fn add(&mut self, logical_id: &str, resource: Resource) -> Result<Value, Error> {
        if self.template.resources.contains_key(logical_id) {
            return Err(Error::DuplicateLogicalId(
                self.name.clone(),
                logical_id.to_string(),
            ));
        }
        self.template
            .resources
            .insert(logical_id.to_string(), resource);

        Ok(reference(logical_id))
    }

    pub fn add_parameter(
        &mut self,
        logical_id: &str,
        parameter: Parameter,
    ) -> Result<Value, Error> {
        if self.template.parameters.contains_key(logical_id) {
            return Err(Error::DuplicateLogicalId(
                self.name.clone(),
                logical_id.to_string(),
            ));
        }
        self.template
            .parameters
            .insert(logical_id.to_string(), parameter);

        Ok(reference(logical_id))
    }

    pub fn add_output(&mut self, key: &str, value: Value, description: &str) -> Result<(), Error> {
        self.insert_output(key, value, description, None)
    }

    /// Publishes `value` as `<stack name>:<key>` so later stacks can import it.
    pub fn export(&mut self, key: &str, value: Value, description: &str) -> Result<Export, Error> {
        let export = Export {
            stack_name: self.name.clone(),
            name: format!("{}:{}", self.name, key),
        };
        self.insert_output(key, value, description, Some(export.name.clone()))?;

        Ok(export)
    }

    /// Imports an export of an already built stack and records the dependency on it.
    pub fn import(&mut self, export: &Export) -> Value {
        if export.stack_name != self.name {
            self.dependencies.insert(export.stack_name.clone());
        }
        import_value(&export.name)
    }

    fn insert_output(
        &mut self,
        key: &str,
        value: Value,
        description: &str,
        export: Option<String>,
    ) -> Result<(), Error> {
        if self.template.outputs.contains_key(key) {
            return Err(Error::DuplicateLogicalId(self.name.clone(), key.to_string()));
        }
        self.template.outputs.insert(
            key.to_string(),
            Output {
                value,
                description: Some(description.to_string()),
                export: export.map(|name| ExportName { name }),
            },
        );

        Ok(())
    }
}

pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn import_value(name: &str) -> Value {
    json!({ "Fn::ImportValue": name })
}

pub fn join(delimiter: &str, values: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, values] })
}

pub fn sub(text: &str) -> Value {
    json!({ "Fn::Sub": text })
}

pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

pub fn cidr(ip_block: Value, count: usize, host_bits: u8) -> Value {
    json!({ "Fn::Cidr": [ip_block, count, host_bits] })
}

pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

/// Builds a `Tags` list with a single `Name` tag.
pub fn name_tag(name: &str) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_logical_ids() {
        let mut stack = Stack::new("Test", "test");
        stack
            .add("Bucket", Resource::new("AWS::S3::Bucket", json!({})))
            .unwrap();

        let result = stack.add("Bucket", Resource::new("AWS::S3::Bucket", json!({})));
        assert_eq!(
            Err(Error::DuplicateLogicalId(
                String::from("Test"),
                String::from("Bucket")
            )),
            result
        );
    }

    #[test]
    fn import_records_dependency() {
        let mut producer = Stack::new("Producer", "producer");
        let export = producer
            .export("VpcId", reference("Vpc"), "The VPC")
            .unwrap();
        assert_eq!("Producer:VpcId", export.name());

        let mut consumer = Stack::new("Consumer", "consumer");
        let value = consumer.import(&export);

        assert_eq!(json!({ "Fn::ImportValue": "Producer:VpcId" }), value);
        assert_eq!(vec!["Producer"], consumer.dependencies().collect::<Vec<_>>());
    }

    #[test]
    fn serializes_cloudformation_keys() {
        let mut stack = Stack::new("Test", "test stack");
        stack
            .add(
                "Group",
                Resource::new("AWS::Logs::LogGroup", json!({})).depends_on("Other"),
            )
            .unwrap();
        stack
            .export("GroupName", reference("Group"), "log group")
            .unwrap();

        let rendered = serde_json::to_value(stack.template()).unwrap();
        assert_eq!(json!(FORMAT_VERSION), rendered["AWSTemplateFormatVersion"]);
        assert_eq!(
            json!({ "Type": "AWS::Logs::LogGroup", "DependsOn": ["Other"] }),
            rendered["Resources"]["Group"]
        );
        assert_eq!(
            json!("Test:GroupName"),
            rendered["Outputs"]["GroupName"]["Export"]["Name"]
        );
        assert!(rendered.get("Parameters").is_none());
    }
}
