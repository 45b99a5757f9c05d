//! JSON encoding of metadata and values.
//!
//! Values are written in their canonical text form together with their type,
//! so that reading them back yields equal values. Variables keep everything
//! the builder accepts: categories with their codes and missing flags, and
//! attributes with their namespaces and locales, in order.
// used for the JSON encoding
use serde::{Deserialize, Serialize};

use crate::construct::{Attribute, AttributeAware, Category, Variable};
use crate::datatype::{Value, ValueType};
use crate::error::Result;

// ------------- Values -------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDocument {
    #[serde(rename = "type")]
    value_type: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    sequence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl ValueDocument {
    pub fn of(value: &Value) -> Self {
        Self { value_type: value.value_type().name().to_string(), sequence: value.is_sequence(), value: value.render() }
    }
    pub fn restore(&self) -> Result<Value> {
        let value_type = ValueType::for_name(&self.value_type)?;
        if self.sequence {
            value_type.sequence_value_of(self.value.as_deref())
        } else {
            value_type.value_of(self.value.as_deref())
        }
    }
}

// ------------- Attributes and categories -------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDocument {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    locale: Option<String>,
    value: ValueDocument,
}

impl AttributeDocument {
    fn of(attribute: &Attribute) -> Self {
        Self {
            name: attribute.name().to_string(),
            namespace: attribute.namespace().map(str::to_string),
            locale: attribute.locale().map(str::to_string),
            value: ValueDocument::of(attribute.value()),
        }
    }
    fn restore(&self) -> Result<Attribute> {
        let mut attribute = Attribute::new(self.name.clone(), self.value.restore()?);
        if let Some(namespace) = &self.namespace {
            attribute = attribute.with_namespace(namespace.clone());
        }
        if let Some(locale) = &self.locale {
            attribute = attribute.with_locale(locale.clone());
        }
        Ok(attribute)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDocument {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<i64>,
    #[serde(default)]
    missing: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<AttributeDocument>,
}

impl CategoryDocument {
    fn of(category: &Category) -> Self {
        Self {
            name: category.name().to_string(),
            code: category.code(),
            missing: category.is_missing(),
            attributes: category.attributes().iter().map(AttributeDocument::of).collect(),
        }
    }
    fn restore(&self) -> Result<Category> {
        let mut category = Category::new(self.name.clone()).missing(self.missing);
        if let Some(code) = self.code {
            category = category.with_code(code);
        }
        for attribute in &self.attributes {
            category = category.with_attribute(attribute.restore()?);
        }
        Ok(category)
    }
}

// ------------- Variables -------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDocument {
    name: String,
    entity_type: String,
    value_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    #[serde(default)]
    repeatable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    occurrence_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    referenced_entity_type: Option<String>,
    #[serde(default)]
    index: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    categories: Vec<CategoryDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<AttributeDocument>,
}

impl VariableDocument {
    pub fn of(variable: &Variable) -> Self {
        Self {
            name: variable.name().to_string(),
            entity_type: variable.entity_type().to_string(),
            value_type: variable.value_type().name().to_string(),
            unit: variable.unit().map(str::to_string),
            mime_type: variable.mime_type().map(str::to_string),
            repeatable: variable.is_repeatable(),
            occurrence_group: variable.occurrence_group().map(str::to_string),
            referenced_entity_type: variable.referenced_entity_type().map(str::to_string),
            index: variable.index(),
            categories: variable.categories().iter().map(CategoryDocument::of).collect(),
            attributes: variable.attributes().iter().map(AttributeDocument::of).collect(),
        }
    }

    pub fn restore(&self) -> Result<Variable> {
        let value_type = ValueType::for_name(&self.value_type)?;
        let mut builder = Variable::builder(self.name.clone(), value_type, self.entity_type.clone())
            .repeatable(self.repeatable)
            .index(self.index);
        if let Some(unit) = &self.unit {
            builder = builder.unit(unit.clone());
        }
        if let Some(mime_type) = &self.mime_type {
            builder = builder.mime_type(mime_type.clone());
        }
        if let Some(group) = &self.occurrence_group {
            builder = builder.occurrence_group(group.clone());
        }
        if let Some(entity_type) = &self.referenced_entity_type {
            builder = builder.referenced_entity_type(entity_type.clone());
        }
        for category in &self.categories {
            builder = builder.add_category(category.restore()?);
        }
        for attribute in &self.attributes {
            builder = builder.add_attribute(attribute.restore()?);
        }
        builder.build()
    }
}

pub fn value_to_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&ValueDocument::of(value))?)
}

pub fn value_from_json(json: &str) -> Result<Value> {
    serde_json::from_str::<ValueDocument>(json)?.restore()
}

pub fn variable_to_json(variable: &Variable) -> Result<String> {
    Ok(serde_json::to_string_pretty(&VariableDocument::of(variable))?)
}

pub fn variable_from_json(json: &str) -> Result<Variable> {
    serde_json::from_str::<VariableDocument>(json)?.restore()
}

/// Encodes a list of variables, such as the variables of a table, as one array.
pub fn variables_to_json(variables: &[Variable]) -> Result<String> {
    let documents: Vec<VariableDocument> = variables.iter().map(VariableDocument::of).collect();
    Ok(serde_json::to_string_pretty(&documents)?)
}

pub fn variables_from_json(json: &str) -> Result<Vec<Variable>> {
    serde_json::from_str::<Vec<VariableDocument>>(json)?.iter().map(VariableDocument::restore).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn values_round_trip() {
        let values = vec![
            Value::text("a \"quoted\", text"),
            Value::integer(-7),
            ValueType::Decimal.parse("12.50").expect("decimal"),
            Value::boolean(false),
            Value::datetime(Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).single().expect("instant")),
            Value::binary(vec![0, 1, 254, 255]),
            ValueType::Locale.parse("fr_CA").expect("locale"),
            ValueType::Date.null_value(),
            ValueType::Text.sequence_value_of(Some("\"a,b\",null,\"say \"\"hi\"\"\"")).expect("sequence"),
            ValueType::Integer.null_sequence(),
        ];
        for value in values {
            let json = value_to_json(&value).expect("encodes");
            let restored = value_from_json(&json).expect("decodes");
            assert_eq!(restored, value, "through {}", json);
            assert_eq!(restored.is_sequence(), value.is_sequence());
        }
    }

    #[test]
    fn variables_keep_their_metadata() {
        let variable = Variable::builder("drugs", ValueType::Text, "Participant")
            .repeatable(true)
            .occurrence_group("medication")
            .unit("mg")
            .index(4)
            .add_category(Category::new("A01").with_code(1))
            .add_category(Category::new("99").missing(true).with_attribute(Attribute::text("label", "unknown").with_locale("en")))
            .add_attribute(Attribute::text("label", "Drugs").with_locale("en"))
            .add_attribute(Attribute::text("label", "Médicaments").with_locale("fr"))
            .add_attribute(Attribute::text("source", "form B").with_namespace("maelstrom"))
            .build()
            .expect("variable");
        let json = variable_to_json(&variable).expect("encodes");
        assert_eq!(variable_from_json(&json).expect("decodes"), variable);
        let both = variables_to_json(&[variable.clone(), variable.clone()]).expect("encodes");
        assert_eq!(variables_from_json(&both).expect("decodes"), vec![variable.clone(), variable]);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(value_from_json(r#"{"type":"complex","value":"1+i"}"#).is_err());
        assert!(value_from_json("not json").is_err());
    }
}
