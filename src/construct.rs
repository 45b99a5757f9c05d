// custom made ordering for entities
use std::cmp::Ordering;
// used to print out readable forms of a construct
use std::fmt;

// our own stuff that we need
use crate::datatype::{Value, ValueType};
use crate::error::{Result, VartabError};

/// Name of the attribute holding a derived variable's formula.
pub const SCRIPT_ATTRIBUTE: &str = "script";
/// Name of the attribute naming the variable another one was derived from.
pub const SAME_AS_ATTRIBUTE: &str = "sameAs";

// ------------- VariableEntity -------------
/// Identifies one subject (row) across tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableEntity {
    entity_type: String,
    identifier: String,
}
impl VariableEntity {
    pub fn new(entity_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            identifier: identifier.into(),
        }
    }
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}
impl Ord for VariableEntity {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.entity_type, &self.identifier).cmp(&(&other.entity_type, &other.identifier))
    }
}
impl PartialOrd for VariableEntity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl fmt::Display for VariableEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.identifier)
    }
}

// ------------- Attribute -------------
/// A possibly namespaced, possibly localized, typed annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    namespace: Option<String>,
    name: String,
    locale: Option<String>,
    value: Value,
}
impl Attribute {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            locale: None,
            value,
        }
    }
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, Value::text(text))
    }
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
    // two attributes occupy the same slot when namespace, name and locale agree
    fn same_slot(&self, other: &Attribute) -> bool {
        self.namespace == other.namespace && self.name == other.name && self.locale == other.locale
    }
}

/// Shared attribute lookups for variables and categories. Attributes are kept
/// in insertion order and several may share a name; the first match wins.
pub trait AttributeAware {
    fn attributes(&self) -> &[Attribute];
    fn owner_name(&self) -> String;

    fn has_attribute(&self, name: &str) -> bool {
        self.attributes().iter().any(|a| a.name == name)
    }
    fn attribute(&self, name: &str) -> Result<&Attribute> {
        self.attributes()
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| self.no_such_attribute(name))
    }
    fn localized_attribute(&self, name: &str, locale: Option<&str>) -> Result<&Attribute> {
        self.attributes()
            .iter()
            .find(|a| a.name == name && a.locale.as_deref() == locale)
            .ok_or_else(|| self.no_such_attribute(name))
    }
    fn namespaced_attribute(&self, namespace: &str, name: &str) -> Result<&Attribute> {
        self.attributes()
            .iter()
            .find(|a| a.name == name && a.namespace.as_deref() == Some(namespace))
            .ok_or_else(|| self.no_such_attribute(name))
    }
    /// All attributes sharing a name, in insertion order.
    fn attributes_named(&self, name: &str) -> Vec<&Attribute> {
        self.attributes().iter().filter(|a| a.name == name).collect()
    }
    fn attribute_string(&self, name: &str) -> Option<String> {
        self.attribute(name).ok().and_then(|a| a.value.render())
    }
    fn no_such_attribute(&self, name: &str) -> VartabError {
        VartabError::NoSuchAttribute {
            name: name.to_string(),
            owner: self.owner_name(),
        }
    }
}

// ------------- Category -------------
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    name: String,
    code: Option<i64>,
    missing: bool,
    attributes: Vec<Attribute>,
}
impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
            missing: false,
            attributes: Vec::new(),
        }
    }
    pub fn missing(mut self, missing: bool) -> Self {
        self.missing = missing;
        self
    }
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn code(&self) -> Option<i64> {
        self.code
    }
    pub fn is_missing(&self) -> bool {
        self.missing
    }
}
impl AttributeAware for Category {
    fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }
    fn owner_name(&self) -> String {
        format!("category {}", self.name)
    }
}

// ------------- Variable -------------
/// Immutable column metadata. Variables are only created through [`VariableBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    entity_type: String,
    value_type: ValueType,
    unit: Option<String>,
    mime_type: Option<String>,
    repeatable: bool,
    occurrence_group: Option<String>,
    referenced_entity_type: Option<String>,
    index: u32,
    categories: Vec<Category>,
    attributes: Vec<Attribute>,
}

impl Variable {
    pub fn builder(name: impl Into<String>, value_type: ValueType, entity_type: impl Into<String>) -> VariableBuilder {
        VariableBuilder::new(name, value_type, entity_type)
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }
    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }
    pub fn occurrence_group(&self) -> Option<&str> {
        self.occurrence_group.as_deref()
    }
    pub fn referenced_entity_type(&self) -> Option<&str> {
        self.referenced_entity_type.as_deref()
    }
    pub fn index(&self) -> u32 {
        self.index
    }
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }
    pub fn has_categories(&self) -> bool {
        !self.categories.is_empty()
    }
    pub fn category(&self, name: &str) -> Result<&Category> {
        self.categories
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| VartabError::NoSuchCategory {
                name: name.to_string(),
                owner: self.name.clone(),
            })
    }
    /// A value is missing when it is null or names a category flagged as missing.
    pub fn is_missing_value(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        let is_missing_code = |v: &Value| {
            v.render()
                .map(|code| self.categories.iter().any(|c| c.missing && c.name == code))
                .unwrap_or(true)
        };
        match value.elements() {
            Some(elements) => elements.iter().all(is_missing_code),
            None => is_missing_code(value),
        }
    }
    /// The formula of a derived variable. A variable derived with "same as"
    /// and no explicit script reads its origin.
    pub fn script(&self) -> Option<String> {
        self.attribute_string(SCRIPT_ATTRIBUTE)
            .or_else(|| self.attribute_string(SAME_AS_ATTRIBUTE).map(|origin| format!("$('{}')", origin)))
    }
    pub fn is_derived(&self) -> bool {
        self.script().is_some()
    }
    /// The null of this variable: a null sequence when repeatable.
    pub fn null_value(&self) -> Value {
        if self.repeatable {
            self.value_type.null_sequence()
        } else {
            self.value_type.null_value()
        }
    }
}
impl AttributeAware for Variable {
    fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }
    fn owner_name(&self) -> String {
        format!("variable {}", self.name)
    }
}
impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}::<{}>", self.name, self.value_type)
    }
}

// ------------- VariableBuilder -------------
/// Accumulates variable fields. Optional fields are tracked as explicitly set
/// or not so that "same as" derivation can tell overrides from defaults.
#[derive(Debug, Clone)]
pub struct VariableBuilder {
    name: String,
    entity_type: String,
    value_type: ValueType,
    unit: Option<String>,
    mime_type: Option<String>,
    repeatable: Option<bool>,
    occurrence_group: Option<String>,
    referenced_entity_type: Option<String>,
    index: Option<u32>,
    categories: Vec<Category>,
    attributes: Vec<Attribute>,
    origin: Option<Variable>,
}

impl VariableBuilder {
    pub fn new(name: impl Into<String>, value_type: ValueType, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            value_type,
            unit: None,
            mime_type: None,
            repeatable: None,
            occurrence_group: None,
            referenced_entity_type: None,
            index: None,
            categories: Vec::new(),
            attributes: Vec::new(),
            origin: None,
        }
    }
    /// Starts from an existing variable: all of its fields are copied and the
    /// builder's settings are applied on top when built.
    pub fn copy_of(variable: &Variable) -> Self {
        Self {
            name: variable.name.clone(),
            entity_type: variable.entity_type.clone(),
            value_type: variable.value_type,
            unit: variable.unit.clone(),
            mime_type: variable.mime_type.clone(),
            repeatable: Some(variable.repeatable),
            occurrence_group: variable.occurrence_group.clone(),
            referenced_entity_type: variable.referenced_entity_type.clone(),
            index: Some(variable.index),
            categories: variable.categories.clone(),
            attributes: variable.attributes.clone(),
            origin: None,
        }
    }
    /// Derives from `origin`: its attributes and categories are inherited unless overridden here.
    pub fn same_as(mut self, origin: &Variable) -> Self {
        self.origin = Some(origin.clone());
        self
    }
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
    pub fn repeatable(mut self, repeatable: bool) -> Self {
        self.repeatable = Some(repeatable);
        self
    }
    pub fn occurrence_group(mut self, group: impl Into<String>) -> Self {
        self.occurrence_group = Some(group.into());
        self
    }
    pub fn referenced_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.referenced_entity_type = Some(entity_type.into());
        self
    }
    pub fn index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }
    pub fn add_category(mut self, category: Category) -> Self {
        self.categories.push(category);
        self
    }
    pub fn add_categories<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories.extend(names.into_iter().map(Category::new));
        self
    }
    pub fn add_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }
    /// Replaces any attribute in the same namespace/name/locale slot.
    pub fn set_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.retain(|a| !a.same_slot(&attribute));
        self.attributes.push(attribute);
        self
    }
    /// Applies add-on builder capabilities while keeping this builder's state.
    pub fn with<F: FnOnce(Self) -> Self>(self, f: F) -> Self {
        f(self)
    }
    /// Add-on capabilities for derived variables.
    pub fn scripted(self) -> ScriptVariableBuilder {
        ScriptVariableBuilder { builder: self }
    }

    pub fn build(self) -> Result<Variable> {
        if self.name.trim().is_empty() {
            return Err(VartabError::InvalidArgument(String::from("variable name cannot be empty")));
        }
        let (categories, attributes, unit, mime_type, repeatable, occurrence_group, referenced) = match &self.origin {
            None => (
                self.categories,
                self.attributes,
                self.unit,
                self.mime_type,
                self.repeatable.unwrap_or(false),
                self.occurrence_group,
                self.referenced_entity_type,
            ),
            Some(origin) => {
                // overrides keep their value, everything else is inherited
                let mut attributes: Vec<Attribute> = origin
                    .attributes
                    .iter()
                    .filter(|a| !self.attributes.iter().any(|o| o.same_slot(a)))
                    .filter(|a| a.name != SCRIPT_ATTRIBUTE)
                    .cloned()
                    .collect();
                attributes.extend(self.attributes);
                attributes.retain(|a| a.name != SAME_AS_ATTRIBUTE);
                attributes.push(Attribute::text(SAME_AS_ATTRIBUTE, origin.name.clone()));
                let categories = if self.categories.is_empty() {
                    origin.categories.clone()
                } else {
                    self.categories
                };
                (
                    categories,
                    attributes,
                    self.unit.or_else(|| origin.unit.clone()),
                    self.mime_type.or_else(|| origin.mime_type.clone()),
                    self.repeatable.unwrap_or(origin.repeatable),
                    self.occurrence_group.or_else(|| origin.occurrence_group.clone()),
                    self.referenced_entity_type.or_else(|| origin.referenced_entity_type.clone()),
                )
            }
        };
        for (i, category) in categories.iter().enumerate() {
            if categories[..i].iter().any(|c| c.name == category.name) {
                return Err(VartabError::InvalidArgument(format!(
                    "duplicate category '{}' in variable {}",
                    category.name, self.name
                )));
            }
        }
        Ok(Variable {
            name: self.name,
            entity_type: self.entity_type,
            value_type: self.value_type,
            unit,
            mime_type,
            repeatable,
            occurrence_group,
            referenced_entity_type: referenced,
            index: self.index.unwrap_or(0),
            categories,
            attributes,
        })
    }
}

// ------------- ScriptVariableBuilder -------------
/// Wraps a [`VariableBuilder`] with conveniences for derived variables.
#[derive(Debug, Clone)]
pub struct ScriptVariableBuilder {
    builder: VariableBuilder,
}
impl ScriptVariableBuilder {
    pub fn script(mut self, script: impl Into<String>) -> Self {
        self.builder = self.builder.set_attribute(Attribute::text(SCRIPT_ATTRIBUTE, script));
        self
    }
    /// Delegates to the wrapped builder for everything else.
    pub fn with<F: FnOnce(VariableBuilder) -> VariableBuilder>(mut self, f: F) -> Self {
        self.builder = f(self.builder);
        self
    }
    pub fn into_builder(self) -> VariableBuilder {
        self.builder
    }
    pub fn build(self) -> Result<Variable> {
        self.builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Variable {
        Variable::builder("weight", ValueType::Integer, "Participant")
            .unit("kg")
            .add_attribute(Attribute::text("label", "Weight").with_locale("en"))
            .add_attribute(Attribute::text("label", "Poids").with_locale("fr"))
            .add_attribute(Attribute::text("stage", "baseline"))
            .add_category(Category::new("888").missing(true))
            .add_category(Category::new("999").missing(true))
            .build()
            .unwrap()
    }

    #[test]
    fn localized_lookup_first_match_wins() {
        let v = origin();
        assert_eq!(v.localized_attribute("label", Some("fr")).unwrap().value(), &Value::text("Poids"));
        assert_eq!(v.attribute("label").unwrap().locale(), Some("en"));
        assert_eq!(v.attributes_named("label").len(), 2);
        assert!(matches!(v.attribute("nope"), Err(VartabError::NoSuchAttribute { .. })));
    }

    #[test]
    fn same_as_keeps_overrides_and_inherits_the_rest() {
        let derived = Variable::builder("weight_copy", ValueType::Integer, "Participant")
            .add_attribute(Attribute::text("stage", "followup"))
            .same_as(&origin())
            .build()
            .unwrap();
        assert_eq!(derived.attribute_string("stage").unwrap(), "followup");
        assert_eq!(derived.attributes_named("stage").len(), 1);
        assert_eq!(derived.localized_attribute("label", Some("en")).unwrap().value(), &Value::text("Weight"));
        assert_eq!(derived.categories().len(), 2);
        assert_eq!(derived.unit(), Some("kg"));
        assert_eq!(derived.attribute_string(SAME_AS_ATTRIBUTE).unwrap(), "weight");
        assert_eq!(derived.script().unwrap(), "$('weight')");
    }

    #[test]
    fn same_as_replaces_categories_only_when_given() {
        let derived = Variable::builder("w2", ValueType::Integer, "Participant")
            .add_categories(["1", "2", "3"])
            .add_attribute(Attribute::text(SAME_AS_ATTRIBUTE, "somewhere else"))
            .same_as(&origin())
            .build()
            .unwrap();
        let names: Vec<&str> = derived.categories().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["1", "2", "3"]);
        assert_eq!(derived.attribute_string(SAME_AS_ATTRIBUTE).unwrap(), "weight");
    }

    #[test]
    fn duplicate_categories_are_rejected() {
        let result = Variable::builder("x", ValueType::Text, "Participant")
            .add_categories(["a", "a"])
            .build();
        assert!(matches!(result, Err(VartabError::InvalidArgument(_))));
    }

    #[test]
    fn missing_values() {
        let v = origin();
        assert!(v.is_missing_value(&ValueType::Integer.null_value()));
        assert!(v.is_missing_value(&Value::integer(888)));
        assert!(!v.is_missing_value(&Value::integer(80)));
        assert!(matches!(v.category("1"), Err(VartabError::NoSuchCategory { .. })));
    }

    #[test]
    fn script_builder_composes_with_base_builder() {
        let v = Variable::builder("bmi", ValueType::Decimal, "Participant")
            .scripted()
            .script("$('weight') / $('height').pow(2)")
            .with(|b| b.unit("kg/m2"))
            .script("$('weight') / $('height').multiply($('height'))")
            .build()
            .unwrap();
        assert_eq!(v.attributes_named(SCRIPT_ATTRIBUTE).len(), 1);
        assert_eq!(v.script().unwrap(), "$('weight') / $('height').multiply($('height'))");
        assert_eq!(v.unit(), Some("kg/m2"));
        assert!(v.is_derived());
    }

    #[test]
    fn entities_order_by_type_then_identifier() {
        let mut entities = vec![
            VariableEntity::new("Participant", "2"),
            VariableEntity::new("Instrument", "9"),
            VariableEntity::new("Participant", "1"),
        ];
        entities.sort();
        assert_eq!(entities[0].to_string(), "Instrument:9");
        assert_eq!(entities[1].identifier(), "1");
    }
}
