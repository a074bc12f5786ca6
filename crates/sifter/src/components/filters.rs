//! Reference filters.

use serde::Deserialize;
use snafu::prelude::*;

use crate::component::{ComponentConfig, ComponentDescriptor, Filter, Lifecycle};
use crate::error::{ComponentError, ConfigurationSnafu};
use crate::job::{Category, ValidationCategory};
use crate::row::{ColumnId, Row};
use crate::value::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NotNullProperties {
    #[serde(default)]
    consider_empty_string_as_null: bool,
}

/// VALID when every input column has a value.
#[derive(Debug, Default)]
pub struct NotNullFilter {
    inputs: Vec<ColumnId>,
    empty_is_null: bool,
}

impl NotNullFilter {
    pub const NAME: &'static str = "not-null";

    pub fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::filter(Self::NAME, ValidationCategory::all())
            .property("consider_empty_string_as_null", false)
    }

    fn is_null(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Str(s) => self.empty_is_null && s.is_empty(),
            _ => false,
        }
    }
}

impl Lifecycle for NotNullFilter {
    fn configure(&mut self, config: &ComponentConfig) -> Result<(), ComponentError> {
        let properties: NotNullProperties = config.properties()?;
        self.inputs = config.inputs.iter().map(|c| c.id).collect();
        self.empty_is_null = properties.consider_empty_string_as_null;
        Ok(())
    }
}

impl Filter for NotNullFilter {
    fn categorize(&mut self, row: &Row) -> Result<Option<Category>, ComponentError> {
        let valid = self.inputs.iter().all(|c| !self.is_null(row.get(*c)));
        Ok(Some(ValidationCategory::of(valid).into()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EqualsProperties {
    values: Vec<String>,
}

/// VALID when the input's text form is one of the configured values.
/// Nulls are INVALID.
#[derive(Debug, Default)]
pub struct EqualsFilter {
    input: ColumnId,
    values: Vec<String>,
}

impl EqualsFilter {
    pub const NAME: &'static str = "equals";

    pub fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::filter(Self::NAME, ValidationCategory::all())
            .inputs(1, Some(1))
            .property("values", true)
            .with_validate()
    }
}

impl Lifecycle for EqualsFilter {
    fn configure(&mut self, config: &ComponentConfig) -> Result<(), ComponentError> {
        let properties: EqualsProperties = config.properties()?;
        self.input = config.inputs.first().map(|c| c.id).unwrap_or_default();
        self.values = properties.values;
        Ok(())
    }

    fn validate(&self) -> Result<(), ComponentError> {
        ensure!(
            !self.values.is_empty(),
            ConfigurationSnafu {
                message: "at least one value to compare with is required",
            }
        );
        Ok(())
    }
}

impl Filter for EqualsFilter {
    fn categorize(&mut self, row: &Row) -> Result<Option<Category>, ComponentError> {
        let value = row.get(self.input);
        let valid = !value.is_null() && {
            let text = value.to_string();
            self.values.iter().any(|v| *v == text)
        };
        Ok(Some(ValidationCategory::of(valid).into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{Column, ColumnOrigin};
    use sifter_core::ComponentKey;

    fn config(inputs: usize, properties: &str) -> ComponentConfig {
        ComponentConfig {
            key: ComponentKey::new("f"),
            inputs: (0..inputs)
                .map(|id| Column {
                    id,
                    name: format!("c{id}"),
                    origin: ColumnOrigin::Source,
                })
                .collect(),
            outputs: Vec::new(),
            properties: serde_yaml::from_str(properties).unwrap(),
        }
    }

    #[test]
    fn test_not_null() {
        let mut filter = NotNullFilter::default();
        filter.configure(&config(2, "{}")).unwrap();

        let valid = Row::new(1, vec![Value::from("a"), Value::from("")]);
        let invalid = Row::new(2, vec![Value::from("a"), Value::Null]);
        assert_eq!(filter.categorize(&valid).unwrap(), Some(Category::VALID));
        assert_eq!(filter.categorize(&invalid).unwrap(), Some(Category::INVALID));
    }

    #[test]
    fn test_not_null_empty_strings() {
        let mut filter = NotNullFilter::default();
        filter
            .configure(&config(1, "consider_empty_string_as_null: true"))
            .unwrap();
        let row = Row::new(1, vec![Value::from("")]);
        assert_eq!(filter.categorize(&row).unwrap(), Some(Category::INVALID));
    }

    #[test]
    fn test_equals() {
        let mut filter = EqualsFilter::default();
        filter.configure(&config(1, "values: ['DK', '42']")).unwrap();
        filter.validate().unwrap();

        for (value, expected) in [
            (Value::from("DK"), Category::VALID),
            (Value::Int(42), Category::VALID),
            (Value::from("dk"), Category::INVALID),
            (Value::Null, Category::INVALID),
        ] {
            let row = Row::new(1, vec![value]);
            assert_eq!(filter.categorize(&row).unwrap(), Some(expected));
        }
    }

    #[test]
    fn test_equals_requires_values() {
        let mut filter = EqualsFilter::default();
        filter.configure(&config(1, "values: []")).unwrap();
        assert!(filter.validate().is_err());
    }
}
