//! Reference transformers.

use async_trait::async_trait;
use serde::Deserialize;
use snafu::prelude::*;

use crate::component::{
    ComponentConfig, ComponentDescriptor, Lifecycle, TransformOutput, Transformer,
};
use crate::error::{ComponentError, ConfigurationSnafu};
use crate::row::{ColumnId, Row};
use crate::value::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConcatProperties {
    #[serde(default)]
    separator: String,
}

/// Joins the non-null input values into one string column.
#[derive(Debug, Default)]
pub struct ConcatTransformer {
    inputs: Vec<ColumnId>,
    outputs: usize,
    separator: String,
}

impl ConcatTransformer {
    pub const NAME: &'static str = "concat";

    pub fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::transformer(Self::NAME)
            .property("separator", false)
            .with_validate()
    }

    fn concat(&self, row: &Row) -> Value {
        let parts: Vec<String> = self
            .inputs
            .iter()
            .map(|c| row.get(*c))
            .filter(|v| !v.is_null())
            .map(ToString::to_string)
            .collect();
        if parts.is_empty() {
            Value::Null
        } else {
            Value::Str(parts.join(&self.separator))
        }
    }
}

impl Lifecycle for ConcatTransformer {
    fn configure(&mut self, config: &ComponentConfig) -> Result<(), ComponentError> {
        let properties: ConcatProperties = config.properties()?;
        self.inputs = config.inputs.iter().map(|c| c.id).collect();
        self.outputs = config.outputs.len();
        self.separator = properties.separator;
        Ok(())
    }

    fn validate(&self) -> Result<(), ComponentError> {
        ensure!(
            self.outputs == 1,
            ConfigurationSnafu {
                message: format!("concat produces one column, {} declared", self.outputs),
            }
        );
        Ok(())
    }
}

#[async_trait]
impl Transformer for ConcatTransformer {
    async fn transform(&mut self, row: &Row) -> Result<TransformOutput, ComponentError> {
        Ok(TransformOutput::Values(vec![self.concat(row)]))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TokenizerProperties {
    #[serde(default = "default_delimiters")]
    delimiters: String,
}

fn default_delimiters() -> String {
    " ".to_string()
}

/// Splits the input into one row per non-empty token.
///
/// Rows without a value produce no tokens, so downstream components do not
/// see them at all.
#[derive(Debug, Default)]
pub struct TokenizerTransformer {
    input: ColumnId,
    outputs: usize,
    delimiters: Vec<char>,
}

impl TokenizerTransformer {
    pub const NAME: &'static str = "tokenizer";

    pub fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::transformer(Self::NAME)
            .inputs(1, Some(1))
            .property("delimiters", false)
            .with_validate()
    }
}

impl Lifecycle for TokenizerTransformer {
    fn configure(&mut self, config: &ComponentConfig) -> Result<(), ComponentError> {
        let properties: TokenizerProperties = config.properties()?;
        self.input = config.inputs.first().map(|c| c.id).unwrap_or_default();
        self.outputs = config.outputs.len();
        self.delimiters = properties.delimiters.chars().collect();
        Ok(())
    }

    fn validate(&self) -> Result<(), ComponentError> {
        ensure!(
            !self.delimiters.is_empty(),
            ConfigurationSnafu {
                message: "at least one delimiter is required",
            }
        );
        ensure!(
            self.outputs == 1,
            ConfigurationSnafu {
                message: format!("tokenizer produces one column, {} declared", self.outputs),
            }
        );
        Ok(())
    }
}

#[async_trait]
impl Transformer for TokenizerTransformer {
    async fn transform(&mut self, row: &Row) -> Result<TransformOutput, ComponentError> {
        let value = row.get(self.input);
        if value.is_null() {
            return Ok(TransformOutput::Rows(Vec::new()));
        }

        let text = value.to_string();
        let tokens = text
            .split(self.delimiters.as_slice())
            .filter(|t| !t.is_empty())
            .map(|t| vec![Value::from(t)])
            .collect();
        Ok(TransformOutput::Rows(tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{Column, ColumnOrigin};
    use sifter_core::ComponentKey;

    fn column(id: ColumnId) -> Column {
        Column {
            id,
            name: format!("c{id}"),
            origin: ColumnOrigin::Source,
        }
    }

    fn config(inputs: usize, properties: &str) -> ComponentConfig {
        ComponentConfig {
            key: ComponentKey::new("t"),
            inputs: (0..inputs).map(column).collect(),
            outputs: vec![column(inputs)],
            properties: serde_yaml::from_str(properties).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_concat_skips_nulls() {
        let mut concat = ConcatTransformer::default();
        concat.configure(&config(3, "separator: ', '")).unwrap();
        concat.validate().unwrap();

        let row = Row::new(1, vec![Value::from("a"), Value::Null, Value::Int(3), Value::Null]);
        assert_eq!(
            concat.transform(&row).await.unwrap(),
            TransformOutput::Values(vec![Value::from("a, 3")])
        );

        let empty = Row::new(2, vec![Value::Null, Value::Null, Value::Null, Value::Null]);
        assert_eq!(
            concat.transform(&empty).await.unwrap(),
            TransformOutput::Values(vec![Value::Null])
        );
    }

    #[tokio::test]
    async fn test_tokenizer() {
        let mut tokenizer = TokenizerTransformer::default();
        tokenizer.configure(&config(1, "delimiters: ' ,'")).unwrap();
        tokenizer.validate().unwrap();

        let row = Row::new(1, vec![Value::from("a, b  c"), Value::Null]);
        assert_eq!(
            tokenizer.transform(&row).await.unwrap(),
            TransformOutput::Rows(vec![
                vec![Value::from("a")],
                vec![Value::from("b")],
                vec![Value::from("c")],
            ])
        );

        let null = Row::new(2, vec![Value::Null, Value::Null]);
        assert_eq!(
            tokenizer.transform(&null).await.unwrap(),
            TransformOutput::Rows(Vec::new())
        );
    }

    #[test]
    fn test_tokenizer_requires_delimiters() {
        let mut tokenizer = TokenizerTransformer::default();
        tokenizer.configure(&config(1, "delimiters: ''")).unwrap();
        assert!(tokenizer.validate().is_err());
    }
}
