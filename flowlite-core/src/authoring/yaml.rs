use super::dto::ProcessDefinitionDto;
use super::dto_to_model::dto_to_definition;
use crate::error::Result;
use crate::model::ProcessDefinition;

/// Parse a YAML string into a ProcessDefinitionDto.
///
/// Validation is NOT performed here. Use `definition_from_yaml()` to parse,
/// validate and index in one step.
pub fn parse_definition_yaml(yaml_str: &str) -> Result<ProcessDefinitionDto> {
    let dto: ProcessDefinitionDto = serde_yaml::from_str(yaml_str)?;
    Ok(dto)
}

pub fn definition_from_yaml(yaml_str: &str) -> Result<ProcessDefinition> {
    dto_to_definition(&parse_definition_yaml(yaml_str)?)
}
