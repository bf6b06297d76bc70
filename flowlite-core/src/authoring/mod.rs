//! YAML authoring for process definitions.
//!
//! `yaml` parses into the `dto` shape, `dto_to_model` converts it into a
//! `ProcessDefinition`, and `validate` checks graph rules (V1..V11) before the
//! definition is indexed.

pub mod dto;
pub mod dto_to_model;
pub mod validate;
pub mod yaml;

pub use dto::ProcessDefinitionDto;
pub use dto_to_model::dto_to_definition;
pub use validate::{validate_graph, ValidationError};
pub use yaml::{definition_from_yaml, parse_definition_yaml};
