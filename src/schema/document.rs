//! Serializable form of a parsed schema document.
//!
//! The parser's AST is converted into these plain structs so the parsed
//! document can be written to and read back from the document cache without
//! re-running the parser.

use async_graphql_parser::types::{
    BaseType, FieldDefinition, InputValueDefinition, ServiceDocument, Type, TypeKind,
    TypeSystemDefinition,
};
use async_graphql_parser::{Positioned, parse_schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parsed schema document: type definitions plus root operation names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation: Option<String>,
    pub types: Vec<TypeDefinitionNode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinitionNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: TypeKindNode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeKindNode {
    Scalar,
    Object {
        #[serde(default)]
        implements: Vec<String>,
        fields: Vec<FieldNode>,
    },
    Interface {
        #[serde(default)]
        implements: Vec<String>,
        fields: Vec<FieldNode>,
    },
    Union {
        members: Vec<String>,
    },
    Enum {
        values: Vec<String>,
    },
    InputObject {
        fields: Vec<InputValueNode>,
    },
}

/// Kind tag without the payload, handed to type-config decorators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKindTag {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<InputValueNode>,
    pub ty: TypeNode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputValueNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub ty: TypeNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// Type reference with explicit nullability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeNode {
    Named(String),
    List(Box<TypeNode>),
    NonNull(Box<TypeNode>),
}

impl TypeNode {
    /// Innermost named type.
    pub fn base_name(&self) -> &str {
        match self {
            TypeNode::Named(name) => name,
            TypeNode::List(inner) | TypeNode::NonNull(inner) => inner.base_name(),
        }
    }
}

impl TypeKindNode {
    pub fn tag(&self) -> TypeKindTag {
        match self {
            TypeKindNode::Scalar => TypeKindTag::Scalar,
            TypeKindNode::Object { .. } => TypeKindTag::Object,
            TypeKindNode::Interface { .. } => TypeKindTag::Interface,
            TypeKindNode::Union { .. } => TypeKindTag::Union,
            TypeKindNode::Enum { .. } => TypeKindTag::Enum,
            TypeKindNode::InputObject { .. } => TypeKindTag::InputObject,
        }
    }
}

impl SchemaDocument {
    /// Parse schema definition language text.
    pub fn parse(source: &str) -> Result<Self, async_graphql_parser::Error> {
        parse_schema(source).map(Self::from_service_document)
    }

    /// Encode for the document cache.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode a document previously stored with [`SchemaDocument::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinitionNode> {
        self.types.iter().find(|ty| ty.name == name)
    }

    fn from_service_document(document: ServiceDocument) -> Self {
        let mut query = None;
        let mut mutation = None;
        let mut types: Vec<TypeDefinitionNode> = Vec::new();

        for definition in document.definitions {
            match definition {
                TypeSystemDefinition::Schema(schema) => {
                    let schema = schema.node;
                    if let Some(name) = schema.query {
                        query = Some(name.node.to_string());
                    }
                    if let Some(name) = schema.mutation {
                        mutation = Some(name.node.to_string());
                    }
                }
                TypeSystemDefinition::Type(definition) => {
                    let definition = definition.node;
                    let node = TypeDefinitionNode {
                        name: definition.name.node.to_string(),
                        description: definition.description.map(|d| d.node),
                        kind: convert_kind(definition.kind),
                    };
                    if definition.extend {
                        extend_type(&mut types, node);
                    } else {
                        types.push(node);
                    }
                }
                TypeSystemDefinition::Directive(_) => {}
            }
        }

        if mutation.is_none() && types.iter().any(|ty| ty.name == "Mutation") {
            mutation = Some("Mutation".to_string());
        }

        Self {
            query: query.unwrap_or_else(|| "Query".to_string()),
            mutation,
            types,
        }
    }
}

fn extend_type(types: &mut Vec<TypeDefinitionNode>, extension: TypeDefinitionNode) {
    let Some(existing) = types.iter_mut().find(|ty| ty.name == extension.name) else {
        types.push(extension);
        return;
    };
    match (&mut existing.kind, extension.kind) {
        (
            TypeKindNode::Object { implements, fields },
            TypeKindNode::Object {
                implements: more_implements,
                fields: more_fields,
            },
        )
        | (
            TypeKindNode::Interface { implements, fields },
            TypeKindNode::Interface {
                implements: more_implements,
                fields: more_fields,
            },
        ) => {
            implements.extend(more_implements);
            fields.extend(more_fields);
        }
        (TypeKindNode::Union { members }, TypeKindNode::Union { members: more }) => {
            members.extend(more)
        }
        (TypeKindNode::Enum { values }, TypeKindNode::Enum { values: more }) => values.extend(more),
        (TypeKindNode::InputObject { fields }, TypeKindNode::InputObject { fields: more }) => {
            fields.extend(more)
        }
        _ => {}
    }
}

fn convert_kind(kind: TypeKind) -> TypeKindNode {
    match kind {
        TypeKind::Scalar => TypeKindNode::Scalar,
        TypeKind::Object(object) => TypeKindNode::Object {
            implements: names(object.implements),
            fields: object.fields.into_iter().map(convert_field).collect(),
        },
        TypeKind::Interface(interface) => TypeKindNode::Interface {
            implements: names(interface.implements),
            fields: interface.fields.into_iter().map(convert_field).collect(),
        },
        TypeKind::Union(union) => TypeKindNode::Union {
            members: names(union.members),
        },
        TypeKind::Enum(enumeration) => TypeKindNode::Enum {
            values: enumeration
                .values
                .into_iter()
                .map(|value| value.node.value.node.to_string())
                .collect(),
        },
        TypeKind::InputObject(input) => TypeKindNode::InputObject {
            fields: input.fields.into_iter().map(convert_input_value).collect(),
        },
    }
}

fn names<T: std::fmt::Display>(items: Vec<Positioned<T>>) -> Vec<String> {
    items.into_iter().map(|name| name.node.to_string()).collect()
}

fn convert_field(field: Positioned<FieldDefinition>) -> FieldNode {
    let field = field.node;
    FieldNode {
        name: field.name.node.to_string(),
        description: field.description.map(|d| d.node),
        arguments: field.arguments.into_iter().map(convert_input_value).collect(),
        ty: convert_type(field.ty.node),
    }
}

fn convert_input_value(value: Positioned<InputValueDefinition>) -> InputValueNode {
    let value = value.node;
    InputValueNode {
        name: value.name.node.to_string(),
        description: value.description.map(|d| d.node),
        ty: convert_type(value.ty.node),
        default_value: value
            .default_value
            .and_then(|default| default.node.into_json().ok()),
    }
}

fn convert_type(ty: Type) -> TypeNode {
    let inner = match ty.base {
        BaseType::Named(name) => TypeNode::Named(name.to_string()),
        BaseType::List(inner) => TypeNode::List(Box::new(convert_type(*inner))),
    };
    if ty.nullable {
        inner
    } else {
        TypeNode::NonNull(Box::new(inner))
    }
}
