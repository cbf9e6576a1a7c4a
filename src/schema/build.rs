//! Turns a parsed [`SchemaDocument`] into an executable schema.
//!
//! Every type first gets a [`TypeConfig`] from the endpoint (registered field
//! resolvers, then the endpoint's decorator). Object fields resolve through
//! the configured resolver when there is one and otherwise read the
//! same-named property of the parent JSON value. Values of interface and
//! union types are tagged with a concrete type through the type's
//! `resolve_type` hook, falling back to their `__typename` property.

use crate::endpoint::{
    EndpointDescriptor, FieldCall, FieldResolver, INTERNAL_ERROR_MESSAGE, RequestContext,
    ResolverError, TypeConfig, TypeResolver,
};
use crate::report::CauseRecord;
use crate::schema::document::{
    FieldNode, InputValueNode, SchemaDocument, TypeKindNode, TypeNode,
};
use async_graphql::dynamic::{
    Enum, EnumItem, Field, FieldFuture, FieldValue, InputObject, InputValue, Interface,
    InterfaceField, Object, ResolverContext, Scalar, Schema, SchemaError, TypeRef, Union,
};
use async_graphql::{
    Error as GraphError, Name, PathSegment, QueryPathSegment, ServerError, Value as GraphValue,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];
const RESOLVE_ORIGIN: &str = "FieldPlan::resolve";

/// Root value of the request being executed, stored as request data.
pub(crate) struct RootValue(pub Value);

/// Internal resolver failure attached as the source of a field error.
#[derive(Debug)]
pub struct InternalFailure(pub CauseRecord);

impl fmt::Display for InternalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

enum OutputShape {
    Leaf,
    Enum,
    Object,
    Abstract(Option<TypeResolver>),
}

struct FieldPlan {
    parent_type: String,
    field_name: String,
    resolver: Option<FieldResolver>,
    return_type: TypeNode,
    shapes: Arc<HashMap<String, OutputShape>>,
}

/// Assemble the executable schema for `endpoint` from `document`.
pub fn build_schema(
    document: &SchemaDocument,
    endpoint: &EndpointDescriptor,
) -> Result<Schema, SchemaError> {
    let configs: HashMap<&str, TypeConfig> = document
        .types
        .iter()
        .map(|ty| {
            let config = endpoint.type_config(&ty.name, ty.kind.tag(), ty.description.clone());
            (ty.name.as_str(), config)
        })
        .collect();

    let mut shapes: HashMap<String, OutputShape> = BUILTIN_SCALARS
        .iter()
        .map(|name| (name.to_string(), OutputShape::Leaf))
        .collect();
    for ty in &document.types {
        let shape = match &ty.kind {
            TypeKindNode::Scalar | TypeKindNode::InputObject { .. } => OutputShape::Leaf,
            TypeKindNode::Enum { .. } => OutputShape::Enum,
            TypeKindNode::Object { .. } => OutputShape::Object,
            TypeKindNode::Interface { .. } | TypeKindNode::Union { .. } => OutputShape::Abstract(
                configs.get(ty.name.as_str()).and_then(|c| c.resolve_type.clone()),
            ),
        };
        shapes.insert(ty.name.clone(), shape);
    }
    let shapes = Arc::new(shapes);

    let mut builder = Schema::build(&document.query, document.mutation.as_deref(), None);
    for ty in &document.types {
        let Some(config) = configs.get(ty.name.as_str()) else {
            continue;
        };
        let description = config.description.clone();
        builder = match &ty.kind {
            TypeKindNode::Scalar => {
                let mut scalar = Scalar::new(&ty.name);
                if let Some(description) = description {
                    scalar = scalar.description(description);
                }
                builder.register(scalar)
            }
            TypeKindNode::Enum { values } => {
                let mut enumeration = Enum::new(&ty.name);
                for value in values {
                    enumeration = enumeration.item(EnumItem::new(value));
                }
                if let Some(description) = description {
                    enumeration = enumeration.description(description);
                }
                builder.register(enumeration)
            }
            TypeKindNode::InputObject { fields } => {
                let mut input = InputObject::new(&ty.name);
                for field in fields {
                    input = input.field(input_value(field));
                }
                if let Some(description) = description {
                    input = input.description(description);
                }
                builder.register(input)
            }
            TypeKindNode::Union { members } => {
                let mut union = Union::new(&ty.name);
                for member in members {
                    union = union.possible_type(member);
                }
                if let Some(description) = description {
                    union = union.description(description);
                }
                builder.register(union)
            }
            TypeKindNode::Interface { implements, fields } => {
                let mut interface = Interface::new(&ty.name);
                for parent in implements {
                    interface = interface.implement(parent);
                }
                for field in fields {
                    let mut interface_field =
                        InterfaceField::new(&field.name, type_ref(&field.ty));
                    for argument in &field.arguments {
                        interface_field = interface_field.argument(input_value(argument));
                    }
                    if let Some(description) = &field.description {
                        interface_field = interface_field.description(description);
                    }
                    interface = interface.field(interface_field);
                }
                if let Some(description) = description {
                    interface = interface.description(description);
                }
                builder.register(interface)
            }
            TypeKindNode::Object { implements, fields } => {
                let mut object = Object::new(&ty.name);
                for interface in implements {
                    object = object.implement(interface);
                }
                for field in fields {
                    let plan = FieldPlan {
                        parent_type: ty.name.clone(),
                        field_name: field.name.clone(),
                        resolver: config.field_resolvers.get(&field.name).cloned(),
                        return_type: field.ty.clone(),
                        shapes: Arc::clone(&shapes),
                    };
                    object = object.field(object_field(field, plan));
                }
                if let Some(description) = description {
                    object = object.description(description);
                }
                builder.register(object)
            }
        };
    }

    builder.finish()
}

fn object_field(field: &FieldNode, plan: FieldPlan) -> Field {
    let plan = Arc::new(plan);
    let mut object_field = Field::new(&field.name, type_ref(&field.ty), move |ctx| {
        let result = match plan.resolve(&ctx) {
            Err(error) if !matches!(plan.return_type, TypeNode::NonNull(_)) => {
                ctx.ctx.add_error(field_error(&ctx, error));
                Ok(None)
            }
            other => other,
        };
        FieldFuture::new(async move { result })
    });
    for argument in &field.arguments {
        object_field = object_field.argument(input_value(argument));
    }
    if let Some(description) = &field.description {
        object_field = object_field.description(description);
    }
    object_field
}

/// Attach the field's position and response path to a resolution failure.
fn field_error(ctx: &ResolverContext<'_>, error: GraphError) -> ServerError {
    let mut server_error = error.into_server_error(ctx.ctx.item.pos);
    let mut node = ctx.ctx.path_node.as_ref();
    while let Some(current) = node {
        server_error.path.push(match current.segment {
            QueryPathSegment::Name(name) => PathSegment::Field(name.to_string()),
            QueryPathSegment::Index(index) => PathSegment::Index(index),
        });
        node = current.parent;
    }
    server_error.path.reverse();
    server_error
}

fn input_value(node: &InputValueNode) -> InputValue {
    let mut value = InputValue::new(&node.name, type_ref(&node.ty));
    if let Some(default) = node
        .default_value
        .clone()
        .and_then(|default| GraphValue::from_json(default).ok())
    {
        value = value.default_value(default);
    }
    if let Some(description) = &node.description {
        value = value.description(description);
    }
    value
}

fn type_ref(node: &TypeNode) -> TypeRef {
    match node {
        TypeNode::Named(name) => TypeRef::Named(name.clone().into()),
        TypeNode::List(inner) => TypeRef::List(Box::new(type_ref(inner))),
        TypeNode::NonNull(inner) => TypeRef::NonNull(Box::new(type_ref(inner))),
    }
}

impl FieldPlan {
    fn resolve<'a>(&self, ctx: &ResolverContext<'a>) -> Result<Option<FieldValue<'a>>, GraphError> {
        let request = ctx.ctx.data::<RequestContext>()?;
        // Top-level fields have no parent object; they read the request's root value.
        let parent = match ctx.parent_value.try_downcast_ref::<Value>() {
            Ok(parent) => parent,
            Err(_) => &ctx.ctx.data::<RootValue>()?.0,
        };

        let value = match &self.resolver {
            Some(resolver) => {
                let mut arguments = Map::new();
                for (name, value) in ctx.args.as_index_map() {
                    let json = value
                        .clone()
                        .into_json()
                        .map_err(|err| GraphError::new(err.to_string()))?;
                    arguments.insert(name.to_string(), json);
                }
                resolver(FieldCall {
                    parent,
                    arguments,
                    context: request,
                })
                .map_err(resolver_failure)?
            }
            None => parent.get(&self.field_name).cloned().unwrap_or(Value::Null),
        };

        self.output(value, &self.return_type, request)
    }

    fn output<'a>(
        &self,
        value: Value,
        ty: &TypeNode,
        request: &RequestContext,
    ) -> Result<Option<FieldValue<'a>>, GraphError> {
        if value.is_null() {
            return Ok(None);
        }
        match ty {
            TypeNode::NonNull(inner) => self.output(value, inner, request),
            TypeNode::List(inner) => {
                let Value::Array(items) = value else {
                    return Err(GraphError::new(format!(
                        "Expected a list for field {}.{}",
                        self.parent_type, self.field_name
                    )));
                };
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.output(item, inner, request)?.unwrap_or(FieldValue::NULL));
                }
                Ok(Some(FieldValue::list(values)))
            }
            TypeNode::Named(name) => match self.shapes.get(name) {
                Some(OutputShape::Object) => Ok(Some(FieldValue::owned_any(value))),
                Some(OutputShape::Enum) => match value {
                    Value::String(item) => {
                        Ok(Some(FieldValue::value(GraphValue::Enum(Name::new(item)))))
                    }
                    other => leaf(other),
                },
                Some(OutputShape::Abstract(resolve_type)) => {
                    let concrete = resolve_type
                        .as_ref()
                        .and_then(|resolve| resolve(&value, request))
                        .or_else(|| {
                            value
                                .get("__typename")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                        });
                    match concrete {
                        Some(concrete) => Ok(Some(FieldValue::owned_any(value).with_type(concrete))),
                        None => Err(GraphError::new(format!(
                            "Abstract type {name} must resolve to an Object type at runtime for field {}.{}",
                            self.parent_type, self.field_name
                        ))),
                    }
                }
                Some(OutputShape::Leaf) | None => leaf(value),
            },
        }
    }
}

fn leaf<'a>(value: Value) -> Result<Option<FieldValue<'a>>, GraphError> {
    let value = GraphValue::from_json(value).map_err(|err| GraphError::new(err.to_string()))?;
    Ok(Some(FieldValue::value(value)))
}

fn resolver_failure(error: ResolverError) -> GraphError {
    match error {
        ResolverError::User(message) => GraphError::new(message),
        ResolverError::Internal(cause) => {
            let mut error =
                GraphError::new_with_source(InternalFailure(CauseRecord::from_error(RESOLVE_ORIGIN, &cause)));
            error.message = INTERNAL_ERROR_MESSAGE.to_string();
            error
        }
    }
}
