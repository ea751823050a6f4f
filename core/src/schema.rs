//! Resource schemas and the registry that resolves them by name.
//!
//! A schema is built once, frozen, and shared behind an `Arc`. Nested
//! resource fields only store a schema name; the [`Registry`] maps that name
//! back to the schema when the field is first coerced.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::ApiError;
use crate::fields::Field;

/// Per-schema configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    /// Field holding the server-side identity.
    pub id_field: String,
    /// Field used for the display form of a resource.
    pub name_field: String,
    /// Relative collection path, `/`-terminated. Derived from the name if unset.
    pub collection_endpoint: Option<String>,
    /// Attribute of a collection response that holds the records, or `None`
    /// when the body is the record list itself.
    pub json_collection_attribute: Option<String>,
    /// Send `save` payloads as JSON (`true`) or form data (`false`).
    pub json_data: bool,
    /// Parse response bodies as JSON.
    pub parse_json: bool,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            name_field: "id".to_string(),
            collection_endpoint: None,
            json_collection_attribute: Some("data".to_string()),
            json_data: true,
            parse_json: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    fields: Vec<Field>,
    meta: Meta,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
            inherited: 0,
            meta: Meta::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// `Meta.collection_endpoint`, or the lower-cased name plus `s/`.
    pub fn collection_endpoint(&self) -> String {
        self.meta
            .collection_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}s/", self.name.to_lowercase()))
    }

    /// Collection endpoint joined with `id`, the way a relative URL reference
    /// resolves: everything after the last `/` is replaced.
    ///
    /// `id` is percent-encoded so that it always stays one path segment.
    pub fn resource_endpoint(&self, id: &str) -> String {
        let id = encode_segment(id);
        let collection = self.collection_endpoint();
        match collection.rfind('/') {
            Some(slash) => format!("{}{id}", &collection[..=slash]),
            None => id,
        }
    }
}

fn encode_segment(segment: &str) -> String {
    // form encoding writes a space as `+`, which a path reads literally
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

pub struct SchemaBuilder {
    name: String,
    fields: Vec<Field>,
    // leading entries of `fields` copied from a parent
    inherited: usize,
    meta: Meta,
}

impl SchemaBuilder {
    /// Start from `parent`'s fields and meta.
    ///
    /// A field declared on either side of this call replaces the inherited
    /// one in place. Meta is taken from `parent` wholesale, so meta setters
    /// only override it when called afterwards.
    pub fn extends(mut self, parent: &Schema) -> Self {
        let declared = std::mem::replace(&mut self.fields, parent.fields.clone());
        self.inherited = self.fields.len();
        self.meta = parent.meta.clone();
        declared.into_iter().fold(self, Self::field)
    }

    pub fn field(mut self, field: Field) -> Self {
        match self.fields.iter().position(|f| f.name() == field.name()) {
            Some(i) if i < self.inherited => self.fields[i] = field,
            _ => self.fields.push(field),
        }
        self
    }

    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.meta.id_field = name.into();
        self
    }

    pub fn name_field(mut self, name: impl Into<String>) -> Self {
        self.meta.name_field = name.into();
        self
    }

    pub fn collection_endpoint(mut self, path: impl Into<String>) -> Self {
        self.meta.collection_endpoint = Some(path.into());
        self
    }

    /// `None` means the collection body is the record list itself.
    pub fn json_collection_attribute(mut self, attribute: Option<&str>) -> Self {
        self.meta.json_collection_attribute = attribute.map(str::to_string);
        self
    }

    pub fn json_data(mut self, json_data: bool) -> Self {
        self.meta.json_data = json_data;
        self
    }

    pub fn parse_json(mut self, parse_json: bool) -> Self {
        self.meta.parse_json = parse_json;
        self
    }

    pub fn build(self) -> Result<Schema, ApiError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name()) {
                return Err(ApiError::Config(format!(
                    "schema `{}` declares field `{}` twice",
                    self.name,
                    field.name()
                )));
            }
        }
        Ok(Schema {
            name: self.name,
            fields: self.fields,
            meta: self.meta,
        })
    }
}

/// Schemas keyed by name, shared by every resource of a [`Context`](crate::resource::Context).
#[derive(Debug, Default)]
pub struct Registry {
    schemas: HashMap<String, Arc<Schema>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Schema>, ApiError> {
        self.schemas
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::UnknownSchema(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    schemas: HashMap<String, Arc<Schema>>,
}

impl RegistryBuilder {
    /// Add `schema`, replacing any schema registered under the same name.
    pub fn register(mut self, schema: Schema) -> Self {
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
        self
    }

    pub fn build(self) -> Arc<Registry> {
        Arc::new(Registry {
            schemas: self.schemas,
        })
    }
}
