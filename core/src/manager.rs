//! Collection-level access for one schema: fetch, query and create.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ApiError;
use crate::fields::FieldValue;
use crate::http::{HttpMethod, RequestOptions};
use crate::paginator::Pagination;
use crate::resource::{Context, Resource};
use crate::schema::Schema;

pub struct Manager {
    schema: Arc<Schema>,
    context: Context,
    pagination: Pagination,
}

impl Manager {
    pub fn new(context: Context, schema: &str) -> Result<Self, ApiError> {
        Ok(Self {
            schema: context.registry().resolve(schema)?,
            context,
            pagination: Pagination::default(),
        })
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    /// Fetch the resource with identity `id`.
    pub fn get(&self, id: impl fmt::Display) -> Result<Resource, ApiError> {
        let client = self.context.client();
        let endpoint = self.schema.resource_endpoint(&id.to_string());
        let response = client.send(&endpoint, HttpMethod::Get, RequestOptions::new())?;

        let mut resource = self.new_resource();
        match client.unwrap_response(response, self.schema.meta().parse_json)? {
            Some(Value::Object(record)) => resource.populate_from_dict(&record)?,
            Some(other) => {
                return Err(ApiError::Deserialization(format!(
                    "expected a `{}` object, got {other}",
                    self.schema.name()
                )))
            }
            None => {}
        }
        Ok(resource)
    }

    /// Every resource matching `query`, across all pages, in server order.
    pub fn filter(&self, query: &[(&str, &str)]) -> Result<Vec<Resource>, ApiError> {
        let client = self.context.client();
        let query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut cursor = self
            .pagination
            .cursor(client.base_url(), &self.schema.collection_endpoint());

        let mut records = Vec::new();
        while let Some(page) = cursor.next_page() {
            let options = RequestOptions::new().params(page.merge_query(&query));
            let response = client.send(&page.url, HttpMethod::Get, options)?;
            let body = client.unwrap_response(response, self.schema.meta().parse_json)?;
            records.extend(self.records(body.as_ref())?);
            cursor.process_response(body.as_ref());
        }

        let mut resources = Vec::with_capacity(records.len());
        for record in records {
            let attributes = match record {
                Value::Object(attributes) => attributes,
                other => {
                    tracing::warn!(schema = self.schema.name(), record = %other, "skipping non-object record");
                    continue;
                }
            };
            let mut resource = self.new_resource();
            match resource.populate_from_dict(&attributes) {
                Ok(()) => resources.push(resource),
                Err(error) => {
                    tracing::warn!(schema = self.schema.name(), %error, "skipping invalid record")
                }
            }
        }
        Ok(resources)
    }

    pub fn all(&self) -> Result<Vec<Resource>, ApiError> {
        self.filter(&[])
    }

    /// Build a resource from `fields` and POST it to the collection.
    pub fn create<I, K, V>(&self, fields: I) -> Result<Resource, ApiError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        let mut resource = self.new_resource();
        resource.update(fields)?;
        resource.save(true, None)?;
        Ok(resource)
    }

    fn new_resource(&self) -> Resource {
        Resource::new(Arc::clone(&self.schema), self.context.clone())
    }

    fn records(&self, body: Option<&Value>) -> Result<Vec<Value>, ApiError> {
        let Some(body) = body else {
            return Ok(Vec::new());
        };
        let collection = match &self.schema.meta().json_collection_attribute {
            Some(attribute) => body.get(attribute).ok_or_else(|| {
                ApiError::Deserialization(format!("collection response has no `{attribute}` attribute"))
            })?,
            None => body,
        };
        match collection {
            Value::Array(records) => Ok(records.clone()),
            Value::Null => Ok(Vec::new()),
            other => Err(ApiError::Deserialization(format!(
                "expected a list of records, got {other}"
            ))),
        }
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("schema", &self.schema.name())
            .field("pagination", &self.pagination)
            .finish()
    }
}
