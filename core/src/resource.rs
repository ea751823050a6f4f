//! Schema-bound resource instances and their CRUD verbs.
//!
//! # Design
//! A [`Resource`] owns one value slot per schema field, in declaration order.
//! Every write goes through the field's coercion, so the slots only ever
//! hold values of the declared kind. The [`Context`] is the shared,
//! non-owning part: the client that sends requests and the registry that
//! resolves nested schemas. Cloning it only bumps two reference counts.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::auth::ApiClient;
use crate::error::ApiError;
use crate::fields::FieldValue;
use crate::http::{HttpMethod, HttpResponse, RequestOptions};
use crate::manager::Manager;
use crate::schema::{Registry, Schema};

/// Client and schema registry shared by resources and managers.
#[derive(Clone)]
pub struct Context {
    client: Arc<dyn ApiClient>,
    registry: Arc<Registry>,
}

impl Context {
    pub fn new(client: Arc<dyn ApiClient>, registry: Arc<Registry>) -> Self {
        Self { client, registry }
    }

    pub fn client(&self) -> &Arc<dyn ApiClient> {
        &self.client
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Empty resource of the named schema.
    pub fn resource(&self, schema: &str) -> Result<Resource, ApiError> {
        Ok(Resource::new(self.registry.resolve(schema)?, self.clone()))
    }

    pub fn manager(&self, schema: &str) -> Result<Manager, ApiError> {
        Manager::new(self.clone(), schema)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("base_url", &self.client.base_url())
            .field("schemas", &self.registry.len())
            .finish()
    }
}

/// One remote entity, typed by its schema.
#[derive(Clone)]
pub struct Resource {
    schema: Arc<Schema>,
    context: Context,
    values: Vec<FieldValue>,
}

impl Resource {
    pub fn new(schema: Arc<Schema>, context: Context) -> Self {
        let values = vec![FieldValue::Null; schema.fields().len()];
        Self {
            schema,
            context,
            values,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Current value of a declared field; `None` if the schema has no such field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.schema.position(name).map(|i| &self.values[i])
    }

    /// Coerce `value` into the field's kind and store it.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<(), ApiError> {
        let index = self
            .schema
            .position(name)
            .ok_or_else(|| ApiError::UnknownField {
                schema: self.schema.name().to_string(),
                field: name.to_string(),
            })?;
        let coerced = self.schema.fields()[index].coerce(value.into(), &self.context)?;
        self.values[index] = coerced;
        Ok(())
    }

    /// Set every pair whose name is a declared field; other names are ignored.
    ///
    /// All-or-nothing: if any value fails coercion, no field is changed.
    pub fn update<I, K, V>(&mut self, values: I) -> Result<(), ApiError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        let mut staged = Vec::new();
        for (name, value) in values {
            if let Some(index) = self.schema.position(name.as_ref()) {
                let coerced = self.schema.fields()[index].coerce(value.into(), &self.context)?;
                staged.push((index, coerced));
            }
        }
        for (index, value) in staged {
            self.values[index] = value;
        }
        Ok(())
    }

    /// Populate from a JSON record. Keys the schema does not declare are ignored.
    pub fn populate_from_dict(&mut self, attributes: &Map<String, Value>) -> Result<(), ApiError> {
        self.update(
            attributes
                .iter()
                .map(|(name, value)| (name, FieldValue::from_json(value.clone()))),
        )
    }

    /// Identity value, if set.
    pub fn id(&self) -> Option<&FieldValue> {
        self.get(&self.schema.meta().id_field)
            .filter(|value| !value.is_null())
    }

    pub fn collection_endpoint(&self) -> String {
        self.schema.collection_endpoint()
    }

    /// `None` until the resource has an identity.
    pub fn resource_endpoint(&self) -> Option<String> {
        let id = match self.id()? {
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Char(s) if !s.is_empty() => s.clone(),
            FieldValue::Float(f) => f.to_string(),
            _ => return None,
        };
        Some(self.schema.resource_endpoint(&id))
    }

    /// The flat mapping `save` sends for `fields` (all fields when `None`).
    ///
    /// Nested resources reduce to their identity, nested-resource lists and
    /// null values are left out, date-times are RFC 3339 text.
    pub fn to_payload(&self, fields: Option<&[&str]>) -> Result<Map<String, Value>, ApiError> {
        let mut payload = Map::new();
        let indices: Vec<usize> = match fields {
            None => (0..self.values.len()).collect(),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.schema.position(name).ok_or_else(|| ApiError::UnknownField {
                        schema: self.schema.name().to_string(),
                        field: name.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?,
        };
        for index in indices {
            let field = &self.schema.fields()[index];
            if let Some(value) = field.serialize(&self.values[index]) {
                payload.insert(field.name().to_string(), value);
            }
        }
        Ok(payload)
    }

    /// Create or update the resource on the server.
    ///
    /// PUT to the resource endpoint when there is one and `force_create` is
    /// false, POST to the collection endpoint otherwise. Fields echoed back by
    /// the server (a new identity, for one) are written into `self`.
    pub fn save(&mut self, force_create: bool, fields: Option<&[&str]>) -> Result<HttpResponse, ApiError> {
        let payload = self.to_payload(fields)?;
        let options = if self.schema.meta().json_data {
            RequestOptions::new().json(Value::Object(payload))
        } else {
            RequestOptions::new().data(form_pairs(payload))
        };

        match self.resource_endpoint() {
            Some(endpoint) if !force_create => self.send(&endpoint, HttpMethod::Put, options),
            _ => {
                let collection = self.collection_endpoint();
                self.send(&collection, HttpMethod::Post, options)
            }
        }
    }

    /// Re-read the resource from the server. No-op without an identity.
    pub fn refresh(&mut self) -> Result<Option<HttpResponse>, ApiError> {
        match self.resource_endpoint() {
            Some(endpoint) => self.send(&endpoint, HttpMethod::Get, RequestOptions::new()).map(Some),
            None => Ok(None),
        }
    }

    /// Delete the resource on the server. No-op without an identity.
    ///
    /// The local values are left as they were; treat the instance as stale.
    pub fn delete(&mut self) -> Result<Option<HttpResponse>, ApiError> {
        match self.resource_endpoint() {
            Some(endpoint) => self
                .send(&endpoint, HttpMethod::Delete, RequestOptions::new())
                .map(Some),
            None => Ok(None),
        }
    }

    /// Send through the client and fold a returned record back into `self`.
    ///
    /// After a successful write the server has already applied the change, so
    /// a body that cannot be parsed or applied is logged and dropped. For a
    /// read the record is the point of the request and such failures are
    /// returned. Either way `self` is left untouched on failure.
    pub fn send(
        &mut self,
        path: &str,
        method: HttpMethod,
        options: RequestOptions,
    ) -> Result<HttpResponse, ApiError> {
        let client = Arc::clone(self.context.client());
        let response = client.send(path, method, options)?;
        if !response.is_success() {
            return Err(ApiError::from_response(&response));
        }
        let applied = client
            .unwrap_response(response.clone(), self.schema.meta().parse_json)
            .and_then(|body| match body {
                Some(Value::Object(record)) => self.populate_from_dict(&record),
                _ => Ok(()),
            });
        match applied {
            Err(error) if method == HttpMethod::Get => Err(error),
            Err(error) => {
                tracing::debug!(schema = self.schema.name(), %error, "ignoring response record");
                Ok(response)
            }
            Ok(()) => Ok(response),
        }
    }
}

fn form_pairs(payload: Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (name, value) in payload {
        match value {
            Value::Array(items) => {
                for item in items {
                    pairs.push((name.clone(), form_value(item)));
                }
            }
            other => pairs.push((name, form_value(other))),
        }
    }
    pairs
}

fn form_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get(&self.schema.meta().name_field) {
            Some(value) if !value.is_null() => write!(f, "{value}"),
            _ => write!(f, "<{} object>", self.schema.name()),
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.schema.name());
        for (field, value) in self.schema.fields().iter().zip(&self.values) {
            s.field(field.name(), value);
        }
        s.finish()
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name() && self.values == other.values
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::auth::NoAuthClient;
    use crate::fields::Field;
    use crate::transport::testing::ScriptedTransport;

    fn registry() -> Arc<Registry> {
        let question = Schema::builder("Question")
            .field(Field::integer("id"))
            .field(Field::char("question_text"))
            .field(Field::datetime("pub_date"))
            .field(Field::resource("choices", "Choice").many())
            .name_field("question_text")
            .build()
            .unwrap();
        let choice = Schema::builder("Choice")
            .field(Field::integer("id"))
            .field(Field::resource("question", "Question"))
            .field(Field::char("choice_text"))
            .field(Field::integer("votes"))
            .field(Field::char("tags").many())
            .name_field("choice_text")
            .json_data(false)
            .build()
            .unwrap();
        Registry::builder().register(question).register(choice).build()
    }

    fn context(transport: &ScriptedTransport) -> Context {
        let client = NoAuthClient::with_transport("http://localhost:8000", transport.clone()).unwrap();
        Context::new(Arc::new(client), registry())
    }

    fn record() -> Map<String, Value> {
        json!({
            "id": 1,
            "question_text": "Do you like pizza?",
            "pub_date": "2016-09-11T14:57:00Z",
            "choices": [1, 2],
            "owner": "someone"
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn populate_ignores_undeclared_keys() {
        let transport = ScriptedTransport::new();
        let mut question = context(&transport).resource("Question").unwrap();
        question.populate_from_dict(&record()).unwrap();

        assert!(question.get("owner").is_none());
        assert_eq!(question.id(), Some(&FieldValue::Integer(1)));
        assert_eq!(question.get("choices").and_then(FieldValue::as_list).map(<[_]>::len), Some(2));
    }

    #[test]
    fn set_rejects_unknown_fields() {
        let transport = ScriptedTransport::new();
        let mut question = context(&transport).resource("Question").unwrap();
        let err = question.set("owner", "someone").unwrap_err();
        assert!(matches!(err, ApiError::UnknownField { .. }));
    }

    #[test]
    fn display_uses_name_field() {
        let transport = ScriptedTransport::new();
        let ctx = context(&transport);
        let mut question = ctx.resource("Question").unwrap();
        assert_eq!(question.to_string(), "<Question object>");
        question.set("question_text", "Do you like pizza?").unwrap();
        assert_eq!(question.to_string(), "Do you like pizza?");
    }

    #[test]
    fn endpoints_depend_on_identity() {
        let transport = ScriptedTransport::new();
        let mut question = context(&transport).resource("Question").unwrap();
        assert_eq!(question.collection_endpoint(), "questions/");
        assert_eq!(question.resource_endpoint(), None);
        question.set("id", 4).unwrap();
        assert_eq!(question.resource_endpoint().as_deref(), Some("questions/4"));
    }

    #[test]
    fn payload_round_trips_scalars() {
        let transport = ScriptedTransport::new();
        let mut question = context(&transport).resource("Question").unwrap();
        let fetched = record();
        question.populate_from_dict(&fetched).unwrap();

        let payload = question.to_payload(None).unwrap();
        assert_eq!(payload["id"], fetched["id"]);
        assert_eq!(payload["question_text"], fetched["question_text"]);
        let sent = crate::fields::parse_datetime(payload["pub_date"].as_str().unwrap()).unwrap();
        assert_eq!(sent, Utc.with_ymd_and_hms(2016, 9, 11, 14, 57, 0).unwrap());
        assert!(!payload.contains_key("choices"));
        assert!(!payload.contains_key("owner"));
    }

    #[test]
    fn payload_respects_field_selection() {
        let transport = ScriptedTransport::new();
        let mut question = context(&transport).resource("Question").unwrap();
        question.populate_from_dict(&record()).unwrap();
        let payload = question.to_payload(Some(&["question_text"])).unwrap();
        assert_eq!(payload.len(), 1);
        assert!(question.to_payload(Some(&["owner"])).is_err());
    }

    #[test]
    fn save_without_identity_posts_and_adopts_response() {
        let transport = ScriptedTransport::new();
        transport.push_json(201, json!({"id": 9, "question_text": "New?", "pub_date": "2020-01-01T00:00:00Z"}));
        let mut question = context(&transport).resource("Question").unwrap();
        question.set("question_text", "New?").unwrap();

        question.save(false, None).unwrap();

        let req = &transport.requests()[0];
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://localhost:8000/questions/");
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"question_text": "New?"}));
        assert_eq!(question.id(), Some(&FieldValue::Integer(9)));
        assert!(question.get("pub_date").unwrap().as_datetime().is_some());
    }

    #[test]
    fn save_with_identity_puts() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, json!({"id": 1, "question_text": "Changed"}));
        let mut question = context(&transport).resource("Question").unwrap();
        question.populate_from_dict(&record()).unwrap();

        question.save(false, None).unwrap();

        let req = &transport.requests()[0];
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.url, "http://localhost:8000/questions/1");
        assert_eq!(question.to_string(), "Changed");
    }

    #[test]
    fn force_create_posts_even_with_identity() {
        let transport = ScriptedTransport::new();
        transport.push_json(201, json!({"id": 2}));
        let mut question = context(&transport).resource("Question").unwrap();
        question.set("id", 1).unwrap();

        question.save(true, None).unwrap();

        assert_eq!(transport.requests()[0].method, HttpMethod::Post);
        assert_eq!(question.id(), Some(&FieldValue::Integer(2)));
    }

    #[test]
    fn form_schemas_send_urlencoded_bodies() {
        let transport = ScriptedTransport::new();
        transport.push_json(201, json!({"id": 5}));
        let mut choice = context(&transport).resource("Choice").unwrap();
        choice
            .update([
                ("question", FieldValue::from(1)),
                ("choice_text", "Yes".into()),
                ("votes", 0.into()),
                ("tags", vec!["a", "b"].into()),
            ])
            .unwrap();

        choice.save(false, None).unwrap();

        let req = &transport.requests()[0];
        assert_eq!(req.header("content-type"), Some("application/x-www-form-urlencoded"));
        assert_eq!(
            req.body.as_deref(),
            Some("choice_text=Yes&question=1&tags=a&tags=b&votes=0")
        );
    }

    #[test]
    fn unparsable_write_response_is_ignored() {
        let transport = ScriptedTransport::new();
        transport.push(200, "<html>ok</html>");
        transport.push_json(200, json!({"id": 1, "pub_date": "not a date"}));
        let mut question = context(&transport).resource("Question").unwrap();
        question.populate_from_dict(&record()).unwrap();

        assert!(question.save(false, None).is_ok());
        assert!(question.save(false, None).is_ok());
        assert_eq!(question.to_string(), "Do you like pizza?");
    }

    #[test]
    fn failed_write_propagates() {
        let transport = ScriptedTransport::new();
        transport.push_json(400, json!({"question_text": ["This field is required."]}));
        let mut question = context(&transport).resource("Question").unwrap();
        assert!(matches!(question.save(false, None), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn refresh_and_delete_need_identity() {
        let transport = ScriptedTransport::new();
        let mut question = context(&transport).resource("Question").unwrap();
        assert!(question.refresh().unwrap().is_none());
        assert!(question.delete().unwrap().is_none());
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn refresh_reloads_from_server() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, json!({"id": 1, "question_text": "Reloaded"}));
        let mut question = context(&transport).resource("Question").unwrap();
        question.set("id", 1).unwrap();

        question.refresh().unwrap();

        assert_eq!(transport.requests()[0].method, HttpMethod::Get);
        assert_eq!(question.to_string(), "Reloaded");
    }

    #[test]
    fn failed_populate_changes_nothing() {
        let transport = ScriptedTransport::new();
        let mut question = context(&transport).resource("Question").unwrap();
        question.populate_from_dict(&record()).unwrap();
        let before = question.clone();

        let bad = json!({"id": 2, "pub_date": "garbage", "question_text": "Fresh"});
        let err = question.populate_from_dict(bad.as_object().unwrap()).unwrap_err();

        assert!(matches!(err, ApiError::InvalidField { .. }));
        assert_eq!(question, before);
    }

    #[test]
    fn refresh_reports_records_it_cannot_apply() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, json!({"id": 2, "pub_date": "garbage", "question_text": "Fresh"}));
        transport.push(200, "<html>ok</html>");
        let mut question = context(&transport).resource("Question").unwrap();
        question.update([("id", FieldValue::from(1)), ("question_text", "Old".into())]).unwrap();
        let before = question.clone();

        assert!(matches!(question.refresh(), Err(ApiError::InvalidField { .. })));
        assert_eq!(question, before);
        assert!(matches!(question.refresh(), Err(ApiError::Deserialization(_))));
        assert_eq!(question.to_string(), "Old");
    }

    #[test]
    fn write_response_it_cannot_apply_leaves_values_intact() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, json!({"id": 2, "pub_date": "garbage", "question_text": "Fresh"}));
        let mut question = context(&transport).resource("Question").unwrap();
        question.populate_from_dict(&record()).unwrap();
        let before = question.clone();

        assert!(question.save(false, None).is_ok());
        assert_eq!(question, before);
    }

    #[test]
    fn delete_keeps_local_values() {
        let transport = ScriptedTransport::new();
        transport.push(204, "");
        let mut question = context(&transport).resource("Question").unwrap();
        question.populate_from_dict(&record()).unwrap();

        let response = question.delete().unwrap().unwrap();

        assert_eq!(response.status, 204);
        assert_eq!(transport.requests()[0].method, HttpMethod::Delete);
        assert_eq!(transport.requests()[0].url, "http://localhost:8000/questions/1");
        assert_eq!(question.id(), Some(&FieldValue::Integer(1)));
    }
}
