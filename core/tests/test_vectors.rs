//! Check request building, error mapping and save payloads against the JSON
//! test vectors stored in `test-vectors/`.
//!
//! Bodies and payloads are compared as parsed JSON, not raw strings, so key
//! order never causes a false negative.

use std::sync::Arc;

use restcli_core::{
    ApiError, Context, Field, HttpMethod, HttpResponse, NoAuthClient, Registry, RequestOptions, Schema,
    Session, UreqTransport,
};
use serde_json::Value;

const BASE_URL: &str = "http://localhost:8000/api/";

fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "PATCH" => HttpMethod::Patch,
        "DELETE" => HttpMethod::Delete,
        other => panic!("unknown method: {other}"),
    }
}

fn pairs(value: &Value) -> Vec<(String, String)> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|pair| {
            let pair = pair.as_array().unwrap();
            (pair[0].as_str().unwrap().to_string(), pair[1].as_str().unwrap().to_string())
        })
        .collect()
}

fn kind(error: &ApiError) -> &'static str {
    match error {
        ApiError::BadRequest(_) => "bad_request",
        ApiError::Unauthorized(_) => "unauthorized",
        ApiError::Forbidden(_) => "forbidden",
        ApiError::NotFound(_) => "not_found",
        ApiError::UnprocessableEntity(_) => "unprocessable_entity",
        ApiError::RateLimited(_) => "rate_limited",
        ApiError::ServerError(_) => "server_error",
        ApiError::Http(_) => "http",
        other => panic!("not an http error: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[test]
fn request_test_vectors() {
    let raw = include_str!("../../test-vectors/requests.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let session = Session::new(BASE_URL, UreqTransport::new()).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let mut options = RequestOptions::new().params(pairs(&case["params"]));
        if let Some(json) = case.get("json") {
            options = options.json(json.clone());
        }
        if let Some(data) = case.get("data") {
            options = options.data(pairs(data));
        }

        let req = session
            .build_request(
                parse_method(case["method"].as_str().unwrap()),
                case["path"].as_str().unwrap(),
                options,
            )
            .unwrap();

        let expected = &case["expected"];
        assert_eq!(req.url, expected["url"].as_str().unwrap(), "{name}: url");
        assert_eq!(req.headers, pairs(&expected["headers"]), "{name}: headers");
        match (&req.body, &expected["body"]) {
            (None, Value::Null) => {}
            (Some(body), Value::String(form)) => assert_eq!(body, form, "{name}: form body"),
            (Some(body), json) => {
                let sent: Value = serde_json::from_str(body).unwrap();
                assert_eq!(&sent, json, "{name}: json body");
            }
            (None, other) => panic!("{name}: expected body {other}, sent none"),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn error_test_vectors() {
    let raw = include_str!("../../test-vectors/errors.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let status = case["status"].as_u64().unwrap() as u16;
        let response = HttpResponse {
            status,
            headers: Vec::new(),
            body: case["body"].as_str().unwrap().to_string(),
            url: format!("{BASE_URL}questions/1"),
        };

        let err = ApiError::from_response(&response);
        assert_eq!(kind(&err), case["kind"].as_str().unwrap(), "{name}: kind");
        assert_eq!(err.message(), case["message"].as_str().unwrap(), "{name}: message");
        assert_eq!(err.status(), Some(status), "{name}: status");
        assert_eq!(err.response().unwrap().url, response.url, "{name}: url");
    }
}

// ---------------------------------------------------------------------------
// Save payloads
// ---------------------------------------------------------------------------

fn context() -> Context {
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
        .build()
        .unwrap();
    let vote = Schema::builder("Vote")
        .field(Field::integer("id"))
        .field(Field::resource("choice", "Choice").expand())
        .field(Field::float("weight"))
        .field(Field::boolean("verified"))
        .build()
        .unwrap();
    let registry: Arc<Registry> = Registry::builder()
        .register(question)
        .register(choice)
        .register(vote)
        .build();
    let client = NoAuthClient::new("http://localhost:8000/").unwrap();
    Context::new(Arc::new(client), registry)
}

#[test]
fn payload_test_vectors() {
    let raw = include_str!("../../test-vectors/payloads.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let context = context();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let mut resource = context.resource(case["schema"].as_str().unwrap()).unwrap();
        resource
            .populate_from_dict(case["record"].as_object().unwrap())
            .unwrap();

        let fields: Option<Vec<&str>> = case["fields"]
            .as_array()
            .map(|names| names.iter().map(|n| n.as_str().unwrap()).collect());
        let payload = resource.to_payload(fields.as_deref()).unwrap();

        assert_eq!(Value::Object(payload), case["payload"], "{name}: payload");
    }
}
