//! Declarative resource mapping over HTTP REST APIs.
//!
//! # Overview
//! A [`Schema`] declares the typed fields of one remote resource kind and
//! where its collection lives. A [`Manager`] fetches, filters and creates
//! [`Resource`] instances of that schema; each resource can save, refresh
//! and delete itself. Every request goes through an [`ApiClient`], which
//! attaches credentials and turns error statuses into [`ApiError`] values.
//!
//! # Design
//! - Requests and responses are plain data ([`HttpRequest`] /
//!   [`HttpResponse`]). A [`Transport`] executes them; [`UreqTransport`] is
//!   the blocking network one, tests substitute a scripted one.
//! - Schemas are immutable and shared behind `Arc`. Nested resource fields
//!   name their target schema, resolved through the [`Registry`] of the
//!   resource's [`Context`] when a value is assigned.
//! - Pagination is a per-manager strategy; each `filter` call walks its own
//!   cursor, so managers hold no traversal state.
//! - Library code only emits `tracing` events; installing a subscriber is
//!   up to the caller.

pub mod auth;
pub mod config;
pub mod error;
pub mod fields;
pub mod http;
pub mod manager;
pub mod paginator;
pub mod resource;
pub mod schema;
pub mod transport;

pub use auth::{ApiClient, BasicAuthClient, NoAuthClient, TokenAuthClient};
pub use config::{AuthConfig, ClientConfig};
pub use error::{ApiError, ErrorResponse};
pub use fields::{Field, FieldKind, FieldValue};
pub use http::{HttpMethod, HttpRequest, HttpResponse, RequestOptions};
pub use manager::Manager;
pub use paginator::{PageCursor, PageRequest, Pagination};
pub use resource::{Context, Resource};
pub use schema::{Meta, Registry, Schema, SchemaBuilder};
pub use transport::{Session, Transport, UreqTransport};
