//! Endpoint wrappers and the method registry.
//!
//! - [`RecordMethod`]: decode one record, run the handler, encode the
//!   returned record.
//! - [`QueryMethod`]: decode query parameters, build a [`Query`], let the
//!   handler refine it, fetch one page and encode a collection.
//! - [`MessageMethod`]: explicit request and response schemas, the handler
//!   works on messages directly.
//!
//! Schemas are derived when a method is built, so an invalid field selection
//! fails at registration rather than on the first request.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use tracing::{debug, instrument, warn};

use crate::alias::SetContext;
use crate::codec::{JsonCodec, MessageCodec};
use crate::config::QueryLimits;
use crate::convert::{from_message, to_message};
use crate::error::{ApiError, SchemaError};
use crate::message::Message;
use crate::model::{Record, RecordType};
use crate::problem::{Problem, catalog};
use crate::query::{Query, build_query, filters_from_record};
use crate::schema::{ITEMS, MessageSchema, NEXT_PAGE_TOKEN, Selection};
use crate::store::Datastore;
use crate::value::{UserIdentity, Value};

pub type RecordHandler =
    Arc<dyn Fn(Record, &RequestContext) -> Result<Record, ApiError> + Send + Sync>;
pub type QueryHandler = Arc<dyn Fn(Query, &RequestContext) -> Result<Query, ApiError> + Send + Sync>;
pub type MessageHandler =
    Arc<dyn Fn(&Message, &RequestContext) -> Result<Message, ApiError> + Send + Sync>;

/// Per-request state handed to endpoints and handlers.
#[derive(Clone)]
pub struct RequestContext {
    store: Arc<dyn Datastore>,
    user: Option<UserIdentity>,
    limits: QueryLimits,
}

impl RequestContext {
    #[must_use]
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self {
            store,
            user: None,
            limits: QueryLimits::default(),
        }
    }

    #[must_use]
    pub fn with_user(mut self, user: Option<UserIdentity>) -> Self {
        self.user = user;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn store(&self) -> &dyn Datastore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserIdentity> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// Setter context using the request's own limits.
    #[must_use]
    pub fn set_context(&self) -> SetContext<'_> {
        SetContext::new(self.store(), &self.limits).with_user(self.user())
    }

    /// # Errors
    /// `ApiError::Unauthorized` when there is no current user.
    pub fn require_user(&self) -> Result<&UserIdentity, ApiError> {
        self.user
            .as_ref()
            .ok_or_else(|| ApiError::unauthorized("Invalid token."))
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("user", &self.user.as_ref().map(|u| u.email.as_str()))
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// A callable API method.
pub trait Endpoint: Send + Sync {
    /// Dotted method name, e.g. `mymodel.insert`.
    fn name(&self) -> &str;

    fn http_method(&self) -> &Method;

    fn path(&self) -> &str;

    fn request_schema(&self) -> &Arc<MessageSchema>;

    fn response_schema(&self) -> &Arc<MessageSchema>;

    /// # Errors
    /// Whatever decoding, the handler or the datastore raise.
    fn call(&self, ctx: &RequestContext, request: &Message) -> Result<Message, ApiError>;
}

fn ensure_user(required: bool, ctx: &RequestContext) -> Result<(), ApiError> {
    if required {
        ctx.require_user()?;
    }
    Ok(())
}

/// Method taking and returning a single record.
pub struct RecordMethod {
    name: String,
    http_method: Method,
    path: String,
    record_type: Arc<RecordType>,
    request: Arc<MessageSchema>,
    response: Arc<MessageSchema>,
    user_required: bool,
    handler: RecordHandler,
}

#[must_use]
pub struct RecordMethodBuilder {
    name: String,
    record_type: Arc<RecordType>,
    request_fields: Option<Selection>,
    response_fields: Option<Selection>,
    user_required: bool,
    http_method: Method,
    path: Option<String>,
}

impl RecordMethod {
    pub fn builder(name: impl Into<String>, record_type: &Arc<RecordType>) -> RecordMethodBuilder {
        RecordMethodBuilder {
            name: name.into(),
            record_type: Arc::clone(record_type),
            request_fields: None,
            response_fields: None,
            user_required: false,
            http_method: Method::POST,
            path: None,
        }
    }
}

impl RecordMethodBuilder {
    pub fn request_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request_fields = Some(Selection::new(names));
        self
    }

    /// Defaults to the record type's default fields, not to the request fields.
    pub fn response_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.response_fields = Some(Selection::new(names));
        self
    }

    pub fn user_required(mut self) -> Self {
        self.user_required = true;
        self
    }

    pub fn http_method(mut self, method: Method) -> Self {
        self.http_method = method;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// # Errors
    /// `SchemaError` when a field selection is invalid or the request
    /// selects an alias without a setter.
    pub fn handler<F>(self, handler: F) -> Result<RecordMethod, SchemaError>
    where
        F: Fn(Record, &RequestContext) -> Result<Record, ApiError> + Send + Sync + 'static,
    {
        let request = self
            .record_type
            .request_schema(self.request_fields.as_ref())?;
        let response = self.record_type.schema(self.response_fields.as_ref())?;
        Ok(RecordMethod {
            path: self.path.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            http_method: self.http_method,
            record_type: self.record_type,
            request,
            response,
            user_required: self.user_required,
            handler: Arc::new(handler),
        })
    }
}

impl Endpoint for RecordMethod {
    fn name(&self) -> &str {
        &self.name
    }

    fn http_method(&self) -> &Method {
        &self.http_method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn request_schema(&self) -> &Arc<MessageSchema> {
        &self.request
    }

    fn response_schema(&self) -> &Arc<MessageSchema> {
        &self.response
    }

    fn call(&self, ctx: &RequestContext, request: &Message) -> Result<Message, ApiError> {
        ensure_user(self.user_required, ctx)?;
        let record = from_message(request, &self.record_type, &ctx.set_context())?;
        let record = (self.handler)(record, ctx)?;
        Ok(to_message(&record, &self.response)?)
    }
}

/// List method returning one page of records.
pub struct QueryMethod {
    name: String,
    http_method: Method,
    path: String,
    record_type: Arc<RecordType>,
    request: Arc<MessageSchema>,
    response: Arc<MessageSchema>,
    item: Arc<MessageSchema>,
    limits: Option<QueryLimits>,
    user_required: bool,
    handler: QueryHandler,
}

#[must_use]
pub struct QueryMethodBuilder {
    name: String,
    record_type: Arc<RecordType>,
    query_fields: Selection,
    collection_fields: Option<Selection>,
    limit_default: Option<u32>,
    limit_max: Option<u32>,
    user_required: bool,
    http_method: Method,
    path: Option<String>,
}

impl QueryMethod {
    pub fn builder(name: impl Into<String>, record_type: &Arc<RecordType>) -> QueryMethodBuilder {
        QueryMethodBuilder {
            name: name.into(),
            record_type: Arc::clone(record_type),
            query_fields: Selection::default(),
            collection_fields: None,
            limit_default: None,
            limit_max: None,
            user_required: false,
            http_method: Method::GET,
            path: None,
        }
    }

    fn limits(&self, ctx: &RequestContext) -> QueryLimits {
        self.limits.unwrap_or(*ctx.limits())
    }
}

impl QueryMethodBuilder {
    /// Request parameters: properties become equality filters, aliases run
    /// their setters. Empty by default.
    pub fn query_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_fields = Selection::new(names);
        self
    }

    /// Fields of each returned item. Defaults to the default fields.
    pub fn collection_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collection_fields = Some(Selection::new(names));
        self
    }

    pub fn limit_default(mut self, limit: u32) -> Self {
        self.limit_default = Some(limit);
        self
    }

    pub fn limit_max(mut self, limit: u32) -> Self {
        self.limit_max = Some(limit);
        self
    }

    pub fn user_required(mut self) -> Self {
        self.user_required = true;
        self
    }

    pub fn http_method(mut self, method: Method) -> Self {
        self.http_method = method;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Build a method that runs the decoded query unchanged.
    ///
    /// # Errors
    /// See [`QueryMethodBuilder::handler`].
    pub fn build(self) -> Result<QueryMethod, SchemaError> {
        self.handler(|query, _| Ok(query))
    }

    /// # Errors
    /// `SchemaError` for invalid selections, a non-filterable property or
    /// a read-only alias among the query fields; `SchemaError::InvalidDefault`
    /// when the per-method limits are inconsistent.
    pub fn handler<F>(self, handler: F) -> Result<QueryMethod, SchemaError>
    where
        F: Fn(Query, &RequestContext) -> Result<Query, ApiError> + Send + Sync + 'static,
    {
        let request = self.record_type.query_schema(&self.query_fields)?;
        let response = self
            .record_type
            .collection_schema(self.collection_fields.as_ref())?;
        let item = self.record_type.schema(self.collection_fields.as_ref())?;
        let limits = if self.limit_default.is_some() || self.limit_max.is_some() {
            let base = QueryLimits::default();
            let limits = QueryLimits {
                default_limit: self.limit_default.unwrap_or(base.default_limit),
                max_limit: self.limit_max.unwrap_or(base.max_limit),
            };
            limits.validate().map_err(|e| SchemaError::InvalidDefault {
                field: crate::alias::LIMIT.to_owned(),
                expected: e.to_string(),
            })?;
            Some(limits)
        } else {
            None
        };
        Ok(QueryMethod {
            path: self.path.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            http_method: self.http_method,
            record_type: self.record_type,
            request,
            response,
            item,
            limits,
            user_required: self.user_required,
            handler: Arc::new(handler),
        })
    }
}

impl Endpoint for QueryMethod {
    fn name(&self) -> &str {
        &self.name
    }

    fn http_method(&self) -> &Method {
        &self.http_method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn request_schema(&self) -> &Arc<MessageSchema> {
        &self.request
    }

    fn response_schema(&self) -> &Arc<MessageSchema> {
        &self.response
    }

    fn call(&self, ctx: &RequestContext, request: &Message) -> Result<Message, ApiError> {
        ensure_user(self.user_required, ctx)?;
        let limits = self.limits(ctx);
        let set_ctx = SetContext::new(ctx.store(), &limits).with_user(ctx.user());
        let record = from_message(request, &self.record_type, &set_ctx)?;
        let filters = filters_from_record(&record, &self.request);
        let query = build_query(&self.record_type, record.query_info(), filters)?;
        let query = (self.handler)(query, ctx)?;

        let page_size = limits.effective(query.limit());
        let page = ctx.store().fetch_page(&query, &self.record_type, page_size)?;
        let items = page
            .records
            .iter()
            .map(|r| to_message(r, &self.item).map(Value::Message))
            .collect::<Result<Vec<_>, _>>()?;

        let mut response = Message::new(Arc::clone(&self.response));
        if !items.is_empty() {
            response.set(ITEMS, Value::List(items))?;
        }
        if page.more
            && let Some(cursor) = page.cursor
        {
            response.set(NEXT_PAGE_TOKEN, cursor.to_websafe())?;
        }
        Ok(response)
    }
}

/// Method with explicit schemas; the handler sees raw messages.
pub struct MessageMethod {
    name: String,
    http_method: Method,
    path: String,
    request: Arc<MessageSchema>,
    response: Arc<MessageSchema>,
    user_required: bool,
    handler: MessageHandler,
}

impl MessageMethod {
    #[must_use]
    pub fn new<F>(
        name: impl Into<String>,
        request: Arc<MessageSchema>,
        response: Arc<MessageSchema>,
        handler: F,
    ) -> Self
    where
        F: Fn(&Message, &RequestContext) -> Result<Message, ApiError> + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            http_method: Method::POST,
            request,
            response,
            user_required: false,
            handler: Arc::new(handler),
        }
    }

    #[must_use]
    pub fn user_required(mut self) -> Self {
        self.user_required = true;
        self
    }

    #[must_use]
    pub fn http_method(mut self, method: Method) -> Self {
        self.http_method = method;
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

impl Endpoint for MessageMethod {
    fn name(&self) -> &str {
        &self.name
    }

    fn http_method(&self) -> &Method {
        &self.http_method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn request_schema(&self) -> &Arc<MessageSchema> {
        &self.request
    }

    fn response_schema(&self) -> &Arc<MessageSchema> {
        &self.response
    }

    fn call(&self, ctx: &RequestContext, request: &Message) -> Result<Message, ApiError> {
        ensure_user(self.user_required, ctx)?;
        (self.handler)(request, ctx)
    }
}

/// Named, versioned set of endpoints sharing one wire codec.
pub struct Api {
    name: String,
    version: String,
    codec: Arc<dyn MessageCodec>,
    endpoints: BTreeMap<String, Arc<dyn Endpoint>>,
}

impl Api {
    /// An empty API speaking JSON.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            codec: Arc::new(JsonCodec),
            endpoints: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// # Errors
    /// `SchemaError::DuplicateMethod` when the name is already taken.
    pub fn register(&mut self, endpoint: impl Endpoint + 'static) -> Result<(), SchemaError> {
        let name = endpoint.name().to_owned();
        if self.endpoints.contains_key(&name) {
            return Err(SchemaError::DuplicateMethod(name));
        }
        debug!(api = %self.name, method = %name, path = endpoint.path(), "registered method");
        self.endpoints.insert(name, Arc::new(endpoint));
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn codec(&self) -> &dyn MessageCodec {
        self.codec.as_ref()
    }

    #[must_use]
    pub fn endpoint(&self, name: &str) -> Option<&dyn Endpoint> {
        self.endpoints.get(name).map(AsRef::as_ref)
    }

    /// Registered methods ordered by name.
    pub fn endpoints(&self) -> impl Iterator<Item = &dyn Endpoint> + '_ {
        self.endpoints.values().map(AsRef::as_ref)
    }

    /// Decode `body`, invoke `method` and encode its response.
    ///
    /// # Errors
    /// A [`Problem`] describing the failure; `instance` names the method.
    #[instrument(skip(self, ctx, body), fields(api = %self.name, version = %self.version))]
    pub fn dispatch(&self, method: &str, ctx: &RequestContext, body: &str) -> Result<String, Problem> {
        let Some(endpoint) = self.endpoints.get(method) else {
            return Err(catalog::METHOD_NOT_FOUND
                .as_problem(format!("no method named '{method}'"))
                .with_instance(method));
        };
        self.invoke(endpoint.as_ref(), ctx, body).map_err(|err| {
            if err.is_client_error() {
                debug!(error = %err, "request rejected");
            } else {
                warn!(error = %err, "request failed");
            }
            Problem::from(err).with_instance(method)
        })
    }

    fn invoke(
        &self,
        endpoint: &dyn Endpoint,
        ctx: &RequestContext,
        body: &str,
    ) -> Result<String, ApiError> {
        let request = self.codec.decode(endpoint.request_schema(), body)?;
        let response = endpoint.call(ctx, &request)?;
        Ok(self.codec.encode(&response)?)
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("methods", &self.endpoints.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
