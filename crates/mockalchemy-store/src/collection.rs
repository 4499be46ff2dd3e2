use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{Value, json};
use tracing::debug;

use mockalchemy_core::{
    ConfigLayer, GlobalConfig, Record, ResolvedConfig, record_id, resolve_config,
};

use crate::errors::{StoreError, StoreResult};
use crate::query::{Filter, Pagination, QueryOptions, QueryResult};
use crate::registry::Registry;
use crate::resolver::{EnvelopeInput, JoinContext, build_envelope, shape_items};
use crate::store::CollectionStore;

/// Named CRUD operations exposed by the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Replace,
    Delete,
    Count,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Replace => "replace",
            Operation::Delete => "delete",
            Operation::Count => "count",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a hook is looking at.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub collection: &'a str,
    pub operation: Operation,
    pub id: Option<&'a str>,
}

/// Before hooks see the request payload, after hooks the response. Both may
/// rewrite it in place; an `Err` aborts the operation.
pub type Hook = Arc<dyn Fn(&HookContext<'_>, &mut Value) -> Result<(), String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    before: Vec<Hook>,
    after: Vec<Hook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HookContext<'_>, &mut Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.before.push(Arc::new(hook));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HookContext<'_>, &mut Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.after.push(Arc::new(hook));
        self
    }

    pub fn extend(&mut self, other: Hooks) {
        self.before.extend(other.before);
        self.after.extend(other.after);
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    fn run(hooks: &[Hook], context: &HookContext<'_>, value: &mut Value) -> StoreResult<()> {
        for hook in hooks {
            hook(context, value).map_err(|message| StoreError::Hook {
                operation: context.operation.as_str(),
                message,
            })?;
        }
        Ok(())
    }
}

/// CRUD facade over one store: config resolution, simulated latency and
/// failures, hooks and response shaping.
#[derive(Clone)]
pub struct Collection {
    store: Arc<CollectionStore>,
    registry: Arc<Registry>,
    global: Arc<GlobalConfig>,
    hooks: Hooks,
    operation: Option<ConfigLayer>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.store.name())
            .field("hooks", &self.hooks)
            .field("operation", &self.operation)
            .finish()
    }
}

impl Collection {
    pub fn new(
        store: Arc<CollectionStore>,
        registry: Arc<Registry>,
        global: Arc<GlobalConfig>,
        hooks: Hooks,
    ) -> Self {
        Self {
            store,
            registry,
            global,
            hooks,
            operation: None,
        }
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn store(&self) -> &Arc<CollectionStore> {
        &self.store
    }

    /// Same collection with an operation-level override on top of the
    /// collection and global settings.
    pub fn with_config(&self, layer: ConfigLayer) -> Self {
        Self {
            operation: Some(layer),
            ..self.clone()
        }
    }

    pub fn resolved_config(&self) -> ResolvedConfig {
        resolve_config(
            &self.global,
            Some(&self.store.definition().config),
            self.operation.as_ref(),
        )
    }

    async fn prepare(&self, operation: Operation) -> StoreResult<ResolvedConfig> {
        let resolved = self.resolved_config();
        if resolved.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(resolved.delay_ms)).await;
        }
        let fail = resolved.error_rate > 0.0 && rand::rng().random_bool(resolved.error_rate);
        if fail {
            debug!(collection = self.name(), operation = %operation, "simulated failure");
            return Err(StoreError::Simulated {
                collection: self.name().to_string(),
                operation: operation.as_str(),
            });
        }
        Ok(resolved)
    }

    fn context<'a>(&'a self, operation: Operation, id: Option<&'a str>) -> HookContext<'a> {
        HookContext {
            collection: self.name(),
            operation,
            id,
        }
    }

    pub async fn list(&self, options: QueryOptions) -> StoreResult<Value> {
        let resolved = self.prepare(Operation::List).await?;
        let context = self.context(Operation::List, None);

        let mut payload = to_payload(&options)?;
        Hooks::run(&self.hooks.before, &context, &mut payload)?;
        let options: QueryOptions = serde_json::from_value(payload)
            .map_err(|err| StoreError::InvalidPayload(format!("query options: {err}")))?;

        let result = self
            .store
            .query_with(&options, resolved.default_limit)
            .await;
        let mut response = self.shape_list(result).await;
        Hooks::run(&self.hooks.after, &context, &mut response)?;
        Ok(response)
    }

    pub async fn get(&self, id: &str) -> StoreResult<Value> {
        self.prepare(Operation::Get).await?;
        let id = self.before_with_id(Operation::Get, id)?;
        let record = self
            .store
            .find_by_id(&id)
            .await
            .ok_or_else(|| StoreError::not_found(self.name(), &id))?;
        self.respond(Operation::Get, Some(&id), record).await
    }

    pub async fn create(&self, payload: Value) -> StoreResult<Value> {
        let resolved = self.prepare(Operation::Create).await?;
        let record = self.before_with_record(Operation::Create, None, payload)?;
        let stored = self.store.insert_in(record, resolved.storage).await;
        let id = record_id(&stored).map(str::to_string);
        self.respond(Operation::Create, id.as_deref(), stored).await
    }

    pub async fn update(&self, id: &str, partial: Value) -> StoreResult<Value> {
        let resolved = self.prepare(Operation::Update).await?;
        let partial = self.before_with_record(Operation::Update, Some(id), partial)?;
        let updated = self
            .store
            .update_in(id, partial, resolved.storage)
            .await
            .ok_or_else(|| StoreError::not_found(self.name(), id))?;
        self.respond(Operation::Update, Some(id), updated).await
    }

    pub async fn replace(&self, id: &str, full: Value) -> StoreResult<Value> {
        let resolved = self.prepare(Operation::Replace).await?;
        let full = self.before_with_record(Operation::Replace, Some(id), full)?;
        let replaced = self
            .store
            .replace_in(id, full, resolved.storage)
            .await
            .ok_or_else(|| StoreError::not_found(self.name(), id))?;
        self.respond(Operation::Replace, Some(id), replaced).await
    }

    pub async fn delete(&self, id: &str) -> StoreResult<Value> {
        let resolved = self.prepare(Operation::Delete).await?;
        let id = self.before_with_id(Operation::Delete, id)?;
        if !self.store.delete_in(&id, resolved.storage).await {
            return Err(StoreError::not_found(self.name(), &id));
        }
        let mut response = json!({ "id": &id, "deleted": true });
        Hooks::run(
            &self.hooks.after,
            &self.context(Operation::Delete, Some(&id)),
            &mut response,
        )?;
        Ok(response)
    }

    pub async fn count(&self, filter: Filter) -> StoreResult<usize> {
        self.prepare(Operation::Count).await?;
        let mut payload = Value::Object(filter);
        Hooks::run(
            &self.hooks.before,
            &self.context(Operation::Count, None),
            &mut payload,
        )?;
        let Value::Object(filter) = payload else {
            return Err(StoreError::InvalidPayload(
                "count filter must be an object".to_string(),
            ));
        };
        Ok(self.store.count(&filter).await)
    }

    /// Before hooks over `{ "id": ... }`; they may redirect to another id.
    fn before_with_id(&self, operation: Operation, id: &str) -> StoreResult<String> {
        let mut payload = json!({ "id": id });
        Hooks::run(
            &self.hooks.before,
            &self.context(operation, Some(id)),
            &mut payload,
        )?;
        payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidPayload("hook removed the record id".to_string()))
    }

    fn before_with_record(
        &self,
        operation: Operation,
        id: Option<&str>,
        mut payload: Value,
    ) -> StoreResult<Record> {
        Hooks::run(&self.hooks.before, &self.context(operation, id), &mut payload)?;
        match payload {
            Value::Object(record) => Ok(record),
            other => Err(StoreError::InvalidPayload(format!(
                "{operation} payload must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    async fn respond(&self, operation: Operation, id: Option<&str>, record: Record) -> StoreResult<Value> {
        let mut response = self.shape_item(record).await;
        Hooks::run(&self.hooks.after, &self.context(operation, id), &mut response)?;
        Ok(response)
    }

    async fn shape_item(&self, record: Record) -> Value {
        let Some(schema) = &self.store.definition().item_response else {
            return Value::Object(record);
        };
        let joins = JoinContext::gather(&self.registry, self.name(), schema).await;
        shape_items(&[record], schema, self.name(), &joins)
            .into_iter()
            .next()
            .map(Value::Object)
            .unwrap_or(Value::Null)
    }

    async fn shape_list(&self, result: QueryResult) -> Value {
        let Some(schema) = &self.store.definition().list_response else {
            return default_list_response(result.data, result.pagination);
        };
        let joins = JoinContext::gather(&self.registry, self.name(), schema).await;

        if schema.is_envelope() {
            let dataset = self.store.to_array().await;
            return build_envelope(
                schema,
                &EnvelopeInput {
                    page: &result,
                    dataset: &dataset,
                    owner: self.name(),
                    joins: &joins,
                },
            );
        }
        let data = shape_items(&result.data, schema, self.name(), &joins);
        default_list_response(data, result.pagination)
    }
}

/// `{ "data": [...], "pagination": {...} }`
pub fn default_list_response(data: Vec<Record>, pagination: Pagination) -> Value {
    json!({ "data": data, "pagination": pagination })
}

fn to_payload(options: &QueryOptions) -> StoreResult<Value> {
    serde_json::to_value(options)
        .map_err(|err| StoreError::InvalidPayload(format!("query options: {err}")))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
