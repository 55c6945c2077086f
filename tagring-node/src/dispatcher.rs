//! The header-keyed command dispatcher (spec.md §4.9): a process-wide
//! registry from `"{command}//{function}//{arg1}:?{arg2}:?…"` to a typed
//! handler, replacing the original's decorator-based reflection (REDESIGN
//! FLAGS: `Dispatcher::register(command, function, schema, handler)`
//! called explicitly at startup). The dispatcher is the only place JSON is
//! decoded into typed arguments — handlers see a pre-validated `Value`.

use crate::context::Context;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tagring_proto::{dispatch_key, Header};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, DispatchError>> + Send>>;
pub type HandlerFn = fn(Context, Value) -> HandlerFuture;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("no handler registered for {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("this node is not the leader")]
    NotLeader,
    #[error("fatal: {0}")]
    Fatal(String),
}

/// The declared shape of one argument: a name plus the JSON type it must
/// decode as. Validated before the handler ever sees the data.
#[derive(Clone, Copy, Debug)]
pub enum ArgType {
    Str,
    U64,
    I64,
    Bool,
    StrList,
    Any,
}

impl ArgType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ArgType::Str => value.is_string(),
            ArgType::U64 => value.as_u64().is_some(),
            ArgType::I64 => value.as_i64().is_some(),
            ArgType::Bool => value.is_boolean(),
            ArgType::StrList => value.as_array().map(|a| a.iter().all(|v| v.is_string())).unwrap_or(false),
            ArgType::Any => true,
        }
    }
}

struct Registration {
    handler: HandlerFn,
    schema: Vec<(&'static str, ArgType)>,
}

#[derive(Default)]
pub struct Dispatcher {
    registry: HashMap<String, Registration>,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher::default()
    }

    pub fn register(&mut self, command: &str, function: &str, schema: Vec<(&'static str, ArgType)>, handler: HandlerFn) {
        let names: Vec<&str> = schema.iter().map(|(name, _)| *name).collect();
        let key = dispatch_key(command, function, &names);
        self.registry.insert(key, Registration { handler, schema });
    }

    pub async fn dispatch(&self, header: &Header, data: Value, ctx: Context) -> Result<Value, DispatchError> {
        let names: Vec<&str> = header.dataset.iter().map(String::as_str).collect();
        let key = dispatch_key(&header.command_name, &header.function, &names);
        let registration = self.registry.get(&key).ok_or_else(|| DispatchError::NotFound(key.clone()))?;
        validate(&registration.schema, &data)?;
        (registration.handler)(ctx, data).await
    }
}

fn validate(schema: &[(&'static str, ArgType)], data: &Value) -> Result<(), DispatchError> {
    let obj = data.as_object().ok_or_else(|| DispatchError::Malformed("data is not a JSON object".into()))?;
    for (name, ty) in schema {
        let value = obj.get(*name).ok_or_else(|| DispatchError::Malformed(format!("missing field {name}")))?;
        if !ty.matches(value) {
            return Err(DispatchError::Malformed(format!("field {name} has the wrong type")));
        }
    }
    Ok(())
}
