//! Named capabilities agents can call.
//!
//! A [`CapabilityRegistry`] maps a stable name to a described, callable unit of work: a
//! [`CapabilitySchema`] (what the capability does and which arguments it takes) plus a sync or
//! async function over JSON values. Everything is registered explicitly, usually once at
//! startup; the registry is then shared read-only (e.g. behind an `Arc`) by the agents that
//! use it.
//!
//! # Examples
//!
//! ```rust
//! use groupchat::registry::{CapabilityRegistry, CapabilitySchema, ParameterSpec, ParameterType};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = CapabilityRegistry::new();
//! registry.register_sync(
//!     CapabilitySchema::new("word_count", "Counts words in a text")
//!         .with_parameter(ParameterSpec::new("text", ParameterType::String).required()),
//!     |args| {
//!         let text = args["text"].as_str().unwrap_or_default();
//!         Ok(json!(text.split_whitespace().count()))
//!     },
//! )?;
//!
//! let count = registry.call("word_count", json!({ "text": "one two three" })).await?;
//! assert_eq!(count, json!(3));
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Result type produced by capability functions.
pub type CapabilityResult = Result<JsonValue, Box<dyn Error + Send + Sync>>;

/// Synchronous capability body.
pub type CapabilityFn = Arc<dyn Fn(JsonValue) -> CapabilityResult + Send + Sync>;

/// Asynchronous capability body.
pub type AsyncCapabilityFn =
    Arc<dyn Fn(JsonValue) -> Pin<Box<dyn Future<Output = CapabilityResult> + Send>> + Send + Sync>;

/// JSON type of a capability argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn accepts(&self, value: &JsonValue) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Number => value.is_number(),
            ParameterType::Integer => value.is_i64() || value.is_u64(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => value.is_object(),
        }
    }
}

/// One argument of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Description of a capability, independent of how it is implemented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySchema {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl CapabilitySchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Function-calling definition with a JSON Schema `parameters` object.
    pub fn to_function_definition(&self) -> JsonValue {
        let mut properties = serde_json::Map::new();
        for param in &self.parameters {
            let mut property = json!({ "type": param.param_type });
            if let Some(description) = &param.description {
                property["description"] = json!(description);
            }
            properties.insert(param.name.clone(), property);
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }

    /// Checks `args` against the declared parameters.
    pub fn validate(&self, args: &JsonValue) -> Result<(), RegistryError> {
        if self.parameters.is_empty() {
            return Ok(());
        }
        let object = args.as_object().ok_or_else(|| RegistryError::InvalidArguments {
            name: self.name.clone(),
            reason: "arguments must be a JSON object".into(),
        })?;

        for param in &self.parameters {
            match object.get(&param.name) {
                None if param.required => {
                    return Err(RegistryError::InvalidArguments {
                        name: self.name.clone(),
                        reason: format!("missing required argument '{}'", param.name),
                    })
                }
                Some(value) if !param.param_type.accepts(value) => {
                    return Err(RegistryError::InvalidArguments {
                        name: self.name.clone(),
                        reason: format!(
                            "argument '{}' should be of type {:?}",
                            param.name, param.param_type
                        ),
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Errors raised by [`CapabilityRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A capability with this name is already registered.
    Duplicate(String),
    NotFound(String),
    InvalidArguments { name: String, reason: String },
    /// The capability ran and returned an error.
    Failed { name: String, message: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Duplicate(name) => write!(f, "Capability already registered: {}", name),
            RegistryError::NotFound(name) => write!(f, "Capability not found: {}", name),
            RegistryError::InvalidArguments { name, reason } => {
                write!(f, "Invalid arguments for '{}': {}", name, reason)
            }
            RegistryError::Failed { name, message } => {
                write!(f, "Capability '{}' failed: {}", name, message)
            }
        }
    }
}

impl Error for RegistryError {}

enum Callable {
    Sync(CapabilityFn),
    Async(AsyncCapabilityFn),
}

struct Capability {
    schema: CapabilitySchema,
    callable: Callable,
    calls: AtomicUsize,
}

/// Name-indexed set of capabilities. Iteration order is alphabetical by name.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Capability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, schema: CapabilitySchema, callable: Callable) -> Result<(), RegistryError> {
        if self.capabilities.contains_key(&schema.name) {
            return Err(RegistryError::Duplicate(schema.name));
        }
        log::debug!("Registered capability '{}'", schema.name);
        self.capabilities.insert(
            schema.name.clone(),
            Capability {
                schema,
                callable,
                calls: AtomicUsize::new(0),
            },
        );
        Ok(())
    }

    pub fn register(
        &mut self,
        schema: CapabilitySchema,
        function: CapabilityFn,
    ) -> Result<(), RegistryError> {
        self.insert(schema, Callable::Sync(function))
    }

    pub fn register_async(
        &mut self,
        schema: CapabilitySchema,
        function: AsyncCapabilityFn,
    ) -> Result<(), RegistryError> {
        self.insert(schema, Callable::Async(function))
    }

    /// Convenience wrapper around [`register`](CapabilityRegistry::register) for closures.
    pub fn register_sync<F>(&mut self, schema: CapabilitySchema, function: F) -> Result<(), RegistryError>
    where
        F: Fn(JsonValue) -> CapabilityResult + Send + Sync + 'static,
    {
        self.register(schema, Arc::new(function))
    }

    pub fn unregister(&mut self, name: &str) -> Option<CapabilitySchema> {
        self.capabilities.remove(name).map(|c| c.schema)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<&CapabilitySchema> {
        self.capabilities.get(name).map(|c| &c.schema)
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.keys().map(String::as_str).collect()
    }

    pub fn schemas(&self) -> Vec<&CapabilitySchema> {
        self.capabilities.values().map(|c| &c.schema).collect()
    }

    /// Every capability as a function-calling definition, for handing to a model.
    pub fn function_definitions(&self) -> JsonValue {
        JsonValue::Array(
            self.capabilities
                .values()
                .map(|c| c.schema.to_function_definition())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// How many times `name` has been called, failed calls included.
    pub fn call_count(&self, name: &str) -> Option<usize> {
        self.capabilities
            .get(name)
            .map(|c| c.calls.load(Ordering::Relaxed))
    }

    /// Validates `args` and runs the named capability.
    pub async fn call(&self, name: &str, args: JsonValue) -> Result<JsonValue, RegistryError> {
        let capability = self
            .capabilities
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        capability.schema.validate(&args)?;
        capability.calls.fetch_add(1, Ordering::Relaxed);

        let result = match &capability.callable {
            Callable::Sync(function) => function(args),
            Callable::Async(function) => function(args).await,
        };
        result.map_err(|e| RegistryError::Failed {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}
