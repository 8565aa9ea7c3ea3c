use groupchat::registry::{
    AsyncCapabilityFn, CapabilityRegistry, CapabilityResult, CapabilitySchema, ParameterSpec,
    ParameterType, RegistryError,
};
use serde_json::{json, Value as JsonValue};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type CapabilityFuture = Pin<Box<dyn Future<Output = CapabilityResult> + Send>>;

fn echo_schema(name: &str) -> CapabilitySchema {
    CapabilitySchema::new(name, "Returns its input")
        .with_parameter(ParameterSpec::new("text", ParameterType::String).required())
}

fn registry_with_echo() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_sync(echo_schema("echo"), |args| Ok(args["text"].clone()))
        .unwrap();
    registry
}

#[tokio::test]
async fn sync_capability_is_called_with_its_arguments() {
    let registry = registry_with_echo();
    let result = registry.call("echo", json!({ "text": "hello" })).await.unwrap();
    assert_eq!(result, json!("hello"));
    assert_eq!(registry.call_count("echo"), Some(1));
}

#[tokio::test]
async fn async_capability_is_awaited() {
    let mut registry = CapabilityRegistry::new();
    let lookup: AsyncCapabilityFn = Arc::new(|args: JsonValue| -> CapabilityFuture {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let lines = args["code"].as_str().unwrap_or_default().lines().count();
            let result: CapabilityResult = Ok(json!({ "lines": lines }));
            result
        })
    });
    registry
        .register_async(
            CapabilitySchema::new("count_lines", "Counts lines of code")
                .with_parameter(ParameterSpec::new("code", ParameterType::String).required()),
            lookup,
        )
        .unwrap();

    let result = registry
        .call("count_lines", json!({ "code": "a\nb\nc" }))
        .await
        .unwrap();
    assert_eq!(result["lines"], 3);
}

#[test]
fn duplicate_names_are_rejected() {
    let mut registry = registry_with_echo();
    let err = registry
        .register_sync(echo_schema("echo"), |_| Ok(json!(null)))
        .unwrap_err();
    assert_eq!(err, RegistryError::Duplicate("echo".into()));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn unknown_capability_is_not_found() {
    let registry = registry_with_echo();
    assert_eq!(
        registry.call("missing", json!({})).await,
        Err(RegistryError::NotFound("missing".into()))
    );
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_function() {
    let registry = registry_with_echo();

    let err = registry.call("echo", json!({})).await.unwrap_err();
    assert!(matches!(err, RegistryError::InvalidArguments { ref name, .. } if name == "echo"));

    let err = registry.call("echo", json!({ "text": 42 })).await.unwrap_err();
    assert!(err.to_string().contains("'text'"));

    assert_eq!(registry.call_count("echo"), Some(0));
}

#[tokio::test]
async fn function_errors_are_reported_as_failures() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_sync(CapabilitySchema::new("explode", "Always fails"), |_| {
            Err("compiler not installed".into())
        })
        .unwrap();

    let err = registry.call("explode", json!({})).await.unwrap_err();
    assert_eq!(
        err,
        RegistryError::Failed {
            name: "explode".into(),
            message: "compiler not installed".into(),
        }
    );
    assert_eq!(registry.call_count("explode"), Some(1));
}

#[test]
fn definitions_are_listed_by_name() {
    let mut registry = CapabilityRegistry::new();
    for name in ["zeta", "alpha", "mid"] {
        registry
            .register_sync(echo_schema(name), |args| Ok(args))
            .unwrap();
    }

    assert_eq!(registry.names(), vec!["alpha", "mid", "zeta"]);
    let definitions = registry.function_definitions();
    let listed: Vec<_> = definitions
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(listed, vec!["alpha", "mid", "zeta"]);
    assert_eq!(definitions[0]["parameters"]["required"], json!(["text"]));
}

#[test]
fn unregister_returns_the_schema() {
    let mut registry = registry_with_echo();
    let schema = registry.unregister("echo").unwrap();
    assert_eq!(schema.name, "echo");
    assert!(!registry.contains("echo"));
    assert!(registry.is_empty());
    assert_eq!(registry.call_count("echo"), None);
}
