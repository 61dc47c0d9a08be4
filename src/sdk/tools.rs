use crate::protocol::models::Tool;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<Result<Value>> + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub call_id: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub output: Value,
}

/// Result of running a tool under the session's timeout and panic guard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolOutcome {
    Resolved(String),
    Failed(String),
}

impl ToolOutcome {
    /// Text sent back as the `function_call_output` item.
    #[must_use]
    pub fn output(&self) -> String {
        match self {
            Self::Resolved(output) => output.clone(),
            Self::Failed(message) => serde_json::json!({ "error": message }).to_string(),
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// A tool implemented as a type rather than a closure.
#[async_trait]
pub trait ToolSpec: Send + Sync + 'static {
    type Args: DeserializeOwned + JsonSchema + Send + 'static;
    type Output: Serialize + Send + 'static;

    const NAME: &'static str;

    fn description(&self) -> Option<String> {
        None
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output>;
}

/// Named async callables the model may invoke.
///
/// Cloning shares the handlers; definitions are copied.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    defs: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolHandler>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("defs", &self.defs)
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.defs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registers a tool with a raw JSON handler. A tool with the same name is replaced.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the tool name is empty.
    #[allow(clippy::result_large_err)]
    pub fn add<F, Fut>(&mut self, tool: Tool, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let Tool::Function {
            name,
            description,
            parameters,
        } = tool;
        let handler: ToolHandler = Arc::new(move |value| Box::pin(handler(value)));
        self.insert(
            ToolDefinition {
                name,
                description,
                parameters,
            },
            handler,
        )
    }

    /// Registers a typed tool; the argument schema is derived from `TArgs`.
    ///
    /// # Errors
    /// Returns an error if the name is empty or the schema cannot be serialized.
    #[allow(clippy::result_large_err)]
    pub fn tool<TArgs, TResp, F, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        self.typed(name, None, handler)
    }

    /// # Errors
    /// Same as [`ToolRegistry::tool`].
    #[allow(clippy::result_large_err)]
    pub fn tool_with_description<TArgs, TResp, F, Fut>(
        &mut self,
        name: &str,
        description: impl Into<String>,
        handler: F,
    ) -> Result<()>
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        self.typed(name, Some(description.into()), handler)
    }

    /// # Errors
    /// Same as [`ToolRegistry::tool`].
    #[allow(clippy::result_large_err)]
    pub fn register<T: ToolSpec>(&mut self, spec: T) -> Result<()> {
        let description = spec.description();
        let spec = Arc::new(spec);
        self.typed(T::NAME, description, move |args: T::Args| {
            let spec = Arc::clone(&spec);
            async move { spec.call(args).await }
        })
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.defs.retain(|def| def.name != name);
        self.handlers.remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.defs.clear();
        self.handlers.clear();
    }

    /// Protocol-level definitions for `session.update`.
    #[must_use]
    pub fn as_tools(&self) -> Vec<Tool> {
        self.defs
            .iter()
            .map(|def| Tool::Function {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            })
            .collect()
    }

    /// Dispatch a tool call to the registered handler.
    ///
    /// # Errors
    /// Returns `ToolNotFound` for an unregistered name, or whatever the handler returns.
    pub async fn dispatch(&self, call: ToolCall) -> Result<ToolResult> {
        let handler = self
            .handlers
            .get(&call.name)
            .cloned()
            .ok_or_else(|| Error::ToolNotFound(call.name.clone()))?;
        let output = handler(call.arguments).await?;
        Ok(ToolResult {
            call_id: call.call_id,
            output,
        })
    }

    /// Runs a call to completion, converting every failure mode (unknown
    /// tool, handler error, panic, timeout) into [`ToolOutcome::Failed`].
    pub async fn invoke(&self, call: ToolCall, timeout: Duration) -> ToolOutcome {
        let name = call.name.clone();
        let run = AssertUnwindSafe(self.dispatch(call)).catch_unwind();
        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(Ok(result))) => ToolOutcome::Resolved(match result.output {
                Value::String(text) => text,
                other => other.to_string(),
            }),
            Ok(Ok(Err(Error::ToolExecution { message, .. }))) => ToolOutcome::Failed(message),
            Ok(Ok(Err(err))) => ToolOutcome::Failed(err.to_string()),
            Ok(Err(_)) => {
                tracing::error!(tool = %name, "tool handler panicked");
                ToolOutcome::Failed(format!("tool {name} panicked"))
            }
            Err(_) => {
                tracing::warn!(tool = %name, ?timeout, "tool handler timed out");
                ToolOutcome::Failed(format!("tool {name} timed out after {timeout:?}"))
            }
        }
    }

    #[allow(clippy::result_large_err)]
    fn typed<TArgs, TResp, F, Fut>(
        &mut self,
        name: &str,
        description: Option<String>,
        handler: F,
    ) -> Result<()>
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        let parameters = serde_json::to_value(schemars::schema_for!(TArgs))?;
        let tool_name = name.to_string();
        let user_handler = Arc::new(handler);
        let handler: ToolHandler = Arc::new(move |value: Value| -> BoxFuture<Result<Value>> {
            let user_handler = Arc::clone(&user_handler);
            let tool_name = tool_name.clone();
            Box::pin(async move {
                let args: TArgs = serde_json::from_value(value).map_err(|e| Error::ToolExecution {
                    name: tool_name,
                    message: format!("invalid arguments: {e}"),
                })?;
                let resp = user_handler(args).await?;
                Ok(serde_json::to_value(resp)?)
            })
        });
        self.insert(
            ToolDefinition {
                name: name.to_string(),
                description,
                parameters,
            },
            handler,
        )
    }

    #[allow(clippy::result_large_err)]
    fn insert(&mut self, def: ToolDefinition, handler: ToolHandler) -> Result<()> {
        if def.name.trim().is_empty() {
            return Err(Error::InvalidConfig("tool name cannot be empty".to_string()));
        }
        self.remove(&def.name);
        self.handlers.insert(def.name.clone(), handler);
        self.defs.push(def);
        Ok(())
    }
}

/// Parses streamed argument text. Anything that is not a JSON object becomes `{}`.
#[must_use]
pub fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) | Err(_) => {
            if !raw.trim().is_empty() {
                tracing::warn!(arguments = raw, "tool arguments are not a JSON object, using {{}}");
            }
            Value::Object(Map::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct WeatherArgs {
        city: String,
    }

    #[derive(Serialize)]
    struct Forecast {
        city: String,
        sky: &'static str,
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            call_id: "call_1".to_string(),
            arguments,
        }
    }

    fn weather_registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools
            .tool_with_description("get_weather", "Current weather", |args: WeatherArgs| async move {
                Ok(Forecast {
                    city: args.city,
                    sky: "sunny",
                })
            })
            .unwrap();
        tools
    }

    #[test]
    fn typed_tool_exposes_derived_schema() {
        let tools = weather_registry().as_tools();
        assert_eq!(tools.len(), 1);
        let Tool::Function {
            name,
            description,
            parameters,
        } = &tools[0];
        assert_eq!(name, "get_weather");
        assert_eq!(description.as_deref(), Some("Current weather"));
        assert_eq!(parameters["properties"]["city"]["type"], "string");
    }

    #[test]
    fn re_registering_replaces_definition() {
        let mut tools = weather_registry();
        tools
            .add(
                Tool::Function {
                    name: "get_weather".to_string(),
                    description: None,
                    parameters: json!({"type": "object"}),
                },
                |_| async { Ok(json!("rain")) },
            )
            .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools.definitions()[0].description, None);
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut tools = ToolRegistry::new();
        let err = tools
            .tool("", |_: WeatherArgs| async { Ok("x") })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_fails() {
        let err = ToolRegistry::new()
            .dispatch(call("missing", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn invoke_serializes_structured_output() {
        let outcome = weather_registry()
            .invoke(call("get_weather", json!({"city": "NY"})), Duration::from_secs(1))
            .await;
        let ToolOutcome::Resolved(output) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        let value: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value, json!({"city": "NY", "sky": "sunny"}));
    }

    #[tokio::test]
    async fn invoke_passes_string_output_verbatim() {
        let mut tools = ToolRegistry::new();
        tools
            .tool("echo", |args: WeatherArgs| async move { Ok(args.city) })
            .unwrap();
        let outcome = tools
            .invoke(call("echo", json!({"city": "Oslo"})), Duration::from_secs(1))
            .await;
        assert_eq!(outcome, ToolOutcome::Resolved("Oslo".to_string()));
    }

    #[tokio::test]
    async fn invoke_reports_handler_error_message() {
        let mut tools = ToolRegistry::new();
        tools
            .tool("broken", |_: WeatherArgs| async {
                Err::<String, _>(Error::ToolExecution {
                    name: "broken".to_string(),
                    message: "backend down".to_string(),
                })
            })
            .unwrap();
        let outcome = tools
            .invoke(call("broken", json!({"city": "NY"})), Duration::from_secs(1))
            .await;
        assert_eq!(outcome, ToolOutcome::Failed("backend down".to_string()));
        assert_eq!(outcome.output(), r#"{"error":"backend down"}"#);
    }

    #[tokio::test]
    async fn invoke_catches_panics() {
        let mut tools = ToolRegistry::new();
        tools
            .add(
                Tool::Function {
                    name: "boom".to_string(),
                    description: None,
                    parameters: json!({"type": "object"}),
                },
                |_| async {
                    let missing: Option<Value> = None;
                    Ok(missing.expect("handler bug"))
                },
            )
            .unwrap();
        let outcome = tools
            .invoke(call("boom", json!({})), Duration::from_secs(1))
            .await;
        assert!(outcome.is_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_times_out() {
        let mut tools = ToolRegistry::new();
        tools
            .tool("slow", |_: WeatherArgs| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("late")
            })
            .unwrap();
        let outcome = tools
            .invoke(call("slow", json!({"city": "NY"})), Duration::from_secs(1))
            .await;
        let ToolOutcome::Failed(message) = outcome else {
            panic!("expected timeout");
        };
        assert!(message.contains("timed out"));
    }

    struct Add;

    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    #[async_trait]
    impl ToolSpec for Add {
        type Args = AddArgs;
        type Output = i64;

        const NAME: &'static str = "add";

        fn description(&self) -> Option<String> {
            Some("Adds two integers".to_string())
        }

        async fn call(&self, args: AddArgs) -> Result<i64> {
            Ok(args.a + args.b)
        }
    }

    #[tokio::test]
    async fn tool_spec_registration() {
        let mut tools = ToolRegistry::new();
        tools.register(Add).unwrap();
        assert!(tools.contains("add"));
        let result = tools
            .dispatch(call("add", json!({"a": 2, "b": 3})))
            .await
            .unwrap();
        assert_eq!(result.output, json!(5));
        assert_eq!(result.call_id, "call_1");
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        assert_eq!(parse_arguments("{\"city\":"), json!({}));
        assert_eq!(parse_arguments("[1,2]"), json!({}));
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("{\"city\":\"NY\"}"), json!({"city": "NY"}));
    }
}
