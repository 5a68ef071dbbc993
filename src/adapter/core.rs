//! Core adapter for built-in BeemFlow tools

use super::*;
use crate::constants::*;

/// Core adapter handles built-in BeemFlow utilities
pub struct CoreAdapter;

impl Default for CoreAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreAdapter {
    /// Create a new core adapter
    pub fn new() -> Self {
        Self
    }

    /// Execute echo tool - logs text and returns its inputs
    async fn execute_echo(&self, inputs: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let text = inputs.get("text").and_then(|v| v.as_str()).unwrap_or("");

        tracing::info!("echo: {}", text);

        // Return inputs minus the internal routing field
        Ok(inputs
            .into_iter()
            .filter(|(k, _)| k != PARAM_SPECIAL_USE)
            .collect())
    }

    /// Execute log tool - structured logging at a chosen level
    async fn execute_log(&self, inputs: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let level = inputs
            .get("level")
            .and_then(|v| v.as_str())
            .unwrap_or("info");

        let message = inputs.get("message").and_then(|v| v.as_str()).unwrap_or("");

        let context = inputs.get("context");

        macro_rules! log_with_context {
            ($level:ident) => {
                if let Some(ctx) = context {
                    tracing::$level!("{} | context: {:?}", message, ctx);
                } else {
                    tracing::$level!("{}", message);
                }
            };
        }

        match level.to_lowercase().as_str() {
            "error" => log_with_context!(error),
            "warn" | "warning" => log_with_context!(warn),
            "debug" => log_with_context!(debug),
            _ => log_with_context!(info),
        }

        let mut result = HashMap::new();
        result.insert("level".to_string(), Value::String(level.to_string()));
        result.insert("message".to_string(), Value::String(message.to_string()));
        if let Some(ctx) = context {
            result.insert("context".to_string(), ctx.clone());
        }

        Ok(result)
    }
}

#[async_trait]
impl Adapter for CoreAdapter {
    fn id(&self) -> &str {
        ADAPTER_ID_CORE
    }

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        _ctx: &ExecutionContext,
    ) -> Result<HashMap<String, Value>> {
        let use_field = inputs
            .get(PARAM_SPECIAL_USE)
            .and_then(|v| v.as_str())
            .ok_or_else(|| crate::BeemFlowError::adapter("missing __use for CoreAdapter"))?;

        match use_field {
            CORE_ECHO => self.execute_echo(inputs).await,
            CORE_LOG => self.execute_log(inputs).await,
            _ => Err(crate::BeemFlowError::adapter(format!(
                "unknown core tool: {}",
                use_field
            ))),
        }
    }
}
