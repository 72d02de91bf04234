use crate::registry::{ToolError, ToolHandler, ToolOutput};
use crate::tool_protocol::{Arguments, ToolDescriptor};
use async_trait::async_trait;
use serde_json::json;

/// Reports the server's local time. Takes no arguments.
pub struct ClockTool;

impl ClockTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("time", "Current local system time of the tool server")
    }
}

#[async_trait]
impl ToolHandler for ClockTool {
    async fn call(&self, _arguments: Arguments) -> Result<ToolOutput, ToolError> {
        let now = chrono::Local::now();
        let local = now.format("%Y-%m-%d %H:%M:%S").to_string();
        Ok(ToolOutput::text(format!("Local system time: {}", local))
            .with_structured(json!({ "local_time": local, "rfc3339": now.to_rfc3339() })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_local_time() {
        let output = ClockTool.call(Arguments::new()).await.unwrap();
        assert!(output.text.starts_with("Local system time: "));
        // "YYYY-MM-DD HH:MM:SS"
        assert_eq!(output.text.len(), "Local system time: ".len() + 19);
        assert!(output.structured.unwrap().get("rfc3339").is_some());
    }
}
