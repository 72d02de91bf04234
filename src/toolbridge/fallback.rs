//! Fallback Coordinator
//!
//! Client-side policy that replaces a failed or unavailable tool with a designated secondary,
//! once. A query therefore costs at most two tool calls, and the secondary's result is final
//! even when it is itself an error.

use crate::decision::topic_arguments;
use crate::tool_protocol::{Arguments, ToolCallResult, ToolDescriptor, ToolErrorKind, ToolProtocol};

/// Condition under which a primary result is replaced.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackTrigger {
    /// The result failed with this kind.
    Kind(ToolErrorKind),
    /// The result failed and its text contains this fragment.
    TextContains(String),
}

impl FallbackTrigger {
    fn matches(&self, result: &ToolCallResult) -> bool {
        match self {
            FallbackTrigger::Kind(kind) => result.error_kind == Some(*kind),
            FallbackTrigger::TextContains(fragment) => result.text().contains(fragment.as_str()),
        }
    }
}

/// Default triggers: every upstream-side failure of the primary.
pub fn default_triggers() -> Vec<FallbackTrigger> {
    [
        ToolErrorKind::NotConfigured,
        ToolErrorKind::Unauthorized,
        ToolErrorKind::NotFound,
        ToolErrorKind::Upstream,
        ToolErrorKind::Timeout,
    ]
    .into_iter()
    .map(FallbackTrigger::Kind)
    .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackPlan {
    pub primary: String,
    pub secondary: String,
    pub triggers: Vec<FallbackTrigger>,
}

impl FallbackPlan {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
            triggers: default_triggers(),
        }
    }

    pub fn with_triggers(mut self, triggers: Vec<FallbackTrigger>) -> Self {
        self.triggers = triggers;
        self
    }

    /// Whether `result` from the primary should be replaced.
    ///
    /// Successes never trigger, and neither do transport failures: the secondary would travel
    /// the same broken path.
    pub fn should_fall_back(&self, result: &ToolCallResult) -> bool {
        if !result.is_error || result.error_kind == Some(ToolErrorKind::Transport) {
            return false;
        }
        self.triggers.iter().any(|trigger| trigger.matches(result))
    }
}

/// Record of a substitution.
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// What the coordinator ended up with.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub result: ToolCallResult,
    pub substitution: Option<Substitution>,
    /// Tool calls made, 1 or 2.
    pub calls: usize,
}

/// Runs a decided tool call under the configured fallback plans.
#[derive(Debug, Clone)]
pub struct FallbackCoordinator {
    plans: Vec<FallbackPlan>,
}

impl Default for FallbackCoordinator {
    /// weather → wikipedia.
    fn default() -> Self {
        Self::new(vec![FallbackPlan::new("weather", "wikipedia")])
    }
}

impl FallbackCoordinator {
    pub fn new(plans: Vec<FallbackPlan>) -> Self {
        Self { plans }
    }

    /// No fallbacks at all.
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    pub fn plan_for(&self, primary: &str) -> Option<&FallbackPlan> {
        self.plans.iter().find(|plan| plan.primary == primary)
    }

    /// Call `tool` with `arguments`, substituting the plan's secondary when the tool is
    /// advertised unavailable or its result matches a trigger. `topic` feeds the secondary.
    pub async fn run(
        &self,
        protocol: &dyn ToolProtocol,
        tool: &str,
        arguments: Arguments,
        topic: &str,
        catalog: &[ToolDescriptor],
    ) -> ToolOutcome {
        let plan = self.plan_for(tool).and_then(|plan| {
            catalog
                .iter()
                .find(|d| d.name == plan.secondary)
                .map(|secondary| (plan, secondary))
        });
        let unavailable = catalog
            .iter()
            .find(|d| d.name == tool)
            .is_some_and(|d| !d.available);

        if let (Some((plan, secondary)), true) = (plan, unavailable) {
            log::warn!(
                "'{}' is not configured, using '{}' instead",
                plan.primary,
                plan.secondary
            );
            let result = call(protocol, &secondary.name, topic_arguments(secondary, topic)).await;
            return substituted(plan, result, ToolErrorKind::NotConfigured.to_string(), topic, 1);
        }

        let result = call(protocol, tool, arguments).await;
        match plan {
            Some((plan, secondary)) if plan.should_fall_back(&result) => {
                let reason = result
                    .error_kind
                    .map(|kind| kind.to_string())
                    .unwrap_or_else(|| "error".to_string());
                log::warn!(
                    "'{}' failed ({}): {}. Falling back to '{}'",
                    plan.primary,
                    reason,
                    result.text(),
                    plan.secondary
                );
                let result =
                    call(protocol, &secondary.name, topic_arguments(secondary, topic)).await;
                substituted(plan, result, reason, topic, 2)
            }
            _ => ToolOutcome {
                result,
                substitution: None,
                calls: 1,
            },
        }
    }
}

fn substituted(
    plan: &FallbackPlan,
    result: ToolCallResult,
    reason: String,
    topic: &str,
    calls: usize,
) -> ToolOutcome {
    let note = format!(
        "{} unavailable ({}). General information about {} from {}:",
        plan.primary, reason, topic, plan.secondary
    );
    ToolOutcome {
        result: result.annotate(&note),
        substitution: Some(Substitution {
            from: plan.primary.clone(),
            to: plan.secondary.clone(),
            reason,
        }),
        calls,
    }
}

/// One tool call; a protocol failure becomes a `transport` error result.
async fn call(protocol: &dyn ToolProtocol, name: &str, arguments: Arguments) -> ToolCallResult {
    match protocol.call_tool(name, arguments).await {
        Ok(result) => result,
        Err(e) => {
            log::error!("call to '{}' failed: {}", name, e);
            ToolCallResult::error(
                name,
                ToolErrorKind::Transport,
                format!("Tool '{}' could not be reached", name),
            )
        }
    }
}
