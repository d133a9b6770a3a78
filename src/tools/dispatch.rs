//! Tool call dispatcher - runs creative actions for model tool calls

use std::sync::Arc;

use super::{CreativeCommand, TOOL_RESULT_COMPLETED, ToolInvocation};
use crate::realtime::FunctionResponse;
use crate::studio::CreativeActionService;

/// Routes tool invocations to the creative action service
#[derive(Clone)]
pub struct ToolCallDispatcher {
    service: Arc<CreativeActionService>,
}

impl ToolCallDispatcher {
    #[must_use]
    pub const fn new(service: Arc<CreativeActionService>) -> Self {
        Self { service }
    }

    /// Run the action behind `invocation` to completion and build its
    /// acknowledgement
    ///
    /// Action failures, unknown tools and missing prompts are logged; the
    /// invocation is still acknowledged as completed so the model never
    /// waits on it.
    pub async fn dispatch(&self, invocation: &ToolInvocation) -> FunctionResponse {
        tracing::info!(id = %invocation.id, tool = %invocation.name, "tool call received");

        match CreativeCommand::from_invocation(invocation) {
            Ok(CreativeCommand::Generate { prompt }) => {
                if let Err(e) = self.service.generate(&prompt).await {
                    tracing::warn!(tool = %invocation.name, error = %e, "image generation failed");
                }
            }
            Ok(CreativeCommand::Edit { instruction }) => {
                match self.service.edit(&instruction).await {
                    Ok(Some(_)) => {}
                    Ok(None) => tracing::debug!("edit requested with no current image"),
                    Err(e) => {
                        tracing::warn!(tool = %invocation.name, error = %e, "image edit failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(tool = %invocation.name, error = %e, "ignoring tool call");
            }
        }

        FunctionResponse {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            result: TOOL_RESULT_COMPLETED.to_string(),
        }
    }
}

impl std::fmt::Debug for ToolCallDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallDispatcher").finish_non_exhaustive()
    }
}
