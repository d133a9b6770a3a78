//! Creative tools the realtime model can call
//!
//! Three functions are advertised when a session opens: `generateImage`,
//! `editImage` and `posterLayout`. Invocations are mapped to a
//! [`CreativeCommand`] and run by the [`ToolCallDispatcher`].

mod dispatch;

use serde::Deserialize;
use serde_json::{Value, json};

pub use dispatch::ToolCallDispatcher;

use crate::realtime::FunctionDeclaration;
use crate::{Error, Result};

pub const GENERATE_IMAGE: &str = "generateImage";
pub const EDIT_IMAGE: &str = "editImage";
pub const POSTER_LAYOUT: &str = "posterLayout";

/// Result reported back to the model for every acknowledged invocation
pub const TOOL_RESULT_COMPLETED: &str = "completed";

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolInvocation {
    fn string_arg(&self, key: &str) -> Option<&str> {
        self.args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// What an invocation asks the studio to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreativeCommand {
    Generate { prompt: String },
    Edit { instruction: String },
}

impl CreativeCommand {
    /// Map an invocation to a command
    ///
    /// `posterLayout` becomes an edit whose instruction embeds the requested
    /// text; without `textContent` it is a plain edit.
    ///
    /// # Errors
    ///
    /// Returns error for unknown tool names or a missing `prompt`
    pub fn from_invocation(invocation: &ToolInvocation) -> Result<Self> {
        let prompt = || {
            invocation.string_arg("prompt").ok_or_else(|| {
                Error::Protocol(format!("{} called without a prompt", invocation.name))
            })
        };

        match invocation.name.as_str() {
            GENERATE_IMAGE => Ok(Self::Generate {
                prompt: prompt()?.to_string(),
            }),
            EDIT_IMAGE => Ok(Self::Edit {
                instruction: prompt()?.to_string(),
            }),
            POSTER_LAYOUT => {
                let prompt = prompt()?;
                let prompt = match invocation.string_arg("textContent") {
                    Some(text) => format!("{prompt}. Text to add: {text}"),
                    None => prompt.to_string(),
                };
                Ok(Self::Edit { instruction: prompt })
            }
            other => Err(Error::Protocol(format!("unknown tool: {other}"))),
        }
    }
}

/// Function declarations advertised to the realtime model
#[must_use]
pub fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: GENERATE_IMAGE.to_string(),
            description: "Generate a brand new image from a detailed visual description."
                .to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "prompt": {
                        "type": "STRING",
                        "description": "Detailed description of the image to create"
                    }
                },
                "required": ["prompt"]
            }),
        },
        FunctionDeclaration {
            name: EDIT_IMAGE.to_string(),
            description: "Modify the image currently on the canvas.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "prompt": {
                        "type": "STRING",
                        "description": "What to change in the current image"
                    }
                },
                "required": ["prompt"]
            }),
        },
        FunctionDeclaration {
            name: POSTER_LAYOUT.to_string(),
            description: "Lay out text on the current image as a poster or flyer.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "prompt": {
                        "type": "STRING",
                        "description": "How the poster should look"
                    },
                    "textContent": {
                        "type": "STRING",
                        "description": "Exact text to render on the poster"
                    }
                },
                "required": ["prompt", "textContent"]
            }),
        },
    ]
}
