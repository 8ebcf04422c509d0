// # Config Flow Trait
//
// A config flow is a short sequence of form submissions that validates a
// device's reachability (and credentials, where the device has any) and ends
// by producing a config entry.
//
// Flows are driven by the `FlowManager`:
//
// ```text
// start("bluesound")      -> step("user", None)            -> ShowForm
// configure(id, {host})   -> step("user", Some({host}))    -> ShowForm{errors} | CreateEntry | Abort
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;

/// Id of the first step of every flow
pub const STEP_USER: &str = "user";

/// Form error key used for errors not tied to a single field
pub const BASE_ERROR: &str = "base";

/// Type of a form field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text
    String,
    /// Secret text, never echoed back
    Password,
    /// Integer
    Integer,
    /// Boolean
    Boolean,
}

/// One input field of a form step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    /// Field key in the submitted input
    pub name: String,
    /// Field type
    pub kind: FieldKind,
    /// Whether a value must be provided
    pub required: bool,
    /// Value used when the field is omitted
    pub default: Option<serde_json::Value>,
}

impl FormField {
    /// A required field
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
        }
    }

    /// An optional field
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
        }
    }

    /// Set the default value
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Result of a single flow step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    /// Ask the user for (more) input
    ShowForm {
        /// Step the input will be submitted to
        step_id: String,
        /// Fields to show
        fields: Vec<FormField>,
        /// Field name (or `base`) -> error key
        errors: HashMap<String, String>,
    },

    /// Validation succeeded; persist a config entry
    CreateEntry {
        /// Entry title
        title: String,
        /// Device unique id
        unique_id: Option<String>,
        /// Integration-specific data
        data: serde_json::Value,
    },

    /// The flow ended without creating an entry
    Abort {
        /// Reason key (e.g. `already_configured`)
        reason: String,
    },
}

impl FlowResult {
    /// Show a form without errors
    pub fn form(step_id: impl Into<String>, fields: Vec<FormField>) -> Self {
        FlowResult::ShowForm {
            step_id: step_id.into(),
            fields,
            errors: HashMap::new(),
        }
    }

    /// Show a form again with the base error derived from `err`
    ///
    /// Errors that map to `unknown` are logged since the user only sees
    /// the generic key.
    pub fn form_error(
        step_id: impl Into<String>,
        fields: Vec<FormField>,
        err: &crate::Error,
    ) -> Self {
        let key = err.form_error_key();
        if key == "unknown" {
            error!("Unexpected error in config flow: {}", err);
        }
        let mut errors = HashMap::new();
        errors.insert(BASE_ERROR.to_string(), key.to_string());
        FlowResult::ShowForm {
            step_id: step_id.into(),
            fields,
            errors,
        }
    }

    /// Abort with a reason
    pub fn abort(reason: impl Into<String>) -> Self {
        FlowResult::Abort {
            reason: reason.into(),
        }
    }
}

/// Trait for integration config flows
///
/// A flow instance is created per setup attempt and may keep state between
/// steps (e.g. what the first step discovered).
#[async_trait]
pub trait ConfigFlow: Send {
    /// Handle a step
    ///
    /// `input` is `None` when the step is first shown and `Some` when the
    /// user submits the form. Validation failures should be reported as
    /// `FlowResult::ShowForm` with errors, not as `Err`; an `Err` aborts
    /// the whole flow.
    async fn step(
        &mut self,
        step_id: &str,
        input: Option<serde_json::Value>,
    ) -> Result<FlowResult, crate::Error>;
}

/// Apply field defaults and check required fields of a submitted form
pub fn apply_defaults(
    fields: &[FormField],
    input: &serde_json::Value,
) -> Result<serde_json::Value, crate::Error> {
    let mut object = match input {
        serde_json::Value::Object(map) => map.clone(),
        _ => return Err(crate::Error::invalid_input("Form input must be an object")),
    };

    for field in fields {
        let present = object.get(&field.name).is_some_and(|v| !v.is_null());
        if present {
            continue;
        }
        if let Some(default) = &field.default {
            object.insert(field.name.clone(), default.clone());
        } else if field.required {
            return Err(crate::Error::invalid_input(format!(
                "Missing required field: {}",
                field.name
            )));
        }
    }

    Ok(serde_json::Value::Object(object))
}
