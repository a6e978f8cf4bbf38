//! Built-in tools the model may call, and their dispatch.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::transcript::Message;
use crate::protocol::client_events::ClientMessage;
use crate::protocol::models::{FunctionCall, FunctionDeclaration, ToolDeclaration};
use crate::{Error, Result};

pub const SUGGEST_EDIT: &str = "suggestEdit";
pub const ROLL_CHECK: &str = "rollCheck";

const DEFAULT_SIDES: u32 = 20;

fn default_sides() -> u32 {
    DEFAULT_SIDES
}

/// Proposed change to the shared document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SuggestEditArgs {
    /// Why the edit improves the scene.
    pub rationale: String,
    /// The text to insert.
    pub text: String,
    /// What sort of edit this is, e.g. dialogue, action or description.
    pub kind: String,
}

/// A dice roll resolving an uncertain action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RollCheckArgs {
    /// Number of faces on the die.
    #[serde(default = "default_sides")]
    pub sides: u32,
    /// What the roll is for, e.g. Stealth.
    #[serde(default)]
    pub reason: String,
}

/// The closed set of tools, decoded from `{name, args}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "name", content = "args")]
pub enum ToolInvocation {
    #[serde(rename = "suggestEdit")]
    SuggestEdit(SuggestEditArgs),
    #[serde(rename = "rollCheck")]
    RollCheck(RollCheckArgs),
}

impl ToolInvocation {
    /// Decode a function call. Unknown names and malformed arguments are
    /// protocol errors.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] if the call does not match a known tool.
    #[allow(clippy::result_large_err)]
    pub fn from_call(call: &FunctionCall) -> Result<Self> {
        let args = if call.args.is_null() {
            json!({})
        } else {
            call.args.clone()
        };
        let tagged = json!({ "name": call.name, "args": args });
        Self::deserialize(tagged)
            .map_err(|e| Error::Protocol(format!("tool call {} ({}): {e}", call.name, call.id)))
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SuggestEdit(_) => SUGGEST_EDIT,
            Self::RollCheck(_) => ROLL_CHECK,
        }
    }
}

/// Edit proposal handed to the application, which accepts or discards it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub rationale: String,
    pub text: String,
    pub kind: String,
}

impl From<SuggestEditArgs> for Suggestion {
    fn from(args: SuggestEditArgs) -> Self {
        Self {
            rationale: args.rationale,
            text: args.text,
            kind: args.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollOutcome {
    pub result: u32,
    pub sides: u32,
    pub reason: String,
}

impl RollOutcome {
    /// System message recording the roll in the conversation.
    #[must_use]
    pub fn to_message(&self) -> Message {
        let text = if self.reason.is_empty() {
            format!("Rolled d{}: {}", self.sides, self.result)
        } else {
            format!("{} check, d{}: {}", self.reason, self.sides, self.result)
        };
        Message::system(text).with_data(json!({
            "result": self.result,
            "sides": self.sides,
            "reason": self.reason,
        }))
    }
}

/// Local effect of a handled call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEffect {
    Suggestion(Suggestion),
    Roll(RollOutcome),
}

/// A handled call: the effect to apply locally and the payload for the
/// service.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub id: String,
    pub name: String,
    pub response: Value,
    pub effect: ToolEffect,
}

impl ToolOutcome {
    #[must_use]
    pub fn response_message(&self) -> ClientMessage {
        ClientMessage::tool_response(&self.id, &self.name, self.response.clone())
    }
}

/// Error payload for a call that could not be handled, so the service still
/// gets exactly one response for the id.
#[must_use]
pub fn error_response(call: &FunctionCall, err: &Error) -> ClientMessage {
    ClientMessage::tool_response(&call.id, &call.name, json!({ "error": err.to_string() }))
}

/// Declarations advertised in the setup message.
///
/// # Errors
/// Returns an error if a schema fails to serialize.
#[allow(clippy::result_large_err)]
pub fn declarations() -> Result<Vec<ToolDeclaration>> {
    let suggest = FunctionDeclaration {
        name: SUGGEST_EDIT.to_string(),
        description: Some(
            "Propose an edit to the shared script. The writer accepts or discards it.".to_string(),
        ),
        parameters: parameters::<SuggestEditArgs>()?,
    };
    let roll = FunctionDeclaration {
        name: ROLL_CHECK.to_string(),
        description: Some(
            "Roll a die to resolve an uncertain action and get the result back.".to_string(),
        ),
        parameters: parameters::<RollCheckArgs>()?,
    };
    Ok(vec![ToolDeclaration {
        function_declarations: vec![suggest, roll],
    }])
}

#[allow(clippy::result_large_err)]
fn parameters<T: JsonSchema>() -> Result<Value> {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(&schema.schema)?;
    // The service accepts the OpenAPI subset; drop the JSON Schema markers.
    if let Some(map) = value.as_object_mut() {
        map.remove("$schema");
        map.remove("title");
    }
    Ok(value)
}

/// Executes tool calls in arrival order. Each id may have one call in flight;
/// the id is released by [`ToolDispatcher::resolve`] once the response is on
/// the wire.
#[derive(Debug)]
pub struct ToolDispatcher {
    rng: StdRng,
    in_flight: HashSet<String>,
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic rolls.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    #[must_use]
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            in_flight: HashSet::new(),
        }
    }

    /// Handle one call.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] for an unknown tool, bad arguments or an id
    /// that is already in flight.
    #[allow(clippy::result_large_err)]
    pub fn handle(&mut self, call: &FunctionCall) -> Result<ToolOutcome> {
        if self.is_in_flight(&call.id) {
            return Err(Error::Protocol(format!(
                "tool call id {} is already in flight",
                call.id
            )));
        }
        let invocation = ToolInvocation::from_call(call)?;
        let (response, effect) = match invocation {
            ToolInvocation::SuggestEdit(args) => {
                (json!({ "result": "ok" }), ToolEffect::Suggestion(args.into()))
            }
            ToolInvocation::RollCheck(args) => {
                let result = self.roll(args.sides)?;
                let outcome = RollOutcome {
                    result,
                    sides: args.sides,
                    reason: args.reason,
                };
                (json!({ "result": result }), ToolEffect::Roll(outcome))
            }
        };
        self.in_flight.insert(call.id.clone());
        tracing::debug!(id = %call.id, name = %call.name, "Tool call handled");
        Ok(ToolOutcome {
            id: call.id.clone(),
            name: call.name.clone(),
            response,
            effect,
        })
    }

    /// Mark a call as resolved. Returns `false` if the id was not in flight.
    pub fn resolve(&mut self, id: &str) -> bool {
        self.in_flight.remove(id)
    }

    /// Drop calls the service withdrew.
    pub fn cancel(&mut self, ids: &[String]) {
        for id in ids {
            if self.in_flight.remove(id) {
                tracing::debug!(%id, "Tool call cancelled");
            }
        }
    }

    #[must_use]
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Uniform roll in `1..=sides`.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] if `sides` is zero.
    #[allow(clippy::result_large_err)]
    pub fn roll(&mut self, sides: u32) -> Result<u32> {
        if sides == 0 {
            return Err(Error::Protocol("a die needs at least one side".to_string()));
        }
        Ok(self.rng.gen_range(1..=sides))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, args: Value) -> FunctionCall {
        FunctionCall {
            id: id.to_string(),
            name: name.to_string(),
            args,
        }
    }

    #[test]
    fn suggest_edit_yields_suggestion_and_ack() {
        let mut dispatcher = ToolDispatcher::with_seed(1);
        let outcome = dispatcher
            .handle(&call(
                "c1",
                SUGGEST_EDIT,
                json!({"rationale": "tension", "text": "The door creaks.", "kind": "action"}),
            ))
            .unwrap();
        assert_eq!(outcome.response, json!({"result": "ok"}));
        match outcome.effect {
            ToolEffect::Suggestion(s) => assert_eq!(s.text, "The door creaks."),
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[test]
    fn roll_check_defaults_to_d20() {
        let mut dispatcher = ToolDispatcher::with_seed(7);
        let outcome = dispatcher
            .handle(&call("c2", ROLL_CHECK, json!({"reason": "Stealth"})))
            .unwrap();
        let ToolEffect::Roll(roll) = outcome.effect else {
            panic!("expected a roll");
        };
        assert_eq!(roll.sides, 20);
        assert!((1..=20).contains(&roll.result));
        assert_eq!(outcome.response, json!({"result": roll.result}));
        let message = roll.to_message();
        assert_eq!(message.structured_data.unwrap()["reason"], "Stealth");
    }

    #[test]
    fn unknown_tool_is_a_protocol_error() {
        let mut dispatcher = ToolDispatcher::with_seed(1);
        let err = dispatcher
            .handle(&call("c3", "visualizeScene", json!({})))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(!err.is_fatal());
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn duplicate_id_is_rejected_until_resolved() {
        let mut dispatcher = ToolDispatcher::with_seed(1);
        let roll = call("dup", ROLL_CHECK, json!({"sides": 6, "reason": "Luck"}));
        dispatcher.handle(&roll).unwrap();
        assert!(dispatcher.handle(&roll).is_err());
        assert!(dispatcher.resolve("dup"));
        assert!(dispatcher.handle(&roll).is_ok());
    }

    #[test]
    fn zero_sided_die_is_rejected() {
        let mut dispatcher = ToolDispatcher::with_seed(1);
        assert!(dispatcher.roll(0).is_err());
        assert_eq!(dispatcher.roll(1).unwrap(), 1);
    }

    #[test]
    fn declarations_describe_both_tools() {
        let decls = declarations().unwrap();
        let names: Vec<_> = decls[0]
            .function_declarations
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec![SUGGEST_EDIT, ROLL_CHECK]);
        let roll = &decls[0].function_declarations[1].parameters;
        assert!(roll["properties"]["sides"].is_object());
        assert!(roll.get("$schema").is_none());
    }
}
