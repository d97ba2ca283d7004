use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::graph::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A structured tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Data { value: Value },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl TurnContent {
    /// Number of content items used by the token estimator: one for scalar
    /// text, one per part for composite content.
    pub fn item_count(&self) -> usize {
        match self {
            Self::Text(_) => 1,
            Self::Parts(parts) => parts.len(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::Data { value } => value.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

impl Default for TurnContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Turn {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: TurnContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self { tool_calls, ..Self::text(Role::Assistant, content) }
    }

    /// Result turn for the request identified by `tool_call_id`. The payload is
    /// kept as structured data.
    pub fn tool_result(tool_call_id: impl Into<String>, payload: Value) -> Self {
        Self {
            role: Role::Tool,
            content: TurnContent::Parts(vec![ContentPart::Data { value: payload }]),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn text_content(&self) -> String {
        self.content.as_text()
    }
}

/// Conversation state for one session. Owned by the graph executor; nodes only
/// see it through `view()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    history: Vec<Turn>,
    pub current_node: NodeId,
    /// Consecutive invocations of `current_node` reached through a `goto` to
    /// itself. Reset whenever control moves to another node.
    pub reentries: u32,
}

impl ConversationState {
    pub fn new(initial_turns: Vec<Turn>, entry: NodeId) -> Self {
        Self { history: initial_turns, current_node: entry, reentries: 0 }
    }

    pub fn view(&self) -> &[Turn] {
        &self.history
    }

    pub fn append(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.history.extend(turns);
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.history.last()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn into_history(self) -> Vec<Turn> {
        self.history
    }

    /// Every `tool` turn must answer a request issued by an earlier assistant turn.
    pub fn tool_links_are_valid(&self) -> bool {
        let mut issued = std::collections::HashSet::new();
        for turn in &self.history {
            match turn.role {
                Role::Assistant => {
                    issued.extend(turn.tool_calls.iter().map(|call| call.id.as_str()));
                }
                Role::Tool => match turn.tool_call_id.as_deref() {
                    Some(id) if issued.contains(id) => {}
                    _ => return false,
                },
                Role::System | Role::User => {}
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::{ContentPart, ConversationState, Role, ToolCallRequest, Turn, TurnContent};
    use crate::graph::NodeId;

    #[test]
    fn item_count_distinguishes_scalar_and_composite_content() {
        assert_eq!(TurnContent::Text("hello".to_string()).item_count(), 1);
        assert_eq!(
            TurnContent::Parts(vec![
                ContentPart::Text { text: "a".to_string() },
                ContentPart::Data { value: json!({"b": 1}) },
            ])
            .item_count(),
            2
        );
        assert_eq!(TurnContent::Parts(Vec::new()).item_count(), 0);
    }

    #[test]
    fn tool_result_turn_carries_link_and_structured_payload() {
        let turn = Turn::tool_result("call-1", json!({"available": true}));

        assert_eq!(turn.role, Role::Tool);
        assert_eq!(turn.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(turn.text_content(), r#"{"available":true}"#);
    }

    #[test]
    fn tool_link_validation_rejects_orphan_tool_turns() {
        let mut state =
            ConversationState::new(vec![Turn::user("hi")], NodeId::from("router_assistant"));
        state.append([Turn::tool_result("missing", json!({}))]);
        assert!(!state.tool_links_are_valid());

        let mut state =
            ConversationState::new(vec![Turn::user("hi")], NodeId::from("router_assistant"));
        state.append([
            Turn::assistant_with_tool_calls(
                "",
                vec![ToolCallRequest::new("call-7", "search_for_doctor", Map::new())],
            ),
            Turn::tool_result("call-7", json!([])),
        ]);
        assert!(state.tool_links_are_valid());
    }

    #[test]
    fn turns_serialize_without_empty_tool_fields() {
        let encoded = serde_json::to_value(Turn::user("book me in")).expect("serialize turn");
        assert_eq!(encoded, json!({"role": "user", "content": "book me in"}));
    }
}
