//! Router node: LLM-backed classification into exactly one route.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ExecutionError;
use crate::event_bus::Event;
use crate::message::ChatMessage;
use crate::provider::ChatRequest;
use crate::runtime::ExecutionContext;
use crate::workflow::ports::route_handle;
use crate::workflow::{PortDefinition, ValidationIssue, WorkflowData, WorkflowNode, node_type};

use super::{NodeExecution, NodeExtension};

/// One route a router can classify into. Defines the dynamic output port
/// `route-<id>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Typed shape of a router node's data payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterNodeData {
    pub label: Option<String>,
    pub model: Option<String>,
    /// Extra instructions appended to the classification prompt.
    pub prompt: Option<String>,
    pub routes: Vec<RouteDefinition>,
}

impl RouterNodeData {
    pub fn parse(data: &Value) -> Result<Self, ExecutionError> {
        if data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(data.clone()).map_err(ExecutionError::from)
    }
}

pub struct RouterExtension;

impl RouterExtension {
    fn classification_prompt(data: &RouterNodeData) -> String {
        let mut prompt = String::from(
            "Classify the input into exactly one of the following routes. \
             Answer with the route id or its number, nothing else.\n\n",
        );
        for (index, route) in data.routes.iter().enumerate() {
            match &route.description {
                Some(desc) => {
                    prompt.push_str(&format!("{}. {} ({}): {}\n", index + 1, route.id, route.label, desc));
                }
                None => {
                    prompt.push_str(&format!("{}. {} ({})\n", index + 1, route.id, route.label));
                }
            }
        }
        if let Some(custom) = &data.prompt {
            prompt.push('\n');
            prompt.push_str(custom);
        }
        prompt
    }

    /// Parse the classifier's answer into one route index. Accepts a route
    /// id, a 1-based number, or a label; anything else misses.
    fn parse_selection(data: &RouterNodeData, response: &str) -> Option<usize> {
        let answer = response.trim().trim_matches(|c: char| c == '"' || c == '.');
        if answer.is_empty() {
            return None;
        }
        if let Some(idx) = data.routes.iter().position(|r| r.id.eq_ignore_ascii_case(answer)) {
            return Some(idx);
        }
        if let Ok(number) = answer.parse::<usize>()
            && number >= 1
            && number <= data.routes.len()
        {
            return Some(number - 1);
        }
        if let Some(idx) = data
            .routes
            .iter()
            .position(|r| r.label.eq_ignore_ascii_case(answer))
        {
            return Some(idx);
        }
        // Last resort: a unique route id mentioned anywhere in the answer.
        let mentions: Vec<usize> = data
            .routes
            .iter()
            .enumerate()
            .filter(|(_, r)| answer.to_lowercase().contains(&r.id.to_lowercase()))
            .map(|(i, _)| i)
            .collect();
        match mentions.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}

#[async_trait]
impl NodeExtension for RouterExtension {
    fn type_name(&self) -> &'static str {
        node_type::ROUTER
    }

    fn static_ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition::default_input()]
    }

    fn dynamic_ports(&self, data: &Value) -> Vec<PortDefinition> {
        RouterNodeData::parse(data)
            .map(|parsed| {
                parsed
                    .routes
                    .iter()
                    .map(|route| PortDefinition::output(route_handle(&route.id)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn validate(&self, node: &WorkflowNode, _workflow: &WorkflowData) -> Vec<ValidationIssue> {
        match RouterNodeData::parse(&node.data) {
            Ok(parsed) if parsed.routes.is_empty() => vec![ValidationIssue::node(
                &node.id,
                "router declares no routes",
            )],
            Ok(_) => Vec::new(),
            Err(err) => vec![ValidationIssue::node(
                &node.id,
                format!("invalid router data: {err}"),
            )],
        }
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: &str,
        node: &WorkflowNode,
    ) -> Result<NodeExecution, ExecutionError> {
        let data = RouterNodeData::parse(&node.data)?;
        if data.routes.is_empty() {
            return Err(ExecutionError::Validation(format!(
                "router '{}' declares no routes",
                node.id
            )));
        }

        // A single route needs no classifier at all.
        let selected = if data.routes.len() == 1 {
            0
        } else {
            let model = data
                .model
                .clone()
                .or_else(|| ctx.services.options.default_model.clone())
                .ok_or_else(|| {
                    ExecutionError::Validation(format!(
                        "router '{}' has no model and no default model is configured",
                        node.id
                    ))
                })?;
            let request = ChatRequest::new(
                model,
                vec![
                    ChatMessage::system(Self::classification_prompt(&data)),
                    ChatMessage::user(input),
                ],
            );
            let outcome = ctx
                .services
                .provider
                .chat(request, None, &ctx.cancel)
                .await?;
            match Self::parse_selection(&data, &outcome.content) {
                Some(index) => index,
                None => {
                    ctx.emit(Event::diagnostic(
                        "router",
                        format!(
                            "router '{}' could not parse classifier answer {:?}; falling back to first route",
                            node.id, outcome.content
                        ),
                    ));
                    0
                }
            }
        };

        let route = &data.routes[selected];
        ctx.emit(Event::RouteSelected {
            node_id: node.id.clone(),
            route_id: route.id.clone(),
        });

        Ok(NodeExecution::new(
            input,
            ctx.graph.children_on(&node.id, Some(&route_handle(&route.id))),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(routes: &[(&str, &str)]) -> RouterNodeData {
        RouterNodeData {
            routes: routes
                .iter()
                .map(|(id, label)| RouteDefinition {
                    id: (*id).to_string(),
                    label: (*label).to_string(),
                    description: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_by_id_number_and_label() {
        let data = data(&[("a", "Analysis"), ("b", "Creative")]);
        assert_eq!(RouterExtension::parse_selection(&data, "a"), Some(0));
        assert_eq!(RouterExtension::parse_selection(&data, " B "), Some(1));
        assert_eq!(RouterExtension::parse_selection(&data, "2"), Some(1));
        assert_eq!(RouterExtension::parse_selection(&data, "Analysis"), Some(0));
        assert_eq!(RouterExtension::parse_selection(&data, "\"a\""), Some(0));
    }

    #[test]
    fn test_parse_misses() {
        let data = data(&[("a", "Analysis"), ("b", "Creative")]);
        assert_eq!(RouterExtension::parse_selection(&data, ""), None);
        assert_eq!(RouterExtension::parse_selection(&data, "0"), None);
        assert_eq!(RouterExtension::parse_selection(&data, "3"), None);
        assert_eq!(RouterExtension::parse_selection(&data, "something else"), None);
    }

    #[test]
    fn test_unique_mention_wins() {
        let data = data(&[("alpha", "A"), ("beta", "B")]);
        assert_eq!(
            RouterExtension::parse_selection(&data, "I would pick alpha here"),
            Some(0)
        );
        // Ambiguous mention resolves to none (caller falls back to first).
        assert_eq!(
            RouterExtension::parse_selection(&data, "alpha or beta"),
            None
        );
    }

    #[test]
    fn test_classification_prompt_lists_routes() {
        let mut data = data(&[("a", "Analysis")]);
        data.routes[0].description = Some("SWOT and friends".into());
        let prompt = RouterExtension::classification_prompt(&data);
        assert!(prompt.contains("1. a (Analysis): SWOT and friends"));
    }
}
