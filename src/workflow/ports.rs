//! Port definitions for node inputs and outputs.
//!
//! Extensions declare static ports; dynamic ports (router routes, parallel
//! branches, loop body/done) are derived from node data through the
//! extension's `dynamic_ports` hook, which the validator and the scheduler
//! both consume. The universal `error` output exists on every node.

use serde::{Deserialize, Serialize};

/// The universal error output handle available on every node.
pub const ERROR_HANDLE: &str = "error";
/// The id of the conventional single default output port.
pub const DEFAULT_OUTPUT: &str = "out";
/// The id of the conventional single input port.
pub const DEFAULT_INPUT: &str = "in";
/// While-loop body entry port.
pub const BODY_HANDLE: &str = "body";
/// While-loop exit port.
pub const DONE_HANDLE: &str = "done";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

/// One declared port on a node type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    pub id: String,
    pub direction: PortDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Whether multiple edges may connect to this port.
    #[serde(default)]
    pub multiple: bool,
}

impl PortDefinition {
    #[must_use]
    pub fn input(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            direction: PortDirection::Input,
            data_type: None,
            required: false,
            multiple: false,
        }
    }

    #[must_use]
    pub fn output(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            direction: PortDirection::Output,
            data_type: None,
            required: false,
            multiple: false,
        }
    }

    /// The conventional required input port carried by every non-start node.
    #[must_use]
    pub fn default_input() -> Self {
        Self::input(DEFAULT_INPUT).required_port()
    }

    /// The conventional default output port.
    #[must_use]
    pub fn default_output() -> Self {
        Self::output(DEFAULT_OUTPUT)
    }

    #[must_use]
    pub fn required_port(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn multiple_port(mut self) -> Self {
        self.multiple = true;
        self
    }

    #[must_use]
    pub fn typed(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    #[must_use]
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    #[must_use]
    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }
}

/// The dynamic output handle for a router route.
#[must_use]
pub fn route_handle(route_id: &str) -> String {
    format!("route-{route_id}")
}

/// The dynamic output handle for a parallel branch.
#[must_use]
pub fn branch_handle(branch_id: &str) -> String {
    format!("branch-{branch_id}")
}
