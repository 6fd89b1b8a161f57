//! Layout tree - which device output drives which device start input
//!
//! The JSON tree (`LayoutNode`) is flattened into an arena (`LayoutTree`) whose nodes
//! carry parent/children indices, depth and property path. A single explicit-stack walk
//! produces `Enter`/`Leave` events shared by validation, delay planning and configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Channel, PropertyPath};

/// Layout node as written in the acquisition description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutNode {
    /// Name of the device in the device map
    pub device: String,

    /// Wire latency to the parent output (ps)
    #[serde(default)]
    pub wire_latency: u64,

    /// Output channel -> agent subtree
    #[serde(default)]
    pub agents: BTreeMap<Channel, LayoutNode>,
}

impl LayoutNode {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            wire_latency: 0,
            agents: BTreeMap::new(),
        }
    }

    pub fn with_latency(mut self, wire_latency: u64) -> Self {
        self.wire_latency = wire_latency;
        self
    }

    pub fn with_agent(mut self, output: Channel, agent: LayoutNode) -> Self {
        self.agents.insert(output, agent);
        self
    }
}

/// Index of a node in a `LayoutTree`
pub type NodeId = usize;

/// Arena node
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub device: String,
    pub wire_latency: u64,
    /// 0 for the master
    pub depth: usize,
    pub parent: Option<NodeId>,
    /// Output channel of the parent driving this node
    pub output: Option<Channel>,
    /// Children in ascending output channel order
    pub children: Vec<NodeId>,
    /// Location in the acquisition description, e.g. `/layout/agents/2`
    pub path: PropertyPath,
}

impl TreeNode {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Flattened layout tree, node 0 is the master
#[derive(Debug, Clone)]
pub struct LayoutTree {
    nodes: Vec<TreeNode>,
}

/// Traversal event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEvent {
    /// Node reached, before any of its agents
    Enter(NodeId),
    /// All agents of the node visited
    Leave(NodeId),
}

impl LayoutTree {
    pub const ROOT: NodeId = 0;

    /// Flatten a layout description into an arena
    pub fn from_layout(layout: &LayoutNode) -> Self {
        let mut nodes: Vec<TreeNode> = Vec::new();
        let mut stack: Vec<(&LayoutNode, Option<NodeId>, Option<Channel>, PropertyPath)> =
            vec![(layout, None, None, PropertyPath::new(["layout"]))];

        while let Some((node, parent, output, path)) = stack.pop() {
            let id = nodes.len();
            let depth = parent.map_or(0, |p| nodes[p].depth + 1);
            nodes.push(TreeNode {
                device: node.device.clone(),
                wire_latency: node.wire_latency,
                depth,
                parent,
                output,
                children: Vec::with_capacity(node.agents.len()),
                path: path.clone(),
            });
            if let Some(p) = parent {
                nodes[p].children.push(id);
            }
            // reversed so that the lowest output channel is popped first
            for (channel, agent) in node.agents.iter().rev() {
                let agent_path = path.join("agents").join(channel.to_string());
                stack.push((agent, Some(id), Some(*channel), agent_path));
            }
        }

        // children were registered in pop order, which is ascending per parent
        Self { nodes }
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[Self::ROOT]
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First node referencing `device`
    pub fn find(&self, device: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.device == device)
    }

    /// Agents of a node as (output channel, node id)
    pub fn agents(&self, id: NodeId) -> impl Iterator<Item = (Channel, NodeId)> + '_ {
        self.nodes[id]
            .children
            .iter()
            .filter_map(move |&child| self.nodes[child].output.map(|c| (c, child)))
    }

    /// Device names in pre-order
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.walk().filter_map(move |event| match event {
            WalkEvent::Enter(id) => Some(self.nodes[id].device.as_str()),
            WalkEvent::Leave(_) => None,
        })
    }

    /// Depth-first walk emitting `Enter` before and `Leave` after the agents of each node
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            tree: self,
            stack: if self.nodes.is_empty() {
                Vec::new()
            } else {
                vec![(Self::ROOT, false)]
            },
        }
    }
}

/// Explicit-stack depth-first traversal
pub struct Walk<'a> {
    tree: &'a LayoutTree,
    stack: Vec<(NodeId, bool)>,
}

impl Iterator for Walk<'_> {
    type Item = WalkEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let (id, expanded) = self.stack.pop()?;
        if expanded {
            return Some(WalkEvent::Leave(id));
        }
        self.stack.push((id, true));
        for &child in self.tree.nodes[id].children.iter().rev() {
            self.stack.push((child, false));
        }
        Some(WalkEvent::Enter(id))
    }
}
