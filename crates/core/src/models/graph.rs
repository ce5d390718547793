use serde::{Deserialize, Serialize};

use super::{TaskKind, TaskStatus};

/// 节点在执行图中的位置
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// 无父节点
    Start,
    /// 既有父节点又有子节点
    Inner,
    /// 无子节点
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub role: NodeRole,
    pub worker: Option<String>,
    pub duration_ms: Option<i64>,
}

/// 父到子的有向边
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

/// 图重建期间跳过的子树说明，属于部分成功而非失败
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphWarning {
    pub task_id: String,
    pub reason: String,
}

/// 从结果存储重建出的执行依赖图
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub warnings: Vec<GraphWarning>,
}

impl TaskGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges.iter().any(|e| e.from == from && e.to == to)
    }

    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }
}
