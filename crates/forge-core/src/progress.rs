//! Workflow-stage progress derived from agent message and task events.
//!
//! The engine does not know about progress semantics; the tracker translates
//! "agent X produced output" and "task Y assigned to agent X" sightings into a
//! coarse stage index over the fixed workflow below. One tracker is constructed
//! per generation run and owned by that run's callbacks.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// One named role in the fixed agent workflow.
pub struct StageDef {
    pub name: &'static str,
    pub display: &'static str,
    pub role: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
}

/// The fixed, ordered workflow. Role spellings vary between engine
/// configurations, hence the alias lists.
pub const WORKFLOW: &[StageDef] = &[
    StageDef {
        name: "Mike",
        display: "Mike",
        role: "Team Leader",
        aliases: &["TeamLeader", "Team Leader"],
        description: "Analyzing requirements and coordinating",
    },
    StageDef {
        name: "Mia",
        display: "Mia",
        role: "Product Manager",
        aliases: &["ProductManager", "Product Manager"],
        description: "Creating product specification",
    },
    StageDef {
        name: "Alex",
        display: "Alex",
        role: "Engineer",
        aliases: &["Engineer", "Engineer2"],
        description: "Implementing code",
    },
    StageDef {
        name: "Archer",
        display: "Archer",
        role: "Architect",
        aliases: &["Architect"],
        description: "Designing system architecture",
    },
    StageDef {
        name: "Dino",
        display: "Dino",
        role: "Data Analyst",
        aliases: &["DataAnalyst", "Data Analyst"],
        description: "Analyzing data requirements",
    },
];

/// Case-sensitive lookup from every known spelling to its stage index,
/// built once at first use.
fn stage_index(name: &str) -> Option<usize> {
    static MAP: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();
    let map = MAP.get_or_init(|| {
        let mut m = HashMap::new();
        for (idx, stage) in WORKFLOW.iter().enumerate() {
            m.insert(stage.name, idx);
            m.insert(stage.display, idx);
            m.insert(stage.role, idx);
            for alias in stage.aliases {
                m.insert(*alias, idx);
            }
        }
        m
    });
    map.get(name).copied()
}

/// Display state of one workflow stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Active,
    Completed,
}

/// Per-stage entry in a progress payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentState {
    pub name: String,
    pub state: StageState,
    pub description: String,
}

/// Snapshot emitted to the client after a stage-relevant event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
    pub current_agent: String,
    pub agent_states: Vec<AgentState>,
}

/// Per-run progress state. Constructed fresh for each generation run so
/// concurrent runs never share stage counters.
#[derive(Default)]
pub struct ProgressTracker {
    current_idx: usize,
    seen_agents: HashSet<String>,
    seen_stages: HashSet<usize>,
    seen_tasks: HashSet<String>,
    current_assignee: String,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message from `agent`. Returns a snapshot the first time a
    /// given spelling is sighted; `None` on repeats.
    pub fn observe_message(&mut self, agent: &str) -> Option<ProgressSnapshot> {
        if !self.seen_agents.insert(agent.to_string()) {
            return None;
        }
        self.advance_for(agent);

        // A task assignee, when known, is the attributed current agent.
        let current_agent = if self.current_assignee.is_empty() {
            agent.to_string()
        } else {
            self.current_assignee.clone()
        };
        Some(self.snapshot(current_agent))
    }

    /// Record a task assignment. The assignee always becomes the attributed
    /// current agent; a snapshot is produced only for unseen task ids.
    pub fn observe_task(&mut self, task_id: &str, assignee: &str) -> Option<ProgressSnapshot> {
        self.current_assignee = assignee.to_string();
        if task_id.is_empty() || !self.seen_tasks.insert(task_id.to_string()) {
            return None;
        }
        self.seen_agents.insert(assignee.to_string());
        self.advance_for(assignee);
        Some(self.snapshot(assignee.to_string()))
    }

    /// Stage index only ever increases within a run, regardless of the order
    /// roles are sighted in.
    fn advance_for(&mut self, agent: &str) {
        if let Some(idx) = stage_index(agent) {
            self.seen_stages.insert(idx);
            self.current_idx = self.current_idx.max(idx + 1);
        }
    }

    fn snapshot(&self, current_agent: String) -> ProgressSnapshot {
        let total = WORKFLOW.len();
        ProgressSnapshot {
            current: self.current_idx,
            total,
            percentage: (self.current_idx * 100 / total) as u8,
            current_agent,
            agent_states: self.agent_states(),
        }
    }

    fn agent_states(&self) -> Vec<AgentState> {
        WORKFLOW
            .iter()
            .enumerate()
            .map(|(idx, stage)| {
                let state = if self.seen_stages.contains(&idx) {
                    // Superseded stages show completed; the latest shows active.
                    if idx + 1 < self.current_idx {
                        StageState::Completed
                    } else {
                        StageState::Active
                    }
                } else {
                    StageState::Pending
                };
                AgentState {
                    name: stage.display.to_string(),
                    state,
                    description: stage.description.to_string(),
                }
            })
            .collect()
    }

    /// All-pending snapshot sent before a run starts.
    pub fn initial_states() -> Vec<AgentState> {
        WORKFLOW
            .iter()
            .map(|stage| AgentState {
                name: stage.display.to_string(),
                state: StageState::Pending,
                description: stage.description.to_string(),
            })
            .collect()
    }

    /// All-completed snapshot sent after a successful run.
    pub fn final_snapshot() -> ProgressSnapshot {
        let total = WORKFLOW.len();
        ProgressSnapshot {
            current: total,
            total,
            percentage: 100,
            current_agent: String::new(),
            agent_states: WORKFLOW
                .iter()
                .map(|stage| AgentState {
                    name: stage.display.to_string(),
                    state: StageState::Completed,
                    description: stage.description.to_string(),
                })
                .collect(),
        }
    }
}
