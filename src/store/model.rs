// src/store/model.rs

//! Persisted entities, as rows of the shared store.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{JobDefId, JobInstanceId, JobState, NodeId, QueueId};

/// A named work channel bounding concurrency per node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue {
    pub id: QueueId,
    pub name: String,
    pub description: String,
    /// Maximum number of instances of this queue running at once on one node.
    pub concurrency: usize,
    /// Queue used by job definitions that do not name one.
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
}

/// Binds a node to a queue it polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAssignment {
    pub node: NodeId,
    pub queue: QueueId,
    pub poll_interval: Duration,
}

/// How a job definition's work is carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadKind {
    /// A shell command run as a child process.
    Command { cmd: String },
    /// An in-process payload registered with the engine under this name.
    Builtin { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSpec {
    pub kind: PayloadKind,
    /// Artifacts, relative to the artifact root, the payload needs. A
    /// directory contributes every file directly inside it.
    pub libraries: Vec<PathBuf>,
}

/// Free-form classification attached to definitions and instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keywords {
    pub application: Option<String>,
    pub module: Option<String>,
    pub keyword1: Option<String>,
    pub keyword2: Option<String>,
    pub keyword3: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub id: JobDefId,
    pub application_name: String,
    pub version: String,
    pub queue: QueueId,
    pub priority: i32,
    /// Highlander: at most one claimed instance cluster-wide.
    pub exclusive: bool,
    pub tags: Keywords,
    pub payload: PayloadSpec,
}

/// Input for registering a job definition; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJobDefinition {
    pub application_name: String,
    pub version: String,
    pub queue: QueueId,
    pub priority: i32,
    pub exclusive: bool,
    pub tags: Keywords,
    pub payload: PayloadSpec,
}

impl NewJobDefinition {
    pub fn new(application_name: impl Into<String>, queue: QueueId, kind: PayloadKind) -> Self {
        Self {
            application_name: application_name.into(),
            version: "1".to_string(),
            queue,
            priority: 0,
            exclusive: false,
            tags: Keywords::default(),
            payload: PayloadSpec {
                kind,
                libraries: Vec::new(),
            },
        }
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn library(mut self, path: impl Into<PathBuf>) -> Self {
        self.payload.libraries.push(path.into());
        self
    }

    pub(crate) fn into_definition(self, id: JobDefId) -> JobDefinition {
        JobDefinition {
            id,
            application_name: self.application_name,
            version: self.version,
            queue: self.queue,
            priority: self.priority,
            exclusive: self.exclusive,
            tags: self.tags,
            payload: self.payload,
        }
    }
}

/// Client-provided attributes of a job request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceTags {
    pub user: Option<String>,
    pub session_id: Option<String>,
    pub email: Option<String>,
    pub parent_id: Option<JobInstanceId>,
    pub keywords: Keywords,
}

/// What an external actor provides to create a pending instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub application_name: String,
    /// Explicit target queue; `None` uses the definition's default.
    pub queue: Option<QueueId>,
    /// Overrides the definition's priority.
    pub priority: Option<i32>,
    pub tags: InstanceTags,
}

impl EnqueueRequest {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            queue: None,
            priority: None,
            tags: InstanceTags::default(),
        }
    }

    pub fn on_queue(mut self, queue: QueueId) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn by_user(mut self, user: impl Into<String>) -> Self {
        self.tags.user = Some(user.into());
        self
    }

    pub fn with_parent(mut self, parent: JobInstanceId) -> Self {
        self.tags.parent_id = Some(parent);
        self
    }
}

/// One execution request, alive until it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstance {
    pub id: JobInstanceId,
    pub job_def: JobDefId,
    /// Effective queue: the request's target or the definition's default.
    pub queue: QueueId,
    pub priority: i32,
    pub state: JobState,
    pub node: Option<NodeId>,
    pub enqueued_at: DateTime<Utc>,
    pub attributed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub tags: InstanceTags,
    pub progress: Option<i32>,
    pub kill_requested: bool,
}

impl JobInstance {
    /// Queue order: priority descending, then first-submitted-first-served.
    pub fn order_key(&self) -> (std::cmp::Reverse<i32>, DateTime<Utc>, JobInstanceId) {
        (std::cmp::Reverse(self.priority), self.enqueued_at, self.id)
    }
}

/// Immutable record of a finished instance. Shares the instance's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    pub id: JobInstanceId,
    pub job_def: JobDefId,
    pub application_name: String,
    pub queue: QueueId,
    pub queue_name: String,
    pub node: Option<NodeId>,
    pub node_name: Option<String>,
    pub exclusive: bool,
    pub state: JobState,
    pub progress: Option<i32>,
    pub cause: Option<String>,
    /// Set when a command payload exited unsuccessfully.
    pub exit_code: Option<i32>,
    pub enqueued_at: DateTime<Utc>,
    pub attributed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub instance_tags: InstanceTags,
    pub definition_tags: Keywords,
}

/// Status snapshot returned to status-reporting tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub id: JobInstanceId,
    pub state: JobState,
    pub node: Option<NodeId>,
    pub queue: QueueId,
    pub enqueued_at: DateTime<Utc>,
    pub attributed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub progress: Option<i32>,
    pub cause: Option<String>,
    pub exit_code: Option<i32>,
}

impl From<&JobInstance> for JobStatus {
    fn from(ji: &JobInstance) -> Self {
        Self {
            id: ji.id,
            state: ji.state,
            node: ji.node,
            queue: ji.queue,
            enqueued_at: ji.enqueued_at,
            attributed_at: ji.attributed_at,
            started_at: ji.started_at,
            ended_at: None,
            progress: ji.progress,
            cause: None,
            exit_code: None,
        }
    }
}

impl From<&History> for JobStatus {
    fn from(h: &History) -> Self {
        Self {
            id: h.id,
            state: h.state,
            node: h.node,
            queue: h.queue,
            enqueued_at: h.enqueued_at,
            attributed_at: h.attributed_at,
            started_at: h.started_at,
            ended_at: Some(h.ended_at),
            progress: h.progress,
            cause: h.cause.clone(),
            exit_code: h.exit_code,
        }
    }
}
