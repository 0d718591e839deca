//! The State Store: the Node table, the Task table, and the FIFO ready
//! queue, guarded by the two-lock discipline of §5 (fixed ordering: TASK
//! before NODE whenever both are needed).
//!
//! Grounded in `db.rs`'s `Db`/`DbSharedState` split: a cheaply-`Clone`able
//! handle wrapping an `Arc` to the actual guarded state.
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

pub type NodeId = String;
pub type TaskId = String;

pub const DEFAULT_TASK_MEMORY_MB: i64 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Assigned,
    Completed,
}

/// A registered worker node.
#[derive(Debug)]
pub struct NodeRecord {
    pub ip: Ipv4Addr,
    pub listen_port: u16,
    pub initial_memory_mb: i64,
    pub available_memory_mb: i64,
    /// Notified when this node's session handler must tear down: either a
    /// duplicate `REGISTER` superseded it, or the Health Monitor declared it
    /// down. The handler task holding the socket selects on this alongside
    /// its normal read loop.
    pub(crate) evict: Arc<Notify>,
}

/// A unit of work submitted by a client.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub status: TaskStatus,
    pub assigned_node: Option<NodeId>,
    pub memory_required_mb: i64,
    pub workload: String,
    pub deps: Vec<String>,
}

/// Nodes ordered lexicographically by ID so the Scheduler's node-selection
/// order is deterministic, per §4.4's SHOULD.
#[derive(Debug, Default)]
struct NodeTable {
    nodes: BTreeMap<NodeId, NodeRecord>,
}

impl NodeTable {
    fn candidates_with_memory(&self, required_mb: i64) -> Vec<(NodeId, Ipv4Addr, u16)> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.available_memory_mb >= required_mb)
            .map(|(id, n)| (id.clone(), n.ip, n.listen_port))
            .collect()
    }

    fn snapshot(&self) -> Vec<(NodeId, Ipv4Addr, u16)> {
        self.nodes
            .iter()
            .map(|(id, n)| (id.clone(), n.ip, n.listen_port))
            .collect()
    }
}

#[derive(Debug, Default)]
struct TaskState {
    tasks: HashMap<TaskId, TaskRecord>,
    ready_queue: VecDeque<TaskId>,
    /// Mirrors `ready_queue`'s membership for O(1) de-duplication, keeping
    /// invariant P4 (a Task ID appears in the ready queue at most once).
    queued_set: HashSet<TaskId>,
}

impl TaskState {
    fn enqueue(&mut self, id: TaskId) {
        if self.queued_set.insert(id.clone()) {
            self.ready_queue.push_back(id);
        }
    }
}

struct Inner {
    tasks: Mutex<TaskState>,
    nodes: Mutex<NodeTable>,
}

/// A cheaply-cloneable handle to the Manager's shared state. Cloning only
/// bumps an `Arc` refcount, mirroring `Db`'s clone semantics.
#[derive(Clone)]
pub struct SharedState(Arc<Inner>);

/// A snapshot of one node for the Status Publisher / Scheduler's public view.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub id: NodeId,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub available_memory_mb: i64,
}

/// A snapshot of one task for the Status Publisher's public view.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub id: TaskId,
    pub status: TaskStatus,
    pub assigned_node: Option<NodeId>,
    pub memory_required_mb: i64,
}

impl SharedState {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            tasks: Mutex::new(TaskState::default()),
            nodes: Mutex::new(NodeTable::default()),
        }))
    }

    /// Client Session Handler admission (§4.2). A descriptor for a task
    /// already COMPLETED is ignored (idempotent resubmission); otherwise the
    /// task is upserted as QUEUED and enqueued at most once (P4).
    pub async fn submit_task(
        &self,
        id: TaskId,
        workload: String,
        memory_required_mb: i64,
        deps: Vec<String>,
    ) {
        let mut tasks = self.0.tasks.lock().await;

        if let Some(existing) = tasks.tasks.get(&id) {
            if existing.status == TaskStatus::Completed {
                debug!(task = %id, "ignoring resubmission of completed task");
                return;
            }
        }

        tasks.tasks.insert(
            id.clone(),
            TaskRecord {
                status: TaskStatus::Queued,
                assigned_node: None,
                memory_required_mb,
                workload,
                deps,
            },
        );
        tasks.enqueue(id);
    }

    /// Node Session Handler registration (§4.3). If a node with the same ID
    /// is already present, its session is superseded: its handler is woken
    /// via `evict` so it tears down, and any tasks still ASSIGNED to it are
    /// requeued.
    pub async fn register_node(
        &self,
        id: NodeId,
        ip: Ipv4Addr,
        listen_port: u16,
        memory_mb: i64,
        evict: Arc<Notify>,
    ) {
        let mut tasks = self.0.tasks.lock().await;
        let mut nodes = self.0.nodes.lock().await;

        if let Some(prior) = nodes.nodes.remove(&id) {
            info!(node = %id, "superseding prior registration");
            requeue_tasks_for_node(&mut tasks, &id);
            prior.evict.notify_one();
        }

        nodes.nodes.insert(
            id,
            NodeRecord {
                ip,
                listen_port,
                initial_memory_mb: memory_mb,
                available_memory_mb: memory_mb,
                evict,
            },
        );
    }

    /// Node Session Handler completion (§4.3). Unknown task IDs and
    /// already-COMPLETED tasks are no-ops (idempotent, P3's absorbing
    /// COMPLETED). Memory is credited back to `node_id` only if the task was
    /// actually ASSIGNED to it; a `TASK_DONE` for a task that is QUEUED (e.g.
    /// it was requeued out from under a late-reporting node by an eviction)
    /// never debited this node, so crediting it unconditionally would push
    /// `available_memory_mb` above `initial_memory_mb` and break P1 (§7).
    pub async fn complete_task(&self, node_id: &NodeId, task_id: &TaskId) {
        let mut tasks = self.0.tasks.lock().await;

        let Some(task) = tasks.tasks.get(task_id) else {
            debug!(task = %task_id, "TASK_DONE for unknown task, ignoring");
            return;
        };
        if task.status == TaskStatus::Completed {
            debug!(task = %task_id, "duplicate TASK_DONE, ignoring");
            return;
        }

        let memory_required_mb = task.memory_required_mb;
        let assigned_here = task.assigned_node.as_deref() == Some(node_id.as_str());
        if let Some(task) = tasks.tasks.get_mut(task_id) {
            task.status = TaskStatus::Completed;
        }
        drop(tasks);

        if assigned_here {
            let mut nodes = self.0.nodes.lock().await;
            if let Some(node) = nodes.nodes.get_mut(node_id) {
                node.available_memory_mb += memory_required_mb;
            }
        } else {
            debug!(node = %node_id, task = %task_id, "TASK_DONE for task not assigned to this node, skipping credit");
        }
        info!(node = %node_id, task = %task_id, "task completed");
    }

    /// Evict a node: remove it from the Node table and requeue every
    /// non-COMPLETED task still assigned to it (§4.5, §4.3 disconnect path).
    /// Per §9's open-question resolution, the credit-back of the evicted
    /// node's memory is skipped since the record is removed in the same
    /// critical section.
    pub async fn evict_node(&self, id: &NodeId) -> bool {
        let mut tasks = self.0.tasks.lock().await;
        let mut nodes = self.0.nodes.lock().await;

        let Some(removed) = nodes.nodes.remove(id) else {
            return false;
        };
        requeue_tasks_for_node(&mut tasks, id);
        removed.evict.notify_one();
        info!(node = %id, "node evicted");
        true
    }

    pub async fn node_count(&self) -> usize {
        self.0.nodes.lock().await.nodes.len()
    }

    pub(crate) async fn all_node_addrs(&self) -> Vec<(NodeId, Ipv4Addr, u16)> {
        self.0.nodes.lock().await.snapshot()
    }

    /// Drain the ready queue as far as current node capacity allows (§4.4).
    ///
    /// Holds the TASK lock for the whole tick (per §5's fixed lock
    /// ordering, TASK before NODE) and acquires the NODE lock only for the
    /// brief candidate-selection and memory-debit critical sections. `dispatch`
    /// performs the actual one-shot network send to a candidate node and
    /// resolves to whether it succeeded; it is invoked while the TASK lock
    /// is held, which is why the Scheduler bounds each call with a timeout.
    ///
    /// Stops when either: the head task has no node with enough memory
    /// (case 5), or every candidate node failed the dispatch connection
    /// (case 4, head-of-line pause), exactly the two stopping conditions of
    /// §4.4.
    pub async fn run_dispatch_tick<F, Fut>(&self, mut dispatch: F)
    where
        F: FnMut(NodeId, Ipv4Addr, u16, TaskId) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let mut tasks = self.0.tasks.lock().await;

        loop {
            let Some(head) = tasks.ready_queue.front().cloned() else {
                return;
            };

            match tasks.tasks.get(&head).map(|t| t.status) {
                Some(TaskStatus::Queued) => {}
                _ => {
                    // Stale entry (already COMPLETED, or not QUEUED for
                    // some other reason): pop and keep draining.
                    tasks.ready_queue.pop_front();
                    tasks.queued_set.remove(&head);
                    continue;
                }
            }

            let memory_required_mb = tasks.tasks[&head].memory_required_mb;

            let candidates = {
                let nodes = self.0.nodes.lock().await;
                nodes.candidates_with_memory(memory_required_mb)
            };
            if candidates.is_empty() {
                return;
            }

            let mut dispatched = false;
            for (node_id, ip, port) in candidates {
                let sent = dispatch(node_id.clone(), ip, port, head.clone()).await;
                if !sent {
                    continue;
                }

                let mut nodes = self.0.nodes.lock().await;
                let Some(node) = nodes.nodes.get_mut(&node_id) else {
                    // Node vanished between selection and send; try the
                    // next candidate.
                    continue;
                };
                node.available_memory_mb -= memory_required_mb;
                drop(nodes);

                if let Some(task) = tasks.tasks.get_mut(&head) {
                    task.status = TaskStatus::Assigned;
                    task.assigned_node = Some(node_id);
                }
                tasks.ready_queue.pop_front();
                tasks.queued_set.remove(&head);
                dispatched = true;
                break;
            }

            if !dispatched {
                return;
            }
        }
    }

    pub async fn snapshot(&self) -> (Vec<NodeView>, Vec<TaskView>) {
        let tasks = self.0.tasks.lock().await;
        let nodes = self.0.nodes.lock().await;

        let node_views = nodes
            .nodes
            .iter()
            .map(|(id, n)| NodeView {
                id: id.clone(),
                ip: n.ip,
                port: n.listen_port,
                available_memory_mb: n.available_memory_mb,
            })
            .collect();

        let task_views = tasks
            .tasks
            .iter()
            .map(|(id, t)| TaskView {
                id: id.clone(),
                status: t.status,
                assigned_node: t.assigned_node.clone(),
                memory_required_mb: t.memory_required_mb,
            })
            .collect();

        (node_views, task_views)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Requeue every non-COMPLETED task assigned to `node_id`. Caller must
/// already hold the TASK lock.
fn requeue_tasks_for_node(tasks: &mut TaskState, node_id: &NodeId) {
    let to_requeue: Vec<TaskId> = tasks
        .tasks
        .iter()
        .filter(|(_, t)| {
            t.assigned_node.as_deref() == Some(node_id.as_str()) && t.status != TaskStatus::Completed
        })
        .map(|(id, _)| id.clone())
        .collect();

    for id in to_requeue {
        if let Some(task) = tasks.tasks.get_mut(&id) {
            task.status = TaskStatus::Queued;
            task.assigned_node = None;
        }
        tasks.enqueue(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> Ipv4Addr {
        Ipv4Addr::new(127, 0, 0, 1)
    }

    #[tokio::test]
    async fn submitting_then_completing_round_trips() {
        let state = SharedState::new();
        state
            .register_node("n1".into(), addr(), 7001, 512, Arc::new(Notify::new()))
            .await;
        state
            .submit_task("t1".into(), "x".into(), 100, vec![])
            .await;

        let mut dispatched = Vec::new();
        state
            .run_dispatch_tick(|node_id, _ip, _port, task_id| {
                dispatched.push((node_id, task_id));
                async { true }
            })
            .await;
        assert_eq!(dispatched, vec![("n1".to_string(), "t1".to_string())]);

        state.complete_task(&"n1".to_string(), &"t1".to_string()).await;

        let (nodes, tasks) = state.snapshot().await;
        assert_eq!(nodes[0].available_memory_mb, 512);
        assert_eq!(tasks[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_completion_is_idempotent() {
        let state = SharedState::new();
        state
            .register_node("n1".into(), addr(), 7001, 512, Arc::new(Notify::new()))
            .await;
        state
            .submit_task("t1".into(), "x".into(), 100, vec![])
            .await;
        state
            .run_dispatch_tick(|_node_id, _ip, _port, _task_id| async { true })
            .await;

        state.complete_task(&"n1".to_string(), &"t1".to_string()).await;
        state.complete_task(&"n1".to_string(), &"t1".to_string()).await;

        let (nodes, _) = state.snapshot().await;
        assert_eq!(nodes[0].available_memory_mb, 512);
    }

    #[tokio::test]
    async fn resubmitting_completed_task_is_ignored() {
        let state = SharedState::new();
        state
            .register_node("n1".into(), addr(), 7001, 512, Arc::new(Notify::new()))
            .await;
        state
            .submit_task("t1".into(), "x".into(), 100, vec![])
            .await;
        state
            .run_dispatch_tick(|_node_id, _ip, _port, _task_id| async { true })
            .await;
        state.complete_task(&"n1".to_string(), &"t1".to_string()).await;

        state
            .submit_task("t1".into(), "x".into(), 100, vec![])
            .await;

        let (_, tasks) = state.snapshot().await;
        assert_eq!(tasks[0].status, TaskStatus::Completed);

        let mut dispatched = Vec::new();
        state
            .run_dispatch_tick(|node_id, _ip, _port, task_id| {
                dispatched.push((node_id, task_id));
                async { true }
            })
            .await;
        assert!(dispatched.is_empty(), "completed task must not be re-enqueued");
    }

    #[tokio::test]
    async fn eviction_requeues_assigned_tasks_and_preserves_p4() {
        let state = SharedState::new();
        state
            .register_node("n1".into(), addr(), 7001, 200, Arc::new(Notify::new()))
            .await;
        state
            .submit_task("t1".into(), "x".into(), 100, vec![])
            .await;
        state
            .run_dispatch_tick(|_node_id, _ip, _port, _task_id| async { true })
            .await;

        assert!(state.evict_node(&"n1".to_string()).await);

        let (nodes, tasks) = state.snapshot().await;
        assert!(nodes.is_empty());
        assert_eq!(tasks[0].status, TaskStatus::Queued);
        assert_eq!(tasks[0].assigned_node, None);

        state
            .register_node("n2".into(), addr(), 7002, 200, Arc::new(Notify::new()))
            .await;
        let mut dispatched = Vec::new();
        state
            .run_dispatch_tick(|node_id, _ip, _port, task_id| {
                dispatched.push((node_id, task_id));
                async { true }
            })
            .await;
        assert_eq!(dispatched, vec![("n2".to_string(), "t1".to_string())]);
    }

    #[tokio::test]
    async fn duplicate_register_requeues_prior_incarnation_tasks() {
        let state = SharedState::new();
        state
            .register_node("n1".into(), addr(), 7001, 200, Arc::new(Notify::new()))
            .await;
        state
            .submit_task("t1".into(), "x".into(), 100, vec![])
            .await;
        state
            .run_dispatch_tick(|_node_id, _ip, _port, _task_id| async { true })
            .await;

        state
            .register_node("n1".into(), addr(), 7002, 300, Arc::new(Notify::new()))
            .await;

        let (nodes, tasks) = state.snapshot().await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].port, 7002);
        assert_eq!(tasks[0].status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn memory_pressure_blocks_second_task_until_first_completes() {
        let state = SharedState::new();
        state
            .register_node("n1".into(), addr(), 7001, 200, Arc::new(Notify::new()))
            .await;
        state.submit_task("a".into(), "x".into(), 150, vec![]).await;
        state.submit_task("b".into(), "x".into(), 150, vec![]).await;

        let mut dispatched = Vec::new();
        state
            .run_dispatch_tick(|node_id, _ip, _port, task_id| {
                dispatched.push((node_id, task_id));
                async { true }
            })
            .await;
        assert_eq!(
            dispatched,
            vec![("n1".to_string(), "a".to_string())],
            "only `a` fits until it completes"
        );

        state.complete_task(&"n1".to_string(), &"a".to_string()).await;

        let mut dispatched = Vec::new();
        state
            .run_dispatch_tick(|node_id, _ip, _port, task_id| {
                dispatched.push((node_id, task_id));
                async { true }
            })
            .await;
        assert_eq!(dispatched, vec![("n1".to_string(), "b".to_string())]);
    }

    #[tokio::test]
    async fn dispatch_tick_blocks_head_of_line_when_no_node_fits() {
        let state = SharedState::new();
        state
            .register_node("n1".into(), addr(), 7001, 100, Arc::new(Notify::new()))
            .await;
        state
            .submit_task("big".into(), "x".into(), 500, vec![])
            .await;
        state
            .submit_task("small".into(), "x".into(), 50, vec![])
            .await;

        let mut dispatched = Vec::new();
        state
            .run_dispatch_tick(|node_id, _ip, _port, task_id| {
                dispatched.push((node_id, task_id));
                async { true }
            })
            .await;

        assert!(
            dispatched.is_empty(),
            "no node satisfies `big`, so `small` must not jump the queue"
        );
        let (_, tasks) = state.snapshot().await;
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Queued));
    }

    #[tokio::test]
    async fn dispatch_tick_drains_multiple_ready_tasks_in_one_tick() {
        let state = SharedState::new();
        state
            .register_node("n1".into(), addr(), 7001, 512, Arc::new(Notify::new()))
            .await;
        state.submit_task("a".into(), "x".into(), 100, vec![]).await;
        state.submit_task("b".into(), "x".into(), 100, vec![]).await;

        let mut dispatched = Vec::new();
        state
            .run_dispatch_tick(|node_id, _ip, _port, task_id| {
                dispatched.push((node_id, task_id));
                async { true }
            })
            .await;

        assert_eq!(dispatched.len(), 2);
        let (_, tasks) = state.snapshot().await;
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Assigned));
    }

    #[tokio::test]
    async fn dispatch_tick_falls_through_to_next_candidate_on_failure() {
        let state = SharedState::new();
        state
            .register_node("n1".into(), addr(), 7001, 200, Arc::new(Notify::new()))
            .await;
        state
            .register_node("n2".into(), addr(), 7002, 200, Arc::new(Notify::new()))
            .await;
        state.submit_task("t1".into(), "x".into(), 100, vec![]).await;

        state
            .run_dispatch_tick(|node_id, _ip, _port, _task_id| {
                let failed_first = node_id == "n1";
                async move { !failed_first }
            })
            .await;

        let (nodes, tasks) = state.snapshot().await;
        assert_eq!(tasks[0].assigned_node.as_deref(), Some("n2"));
        let n1 = nodes.iter().find(|n| n.id == "n1").unwrap();
        assert_eq!(n1.available_memory_mb, 200, "n1 dispatch failed, no debit");
    }
}
