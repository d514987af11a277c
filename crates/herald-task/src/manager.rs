//! The task supervisor.
//!
//! Owns the task map, admits tasks against global and per-project
//! concurrency limits, runs one worker per task with an independent
//! cancellation scope and deadline, and emits lifecycle events through an
//! injected callback.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use herald_executor::{graceful_kill, ExecError, ExecRequest, ExecResult, Executor, ProgressFn};
use herald_types::HeraldError;

use crate::task::{Priority, Status, Task, TaskFilter, TaskKind, TaskSnapshot};

/// A lifecycle event emitted by the supervisor.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    /// `task.started`, `task.progress`, `task.completed`, `task.failed`,
    /// or `task.cancelled`.
    pub event_type: String,
    pub task_id: String,
    pub project: String,
    pub message: String,
    /// Remote MCP session to target. Empty = broadcast.
    pub mcp_session_id: String,
}

/// Event sink wired in at bootstrap (store persistence + notifier push).
pub type NotifyFn = Arc<dyn Fn(TaskEvent) + Send + Sync>;

/// Supervisor limits.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_concurrent: usize,
    /// Hard wall-clock cap; a task's own timeout is clamped to this.
    pub max_task_duration: Duration,
    /// Per-task output buffer cap in bytes (0 = unlimited).
    pub max_output_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_task_duration: Duration::from_secs(2 * 3600),
            max_output_size: 1024 * 1024,
        }
    }
}

/// Parameters for creating a dispatched task.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub project: String,
    pub prompt: String,
    pub context: String,
    pub priority: Priority,
    pub timeout_minutes: u64,
    pub git_branch: String,
    pub dry_run: bool,
    pub allowed_tools: Vec<String>,
    pub mcp_session_id: String,
}

/// Per-task executor wiring supplied at start time.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub project_path: String,
    /// Claude Code session to resume.
    pub resume_session_id: String,
    pub model: String,
    pub env: HashMap<String, String>,
    /// Per-project running-task cap (0 = no per-project limit).
    pub max_per_project: usize,
}

struct Inner {
    tasks: HashMap<String, Arc<Task>>,
    cancels: HashMap<String, CancellationToken>,
}

/// Task supervisor. Tasks are never removed during the process lifetime;
/// durable retention lives in the store.
pub struct Manager {
    config: ManagerConfig,
    executor: Arc<dyn Executor>,
    inner: RwLock<Inner>,
    notify: RwLock<Option<NotifyFn>>,
}

impl Manager {
    pub fn new(executor: Arc<dyn Executor>, config: ManagerConfig) -> Self {
        Self {
            config,
            executor,
            inner: RwLock::new(Inner {
                tasks: HashMap::new(),
                cancels: HashMap::new(),
            }),
            notify: RwLock::new(None),
        }
    }

    /// Install the event sink. Events before this are dropped.
    pub fn set_notify_fn(&self, notify: NotifyFn) {
        *self.notify.write().unwrap() = Some(notify);
    }

    /// Create a pending task and store it.
    pub fn create(&self, spec: TaskSpec) -> Arc<Task> {
        let mut task = Task::new(
            &spec.project,
            &spec.prompt,
            spec.priority,
            spec.timeout_minutes,
            self.config.max_output_size,
        );
        task.dry_run = spec.dry_run;
        task.allowed_tools = spec.allowed_tools;
        task.mcp_session_id = spec.mcp_session_id;
        if !spec.git_branch.is_empty() {
            task.set_git_branch(&spec.git_branch);
        }
        if !spec.context.is_empty() {
            task.set_context(&spec.context);
        }

        let task = Arc::new(task);
        self.inner
            .write()
            .unwrap()
            .tasks
            .insert(task.id.clone(), task.clone());

        info!(
            task_id = %task.id,
            project = %task.project,
            priority = %task.priority,
            "task created"
        );

        task
    }

    /// Store an externally built task (linked sessions) without starting
    /// execution.
    pub fn register(&self, task: Task) -> Arc<Task> {
        let task = Arc::new(task);
        self.inner
            .write()
            .unwrap()
            .tasks
            .insert(task.id.clone(), task.clone());
        task
    }

    pub fn get(&self, id: &str) -> Result<Arc<Task>, HeraldError> {
        self.inner
            .read()
            .unwrap()
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| HeraldError::NotFound(format!("task {id:?}")))
    }

    /// Find a linked task with the given Claude Code session id.
    pub fn find_linked_by_session(&self, session_id: &str) -> Option<Arc<Task>> {
        self.inner
            .read()
            .unwrap()
            .tasks
            .values()
            .find(|t| t.kind == TaskKind::Linked && t.snapshot().session_id == session_id)
            .cloned()
    }

    /// Snapshot listing, newest first.
    pub fn list(&self, filter: &TaskFilter) -> Vec<TaskSnapshot> {
        let inner = self.inner.read().unwrap();
        let mut results: Vec<TaskSnapshot> = inner
            .tasks
            .values()
            .map(|t| t.snapshot())
            .filter(|snap| {
                if !filter.status.is_empty()
                    && filter.status != "all"
                    && snap.status.as_str() != filter.status
                {
                    return false;
                }
                if !filter.project.is_empty() && snap.project != filter.project {
                    return false;
                }
                if let Some(since) = filter.since {
                    if snap.created_at < since {
                        return false;
                    }
                }
                true
            })
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if filter.limit > 0 && results.len() > filter.limit {
            results.truncate(filter.limit);
        }

        results
    }

    pub fn running_count(&self) -> usize {
        self.inner
            .read()
            .unwrap()
            .tasks
            .values()
            .filter(|t| t.status() == Status::Running)
            .count()
    }

    /// Admit and start a task. Rejections carry the current/cap counts.
    pub fn start(&self, task: &Arc<Task>, opts: StartOptions) -> Result<(), HeraldError> {
        // One consistent read for both counts.
        {
            let inner = self.inner.read().unwrap();
            let mut global_running = 0usize;
            let mut project_running = 0usize;
            for existing in inner.tasks.values() {
                if existing.status() == Status::Running {
                    global_running += 1;
                    if existing.project == task.project {
                        project_running += 1;
                    }
                }
            }

            if global_running >= self.config.max_concurrent {
                return Err(HeraldError::Task(format!(
                    "global concurrency limit reached ({global_running}/{})",
                    self.config.max_concurrent
                )));
            }
            if opts.max_per_project > 0 && project_running >= opts.max_per_project {
                return Err(HeraldError::Task(format!(
                    "project {:?} concurrency limit reached ({project_running}/{})",
                    task.project, opts.max_per_project
                )));
            }
        }

        let requested = Duration::from_secs(task.timeout_minutes * 60);
        let deadline = requested.min(self.config.max_task_duration);

        let cancel = CancellationToken::new();
        self.inner
            .write()
            .unwrap()
            .cancels
            .insert(task.id.clone(), cancel.clone());

        task.set_status(Status::Running);
        self.emit(task, "task.started", &format!("Task started on {}", task.project));

        let worker = Worker {
            executor: self.executor.clone(),
            notify: self.notify.read().unwrap().clone(),
        };
        let task = task.clone();
        tokio::spawn(async move {
            worker.run(task, opts, cancel, deadline).await;
        });

        Ok(())
    }

    /// Cancel an in-flight task. Not-found and already-terminal are
    /// errors.
    pub fn cancel(&self, id: &str) -> Result<(), HeraldError> {
        let (task, cancel) = {
            let inner = self.inner.read().unwrap();
            let task = inner
                .tasks
                .get(id)
                .cloned()
                .ok_or_else(|| HeraldError::NotFound(format!("task {id:?}")))?;
            (task, inner.cancels.get(id).cloned())
        };

        if task.is_terminal() {
            return Err(HeraldError::Task(format!(
                "task {id:?} is already {}",
                task.status()
            )));
        }

        info!(task_id = id, "cancelling task");

        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        let pid = task.pid();
        if pid > 0 {
            tokio::spawn(async move { graceful_kill(pid).await });
        }

        task.set_status(Status::Cancelled);
        self.emit(&task, "task.cancelled", "Task cancelled");

        Ok(())
    }

    fn emit(&self, task: &Arc<Task>, event_type: &str, message: &str) {
        let notify = self.notify.read().unwrap().clone();
        if let Some(notify) = notify {
            notify(TaskEvent {
                event_type: event_type.to_string(),
                task_id: task.id.clone(),
                project: task.project.clone(),
                message: message.to_string(),
                mcp_session_id: task.mcp_session_id.clone(),
            });
        }
    }
}

/// Per-task worker state, detached from the manager so the supervisor
/// lock is never held across an await.
struct Worker {
    executor: Arc<dyn Executor>,
    notify: Option<NotifyFn>,
}

impl Worker {
    async fn run(
        self,
        task: Arc<Task>,
        opts: StartOptions,
        cancel: CancellationToken,
        deadline: Duration,
    ) {
        let req = ExecRequest {
            task_id: task.id.clone(),
            prompt: task.prompt.clone(),
            project_path: opts.project_path,
            session_id: opts.resume_session_id,
            model: opts.model,
            allowed_tools: task.allowed_tools.clone(),
            timeout: deadline,
            dry_run: task.dry_run,
            env: opts.env,
        };

        let progress_task = task.clone();
        let progress_notify = self.notify.clone();
        let on_progress: ProgressFn = Arc::new(move |event_type: &str, message: &str| {
            progress_task.set_progress(message);
            if event_type == "started" {
                if let Some(pid) = message
                    .strip_prefix("PID ")
                    .and_then(|s| s.trim().parse::<i32>().ok())
                {
                    if pid > 0 {
                        progress_task.set_pid(pid);
                    }
                }
            }
            if let Some(notify) = &progress_notify {
                notify(TaskEvent {
                    event_type: "task.progress".into(),
                    task_id: progress_task.id.clone(),
                    project: progress_task.project.clone(),
                    message: message.to_string(),
                    mcp_session_id: progress_task.mcp_session_id.clone(),
                });
            }
        });

        // The executor runs in its own spawn so a panic is contained and
        // recovered here instead of taking down sibling tasks.
        let executor = self.executor.clone();
        let exec_cancel = cancel.clone();
        let mut handle = tokio::spawn(async move {
            executor.execute(req, exec_cancel, on_progress).await
        });

        let mut timed_out = false;
        let joined = tokio::select! {
            joined = &mut handle => joined,
            _ = tokio::time::sleep(deadline) => {
                timed_out = true;
                cancel.cancel();
                handle.await
            }
        };

        match joined {
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    panic_message(join_err)
                } else {
                    join_err.to_string()
                };
                error!(task_id = %task.id, panic = %reason, "task worker panicked");
                self.finish_failed(&task, &format!("internal panic: {reason}"));
            }
            Ok(Ok(result)) => {
                commit_result(&task, &result);
                if !task.is_terminal() {
                    task.set_status(Status::Completed);
                    self.emit(&task, "task.completed", &format!("Task completed on {}", task.project));
                }
            }
            Ok(Err(exec_err)) => {
                if let Some(partial) = exec_err.partial() {
                    commit_result(&task, partial);
                }
                match exec_err {
                    ExecError::TimedOut { .. } => {
                        warn!(task_id = %task.id, "task timed out");
                        self.finish_failed(&task, "task timed out");
                    }
                    ExecError::Cancelled { .. } if timed_out => {
                        warn!(task_id = %task.id, "task timed out");
                        self.finish_failed(&task, "task timed out");
                    }
                    ExecError::Cancelled { .. } => {
                        if !task.is_terminal() {
                            task.set_status(Status::Cancelled);
                            self.emit(&task, "task.cancelled", "Task cancelled");
                        }
                    }
                    other => self.finish_failed(&task, &other.to_string()),
                }
            }
        }
    }

    fn finish_failed(&self, task: &Arc<Task>, error: &str) {
        if task.is_terminal() {
            return;
        }
        task.set_error(error);
        task.set_status(Status::Failed);
        self.emit(task, "task.failed", error);
    }

    fn emit(&self, task: &Arc<Task>, event_type: &str, message: &str) {
        if let Some(notify) = &self.notify {
            notify(TaskEvent {
                event_type: event_type.to_string(),
                task_id: task.id.clone(),
                project: task.project.clone(),
                message: message.to_string(),
                mcp_session_id: task.mcp_session_id.clone(),
            });
        }
    }
}

/// Cost, turns, session id, and output are committed from whatever the
/// executor produced, error or not.
fn commit_result(task: &Arc<Task>, result: &ExecResult) {
    task.set_cost(result.cost_usd);
    task.set_turns(result.turns);
    if !result.session_id.is_empty() {
        task.set_session_id(&result.session_id);
    }
    if !result.output.is_empty() {
        task.append_output(&result.output);
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Executor double: sleeps for `delay` (cancellable), then returns a
    /// canned result or failure.
    struct MockExecutor {
        delay: Duration,
        result: ExecResult,
        exit_code: Option<i32>,
        panic: bool,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MockExecutor {
        fn quick() -> Self {
            Self::with_delay(Duration::from_millis(10))
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                result: ExecResult {
                    session_id: "ses_mock".into(),
                    output: "mock output".into(),
                    cost_usd: 0.05,
                    turns: 1,
                    exit_code: 0,
                    duration: Duration::from_millis(10),
                },
                exit_code: None,
                panic: false,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Executor for MockExecutor {
        async fn execute(
            &self,
            _req: ExecRequest,
            cancel: CancellationToken,
            on_progress: ProgressFn,
        ) -> Result<ExecResult, ExecError> {
            if self.panic {
                panic!("mock executor exploded");
            }

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            on_progress("started", "PID 4242");

            let outcome = tokio::select! {
                _ = tokio::time::sleep(self.delay) => {
                    on_progress("progress", "halfway there");
                    match self.exit_code {
                        Some(code) => Err(ExecError::NonZeroExit {
                            code,
                            partial: self.result.clone(),
                        }),
                        None => Ok(self.result.clone()),
                    }
                }
                _ = cancel.cancelled() => Err(ExecError::Cancelled {
                    partial: self.result.clone(),
                }),
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    fn manager_with(executor: Arc<dyn Executor>, max_concurrent: usize) -> Arc<Manager> {
        Arc::new(Manager::new(
            executor,
            ManagerConfig {
                max_concurrent,
                max_task_duration: Duration::from_secs(3600),
                max_output_size: 1024 * 1024,
            },
        ))
    }

    fn spec(project: &str) -> TaskSpec {
        TaskSpec {
            project: project.into(),
            prompt: "do something".into(),
            timeout_minutes: 30,
            ..Default::default()
        }
    }

    fn recording_notify() -> (NotifyFn, Arc<Mutex<Vec<TaskEvent>>>) {
        let events: Arc<Mutex<Vec<TaskEvent>>> = Arc::default();
        let sink = events.clone();
        let notify: NotifyFn = Arc::new(move |event| {
            sink.lock().unwrap().push(event);
        });
        (notify, events)
    }

    async fn wait_terminal(task: &Arc<Task>) {
        let mut rx = task.done();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|&done| done))
            .await
            .expect("task should reach a terminal state")
            .unwrap();
    }

    #[tokio::test]
    async fn successful_run_commits_result_and_events() {
        let manager = manager_with(Arc::new(MockExecutor::quick()), 3);
        let (notify, events) = recording_notify();
        manager.set_notify_fn(notify);

        let task = manager.create(spec("api"));
        manager.start(&task, StartOptions::default()).unwrap();
        wait_terminal(&task).await;

        let snap = task.snapshot();
        assert_eq!(snap.status, Status::Completed);
        assert_eq!(snap.session_id, "ses_mock");
        assert_eq!(snap.output, "mock output");
        assert!((snap.cost_usd - 0.05).abs() < 1e-9);
        assert_eq!(snap.turns, 1);
        assert_eq!(snap.pid, 4242);
        assert!(snap.completed_at.is_some());

        let events = events.lock().unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        let started = kinds.iter().position(|k| *k == "task.started").unwrap();
        let progress = kinds.iter().position(|k| *k == "task.progress").unwrap();
        let completed = kinds.iter().position(|k| *k == "task.completed").unwrap();
        assert!(started < progress, "started must precede progress");
        assert!(progress < completed, "terminal event must come last");
    }

    #[tokio::test]
    async fn admission_rejects_over_global_limit() {
        let executor = Arc::new(MockExecutor::with_delay(Duration::from_secs(60)));
        let manager = manager_with(executor, 2);

        let first = manager.create(spec("api"));
        let second = manager.create(spec("api"));
        let third = manager.create(spec("api"));

        manager.start(&first, StartOptions::default()).unwrap();
        manager.start(&second, StartOptions::default()).unwrap();

        let err = manager.start(&third, StartOptions::default()).unwrap_err();
        assert!(
            err.to_string().contains("global concurrency limit reached (2/2)"),
            "unexpected error: {err}"
        );

        // Cancelling one task frees a slot for a fourth admission.
        manager.cancel(&first.id).unwrap();
        wait_terminal(&first).await;

        let fourth = manager.create(spec("api"));
        manager.start(&fourth, StartOptions::default()).unwrap();

        manager.cancel(&second.id).unwrap();
        manager.cancel(&fourth.id).unwrap();
    }

    #[tokio::test]
    async fn admission_rejects_over_project_limit() {
        let executor = Arc::new(MockExecutor::with_delay(Duration::from_secs(60)));
        let manager = manager_with(executor, 10);

        let first = manager.create(spec("api"));
        manager
            .start(&first, StartOptions { max_per_project: 1, ..Default::default() })
            .unwrap();

        let second = manager.create(spec("api"));
        let err = manager
            .start(&second, StartOptions { max_per_project: 1, ..Default::default() })
            .unwrap_err();
        assert!(err.to_string().contains("concurrency limit reached (1/1)"));
        assert!(err.to_string().contains("api"));

        // A different project is unaffected.
        let other = manager.create(spec("web"));
        manager
            .start(&other, StartOptions { max_per_project: 1, ..Default::default() })
            .unwrap();

        manager.cancel(&first.id).unwrap();
        manager.cancel(&other.id).unwrap();
    }

    #[tokio::test]
    async fn cancel_is_cancelled_not_failed() {
        let executor = Arc::new(MockExecutor::with_delay(Duration::from_secs(60)));
        let manager = manager_with(executor, 3);
        let (notify, events) = recording_notify();
        manager.set_notify_fn(notify);

        let task = manager.create(spec("api"));
        manager.start(&task, StartOptions::default()).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.cancel(&task.id).unwrap();
        wait_terminal(&task).await;

        let snap = task.snapshot();
        assert_eq!(snap.status, Status::Cancelled);
        assert!(snap.error.is_empty(), "cancel is not an error: {}", snap.error);

        let events = events.lock().unwrap();
        assert_eq!(
            events
                .iter()
                .filter(|e| e.event_type == "task.cancelled")
                .count(),
            1,
            "exactly one terminal event"
        );
    }

    #[tokio::test]
    async fn deadline_exceeded_is_failed_with_timeout_error() {
        let executor = Arc::new(MockExecutor::with_delay(Duration::from_secs(60)));
        let manager = Arc::new(Manager::new(
            executor,
            ManagerConfig {
                max_concurrent: 3,
                max_task_duration: Duration::from_millis(500),
                max_output_size: 0,
            },
        ));

        let task = manager.create(spec("api"));
        manager.start(&task, StartOptions::default()).unwrap();
        wait_terminal(&task).await;

        let snap = task.snapshot();
        assert_eq!(snap.status, Status::Failed);
        assert_eq!(snap.error, "task timed out");
    }

    #[tokio::test]
    async fn executor_failure_carries_partial_result() {
        let mut executor = MockExecutor::quick();
        executor.exit_code = Some(3);
        let manager = manager_with(Arc::new(executor), 3);

        let task = manager.create(spec("api"));
        manager.start(&task, StartOptions::default()).unwrap();
        wait_terminal(&task).await;

        let snap = task.snapshot();
        assert_eq!(snap.status, Status::Failed);
        assert!(snap.error.contains("exited with code 3"));
        // Partial accounting survives the failure.
        assert_eq!(snap.session_id, "ses_mock");
        assert_eq!(snap.output, "mock output");
    }

    #[tokio::test]
    async fn worker_panic_is_recovered() {
        let mut executor = MockExecutor::quick();
        executor.panic = true;
        let manager = manager_with(Arc::new(executor), 3);
        let (notify, events) = recording_notify();
        manager.set_notify_fn(notify);

        let task = manager.create(spec("api"));
        manager.start(&task, StartOptions::default()).unwrap();
        wait_terminal(&task).await;

        let snap = task.snapshot();
        assert_eq!(snap.status, Status::Failed);
        assert!(snap.error.contains("internal panic"));
        assert!(snap.error.contains("mock executor exploded"));

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| e.event_type == "task.failed"));

        // Siblings are unaffected.
        let healthy = manager.create(spec("api"));
        manager.start(&healthy, StartOptions::default()).unwrap();
        wait_terminal(&healthy).await;
        assert_eq!(healthy.snapshot().status, Status::Completed);
    }

    #[tokio::test]
    async fn cancel_errors_for_missing_and_terminal_tasks() {
        let manager = manager_with(Arc::new(MockExecutor::quick()), 3);

        let err = manager.cancel("herald-nope0000").unwrap_err();
        assert!(err.is_not_found());

        let task = manager.create(spec("api"));
        manager.start(&task, StartOptions::default()).unwrap();
        wait_terminal(&task).await;

        let err = manager.cancel(&task.id).unwrap_err();
        assert!(err.to_string().contains("already"));
    }

    #[tokio::test]
    async fn list_filters_and_orders_snapshots() {
        let manager = manager_with(Arc::new(MockExecutor::quick()), 3);

        let a = manager.create(spec("api"));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = manager.create(spec("web"));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let c = manager.create(spec("api"));

        let all = manager.list(&TaskFilter::default());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, c.id, "newest first");
        assert_eq!(all[2].id, a.id);

        let api_only = manager.list(&TaskFilter {
            project: "api".into(),
            ..Default::default()
        });
        assert_eq!(api_only.len(), 2);

        let pending = manager.list(&TaskFilter {
            status: "pending".into(),
            ..Default::default()
        });
        assert_eq!(pending.len(), 3);

        let limited = manager.list(&TaskFilter {
            limit: 1,
            ..Default::default()
        });
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, c.id);

        let since = manager.list(&TaskFilter {
            since: Some(b.created_at),
            ..Default::default()
        });
        assert_eq!(since.len(), 2, "strictly-older tasks are excluded");
    }

    #[tokio::test]
    async fn linked_register_and_lookup() {
        let manager = manager_with(Arc::new(MockExecutor::quick()), 3);
        let linked = manager.register(Task::new_linked("api", "ses_ext01", "summary text"));

        assert!(linked.is_terminal());
        assert!(manager.find_linked_by_session("ses_ext01").is_some());
        assert!(manager.find_linked_by_session("ses_other").is_none());

        // Linked tasks appear in listings under their own status.
        let listed = manager.list(&TaskFilter {
            status: "linked".into(),
            ..Default::default()
        });
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, linked.id);
    }

    #[tokio::test]
    async fn concurrency_peak_never_exceeds_limit() {
        let executor = Arc::new(MockExecutor::with_delay(Duration::from_millis(100)));
        let manager = manager_with(executor.clone(), 2);

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let task = manager.create(spec("api"));
            let _ = manager.start(&task, StartOptions::default());
            tasks.push(task);
        }

        for task in &tasks {
            if task.status() == Status::Running {
                wait_terminal(task).await;
            }
        }

        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
    }
}
