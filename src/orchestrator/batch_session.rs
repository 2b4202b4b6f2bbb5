//! 批次会话 - 编排层
//!
//! 管理一批图片任务的生命周期：添加 / 移除 / 运行 / 取消 / 进度查询。
//!
//! 并发模型：一次运行启动 `min(并发上限, 可调度任务数)` 个 worker，
//! 共享一个任务 id 队列。上限即 worker 数量本身，不依赖信号量。
//! 取消只阻止新的出队，已在途的任务允许完成并照常写回状态。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::error::{AppError, AppResult, CredentialError, SessionError};
use crate::models::exercise::ExerciseResponse;
use crate::models::task::{
    ImagePayload, ImageTask, Progress, RunStats, TaskId, TaskSnapshot,
};
use crate::workflow::{TaskCtx, TaskFlow};

/// 带毒化恢复的加锁
///
/// 状态写入都是简单赋值，worker panic 留下的数据仍然一致，
/// 直接取回内部值继续使用。
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 会话共享状态
///
/// 被 worker 协程共同持有，所有字段都可并发访问。
struct SessionState {
    tasks: Mutex<Vec<ImageTask>>,
    /// 本次运行已出队并处理完毕的任务数（含已移除的）
    completed: AtomicUsize,
    /// 本次运行开始时的可调度任务总数
    total: AtomicUsize,
    /// 取消标记，阻止 worker 继续出队
    cancelled: AtomicBool,
    /// 运行互斥标记
    running: AtomicBool,
    next_id: AtomicU64,
}

/// 运行标记的释放守卫
///
/// 保证 `running` 在任何退出路径（含错误）上都被复位。
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 单个 worker 的局部计数，运行结束后汇总
#[derive(Debug, Default, Clone, Copy)]
struct WorkerTally {
    success: usize,
    failed: usize,
}

/// 批次会话
///
/// 对外的唯一编排入口。任务的添加 / 移除随时可用（清空除外），
/// 一个会话同一时刻最多有一次运行。
pub struct BatchSession {
    flow: Arc<TaskFlow>,
    concurrency_limit: usize,
    state: Arc<SessionState>,
}

impl std::fmt::Debug for BatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSession")
            .field("concurrency_limit", &self.concurrency_limit)
            .finish_non_exhaustive()
    }
}

impl BatchSession {
    /// 创建新的批次会话
    pub fn new(flow: TaskFlow, concurrency_limit: usize) -> AppResult<Self> {
        if concurrency_limit == 0 {
            return Err(AppError::Session(SessionError::InvalidConcurrency {
                value: concurrency_limit,
            }));
        }
        Ok(Self {
            flow: Arc::new(flow),
            concurrency_limit,
            state: Arc::new(SessionState {
                tasks: Mutex::new(Vec::new()),
                completed: AtomicUsize::new(0),
                total: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
                running: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// 添加一个任务，初始状态为等待中
    pub fn add_task(&self, source_name: impl Into<String>, payload: ImagePayload) -> TaskId {
        let id = TaskId(self.state.next_id.fetch_add(1, Ordering::SeqCst));
        let task = ImageTask::new(id, source_name, payload);
        lock(&self.state.tasks).push(task);
        id
    }

    /// 批量添加任务，保持给定顺序
    pub fn add_tasks(&self, batch: Vec<(String, ImagePayload)>) -> Vec<TaskId> {
        batch
            .into_iter()
            .map(|(name, payload)| self.add_task(name, payload))
            .collect()
    }

    /// 移除一个任务，运行中也允许
    ///
    /// 已在途的识别不会被打断，结果写回时发现任务不存在则静默丢弃。
    pub fn remove_task(&self, id: TaskId) -> bool {
        let mut tasks = lock(&self.state.tasks);
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        tasks.len() < before
    }

    /// 清空所有任务
    ///
    /// 运行中不允许清空，避免进度总数失去意义。
    pub fn clear(&self) -> AppResult<()> {
        if self.is_running() {
            return Err(AppError::Session(SessionError::RunInProgress));
        }
        lock(&self.state.tasks).clear();
        Ok(())
    }

    /// 所有任务的快照
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        lock(&self.state.tasks).iter().map(|t| t.snapshot()).collect()
    }

    /// 当前运行的进度
    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.state.completed.load(Ordering::SeqCst),
            total: self.state.total.load(Ordering::SeqCst),
        }
    }

    /// 可调度（等待中或失败）的任务数
    pub fn eligible_count(&self) -> usize {
        lock(&self.state.tasks)
            .iter()
            .filter(|t| t.status.is_eligible())
            .count()
    }

    /// 所有成功任务的结果
    pub fn success_results(&self) -> Vec<(TaskId, ExerciseResponse)> {
        lock(&self.state.tasks)
            .iter()
            .filter_map(|t| match &t.status {
                crate::models::task::TaskStatus::Success(r) => Some((t.id, r.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// 请求取消当前运行
    ///
    /// 只设置标记，worker 在下一次出队前检查。已在途的任务照常完成。
    pub fn cancel(&self) {
        if self.is_running() {
            warn!("⚠️ 收到取消请求，停止调度新任务");
        }
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    /// 运行一次批量识别
    ///
    /// 把所有可调度任务（等待中 / 失败）重新提交给 worker 池。
    /// 未配置凭证或已有运行在进行中时直接拒绝，不改动任何任务。
    pub async fn run(&self) -> AppResult<RunStats> {
        if !self.flow.has_credential() {
            return Err(AppError::Credential(CredentialError::Missing));
        }
        if self.state.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::Session(SessionError::RunInProgress));
        }
        let _guard = RunGuard(&self.state.running);

        // 确定本次运行的任务集合，入队顺序即添加顺序
        let eligible: VecDeque<TaskId> = lock(&self.state.tasks)
            .iter()
            .filter(|t| t.status.is_eligible())
            .map(|t| t.id)
            .collect();
        let total = eligible.len();
        if total == 0 {
            info!("ℹ️ 没有可调度的任务，本次运行直接结束");
            return Ok(RunStats::default());
        }

        self.state.cancelled.store(false, Ordering::SeqCst);
        self.state.completed.store(0, Ordering::SeqCst);
        self.state.total.store(total, Ordering::SeqCst);

        let worker_count = self.concurrency_limit.min(total);
        info!(
            "🚀 开始批量识别: {} 个任务, {} 个 worker",
            total, worker_count
        );

        let queue = Arc::new(Mutex::new(eligible));
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            handles.push(tokio::spawn(worker_loop(
                Arc::clone(&self.flow),
                Arc::clone(&self.state),
                Arc::clone(&queue),
            )));
        }

        // 等齐所有 worker 再汇报 panic，保证状态写入全部结束
        let mut tally = WorkerTally::default();
        let mut panic_detail: Option<String> = None;
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(t) => {
                    tally.success += t.success;
                    tally.failed += t.failed;
                }
                Err(e) => panic_detail = Some(e.to_string()),
            }
        }
        if let Some(detail) = panic_detail {
            return Err(AppError::worker_panicked(detail));
        }

        let stats = RunStats {
            success: tally.success,
            failed: tally.failed,
            total,
        };
        if self.state.cancelled.load(Ordering::SeqCst) {
            info!(
                "🛑 运行已取消: 完成 {}/{}, 成功 {}, 失败 {}",
                self.state.completed.load(Ordering::SeqCst),
                stats.total,
                stats.success,
                stats.failed
            );
        } else {
            info!(
                "✓ 批量识别完成: 成功 {}, 失败 {}, 共 {}",
                stats.success, stats.failed, stats.total
            );
        }
        Ok(stats)
    }
}

/// worker 主循环
///
/// 出队一个任务 id，领取（置为识别中）后调用处理流程，结果写回。
/// 每个出队的 id 恰好让 `completed` 加一，包括中途被移除的。
async fn worker_loop(
    flow: Arc<TaskFlow>,
    state: Arc<SessionState>,
    queue: Arc<Mutex<VecDeque<TaskId>>>,
) -> WorkerTally {
    let mut tally = WorkerTally::default();
    loop {
        if state.cancelled.load(Ordering::SeqCst) {
            break;
        }
        let id = match lock(&queue).pop_front() {
            Some(id) => id,
            None => break,
        };

        // 领取任务：克隆载荷引用后立即放锁，识别期间不持锁
        let claimed = {
            let mut tasks = lock(&state.tasks);
            tasks.iter_mut().find(|t| t.id == id).and_then(|task| {
                task.begin_analysis().then(|| {
                    (
                        Arc::clone(&task.payload),
                        TaskCtx::new(task.id, task.source_name.clone()),
                    )
                })
            })
        };
        let Some((payload, ctx)) = claimed else {
            // 任务已被移除或状态不再可调度，照样计入完成数
            state.completed.fetch_add(1, Ordering::SeqCst);
            continue;
        };

        match flow.run(&payload, &ctx).await {
            Ok(response) => {
                let mut tasks = lock(&state.tasks);
                if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
                    task.mark_success(response);
                }
                tally.success += 1;
            }
            Err(e) => {
                let mut tasks = lock(&state.tasks);
                if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
                    task.mark_error(e.to_string());
                }
                tally.failed += 1;
            }
        }
        state.completed.fetch_add(1, Ordering::SeqCst);
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use tokio::sync::Semaphore;

    use crate::models::exercise::AnalysisOptions;
    use crate::models::task::TaskStatus;
    use crate::services::Recognizer;

    /// 测试用识别器
    ///
    /// - `gate` 存在时每次 analyze 都要等一个许可，测试侧控制放行节奏
    /// - `fail_all` 为 true 时所有调用失败
    /// - 载荷为 b"fail" 的图片固定失败
    /// - 同时统计在途调用数的峰值，用于断言并发上限
    struct MockRecognizer {
        has_key: bool,
        gate: Option<Arc<Semaphore>>,
        fail_all: Arc<AtomicBool>,
        inflight: Arc<AtomicUsize>,
        max_inflight: Arc<AtomicUsize>,
    }

    impl MockRecognizer {
        fn new() -> Self {
            Self {
                has_key: true,
                gate: None,
                fail_all: Arc::new(AtomicBool::new(false)),
                inflight: Arc::new(AtomicUsize::new(0)),
                max_inflight: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new()
            }
        }

        fn without_key() -> Self {
            Self {
                has_key: false,
                ..Self::new()
            }
        }
    }

    fn sample_response() -> ExerciseResponse {
        ExerciseResponse {
            title: "一元二次方程".to_string(),
            difficulty: 3,
            keywords: vec!["方程".into(), "判别式".into(), "求根".into()],
            content: "<p>解方程 x^2 - 5x + 6 = 0</p>".to_string(),
        }
    }

    #[async_trait]
    impl Recognizer for MockRecognizer {
        fn has_credential(&self) -> bool {
            self.has_key
        }

        async fn verify_credential(&self) -> AppResult<bool> {
            Ok(self.has_key)
        }

        async fn analyze(
            &self,
            image_base64: &str,
            _media_type: &str,
            _options: &AnalysisOptions,
        ) -> AppResult<ExerciseResponse> {
            let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_inflight.fetch_max(current, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }

            self.inflight.fetch_sub(1, Ordering::SeqCst);

            let data = BASE64.decode(image_base64).unwrap_or_default();
            if self.fail_all.load(Ordering::SeqCst) || data == b"fail" {
                Err(AppError::malformed_response("测试注入的失败"))
            } else {
                Ok(sample_response())
            }
        }
    }

    fn build_session(recognizer: MockRecognizer, limit: usize) -> Arc<BatchSession> {
        let flow =
            TaskFlow::new(Arc::new(recognizer), AnalysisOptions::default()).unwrap();
        Arc::new(BatchSession::new(flow, limit).unwrap())
    }

    fn payload(bytes: &[u8]) -> ImagePayload {
        ImagePayload::new(bytes.to_vec(), "image/png")
    }

    /// 轮询等待条件成立，避免依赖固定 sleep
    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("条件等待超时");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let flow = TaskFlow::new(
            Arc::new(MockRecognizer::new()),
            AnalysisOptions::default(),
        )
        .unwrap();
        let err = BatchSession::new(flow, 0).unwrap_err();
        assert!(matches!(
            err,
            AppError::Session(SessionError::InvalidConcurrency { value: 0 })
        ));
    }

    #[tokio::test]
    async fn test_run_marks_outcomes() {
        let session = build_session(MockRecognizer::new(), 3);
        let ok1 = session.add_task("page1.png", payload(b"ok-1"));
        let bad = session.add_task("page2.png", payload(b"fail"));
        let ok2 = session.add_task("page3.png", payload(b"ok-2"));

        let stats = session.run().await.unwrap();
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total, 3);

        let snapshots = session.snapshots();
        let status_of = |id: TaskId| {
            snapshots
                .iter()
                .find(|s| s.id == id)
                .map(|s| s.status.clone())
                .unwrap()
        };
        assert!(status_of(ok1).is_success());
        assert!(status_of(ok2).is_success());
        match status_of(bad) {
            TaskStatus::Error(msg) => assert!(msg.contains("形状不符合约定")),
            other => panic!("预期失败状态，实际: {:?}", other),
        }

        assert_eq!(session.progress(), Progress { completed: 3, total: 3 });
        assert_eq!(session.success_results().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_capped() {
        let gate = Arc::new(Semaphore::new(0));
        let mock = MockRecognizer::gated(Arc::clone(&gate));
        let inflight = Arc::clone(&mock.inflight);
        let max_inflight = Arc::clone(&mock.max_inflight);
        let session = build_session(mock, 3);

        for i in 0..8 {
            session.add_task(format!("page{}.png", i), payload(b"ok"));
        }

        let runner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run().await })
        };

        // 三个 worker 全部进入识别并卡在闸门上
        wait_until(|| inflight.load(Ordering::SeqCst) == 3).await;
        gate.add_permits(8);

        let stats = runner.await.unwrap().unwrap();
        assert_eq!(stats.success, 8);
        assert_eq!(max_inflight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_run_is_noop() {
        let session = build_session(MockRecognizer::new(), 3);
        let stats = session.run().await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(session.progress(), Progress::default());
    }

    #[tokio::test]
    async fn test_rerun_and_clear_rejected_while_running() {
        let gate = Arc::new(Semaphore::new(0));
        let session = build_session(MockRecognizer::gated(Arc::clone(&gate)), 2);
        session.add_task("page1.png", payload(b"ok"));

        let runner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run().await })
        };
        {
            let session = Arc::clone(&session);
            wait_until(move || session.is_running()).await;
        }

        assert!(matches!(
            session.run().await.unwrap_err(),
            AppError::Session(SessionError::RunInProgress)
        ));
        assert!(matches!(
            session.clear().unwrap_err(),
            AppError::Session(SessionError::RunInProgress)
        ));

        gate.add_permits(1);
        runner.await.unwrap().unwrap();
        assert!(!session.is_running());
        session.clear().unwrap();
        assert!(session.snapshots().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_tasks() {
        let gate = Arc::new(Semaphore::new(0));
        let mock = MockRecognizer::gated(Arc::clone(&gate));
        let inflight = Arc::clone(&mock.inflight);
        let session = build_session(mock, 2);

        for i in 0..5 {
            session.add_task(format!("page{}.png", i), payload(b"ok"));
        }

        let runner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run().await })
        };

        // 两个任务在途时取消，其余不再出队
        wait_until(|| inflight.load(Ordering::SeqCst) == 2).await;
        session.cancel();
        gate.add_permits(5);

        let stats = runner.await.unwrap().unwrap();
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.total, 5);
        assert_eq!(session.progress(), Progress { completed: 2, total: 5 });

        let snapshots = session.snapshots();
        assert_eq!(snapshots.iter().filter(|s| s.status.is_success()).count(), 2);
        assert_eq!(
            snapshots
                .iter()
                .filter(|s| matches!(s.status, TaskStatus::Waiting))
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn test_error_tasks_retry_on_next_run() {
        let mock = MockRecognizer::new();
        let fail_all = Arc::clone(&mock.fail_all);
        let session = build_session(mock, 2);

        session.add_task("page1.png", payload(b"ok-1"));
        session.add_task("page2.png", payload(b"ok-2"));

        fail_all.store(true, Ordering::SeqCst);
        let stats = session.run().await.unwrap();
        assert_eq!(stats.failed, 2);
        assert_eq!(session.eligible_count(), 2);

        // 失败任务在下一次运行中重新提交
        fail_all.store(false, Ordering::SeqCst);
        let stats = session.run().await.unwrap();
        assert_eq!(stats.success, 2);
        assert_eq!(stats.total, 2);
        assert_eq!(session.eligible_count(), 0);
    }

    #[tokio::test]
    async fn test_task_added_mid_run_waits_for_next_run() {
        let gate = Arc::new(Semaphore::new(0));
        let mock = MockRecognizer::gated(Arc::clone(&gate));
        let inflight = Arc::clone(&mock.inflight);
        let session = build_session(mock, 2);
        session.add_task("page1.png", payload(b"ok"));

        let runner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run().await })
        };
        wait_until(|| inflight.load(Ordering::SeqCst) == 1).await;

        let late = session.add_task("late.png", payload(b"ok"));
        gate.add_permits(4);

        let stats = runner.await.unwrap().unwrap();
        assert_eq!(stats.total, 1);

        // 运行中加入的任务不参与本次运行
        let snapshots = session.snapshots();
        let late_status = snapshots.iter().find(|s| s.id == late).unwrap();
        assert!(matches!(late_status.status, TaskStatus::Waiting));

        let stats = session.run().await.unwrap();
        assert_eq!(stats.success, 1);
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn test_missing_credential_blocks_run() {
        let session = build_session(MockRecognizer::without_key(), 3);
        session.add_task("page1.png", payload(b"ok"));

        assert!(matches!(
            session.run().await.unwrap_err(),
            AppError::Credential(CredentialError::Missing)
        ));
        // 拒绝运行时任务保持原状
        assert!(matches!(
            session.snapshots()[0].status,
            TaskStatus::Waiting
        ));
    }

    #[tokio::test]
    async fn test_removed_task_still_counts_toward_progress() {
        let gate = Arc::new(Semaphore::new(0));
        let mock = MockRecognizer::gated(Arc::clone(&gate));
        let inflight = Arc::clone(&mock.inflight);
        let session = build_session(mock, 1);

        let first = session.add_task("page1.png", payload(b"ok"));
        let second = session.add_task("page2.png", payload(b"ok"));

        let runner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run().await })
        };
        wait_until(|| inflight.load(Ordering::SeqCst) == 1).await;

        // 第二个任务还在队列里时被移除
        assert!(session.remove_task(second));
        gate.add_permits(2);

        let stats = runner.await.unwrap().unwrap();
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.total, 2);
        // 被移除的任务仍计入完成数，进度能到 100%
        assert_eq!(session.progress(), Progress { completed: 2, total: 2 });

        let snapshots = session.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].id, first);
        assert!(snapshots[0].status.is_success());
    }
}
