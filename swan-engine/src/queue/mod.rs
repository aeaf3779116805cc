//! 有界并发调度队列。
//!
//! 请求按 FIFO 顺序放行，同时运行的请求数不超过 `max_concurrent`。
//! 放行与完成的簿记在同一把锁内完成，“运行数减一、取出下一个”是原子的。
//! 每个被放行的请求运行在独立的 tokio 任务中，重试等待期间仍占用它的名额。
//!
//! 锁内只记录状态变化产生的事件（周期开始、放行、撤回、周期结束、交付结果），
//! 锁外由唯一的分发者按记录顺序执行，因此钩子与结果交付的顺序与状态变化一致。

pub mod hooks;

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::{CancelCause, EngineError, EngineResult};
use crate::request::{CancelHandle, Completion, Request};
use crate::session::Session;

pub use hooks::QueueHooks;

/// 默认并发上限
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// 失败策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// 失败不影响其他请求
    #[default]
    ContinueOnFailure,
    /// 第一个失败的请求取消队列中其余所有等待和运行中的请求
    CancelAll,
}

/// 队列构建器，由 [`Session::queue`] 创建
pub struct QueueBuilder {
    session: Session,
    max_concurrent: usize,
    failure_mode: FailureMode,
    hooks: QueueHooks,
}

impl QueueBuilder {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            failure_mode: FailureMode::default(),
            hooks: QueueHooks::default(),
        }
    }

    /// 并发上限，至少为 1
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn hooks(mut self, hooks: QueueHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build(self) -> Queue {
        Queue {
            shared: Arc::new(Shared {
                session: self.session,
                max_concurrent: self.max_concurrent,
                failure_mode: self.failure_mode,
                hooks: self.hooks,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }
}

/// 有界并发队列
#[derive(Clone)]
pub struct Queue {
    shared: Arc<Shared>,
}

struct Shared {
    session: Session,
    max_concurrent: usize,
    failure_mode: FailureMode,
    hooks: QueueHooks,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Pending>,
    running: HashMap<u64, CancelHandle>,
    /// 当前是否处于一个排空周期内
    cycle_active: bool,
    /// 本周期内是否有请求以非取消的错误结束
    cycle_failed: bool,
    /// 本周期内 cancel-all 是否已经触发
    cancel_all_fired: bool,
    /// 待分发的事件，按状态变化的顺序排列
    events: VecDeque<Event>,
    /// 是否已有线程在分发事件
    dispatching: bool,
}

struct Pending {
    request: Request,
    reply: Reply,
}

type Reply = oneshot::Sender<EngineResult<Completion>>;

enum Event {
    CycleStarted,
    Launch { pending: Pending, runtime: Handle },
    /// 从未开始就被移出队列的请求
    Withdrawn(Pending),
    CycleDrained { completed_with_error: bool },
    Deliver(Reply, EngineResult<Completion>),
}

impl Queue {
    /// 加入请求，有空闲名额时立即开始
    ///
    /// 必须在 tokio 运行时中调用。返回的句柄是一个 future，
    /// 每个请求恰好产生一次结果。
    pub fn add_operation(&self, request: Request) -> RequestHandle {
        let (reply, receiver) = oneshot::channel();
        let handle = RequestHandle {
            id: request.id(),
            cancel: request.cancel_handle(),
            queue: Arc::downgrade(&self.shared),
            receiver,
        };
        self.shared.enqueue(Pending { request, reply }, Handle::current());
        handle
    }

    /// 立即取消所有等待中的请求，并协作式地取消所有运行中的请求
    pub fn cancel_all_operations(&self) {
        self.shared.cancel_everything(CancelCause::QueueCancelled);
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.shared.lock().running.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.shared.failure_mode
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(self: &Arc<Self>, pending: Pending, runtime: Handle) {
        let dispatch = {
            let mut state = self.lock();
            if !state.cycle_active {
                state.cycle_active = true;
                state.cycle_failed = false;
                state.cancel_all_fired = false;
                state.events.push_back(Event::CycleStarted);
            }
            log::debug!(
                "Queue accepted request #{} ({} pending, {} running)",
                pending.request.id(),
                state.pending.len() + 1,
                state.running.len()
            );
            state.pending.push_back(pending);
            self.admit(&mut state, &runtime);
            Self::claim_dispatch(&mut state)
        };

        if dispatch {
            self.dispatch();
        }
    }

    /// FIFO 放行，直到达到并发上限
    fn admit(&self, state: &mut QueueState, runtime: &Handle) {
        while state.running.len() < self.max_concurrent {
            let Some(next) = state.pending.pop_front() else {
                break;
            };
            state
                .running
                .insert(next.request.id(), next.request.cancel_handle());
            state.events.push_back(Event::Launch {
                pending: next,
                runtime: runtime.clone(),
            });
        }
    }

    fn launch(self: &Arc<Self>, Pending { request, reply }: Pending, runtime: &Handle) {
        let shared = Arc::clone(self);
        runtime.spawn(async move {
            let id = request.id();
            let result = AssertUnwindSafe(shared.session.drive(request, &shared.hooks))
                .catch_unwind()
                .await
                .map_err(|panic| {
                    let message = panic_message(panic.as_ref());
                    log::error!("Request #{} task panicked: {}", id, message);
                    EngineError::MiddlewareError {
                        context: format!("request task panicked: {}", message),
                    }
                });
            shared.complete(id, result, reply);
        });
    }

    fn complete(self: &Arc<Self>, id: u64, result: EngineResult<Completion>, reply: Reply) {
        let failed = match &result {
            Ok(completion) => completion.error().is_some_and(|error| !error.is_cancelled()),
            Err(_) => true,
        };

        let dispatch = {
            let mut state = self.lock();
            state.running.remove(&id);

            if failed {
                state.cycle_failed = true;
                if self.failure_mode == FailureMode::CancelAll && !state.cancel_all_fired {
                    state.cancel_all_fired = true;
                    log::warn!(
                        "Request #{} failed, cancelling {} pending and {} running requests",
                        id,
                        state.pending.len(),
                        state.running.len()
                    );
                    Self::cancel_in(&mut state, CancelCause::FailurePolicy);
                }
            }

            self.admit(&mut state, &Handle::current());
            Self::settle(&mut state);
            state.events.push_back(Event::Deliver(reply, result));
            Self::claim_dispatch(&mut state)
        };

        if dispatch {
            self.dispatch();
        }
    }

    /// 取消运行中的请求并撤回所有等待中的请求
    fn cancel_in(state: &mut QueueState, cause: CancelCause) {
        for handle in state.running.values() {
            handle.cancel(cause);
        }
        while let Some(pending) = state.pending.pop_front() {
            pending.request.cancel_handle().cancel(cause);
            state.events.push_back(Event::Withdrawn(pending));
        }
    }

    /// 等待与运行集合都为空时结束本周期
    fn settle(state: &mut QueueState) {
        if state.cycle_active && state.pending.is_empty() && state.running.is_empty() {
            state.cycle_active = false;
            let completed_with_error = state.cycle_failed;
            state.events.push_back(Event::CycleDrained { completed_with_error });
        }
    }

    fn claim_dispatch(state: &mut QueueState) -> bool {
        !std::mem::replace(&mut state.dispatching, true)
    }

    /// 按顺序执行事件，直到事件队列为空
    fn dispatch(self: &Arc<Self>) {
        loop {
            let event = {
                let mut state = self.lock();
                match state.events.pop_front() {
                    Some(event) => event,
                    None => {
                        state.dispatching = false;
                        return;
                    }
                }
            };

            match event {
                Event::CycleStarted => self.hooks.cycle_started(),
                Event::Launch { pending, runtime } => self.launch(pending, &runtime),
                Event::Withdrawn(Pending { request, reply }) => {
                    let completion = Session::finish_unstarted(request, &self.hooks);
                    // 排到本次状态变化的 after_all 之后交付
                    self.lock()
                        .events
                        .push_back(Event::Deliver(reply, Ok(completion)));
                }
                Event::CycleDrained { completed_with_error } => {
                    self.hooks.cycle_drained(completed_with_error)
                }
                Event::Deliver(reply, result) => {
                    // 调用方可能已经丢弃了句柄
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn cancel_everything(self: &Arc<Self>, cause: CancelCause) {
        let dispatch = {
            let mut state = self.lock();
            log::info!(
                "Queue cancelling {} pending and {} running requests",
                state.pending.len(),
                state.running.len()
            );
            Self::cancel_in(&mut state, cause);
            Self::settle(&mut state);
            Self::claim_dispatch(&mut state)
        };

        if dispatch {
            self.dispatch();
        }
    }

    /// 把仍在等待的单个请求移出队列；已在运行的请求由取消令牌处理
    fn withdraw(self: &Arc<Self>, id: u64) {
        let dispatch = {
            let mut state = self.lock();
            let Some(index) = state.pending.iter().position(|p| p.request.id() == id) else {
                return;
            };
            if let Some(pending) = state.pending.remove(index) {
                state.events.push_back(Event::Withdrawn(pending));
            }
            Self::settle(&mut state);
            Self::claim_dispatch(&mut state)
        };

        if dispatch {
            self.dispatch();
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Queue")
            .field("max_concurrent", &self.shared.max_concurrent)
            .field("failure_mode", &self.shared.failure_mode)
            .field("pending", &state.pending.len())
            .field("running", &state.running.len())
            .finish()
    }
}

/// 队列中请求的句柄
///
/// 作为 future 等待请求完成。请求任务发生 panic 时返回
/// `MiddlewareError`；队列在请求完成前被整体释放时返回
/// `Cancelled(QueueDropped)`。
pub struct RequestHandle {
    id: u64,
    cancel: CancelHandle,
    queue: Weak<Shared>,
    receiver: oneshot::Receiver<EngineResult<Completion>>,
}

impl RequestHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 取消请求：等待中的立即完成，运行中的协作式取消
    pub fn cancel(&self) {
        self.cancel.cancel(CancelCause::Caller);
        if let Some(shared) = self.queue.upgrade() {
            shared.withdraw(self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Future for RequestHandle {
    type Output = EngineResult<Completion>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(EngineError::Cancelled(CancelCause::QueueDropped)),
        })
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
