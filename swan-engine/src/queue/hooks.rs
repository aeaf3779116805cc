use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::queue::panic_message;
use crate::request::{Outcome, Request};

type CycleStart = Arc<dyn Fn() + Send + Sync>;
type CycleEnd = Arc<dyn Fn(bool) + Send + Sync>;
type BeforeAttempt = Arc<dyn Fn(&Request) + Send + Sync>;
type AfterAttempt = Arc<dyn Fn(&Request, &Outcome) + Send + Sync>;

/// 每次尝试前后的观察点
pub(crate) trait AttemptObserver: Send + Sync {
    fn before_attempt(&self, request: &Request);
    fn after_attempt(&self, request: &Request, outcome: &Outcome);
}

/// 不带队列直接执行时使用的空观察者
impl AttemptObserver for () {
    fn before_attempt(&self, _request: &Request) {}
    fn after_attempt(&self, _request: &Request, _outcome: &Outcome) {}
}

/// 队列钩子
///
/// - `before_all`: 一个排空周期开始时（队列从空变为非空）
/// - `after_all(completed_with_error)`: 每个排空周期恰好一次，
///   参数表示该周期内是否有请求以非取消的错误结束
/// - `before_each`: 每次尝试开始前
/// - `after_each`: 每次尝试结束后，包括开始前就被取消的请求
///
/// 钩子同步调用，不应阻塞。钩子中的 panic 被捕获并记录，不影响请求与队列。
#[derive(Clone, Default)]
pub struct QueueHooks {
    before_all: Option<CycleStart>,
    after_all: Option<CycleEnd>,
    before_each: Option<BeforeAttempt>,
    after_each: Option<AfterAttempt>,
}

impl QueueHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_all<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.before_all = Some(Arc::new(hook));
        self
    }

    pub fn after_all<F>(mut self, hook: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.after_all = Some(Arc::new(hook));
        self
    }

    pub fn before_each<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        self.before_each = Some(Arc::new(hook));
        self
    }

    pub fn after_each<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Outcome) + Send + Sync + 'static,
    {
        self.after_each = Some(Arc::new(hook));
        self
    }

    pub(crate) fn cycle_started(&self) {
        if let Some(hook) = &self.before_all {
            guarded("before_all", || hook());
        }
    }

    pub(crate) fn cycle_drained(&self, completed_with_error: bool) {
        if let Some(hook) = &self.after_all {
            guarded("after_all", || hook(completed_with_error));
        }
    }
}

impl AttemptObserver for QueueHooks {
    fn before_attempt(&self, request: &Request) {
        if let Some(hook) = &self.before_each {
            guarded("before_each", || hook(request));
        }
    }

    fn after_attempt(&self, request: &Request, outcome: &Outcome) {
        if let Some(hook) = &self.after_each {
            guarded("after_each", || hook(request, outcome));
        }
    }
}

fn guarded<F: FnOnce()>(name: &str, hook: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
        log::error!("Queue hook `{}` panicked: {}", name, panic_message(payload.as_ref()));
    }
}

impl std::fmt::Debug for QueueHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHooks")
            .field("before_all", &self.before_all.is_some())
            .field("after_all", &self.after_all.is_some())
            .field("before_each", &self.before_each.is_some())
            .field("after_each", &self.after_each.is_some())
            .finish()
    }
}
