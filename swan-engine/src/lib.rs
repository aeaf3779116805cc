//! Swan 请求引擎
//!
//! 给定一个逻辑请求（方法、路由、参数），按五层配置解析出最终的传输参数，
//! 在有界并发队列中执行，并通过拦截器链对结果分类、按需退避重试。
//!
//! ```no_run
//! use swan_engine::{Environment, FailureMode, Request, Session};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let session = Session::builder()
//!     .environment(Environment::new("prod", "https", "api.example.com"))
//!     .build()?;
//! let queue = session.queue().max_concurrent(2).failure_mode(FailureMode::CancelAll).build();
//!
//! let handle = queue.add_operation(Request::get("/users").param("page", 1));
//! let completion = handle.await?;
//! println!("{}", completion.into_result()?.text()?);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod interceptor;
pub mod mock;
pub mod queue;
pub mod request;
pub mod response;
pub mod router;
pub mod session;
pub mod transport;
pub mod types;

pub use error::{CancelCause, EngineError, EngineResult, ErrorKind, TransportError, TransportErrorKind};
pub use interceptor::{
    Decision, FailoverInterceptor, Interceptor, InterceptorChain, NoOpInterceptor, RetryInterceptor,
};
pub use mock::{DirectoryMockSource, MockEngine, MockReference, MockRegistry, MockSource};
pub use queue::{FailureMode, Queue, QueueBuilder, QueueHooks, RequestHandle};
pub use request::{CancelHandle, Completion, Outcome, Request, RequestState};
pub use response::Response;
pub use router::Router;
pub use session::{Session, SessionBuilder};
pub use transport::{
    DownloadTarget, Progress, ProgressCallback, ReqwestTransport, StreamingResponse, Transport,
    WireRequest,
};
pub use types::{
    BodyType, CachePolicy, Configuration, Environment, EnvironmentContext, EnvironmentSet,
    HttpMethod, MultipartPart, ParamValue, Params, PartPayload, RetryPolicy, Route, RouteResolver,
};
