pub mod chain;
pub mod retry;
pub mod traits;

pub use chain::{InterceptorChain, Verdict};
pub use retry::{FailoverInterceptor, RetryInterceptor};
pub use traits::{Decision, Interceptor, NoOpInterceptor};
