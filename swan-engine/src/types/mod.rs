pub mod config;
pub mod environment;
pub mod http;
pub mod params;
pub mod retry;
pub mod route;

pub use config::{CachePolicy, Configuration};
pub use environment::{Environment, EnvironmentContext, EnvironmentSet};
pub use http::{BodyType, HttpMethod};
pub use params::{MultipartPart, ParamValue, Params, PartPayload};
pub use retry::RetryPolicy;
pub use route::{Route, RouteResolver};
