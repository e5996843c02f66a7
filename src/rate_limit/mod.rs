pub mod access_list;
pub mod clock;
pub mod evaluation;
pub mod identity;
pub mod limiter;
pub mod memory;
pub mod middleware;
pub mod resolver;
pub mod store;

pub use access_list::{AccessList, StaticAccessList};
pub use clock::{Clock, MockClock, SystemClock};
pub use evaluation::EvaluationResult;
pub use identity::{AuthenticatedPrincipal, RequestContext};
pub use limiter::LimiterEngine;
pub use memory::InMemoryCounterStore;
pub use middleware::{
    principal_from_headers, rate_limit_middleware, route_rate_limit_middleware, RouteLimit,
};
pub use resolver::{QuotaResolver, QuotaRule, ResolvedQuota};
pub use store::{CounterOutcome, CounterStore, UnavailableStore};
