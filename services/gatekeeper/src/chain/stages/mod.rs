mod authn;
mod authz;
mod cors;
mod rate_limit;
mod request_log;

pub use authn::{AUTHN_FAILURES_METRIC, AuthnStage};
pub use authz::{AUTHZ_DECISIONS_METRIC, AuthzStage};
pub use cors::CorsStage;
pub use rate_limit::RateLimitStage;
pub use request_log::RequestLogStage;
