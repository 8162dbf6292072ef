//! Proxy configuration and authentication.
//!
//! - [`proxy`]: HTTP proxy settings with zeroized credentials
//! - [`matcher`]: NO_PROXY bypass rules
//! - [`authcache`]: challenge selection and cached proxy credentials

pub mod authcache;
pub mod matcher;
pub mod proxy;

pub use authcache::{AuthCache, AuthChallenge, AuthScheme, ProxyAuthState};
pub use matcher::ProxyMatcher;
pub use proxy::{ProxyBuilder, ProxyCredentials, ProxySettings};
