//! Usage: Backend authentication (credential calls, 401 refresh coordination, PKCE, deep links).

pub mod callback;
pub mod coordinator;
pub mod credentials;
pub mod endpoints;
pub mod pipeline;
pub mod pkce;
pub mod types;
