//! OpenDX gateway: a federated GraphQL data-exchange gateway.
//!
//! One consumer query is authorized against the policy decision point and,
//! when required, the consent engine, decomposed into provider-scoped
//! sub-queries under the active unified schema, fanned out concurrently, and
//! recomposed into a single response shaped like the original query. The
//! planning and composition machinery lives in `opendx-federation`; this
//! crate owns storage, policy, transport and the token lifecycle.

pub mod authz;
pub mod configuration;
pub mod executor;
pub mod gateway;
pub mod registry;
pub mod schema_store;
pub mod server;

pub use crate::configuration::Configuration;
pub use crate::gateway::ConsumerIdentity;
pub use crate::gateway::Gateway;
