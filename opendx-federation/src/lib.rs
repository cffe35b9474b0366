//! GraphQL federation library for the OpenDX data-exchange gateway.
//!
//! Everything here is pure AST and value manipulation: the unified-schema
//! model with its `@sourceInfo` field mappings, the backward-compatibility
//! checker, the query planner that derives provider-scoped sub-queries, and
//! the shape-preserving response composer. Transport, storage and policy
//! enforcement live in the gateway crate.

pub mod compose;
pub mod error;
pub mod plan;
pub mod response;
pub mod schema;

pub use crate::error::ErrorCode;
pub use crate::error::FederationError;
pub use crate::plan::ArgumentMapping;
pub use crate::plan::Planner;
pub use crate::plan::QueryPlan;
pub use crate::response::FederationResponse;
pub use crate::response::GraphQLError;
pub use crate::response::GraphQLRequest;
pub use crate::response::GraphQLResponse;
pub use crate::schema::ProviderRef;
pub use crate::schema::UnifiedSchema;
pub use crate::schema::check_compatibility;
