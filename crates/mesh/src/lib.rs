//! Peer mesh: a flat overlay of identical nodes that forward tool calls to
//! whichever member has capacity.
//!
//! Membership is heartbeat-driven, authentication is a shared-secret HMAC
//! token, forwarding is one hop with a guaranteed fallback to local
//! execution.

pub mod auth;
pub mod client;
pub mod coordinator;
pub mod dispatcher;
pub mod models;
pub mod router;

pub use auth::{sign_mesh_token, verify_mesh_token};
pub use coordinator::MeshCoordinator;
pub use dispatcher::MeshDispatcher;
pub use models::{NodeInfo, NodeLoad, PeerState};
pub use router::{select_target, RouteDecision};
