//! RidgeFS Failover - quorum-based standby promotion
//!
//! Tracks peer nameservers, collects their opinions on primary
//! liveness, and upon strict-majority agreement materializes the local
//! replica as the seed state of a new primary.

pub mod coordinator;
pub mod materialize;
pub mod transport;

pub use coordinator::{RoleCoordinator, RoleState};
pub use materialize::{PromotionMaterializer, SeedMaterializer, UserRecord};
pub use transport::PeerTransport;
