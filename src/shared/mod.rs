pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::ClientError;
pub use ids::{ApprovalId, EngagementId, PlanId, RunId};
pub use logging::ClientLog;
