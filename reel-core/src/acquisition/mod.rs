//! Acquisition-time vetoes over job types.

pub mod filter;
pub mod requirement;
pub mod state;

pub use filter::{AcquisitionFilter, AcquisitionFilterSet, RequirementFilter};
pub use requirement::JobRequirement;
pub use state::ServerState;
