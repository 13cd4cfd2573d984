pub mod branch;
pub mod comments;
pub mod design;
pub mod phases;

pub use design::{DesignDocStore, DesignKind};
pub use phases::{resolve_phase_details, PhaseQuery, PhaseSource, ResolvedPhases};
