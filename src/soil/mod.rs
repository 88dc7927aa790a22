/// Soil: the immutable fact timeline.
///
/// Soil holds [`types::Fact`] records and [`types::SystemRelation`]
/// edges; nothing in Soil is ever mutated in place except the narrow set of
/// supersession/fidelity fields carved out below.
pub mod store;
pub mod types;

pub use store::{FactStore, SoilError, SoilResult};
pub use types::{Fact, FactSearchHit, FactType, Fidelity, SystemRelation, SystemRelationKind};
