//! The family tree: persons, their relations and the views onto them.

pub mod import;
pub mod legacy;
pub mod person;
pub mod relation;
pub mod sync;
pub mod visibility;

pub use person::{Confidentiality, PersonFields, Sex};
pub use relation::{FamilyStatus, MarriageInput, RelationInput, RelationRecord};
pub use sync::{save_relation, PropagationReport};
pub use visibility::{PersonDetail, PersonSummary};
