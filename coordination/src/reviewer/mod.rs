//! Reviewer personas, the catalog that holds them, and selection.

pub mod profile;
pub mod registry;
pub mod selector;

pub use profile::{Applicability, ComplexityRange, ReviewDomain, ReviewerProfile};
pub use registry::{RegistryError, ReviewerCatalogDocument, ReviewerRegistry};
pub use selector::{PersonaSelector, Selection, SelectionError};
