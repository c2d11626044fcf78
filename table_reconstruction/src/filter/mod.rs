//! Selection of attributes, metrics and attribute elements, and the request body sent
//! to the server when an instance is created.
//!
//! The `FilterUniverse` is the immutable set of selectable objects of a dataset; a
//! `Selection` is the mutable choice made from it.

mod request;
mod selection;
mod universe;

pub use request::{RequestBody, RequestedAttribute, RequestedObject, RequestedObjects, ViewFilter};
pub use selection::{ElementOperator, Selection, SelectionWarning};
pub use universe::{
    AttributeElements, ELEMENT_SEPARATOR, FORM_SEPARATOR, FilterUniverse, OBJECT_ID_LEN, ROW_COUNT_METRIC_PREFIX,
    ResolvedSelector, SelectorKind, UniverseAttribute,
};
