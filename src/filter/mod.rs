//! Feature predicates and sort orders.

mod expr;
mod sort;

pub(crate) use expr::resolve_property_name;
pub use expr::{CompareOp, Filter};
pub use sort::{can_sort, compare_features, sort_property_names, SortBy, SortOrder};
