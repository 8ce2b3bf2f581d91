//! Operators. Each one is a publisher wrapping its upstream, exposed as a method on
//! [`Multi`](crate::Multi) or [`Single`](crate::Single).

mod concat_map;
mod context;
mod flat_map;
mod group_by;
mod peek;
mod reduce;
mod switch;
mod timed;
mod transform;
mod zip;

pub use group_by::GroupedMulti;
