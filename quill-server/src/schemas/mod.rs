//! Request / response wire types, grouped by API version.

pub mod v1;
