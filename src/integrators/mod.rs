//! Light-transport estimators.

pub mod bdpt;
pub mod path;
