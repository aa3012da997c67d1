//! Command handlers.

pub(crate) mod check;
pub(crate) mod dump;
