pub use gatekeeper_types::prelude::*;

pub use crate::store::{Lookup, Tier, TieredStore};

// vim: ts=4
