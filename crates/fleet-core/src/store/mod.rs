//! Local relational store.
//!
//! Reads go straight to SQLite. Writes are staged in a [`UnitOfWork`] and
//! committed together, so a sync run is all-or-nothing at the database level.

mod sqlite;
mod unit_of_work;

pub use sqlite::FleetStore;
pub use unit_of_work::{Mutation, UnitOfWork};

/// Associations to eager-load with a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Includes {
    pub tags: bool,
    pub labels: bool,
}

impl Includes {
    pub const NONE: Includes = Includes {
        tags: false,
        labels: false,
    };

    pub const TAGS: Includes = Includes {
        tags: true,
        labels: false,
    };

    pub const ALL: Includes = Includes {
        tags: true,
        labels: true,
    };
}
