//! Horn solver backends.

mod bounded;
mod portfolio;
mod smtlib;

pub use bounded::{BoundedHornSolver, BoundedOptions};
pub use portfolio::PortfolioHornSolver;
pub use smtlib::SmtLibHornSolver;
