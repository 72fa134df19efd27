//! Convergence scenario tests

mod certificates;
mod fake;
mod lifecycle;
mod scenarios;
