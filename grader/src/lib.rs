//! Grades student HTTP-server submissions by building and running them inside
//! containers and probing their endpoints.
//!
//! The pipeline for one submission is: [`fs`] (workspace) → [`fs::net`]
//! (clone) → [`runner`] (build, run) → [`probe`] → [`score`] → [`runner`]
//! (teardown). [`grader`] sequences it over a batch of repositories.

pub mod config;
pub mod fs;
pub mod grader;
pub mod probe;
pub mod runner;
pub mod score;
pub mod script;
pub mod util;

#[cfg(test)]
mod test;
