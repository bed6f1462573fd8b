//! The assertion DSL: a published JSON Schema, a normalizing compiler, and
//! the predicate/engine pair that scores a [`crate::diff::ChangeSet`]
//! against a compiled spec.
//!
//! `spec.md` §4.7/§4.8. `raw` holds the wire shape a client submits (with
//! shorthand); `compile` validates it against [`schema::SCHEMA`] and
//! normalizes it into the canonical shape `engine` evaluates. Compilation is
//! a pure function — same input, same output, no I/O.

mod compiler;
mod engine;
mod predicate;
mod raw;
mod schema;

pub use compiler::{compile, DslError};
pub use engine::{evaluate, AssertionResult, Score};
pub use predicate::Predicate;
pub use raw::{
    ChangeType, CompiledAssertion, CompiledChange, CompiledSpec, CountSpec, ExpectedChange,
};
