//! Core stack logic — types, declaration, validation, ordering, synthesis, state.

pub mod cidr;
pub mod envfile;
pub mod planner;
pub mod props;
pub mod resolver;
pub mod stack;
pub mod state;
pub mod synth;
pub mod types;
pub mod validate;
