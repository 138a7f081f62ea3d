//! # engine_component
//!
//! ECS primitives shared by the scheduler and the systems it runs.
//!
//! This crate provides:
//!
//! - [`Component`] trait: the contract all ECS data types satisfy.
//! - [`Entity`]: lightweight `u64` entity identifiers.
//! - [`EntityAllocator`]: lock-free, monotonically increasing ID allocator.
//! - [`QueryDescriptor`]: declarative read/write access requirements used to
//!   derive conflicts between systems.

pub mod component;
pub mod entity;
pub mod query;

pub use component::{Component, ComponentTypeId};
pub use entity::{Entity, EntityAllocator};
pub use query::QueryDescriptor;
