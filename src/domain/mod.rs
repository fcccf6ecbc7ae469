//! Core domain types for the cost allocation system.
//!
//! This module contains the domain model and pure logic:
//! - Dispatches and product lines
//! - The ephemeral cost pool and margin calculation
//! - The proportional allocator
//! - The wizard typestate machine

pub mod allocation;
pub mod dispatch;
pub mod pool;
pub mod product;
pub mod wizard;
