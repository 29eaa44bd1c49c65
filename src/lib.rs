//! Figma design-tree harvesting.
//!
//! Given one Figma subtree, produces a design-token summary, an inventory
//! of UI component candidates, local copies of every image-filled node and
//! a copy of the tree annotated with those local paths. See
//! [`workflow::pipeline::run_pipeline`].

pub mod error_codes;
pub mod workflow;

pub use workflow::pipeline::{run_pipeline, PipelineOutput, PipelineRequest};
