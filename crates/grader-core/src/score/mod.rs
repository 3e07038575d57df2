//! Score trees and execution reports
//!
//! This module provides the weighted result model shared by every adapter.

mod node;
mod report;

pub use node::{ResultNode, all_passed, round2};
pub use report::{Analysis, ExecutionReport};
