//! Errors surfaced by stack operations and the job poller, and the catalog
//! that gives each of them a stable code and remediation steps.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                          |
//! |------------|-------------|--------------------------------------|
//! | E001-E099  | Config      | Configuration and setup errors       |
//! | E100-E199  | Service     | Transport failures                   |
//! | E200-E299  | Job         | Job lifecycle                        |
//! | E300-E399  | Stack       | Remote diagnostics with errors       |
//! | E500-E599  | Internal    | Internal/unexpected errors           |

pub mod catalog;
mod job;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};
pub use job::{JobError, StackOperation};
