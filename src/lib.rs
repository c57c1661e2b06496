//! Table-level lineage for SQL queries with common table expressions.
//!
//! ```
//! use cte_lineage::sql_engine::{LineageNode, LineageService};
//!
//! let service = LineageService::default();
//! let record = service
//!     .extract("WITH recent AS (SELECT * FROM orders) SELECT * FROM recent", "report")
//!     .unwrap();
//!
//! assert_eq!(
//!     record.roots(),
//!     &[LineageNode::with_subtables("RECENT", vec![LineageNode::leaf("ORDERS")])]
//! );
//! ```

pub mod commands;
pub mod display;
pub mod sql_engine;
