//! Linked-leaf B+Tree collections, plus a chunked-upload pipeline.
//!
//! This crate provides [`BpTree`] and [`BpMap`], ordered in-memory
//! collections built on one B+Tree core:
//!
//! - [`BpTree`] keeps **duplicate keys** in insertion order and exposes
//!   per-key iteration ([`BpTree::find`]), predicate-guarded replacement and
//!   removal, and ordered traversal in both directions.
//! - [`BpMap`] is the unique-key variant: `put` replaces rather than
//!   appends.
//!
//! All entries live in leaves that form a doubly-linked chain in key order,
//! so full and range scans never revisit the upper levels. Nodes are stored
//! in an arena and reference each other through compact handles; there is no
//! pointer cycle to manage and no unsafe aliasing.
//!
//! # Example
//!
//! ```
//! use leafchain::BpTree;
//!
//! let mut tree = BpTree::new(16);
//! tree.add("crumpet", 1).unwrap();
//! tree.add("biscuit", 2).unwrap();
//! tree.add("crumpet", 3).unwrap();
//!
//! assert_eq!(tree.count(&"crumpet"), 2);
//! let keys: Vec<_> = tree.keys().copied().collect();
//! assert_eq!(keys, ["biscuit", "crumpet"]);
//! ```
//!
//! The [`upload`] module is a separate subsystem: a backpressured fan-out
//! that chunks an async byte stream and uploads the chunks concurrently
//! through a caller-supplied store, with first-error-wins cancellation and
//! compensating deletes.

#![forbid(keyword_idents)]
#![forbid(non_ascii_idents)]
#![forbid(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod bpmap;
mod bptree;
mod error;
mod raw;
pub mod upload;

pub use bpmap::BpMap;
pub use bptree::{Backward, BpTree, Find, Iter, Keys, Range};
pub use error::TreeError;
