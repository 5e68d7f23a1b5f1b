//! # fstree Testkit
//!
//! Testing utilities for fstree.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: pinned canonical encodings and hand-checked repair scenarios
//! - **Generators**: Proptest strategies for trees and mutation histories
//! - **Fixtures**: A service over an in-memory entry store, plus tree events
//!
//! ## Golden Vectors
//!
//! ```rust
//! use fstree_testkit::vectors::verify_all_vectors;
//!
//! for (name, passed, detail) in verify_all_vectors() {
//!     println!("{name}: {passed} ({detail})");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use fstree_testkit::generators::TreeParams;
//!
//! proptest! {
//!     #[test]
//!     fn root_digest_is_deterministic(params: TreeParams) {
//!         prop_assert_eq!(params.build().root_digest(), params.build().root_digest());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use fstree_testkit::fixtures::{docs_records, TreeFixture};
//!
//! let fixture = TreeFixture::new().with_source_rows(docs_records());
//! assert_eq!(fixture.user_id.0, 1);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{docs_records, photos_records, tree_of, TreeEvent, TreeFixture};
pub use generators::{MutationPlan, TreeParams};
pub use vectors::{
    canonical_vectors, run_scenario, scenario_vectors, verify_all_vectors, CanonicalVector,
    ScenarioVector,
};
