//! Golden-image regression harness.
//!
//! Renders fixtures through an external headless renderer, digests the RGBA8
//! output, and checks it against stored baselines. Mismatches leave a diff
//! report that pinpoints the first differing byte and pixel.

pub mod config;
pub mod internal;
pub mod utils;

pub use internal::baseline::{Baseline, BaselineStore};
pub use internal::comparator::{Comparison, Divergence, Mismatch, PixelCoord, compare};
pub use internal::diff_report::{DiffReport, DiffReporter};
pub use internal::error::{ConfigurationError, FailureKind, HarnessError, RenderFailure};
pub use internal::harness::{FixtureOutcome, FixtureStatus, Harness, HarnessOptions, HarnessResult, Mode};
pub use internal::models::{Fixture, FixtureInput, MetaValue, Metadata, RenderOutput, RenderRequest};
pub use internal::renderer::{ProcessRenderer, RenderStatus, Renderer};
