#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the tree map toolchain.
//!
//! Provides `indicatif`-backed progress bars behind the aggregate
//! [`ProgressCallback`] trait, plus [`init_logger`] which sets up
//! `indicatif-log-bridge` so that `log::info!` and friends are suspended
//! while progress bars redraw.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tree_map_aggregate::progress::ProgressCallback;

pub use indicatif::MultiProgress;

const KIND_BAR_TEMPLATE: &str = "{msg:<24} {wide_bar:.green/dim} {pos}/{len} kinds [{elapsed_precise}]";
const REGION_SPINNER_TEMPLATE: &str = "{spinner:.yellow} {msg} (loading regions)";
const REGION_BAR_TEMPLATE: &str = "  {msg:<22} {wide_bar:.yellow/dim} {pos}/{len} regions {percent}% [{eta}]";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// A [`ProgressBar`] reporting aggregate recomputation.
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Applied by `set_total()`.
    counted_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Bar over the region kinds of one recompute run. The kind count is
    /// known before the first region loads.
    #[must_use]
    pub fn kinds_bar(multi: &MultiProgress, total: u64) -> Arc<dyn ProgressCallback> {
        let counted_style = style(KIND_BAR_TEMPLATE);
        let bar = multi.add(ProgressBar::new(total).with_style(counted_style.clone()));
        bar.set_message("Region kinds");

        Arc::new(Self { bar, counted_style })
    }

    /// Bar over the regions of one kind. Spins until the materializer
    /// reports how many regions it loaded.
    #[must_use]
    pub fn regions_bar(multi: &MultiProgress, kind: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner().with_style(style(REGION_SPINNER_TEMPLATE)));
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message(kind.to_string());

        Arc::new(Self {
            bar,
            counted_style: style(REGION_BAR_TEMPLATE),
        })
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.counted_style.clone());
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge`.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Already set in tests

    log::set_max_level(level);

    multi
}
