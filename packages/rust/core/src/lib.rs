//! Fetch pipeline orchestration for Webmark.
//!
//! This crate ties admission control, fetching, Markdown conversion and
//! OpenAPI processing into end-to-end operations ([`pipeline::fetch`],
//! [`search::search`]) run through an explicit [`FetchContext`].

pub mod context;
pub mod document;
pub mod pipeline;
pub mod search;

pub use context::FetchContext;
pub use document::{RenderOptions, render, render_page};
pub use pipeline::{
    FetchOutcome, ProgressReporter, SilentProgress, convert_page, fetch, fetch_all, fetch_raw,
    fetch_website, process,
};
pub use search::{pre_score, search};
