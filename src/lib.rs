//! # Quire
//!
//! An incremental static site generator. Every file under `contents/` is a
//! content unit (article, index, feed, snippet or binary); configuration
//! cascades through layered `config.toml` files; and a persisted dependency
//! graph lets a build re-render only the contents a change can affect.
//!
//! # Architecture: Two Stages
//!
//! ```text
//! 1. Load   project/  →  Site               (configs, contents, templates)
//! 2. Build  Site      →  outputs/           (parallel render + dependency graph)
//! ```
//!
//! Loading is sequential and produces an immutable [`site::Site`]. Building
//! splits the site into [`builder::BuildUnit`]s (one per output file) and
//! renders them on a rayon pool. Each unit gets its own
//! [`context::BuildContext`] that records which other contents it read;
//! those edges are saved to `outputs/.quire-depends.json` and drive the next
//! incremental build.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Stage 1: walks the project and themes, loads configs and contents |
//! | [`site`] | The loaded site shared by every render |
//! | [`generate`] | Stage 2: rebuild planning, parallel rendering, report |
//! | [`builder`] | Build units, pagination, per-unit rendering |
//! | [`context`] | Per-output render state, links, output paths, recursion guard |
//! | [`depends`] | Persisted dependency graph and staleness checks |
//! | [`config`] | Layered configuration and value conversion |
//! | [`content`] | Content variants and their metadata accessors |
//! | [`store`] | Content lookup, filtering, sorting and grouping |
//! | [`loader`] | Markdown, HTML, YAML and binary loaders |
//! | [`template`] | Tera wrapper with template error excerpts |
//! | [`functions`] | Template functions bound to a render |
//! | [`feed`] | Atom and RSS 1.0 feed writers |
//! | [`html`] | Header ids and abstract truncation |
//! | [`hooks`] | Load and build hook registry |
//! | [`metadata`] | Front matter, value conversion and dates |
//! | [`types`] | `ContentPath`, `ContentSource`, `PageArgs` |
//! | [`naming`] | Filename splitting, escaping and slugs |
//! | [`url`] | URL joining and relative links |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Config Cascading
//!
//! ```text
//! built-in defaults  ←  themes  ←  config.toml  ←  contents/blog/config.toml  ←  front matter
//! ```
//!
//! Each arrow points at the layer being overridden. A lookup walks from the
//! content's own metadata outward and stops at the first hit, except for
//! cumulative keys such as `imports` that gather values from every layer.
//! See [`config::Config`].
//!
//! ## Dependencies Are Recorded, Not Declared
//!
//! Templates never list what they depend on. Every template function that
//! reads another content (`link_to`, `get_contents`, `html_of`, ...) records
//! an edge as a side effect, so the graph is exactly what the last render
//! touched. Functions whose result can change without any content changing
//! (`now`, `get_env`) mark their output as always rebuilt.

pub mod builder;
pub mod config;
pub mod content;
pub mod context;
pub mod depends;
pub mod feed;
pub mod functions;
pub mod generate;
pub mod hooks;
pub mod html;
pub mod loader;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod scan;
pub mod site;
pub mod store;
pub mod template;
pub mod types;
pub mod url;

#[cfg(test)]
pub(crate) mod test_helpers;
