//! Material graph translation and caching engine.
//!
//! Takes a host application's material node graph, hashes it structurally,
//! and translates it into the target renderer's shader vocabulary through a
//! content-addressed cache. Nodes without a symbolic translation are baked
//! to pixels by a parallel CPU rasterizer; bump height fields are converted
//! to tangent-space normal maps on the way through.

pub mod bake;
pub mod cache;
pub mod eval;
pub mod graph;
pub mod hash;
pub mod normal;
pub mod target;
pub mod translator;
pub mod xml_loader;

pub use cache::{CacheKey, ContentCache, TranslationFlags, TranslationSession};
pub use eval::{EvalContext, HostEval, ProceduralEval};
pub use graph::{MaterialNode, NodeBuilder, NodeKind, NodeRef, ParamValue, UvTransform};
pub use hash::{ReloadStamp, hash_graph, hash_node};
pub use target::{Image, Translated, TranslatedArtifact};
pub use translator::Translator;
pub use xml_loader::{LoadedGraph, load_graph_from_path, load_graph_from_str};
