//! Three-pass loader for the XML material-graph interchange format.
//!
//! Pass 1 parses every `<node>` element into an arena of prototypes,
//! recording node-typed parameters as unresolved connection records and
//! `ImageTextureRef` proxies as alias entries. Pass 2 resolves connections
//! by name, falling through the alias table; a dangling reference is logged
//! and dropped, never an error. Pass 3 finds the roots (nodes that are never
//! a connection source) and materializes them into shared [`NodeRef`]
//! graphs, with a cycle guard so malformed input terminates.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::graph::{NodeBuilder, NodeKind, NodeRef, ParamValue, UvTransform};

/// The roots of one loaded document, in declaration order.
#[derive(Debug)]
pub struct LoadedGraph {
    pub roots: Vec<NodeRef>,
}

/// Arena slot built during pass 1. Node-typed parameters are kept out of
/// `params` until pass 2 resolves them.
#[derive(Debug)]
struct ProtoNode {
    name: String,
    kind: NodeKind,
    /// Pure reference proxy; folds into the alias table and never
    /// materializes.
    proxy: bool,
    params: Vec<(String, ParamValue)>,
    uv: UvTransform,
}

/// An unresolved node-typed parameter: `slot` on arena entry `target`
/// should point at the node named `source`.
#[derive(Debug)]
struct ConnectionRecord {
    target: usize,
    slot: String,
    source: String,
}

#[derive(Debug, Default)]
struct Document {
    arena: Vec<ProtoNode>,
    by_name: HashMap<String, usize>,
    /// Proxy name to the name of the node it stands for.
    aliases: HashMap<String, String>,
    connections: Vec<ConnectionRecord>,
}

pub fn load_graph_from_path(path: impl AsRef<Path>) -> Result<LoadedGraph> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read graph file {}", path.display()))?;
    load_graph_from_str(&text)
        .with_context(|| format!("failed to load graph file {}", path.display()))
}

pub fn load_graph_from_str(xml: &str) -> Result<LoadedGraph> {
    let doc = parse_document(xml)?;
    let resolved = resolve_connections(&doc);
    Ok(materialize_roots(&doc, &resolved))
}

fn attr(e: &BytesStart, name: &str) -> Result<Option<String>> {
    match e.try_get_attribute(name)? {
        Some(a) => Ok(Some(a.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// Pass 1: build the arena, the name index, the alias table and the raw
/// connection records.
fn parse_document(xml: &str) -> Result<Document> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = Document::default();
    // Index of the <node> element currently open, if any.
    let mut current: Option<usize> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"node" => {
                let Some(name) = attr(&e, "name")? else {
                    bail!("<node> element without a name attribute");
                };
                let kind_attr = attr(&e, "type")?.unwrap_or_default();
                let proxy = kind_attr == "ImageTextureRef";
                let kind = if proxy {
                    NodeKind::Unknown
                } else {
                    NodeKind::parse(&kind_attr).unwrap_or_else(|| {
                        log::warn!("node '{name}': unknown kind '{kind_attr}'");
                        NodeKind::Unknown
                    })
                };

                let index = doc.arena.len();
                doc.arena.push(ProtoNode {
                    name: name.clone(),
                    kind,
                    proxy,
                    params: Vec::new(),
                    uv: UvTransform::IDENTITY,
                });
                if doc.by_name.insert(name.clone(), index).is_some() {
                    log::warn!("duplicate node name '{name}'; later definition wins");
                }
                current = Some(index);
            }
            Event::End(e) if e.name().as_ref() == b"node" => {
                current = None;
            }
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"param" => {
                let Some(index) = current else {
                    log::warn!("<param> outside of a <node>; skipped");
                    continue;
                };
                parse_param(&e, index, &mut doc)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(doc)
}

fn parse_param(e: &BytesStart, index: usize, doc: &mut Document) -> Result<()> {
    let node_name = doc.arena[index].name.clone();
    let Some(name) = attr(e, "name")? else {
        log::warn!("node '{node_name}': <param> without a name; skipped");
        return Ok(());
    };
    let ty = attr(e, "type")?.unwrap_or_default();
    let raw = attr(e, "value")?.unwrap_or_default();

    if ty == "connection" {
        if raw.is_empty() {
            doc.arena[index].params.push((name, ParamValue::Node(None)));
        } else if name == "source" && doc.arena[index].proxy {
            // Proxy reference: record as alias, drop the proxy's slot.
            doc.aliases.insert(node_name, raw);
        } else {
            doc.connections.push(ConnectionRecord {
                target: index,
                slot: name,
                source: raw,
            });
        }
        return Ok(());
    }

    // UV placement parameters fold into the transform instead of the
    // parameter list.
    match name.as_str() {
        "uv_offset" => {
            if let Some(v) = parse_floats::<2>(&raw) {
                doc.arena[index].uv.offset = v;
            } else {
                log::warn!("node '{node_name}': malformed uv_offset '{raw}'; skipped");
            }
            return Ok(());
        }
        "uv_tiling" => {
            if let Some(v) = parse_floats::<2>(&raw) {
                doc.arena[index].uv.tiling = v;
            } else {
                log::warn!("node '{node_name}': malformed uv_tiling '{raw}'; skipped");
            }
            return Ok(());
        }
        "uv_rotation" => {
            if let Ok(v) = raw.trim().parse::<f32>() {
                doc.arena[index].uv.rotation = v;
            } else {
                log::warn!("node '{node_name}': malformed uv_rotation '{raw}'; skipped");
            }
            return Ok(());
        }
        _ => {}
    }

    let value = match ty.as_str() {
        "float" => raw.trim().parse::<f32>().ok().map(ParamValue::Float),
        "uint" | "int" => raw.trim().parse::<i64>().ok().map(ParamValue::Int),
        "bool" => match raw.trim() {
            "true" | "1" => Some(ParamValue::Bool(true)),
            "false" | "0" => Some(ParamValue::Bool(false)),
            _ => None,
        },
        "float3" => parse_floats::<3>(&raw).map(ParamValue::Vector),
        "float4" => parse_floats::<4>(&raw).map(ParamValue::Color),
        "string" => Some(ParamValue::Text(raw.clone())),
        other => {
            log::warn!("node '{node_name}': parameter '{name}' has unknown type '{other}'; skipped");
            return Ok(());
        }
    };

    match value {
        Some(v) => doc.arena[index].params.push((name, v)),
        None => {
            log::warn!("node '{node_name}': malformed {ty} literal '{raw}' for '{name}'; skipped");
        }
    }
    Ok(())
}

// Tuples are comma separated in the interchange format; stray whitespace
// around the commas is tolerated.
fn parse_floats<const N: usize>(raw: &str) -> Option<[f32; N]> {
    let mut out = [0.0f32; N];
    let mut parts = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty());
    for slot in &mut out {
        *slot = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

/// Pass 2: resolve connection names to arena indices, following the alias
/// table one step. Returns `(target, slot, source_index)` triples.
fn resolve_connections(doc: &Document) -> Vec<(usize, String, usize)> {
    let mut resolved = Vec::with_capacity(doc.connections.len());
    for conn in &doc.connections {
        let source = doc.by_name.get(&conn.source).copied().or_else(|| {
            doc.aliases
                .get(&conn.source)
                .and_then(|real| doc.by_name.get(real))
                .copied()
        });
        match source {
            Some(idx) => resolved.push((conn.target, conn.slot.clone(), idx)),
            None => {
                log::warn!(
                    "node '{}': slot '{}' references unknown node '{}'; left unconnected",
                    doc.arena[conn.target].name,
                    conn.slot,
                    conn.source
                );
            }
        }
    }
    resolved
}

/// Pass 3: root detection plus materialization into shared `Arc` graphs.
fn materialize_roots(doc: &Document, resolved: &[(usize, String, usize)]) -> LoadedGraph {
    let mut is_source = HashSet::new();
    for &(_, _, src) in resolved {
        is_source.insert(src);
    }

    let mut edges: HashMap<usize, Vec<(String, usize)>> = HashMap::new();
    for (target, slot, src) in resolved {
        edges
            .entry(*target)
            .or_default()
            .push((slot.clone(), *src));
    }

    let mut built: Vec<Option<NodeRef>> = vec![None; doc.arena.len()];
    let mut in_progress = HashSet::new();

    let mut roots = Vec::new();
    for index in 0..doc.arena.len() {
        // Proxies were folded into the alias table and do not materialize.
        if doc.arena[index].proxy {
            continue;
        }
        if !is_source.contains(&index) {
            if let Some(node) = build(doc, &edges, index, &mut built, &mut in_progress) {
                roots.push(node);
            }
        }
    }
    LoadedGraph { roots }
}

fn build(
    doc: &Document,
    edges: &HashMap<usize, Vec<(String, usize)>>,
    index: usize,
    built: &mut Vec<Option<NodeRef>>,
    in_progress: &mut HashSet<usize>,
) -> Option<NodeRef> {
    if let Some(node) = &built[index] {
        return Some(node.clone());
    }
    if !in_progress.insert(index) {
        log::warn!(
            "cycle through node '{}'; breaking the back edge",
            doc.arena[index].name
        );
        return None;
    }

    let proto = &doc.arena[index];
    let mut builder = NodeBuilder::new(proto.kind).named(&proto.name).uv(proto.uv);
    for (name, value) in &proto.params {
        builder = builder.param(name.clone(), value.clone());
    }
    if let Some(slots) = edges.get(&index) {
        for (slot, src) in slots {
            match build(doc, edges, *src, built, in_progress) {
                Some(sub) => builder = builder.node(slot.clone(), sub),
                // Back edge or failed sub-tree: slot stays unconnected.
                None => builder = builder.param(slot.clone(), ParamValue::Node(None)),
            }
        }
    }

    in_progress.remove(&index);
    let node = builder.build();
    built[index] = Some(node.clone());
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn load(xml: &str) -> LoadedGraph {
        load_graph_from_str(xml).expect("load failed")
    }

    #[test]
    fn chain_root_is_the_unreferenced_node() {
        let g = load(
            r#"<material_graph>
                 <node name="a" type="Checker"/>
                 <node name="b" type="Mix">
                   <param name="map1" type="connection" value="a"/>
                 </node>
                 <node name="c" type="Diffuse">
                   <param name="map" type="connection" value="b"/>
                 </node>
                 <node name="d" type="Noise"/>
               </material_graph>"#,
        );
        let names: Vec<&str> = g.roots.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["c", "d"]);
    }

    #[test]
    fn shared_subnode_materializes_once() {
        let g = load(
            r#"<material_graph>
                 <node name="shared" type="Checker"/>
                 <node name="root" type="Mix">
                   <param name="map1" type="connection" value="shared"/>
                   <param name="map2" type="connection" value="shared"/>
                 </node>
               </material_graph>"#,
        );
        assert_eq!(g.roots.len(), 1);
        let root = &g.roots[0];
        let (a, b) = (root.sub_node("map1").unwrap(), root.sub_node("map2").unwrap());
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn proxy_reference_resolves_through_alias() {
        let g = load(
            r#"<material_graph>
                 <node name="tex" type="Checker"/>
                 <node name="proxy" type="ImageTextureRef">
                   <param name="source" type="connection" value="tex"/>
                 </node>
                 <node name="root" type="Diffuse">
                   <param name="map" type="connection" value="proxy"/>
                 </node>
               </material_graph>"#,
        );
        assert_eq!(g.roots.len(), 1, "proxy must not surface as a root");
        let map = g.roots[0].sub_node("map").expect("map resolved");
        assert_eq!(map.name, "tex");
        assert_eq!(map.kind, NodeKind::Checker);
    }

    #[test]
    fn dangling_reference_leaves_slot_unconnected() {
        let g = load(
            r#"<material_graph>
                 <node name="root" type="Diffuse">
                   <param name="map" type="connection" value="missing"/>
                   <param name="color" type="float4" value="1,0,0,1"/>
                 </node>
               </material_graph>"#,
        );
        assert_eq!(g.roots.len(), 1);
        assert!(g.roots[0].sub_node("map").is_none());
        assert_eq!(g.roots[0].color("color", [0.0; 4]), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn malformed_literal_is_skipped_not_fatal() {
        let g = load(
            r#"<material_graph>
                 <node name="n" type="Checker">
                   <param name="size" type="float" value="banana"/>
                   <param name="color1" type="float4" value="0,0"/>
                   <param name="color2" type="float4" value="1,1,1,1"/>
                 </node>
               </material_graph>"#,
        );
        let n = &g.roots[0];
        assert_eq!(n.float("size", 2.0), 2.0, "bad float falls back to default");
        assert!(n.param("color1").is_none());
        assert_eq!(n.color("color2", [0.0; 4]), [1.0; 4]);
    }

    #[test]
    fn uv_params_fold_into_transform() {
        let g = load(
            r#"<material_graph>
                 <node name="n" type="BitmapTexture">
                   <param name="uv_offset" type="float3" value="0.25,0.5"/>
                   <param name="uv_tiling" type="float3" value="2,2"/>
                   <param name="uv_rotation" type="float" value="1.5"/>
                 </node>
               </material_graph>"#,
        );
        let n = &g.roots[0];
        assert_eq!(n.uv.offset, [0.25, 0.5]);
        assert_eq!(n.uv.tiling, [2.0, 2.0]);
        assert!((n.uv.rotation - 1.5).abs() < 1e-6);
        assert!(n.param("uv_offset").is_none());
    }

    #[test]
    fn cycle_breaks_instead_of_recursing() {
        let g = load(
            r#"<material_graph>
                 <node name="root" type="Diffuse">
                   <param name="map" type="connection" value="a"/>
                 </node>
                 <node name="a" type="Mix">
                   <param name="map1" type="connection" value="b"/>
                 </node>
                 <node name="b" type="Mix">
                   <param name="map1" type="connection" value="a"/>
                 </node>
               </material_graph>"#,
        );
        assert_eq!(g.roots.len(), 1);
        let a = g.roots[0].sub_node("map").expect("a materialized");
        let b = a.sub_node("map1").expect("b materialized");
        // The back edge from b to a was cut.
        assert!(b.sub_node("map1").is_none());
    }

    #[test]
    fn unknown_kind_becomes_unknown_node() {
        let g = load(
            r#"<material_graph>
                 <node name="weird" type="SubsurfaceScatter3000"/>
               </material_graph>"#,
        );
        assert_eq!(g.roots[0].kind, NodeKind::Unknown);
    }
}
