//! Graphviz Emitter: a clustered `dot` call graph.

use std::io::Write;
use std::rc::Rc;

use crate::error::EmitError;
use crate::recorder::Edge;

const HEADER: &str = "digraph calls\n{\n  overlap=false; splines=true; size=\"7.75,10.25\"; orientation=portrait; sep=0.1; nodesep=0.1;\n";

#[derive(Clone)]
struct EdgeKey {
    src_file: Rc<str>,
    src_fn: Rc<str>,
    dst_file: Rc<str>,
    dst_fn: Rc<str>,
}

struct EdgeGroup {
    key: EdgeKey,
    count: u32,
}

/// Writes the clustered `dot` call graph for `edges`.
pub fn write_graphviz(out: &mut dyn Write, edges: &[Edge]) -> Result<(), EmitError> {
    let mut keys: Vec<EdgeKey> = edges
        .iter()
        .map(|e| EdgeKey {
            src_file: e.src_file.clone(),
            src_fn: e.src_fn.clone(),
            dst_file: e.dst_file.clone(),
            dst_fn: e.dst_fn.clone(),
        })
        .collect();
    keys.sort_by(|a, b| {
        (&*a.src_file, &*a.src_fn, &*a.dst_file, &*a.dst_fn)
            .cmp(&(&*b.src_file, &*b.src_fn, &*b.dst_file, &*b.dst_fn))
    });

    let groups = coalesce(keys);

    write!(out, "{HEADER}")?;
    write_clusters_by_dst(out, &groups)?;
    write_clusters_by_src(out, &groups)?;
    for group in &groups {
        writeln!(
            out,
            "  {} -> {} [label={} , weight=0.1;];",
            group.key.src_fn, group.key.dst_fn, group.count
        )?;
    }
    writeln!(out, "}}")?;
    Ok(())
}

/// Collapses consecutive identical `(src_file, src_fn, dst_file, dst_fn)`
/// keys (the input must already be sorted by that tuple) into a single
/// group carrying their count.
fn coalesce(sorted_keys: Vec<EdgeKey>) -> Vec<EdgeGroup> {
    let mut groups: Vec<EdgeGroup> = Vec::new();
    for key in sorted_keys {
        if let Some(last) = groups.last_mut() {
            if *last.key.src_file == *key.src_file
                && *last.key.src_fn == *key.src_fn
                && *last.key.dst_file == *key.dst_file
                && *last.key.dst_fn == *key.dst_fn
            {
                last.count += 1;
                continue;
            }
        }
        groups.push(EdgeGroup { key, count: 1 });
    }
    groups
}

fn write_clusters_by_dst(out: &mut dyn Write, groups: &[EdgeGroup]) -> Result<(), EmitError> {
    let mut sorted: Vec<&EdgeGroup> = groups.iter().collect();
    sorted.sort_by(|a, b| (&*a.key.dst_file, &*a.key.dst_fn).cmp(&(&*b.key.dst_file, &*b.key.dst_fn)));
    write_clusters(out, &sorted, |g| (&g.key.dst_file, &g.key.dst_fn))
}

fn write_clusters_by_src(out: &mut dyn Write, groups: &[EdgeGroup]) -> Result<(), EmitError> {
    let mut sorted: Vec<&EdgeGroup> = groups.iter().collect();
    sorted.sort_by(|a, b| (&*a.key.src_file, &*a.key.src_fn).cmp(&(&*b.key.src_file, &*b.key.src_fn)));
    write_clusters(out, &sorted, |g| (&g.key.src_file, &g.key.src_fn))
}

/// Walks `sorted` (already ordered by `(file, function)` per `select`) and
/// emits one `subgraph "cluster_<file>"` per distinct file, skipping runs
/// where the current function equals the next one's.
fn write_clusters<'a>(
    out: &mut dyn Write,
    sorted: &[&'a EdgeGroup],
    select: impl Fn(&'a EdgeGroup) -> (&'a Rc<str>, &'a Rc<str>),
) -> Result<(), EmitError> {
    let mut current_file: Option<Rc<str>> = None;
    let mut current_fn: Option<Rc<str>> = None;

    for &group in sorted {
        let (file, function) = select(group);

        if current_file.as_deref() != Some(&**file) {
            if current_file.is_some() {
                writeln!(out, "  }}")?;
            }
            writeln!(out, "  subgraph \"cluster_{file}\" {{")?;
            writeln!(out, "    label=\"{file}\"; bgcolor=lightgrey;")?;
            current_file = Some(file.clone());
            current_fn = None;
        }

        if current_fn.as_deref() != Some(&**function) {
            writeln!(out, "    {function} [style=filled, fillcolor=white];")?;
            current_fn = Some(function.clone());
        }
    }
    if current_file.is_some() {
        writeln!(out, "  }}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(src_fn: &str, dst_fn: &str) -> Edge {
        Edge {
            timestamp: 0,
            src_addr: 0,
            dst_addr: 0,
            src_file: Rc::from("foo.c"),
            src_fn: Rc::from(src_fn),
            dst_file: Rc::from("bar.c"),
            dst_fn: Rc::from(dst_fn),
            is_entry: true,
        }
    }

    /// S5 — graphviz aggregation.
    #[test]
    fn s5_aggregates_consecutive_identical_edges() {
        let edges = vec![
            edge("foo", "bar"),
            edge("foo", "bar"),
            edge("foo", "bar"),
            edge("foo", "baz"),
        ];
        let mut buf = Vec::new();
        write_graphviz(&mut buf, &edges).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("foo -> bar [label=3 , weight=0.1;];"));
        assert!(text.contains("foo -> baz [label=1 , weight=0.1;];"));
        assert!(text.starts_with("digraph calls\n{\n"));
    }

    #[test]
    fn empty_edges_still_emit_valid_header_and_footer() {
        let mut buf = Vec::new();
        write_graphviz(&mut buf, &[]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("digraph calls"));
        assert!(text.trim_end().ends_with('}'));
    }
}
