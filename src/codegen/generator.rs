//! Reverse-topological emission of a resolved DAG.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::graph::{Dag, Extraction, Fragment, FragmentLocation, NodeId, RequestNode, Resolution};

use super::template::{PairSyntax, Segment, Template};
use super::{CallSpec, CodegenWarning, ExtractionSlot, GeneratedProgram, InputSlot};

/// Producers strictly before consumers; ties broken by discovery order.
///
/// Only resolved nodes take part. Returns the order and any resolved nodes
/// that could not be ordered (only possible if the graph has a cycle).
pub fn emission_order(dag: &Dag) -> (Vec<NodeId>, Vec<NodeId>) {
    let included: HashSet<&NodeId> = dag
        .nodes()
        .filter(|n| n.is_resolved())
        .map(|n| &n.id)
        .collect();

    let mut indegree: HashMap<&NodeId, usize> = included.iter().map(|id| (*id, 0)).collect();
    for edge in dag.edges() {
        if included.contains(&edge.producer) {
            if let Some(d) = indegree.get_mut(&edge.consumer) {
                *d += 1;
            }
        }
    }

    let seq_of = |id: &NodeId| dag.node(id).map(|n| n.seq).unwrap_or(usize::MAX);
    let mut ready: BTreeMap<usize, &NodeId> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| (seq_of(*id), *id))
        .collect();

    let mut order = Vec::with_capacity(included.len());
    while let Some((_, id)) = ready.pop_first() {
        order.push(id.clone());
        for edge in dag.consumers_of(id) {
            if let Some(d) = indegree.get_mut(&edge.consumer) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(seq_of(&edge.consumer), &edge.consumer);
                }
            }
        }
    }

    let emitted: HashSet<&NodeId> = order.iter().collect();
    let mut stuck: Vec<&RequestNode> = dag
        .nodes()
        .filter(|n| included.contains(&n.id) && !emitted.contains(&n.id))
        .collect();
    stuck.sort_by_key(|n| n.seq);
    let stuck = stuck.into_iter().map(|n| n.id.clone()).collect();
    (order, stuck)
}

/// Extraction slots across the whole program; one slot per (call, extraction).
#[derive(Default)]
struct SlotTable {
    by_source: HashMap<(usize, Extraction), String>,
    names: HashSet<String>,
}

struct CallBuilder<'a> {
    url: Template,
    headers: Vec<(String, Template)>,
    body: Option<Template>,
    input_slots: Vec<String>,
    extraction_slots: Vec<ExtractionSlot>,
    slots: &'a mut SlotTable,
}

impl CallBuilder<'_> {
    /// Parameterize `fragment` where it occurs. Query and cookie fragments
    /// only touch their own `name=value` pair; URL fragments prefer a whole
    /// path segment.
    fn substitute(&mut self, fragment: &Fragment, replacement: &[Segment]) -> bool {
        let value = fragment.value.as_str();
        match &fragment.location {
            FragmentLocation::Url => {
                self.url.substitute_segment(value, replacement)
                    || self.url.substitute_value(value, replacement)
            }
            FragmentLocation::Query(name) => {
                self.url
                    .substitute_pair(PairSyntax::QUERY, name, value, replacement)
            }
            FragmentLocation::Header(name) => self
                .headers
                .iter_mut()
                .filter(|(h, _)| h.eq_ignore_ascii_case(name))
                .any(|(_, t)| t.substitute_value(value, replacement)),
            FragmentLocation::Cookie(name) => self.substitute_cookie(name, value, replacement),
            FragmentLocation::Body => self
                .body
                .as_mut()
                .is_some_and(|t| t.substitute_value(value, replacement)),
        }
    }

    fn substitute_cookie(&mut self, name: &str, value: &str, replacement: &[Segment]) -> bool {
        self.headers
            .iter_mut()
            .filter(|(h, _)| h.eq_ignore_ascii_case("cookie"))
            .any(|(_, t)| t.substitute_pair(PairSyntax::COOKIE, name, value, replacement))
    }

    /// Slot for `extraction` from call `call_index`.
    ///
    /// A slot is declared by the first call that needs it and reused by later ones.
    fn slot(&mut self, call_index: usize, producer: &NodeId, extraction: &Extraction) -> String {
        let key = (call_index, extraction.clone());
        if let Some(existing) = self.slots.by_source.get(&key) {
            return existing.clone();
        }
        let base = format!("v{}_{}", call_index, slot_hint(extraction));
        let mut name = base.clone();
        let mut n = 2;
        while !self.slots.names.insert(name.clone()) {
            name = format!("{base}_{n}");
            n += 1;
        }
        self.slots.by_source.insert(key, name.clone());
        self.extraction_slots.push(ExtractionSlot {
            name: name.clone(),
            call_index,
            producer: producer.clone(),
            extraction: extraction.clone(),
        });
        name
    }
}

fn slot_hint(extraction: &Extraction) -> String {
    let raw = match extraction {
        Extraction::Header(name) | Extraction::Cookie(name) => name.as_str(),
        Extraction::JsonPointer(pointer) => pointer
            .rsplit('/')
            .find(|s| !s.is_empty() && s.parse::<usize>().is_err())
            .unwrap_or("value"),
        Extraction::Regex(_) => "match",
    };
    let ident: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let ident = ident.trim_matches('_');
    if ident.is_empty() {
        "value".to_string()
    } else {
        ident.to_string()
    }
}

fn emit_call(
    dag: &Dag,
    node: &RequestNode,
    index: usize,
    emitted: &HashMap<NodeId, usize>,
    slots: &mut SlotTable,
    warnings: &mut Vec<CodegenWarning>,
) -> Result<CallSpec, CodegenWarning> {
    for (i, part) in node.dynamic_parts.iter().enumerate() {
        if matches!(part.resolution, Resolution::Producer(_))
            && dag.edge_for(&node.id, i).and_then(|e| e.extraction.as_ref()).is_none()
        {
            return Err(CodegenWarning::MissingExtraction {
                node: node.id.clone(),
                fragment: part.fragment.to_string(),
            });
        }
    }

    let mut call = CallBuilder {
        url: Template::literal(node.url.clone()),
        headers: node
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), Template::literal(v)))
            .collect(),
        body: node.body.clone().map(Template::literal),
        input_slots: Vec::new(),
        extraction_slots: Vec::new(),
        slots,
    };

    for (i, part) in node.dynamic_parts.iter().enumerate() {
        let replacement = match &part.resolution {
            Resolution::Unresolved | Resolution::Constant(_) => continue,
            Resolution::Input(name) => {
                if !call.input_slots.contains(name) {
                    call.input_slots.push(name.clone());
                }
                vec![Segment::Input(name.clone())]
            }
            Resolution::Producer(producer) => {
                let Some(extraction) = dag.edge_for(&node.id, i).and_then(|e| e.extraction.as_ref())
                else {
                    continue;
                };
                let Some(&call_index) = emitted.get(producer) else {
                    warnings.push(CodegenWarning::ProducerUnavailable {
                        node: node.id.clone(),
                        fragment: part.fragment.to_string(),
                        producer: producer.clone(),
                    });
                    continue;
                };
                vec![Segment::Extracted(call.slot(call_index, producer, extraction))]
            }
        };

        if !call.substitute(&part.fragment, &replacement) {
            warnings.push(CodegenWarning::FragmentNotFound {
                node: node.id.clone(),
                fragment: part.fragment.to_string(),
            });
        }
    }

    let jar = dag.cookies();
    if !jar.is_empty() {
        let cookies = node.headers.request_cookies();
        for (name, value) in cookies.iter().filter(|(n, _)| jar.contains(n)) {
            call.substitute_cookie(name, value, &[Segment::Cookie(name.clone())]);
        }
    }

    Ok(CallSpec {
        index,
        node: node.id.clone(),
        method: node.method.clone(),
        url: call.url,
        headers: call.headers,
        body: call.body,
        input_slots: call.input_slots,
        extraction_slots: call.extraction_slots,
    })
}

/// Turn a (complete or partial) DAG into an ordered call sequence.
///
/// Pure: an unchanged DAG always yields an identical program.
pub fn generate(dag: &Dag) -> GeneratedProgram {
    let mut warnings = Vec::new();

    let excluded: Vec<NodeId> = dag
        .nodes()
        .filter(|n| !n.is_resolved())
        .map(|n| n.id.clone())
        .collect();
    for id in &excluded {
        warnings.push(CodegenWarning::ExcludedUnresolved { node: id.clone() });
    }

    let (order, stuck) = emission_order(dag);
    for id in &stuck {
        warnings.push(CodegenWarning::CycleDetected { node: id.clone() });
    }

    let mut calls: Vec<CallSpec> = Vec::with_capacity(order.len());
    let mut skipped: Vec<NodeId> = stuck;
    let mut emitted: HashMap<NodeId, usize> = HashMap::new();
    let mut slots = SlotTable::default();

    for id in &order {
        let Some(node) = dag.node(id) else {
            continue;
        };
        match emit_call(
            dag,
            node,
            calls.len(),
            &emitted,
            &mut slots,
            &mut warnings,
        ) {
            Ok(call) => {
                emitted.insert(id.clone(), call.index);
                calls.push(call);
            }
            Err(warning) => {
                skipped.push(id.clone());
                warnings.push(warning);
            }
        }
    }

    for warning in &warnings {
        tracing::warn!(warning = %warning, "codegen warning");
    }

    let used_inputs: BTreeSet<&str> = calls
        .iter()
        .flat_map(|c| c.input_slots.iter().map(String::as_str))
        .collect();
    let inputs = used_inputs
        .into_iter()
        .map(|name| InputSlot {
            name: name.to_string(),
            default_value: dag.input(name).and_then(|v| v.default_value.clone()),
        })
        .collect();

    let cookies: BTreeSet<String> = calls
        .iter()
        .flat_map(|c| c.headers.iter())
        .flat_map(|(_, t)| t.segments())
        .filter_map(|s| match s {
            Segment::Cookie(name) => Some(name.clone()),
            _ => None,
        })
        .collect();

    let complete = excluded.is_empty() && skipped.is_empty();
    GeneratedProgram {
        calls,
        inputs,
        cookies: cookies.into_iter().collect(),
        excluded,
        skipped,
        warnings,
        complete,
    }
}
