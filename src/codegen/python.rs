use std::fmt::Write as _;

use crate::graph::Extraction;

use super::template::{Segment, Template};
use super::{CallSpec, GeneratedProgram};

const PRELUDE: &str = r#"#!/usr/bin/env python3
"""Replays a captured browser action. Generated by tracegraph."""
import argparse
import json
import re

import requests


def json_pointer(response, pointer):
    value = response.json()
    for token in pointer.split("/")[1:]:
        token = token.replace("~1", "/").replace("~0", "~")
        value = value[int(token)] if isinstance(value, list) else value[token]
    return str(value)


def header(response, name):
    return response.headers[name]


def cookie(response, name):
    return response.cookies[name]


def regex(response, pattern):
    match = re.search(pattern, response.text)
    if match is None:
        raise ValueError("pattern %r not found in response" % pattern)
    return match.group(1)

"#;

fn py_str(text: &str) -> String {
    // JSON string escapes are a subset of Python's
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

fn py_expr(template: &Template) -> String {
    if template.segments().is_empty() {
        return "\"\"".to_string();
    }
    template
        .segments()
        .iter()
        .map(|segment| match segment {
            Segment::Literal(text) => py_str(text),
            Segment::Input(name) => format!("str(inputs[{}])", py_str(name)),
            Segment::Extracted(slot) => slot.clone(),
            Segment::Cookie(name) => format!("cookies[{}]", py_str(name)),
        })
        .collect::<Vec<_>>()
        .join(" + ")
}

fn extraction_call(extraction: &Extraction, response: &str) -> String {
    match extraction {
        Extraction::JsonPointer(p) => format!("json_pointer({response}, {})", py_str(p)),
        Extraction::Header(h) => format!("header({response}, {})", py_str(h)),
        Extraction::Cookie(c) => format!("cookie({response}, {})", py_str(c)),
        Extraction::Regex(r) => format!("regex({response}, {})", py_str(r)),
    }
}

fn write_call(out: &mut String, call: &CallSpec) {
    for slot in &call.extraction_slots {
        let response = format!("resp{}", slot.call_index);
        let _ = writeln!(
            out,
            "    {} = {}",
            slot.name,
            extraction_call(&slot.extraction, &response)
        );
    }
    let _ = writeln!(out, "    resp{} = session.request(", call.index);
    let _ = writeln!(out, "        {},", py_str(&call.method));
    let _ = writeln!(out, "        {},", py_expr(&call.url));
    let _ = writeln!(out, "        headers={{");
    for (name, value) in &call.headers {
        let _ = writeln!(out, "            {}: {},", py_str(name), py_expr(value));
    }
    let _ = writeln!(out, "        }},");
    if let Some(body) = &call.body {
        let _ = writeln!(out, "        data={},", py_expr(body));
    }
    let _ = writeln!(out, "    )");
}

/// Render the program as a standalone Python script using `requests`.
pub fn render_python(program: &GeneratedProgram) -> String {
    let mut out = String::from(PRELUDE);

    out.push_str("\ndef run(inputs, cookies):\n");
    out.push_str("    session = requests.Session()\n");
    if program.calls.is_empty() {
        out.push_str("    return None\n");
    }
    for call in &program.calls {
        write_call(&mut out, call);
    }
    if let Some(last) = program.calls.last() {
        let _ = writeln!(out, "    return resp{}", last.index);
    }

    out.push_str("\n\nif __name__ == \"__main__\":\n");
    out.push_str("    parser = argparse.ArgumentParser()\n");
    for input in &program.inputs {
        let flag = py_str(&format!("--{}", input.name));
        match &input.default_value {
            Some(v) => {
                let _ = writeln!(
                    out,
                    "    parser.add_argument({flag}, dest={}, default={})",
                    py_str(&input.name),
                    py_str(v)
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "    parser.add_argument({flag}, dest={}, required=True)",
                    py_str(&input.name)
                );
            }
        }
    }
    out.push_str(
        "    parser.add_argument(\"--cookies\", help=\"JSON file mapping cookie names to values\")\n",
    );
    out.push_str("    args = vars(parser.parse_args())\n");
    out.push_str("    cookie_file = args.pop(\"cookies\")\n");
    out.push_str("    jar = {}\n");
    out.push_str("    if cookie_file:\n");
    out.push_str("        with open(cookie_file) as fh:\n");
    out.push_str("            jar = json.load(fh)\n");
    out.push_str("    response = run(args, jar)\n");
    out.push_str("    if response is not None:\n");
    out.push_str("        print(response.status_code)\n");
    out.push_str("        print(response.text)\n");
    out
}
