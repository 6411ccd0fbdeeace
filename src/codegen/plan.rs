use std::fmt::Write as _;

use super::GeneratedProgram;

/// Plain-text listing of the program, one block per call.
pub fn render_plan(program: &GeneratedProgram) -> String {
    let mut out = String::new();
    if !program.inputs.is_empty() {
        out.push_str("inputs:\n");
        for input in &program.inputs {
            match &input.default_value {
                Some(v) => {
                    let _ = writeln!(out, "  {} = {:?}", input.name, v);
                }
                None => {
                    let _ = writeln!(out, "  {}", input.name);
                }
            }
        }
    }
    if !program.cookies.is_empty() {
        let _ = writeln!(out, "cookies: {}", program.cookies.join(", "));
    }

    for call in &program.calls {
        let _ = writeln!(out, "[{}] {} {}", call.index, call.method, call.url);
        for (name, value) in &call.headers {
            if !value.is_literal() {
                let _ = writeln!(out, "    {name}: {value}");
            }
        }
        if let Some(body) = &call.body {
            if !body.is_literal() {
                let _ = writeln!(out, "    body: {body}");
            }
        }
        for slot in &call.extraction_slots {
            let _ = writeln!(
                out,
                "    <- {} = {} of [{}]",
                slot.name, slot.extraction, slot.call_index
            );
        }
    }

    if !program.complete {
        out.push_str("incomplete:\n");
        for id in &program.excluded {
            let _ = writeln!(out, "  excluded {id}");
        }
        for id in &program.skipped {
            let _ = writeln!(out, "  skipped {id}");
        }
    }
    out
}
