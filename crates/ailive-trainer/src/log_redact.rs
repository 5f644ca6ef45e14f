const MAX_LINE_CHARS: usize = 2048;

/// Make a line of worker output safe to re-emit: strip terminal escape
/// sequences and control characters, cap the length, and blank out the
/// credential wherever it appears. Training frameworks print progress bars,
/// so their output is full of CSI sequences and carriage returns.
pub fn clean_line(input: &str, secret: Option<&str>) -> String {
    let stripped = strip_controls(input);
    match secret {
        Some(s) if !s.is_empty() => stripped.replace(s, "***"),
        _ => stripped,
    }
}

enum Escape {
    Start,
    Csi,
    Osc,
}

fn strip_controls(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut escape: Option<Escape> = None;
    let mut kept = 0usize;
    let mut truncated = false;

    for c in input.chars() {
        if let Some(mode) = escape.as_ref() {
            match mode {
                Escape::Start => match c {
                    '[' => escape = Some(Escape::Csi),
                    ']' => escape = Some(Escape::Osc),
                    _ => escape = None,
                },
                // CSI sequences end on a final byte in `@`..=`~`.
                Escape::Csi => {
                    if ('@'..='~').contains(&c) {
                        escape = None;
                    }
                }
                // OSC sequences end on BEL, or on ESC which may open the next one.
                Escape::Osc => {
                    if c == '\x07' {
                        escape = None;
                    } else if c == '\x1b' {
                        escape = Some(Escape::Start);
                    }
                }
            }
            continue;
        }

        match c {
            '\x1b' => escape = Some(Escape::Start),
            '\r' | '\n' => {}
            '\t' => {
                out.push(' ');
                kept += 1;
            }
            c if c.is_control() => {}
            c => {
                out.push(c);
                kept += 1;
            }
        }

        if kept >= MAX_LINE_CHARS {
            truncated = true;
            break;
        }
    }

    if truncated {
        out.push_str(" ...[truncated]");
    }
    out
}
