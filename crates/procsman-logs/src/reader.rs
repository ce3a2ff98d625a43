//! Read-side log post-processing.
//!
//! When admin code fetches log contents, runs of identical consecutive
//! lines longer than [`REPEAT_THRESHOLD`] are collapsed to the line
//! followed by a repeat marker. Files on disk are never rewritten.

/// Runs up to this length are emitted verbatim.
pub const REPEAT_THRESHOLD: usize = 20;

/// Collapse consecutive identical lines: a run of `k` identical lines
/// becomes the line once plus `{Last line repeated k times}` when
/// `k > REPEAT_THRESHOLD`, otherwise the line repeated `k` times.
pub fn collapse_repeated_lines(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut lines = input.lines();

    let Some(first) = lines.next() else {
        return out;
    };
    let mut last = first;
    let mut count = 1usize;

    for line in lines {
        if line == last {
            count += 1;
        } else {
            emit_run(&mut out, last, count);
            last = line;
            count = 1;
        }
    }
    emit_run(&mut out, last, count);

    out
}

fn emit_run(out: &mut String, line: &str, count: usize) {
    if count > REPEAT_THRESHOLD {
        out.push_str(line);
        out.push('\n');
        out.push_str(&format!("{{Last line repeated {} times}}\n", count));
    } else {
        for _ in 0..count {
            out.push_str(line);
            out.push('\n');
        }
    }
}
