use rc_types::wire::{NEWLINE_ESCAPE, OUTPUT_CHUNK_LINES};

/// Builds the full `<prefix>:START:<n>` / `<prefix>:CHUNK:<text>`* /
/// `<prefix>:END` sequence for one result stream. `prefix` is `OUTPUT` for a
/// plain command result or `FILETRU` for a `SIMPL` sub-result.
pub fn encode_chunks(prefix: &str, text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.split('\n').collect();
    let total_lines = lines.len();

    let mut out = Vec::with_capacity(2 + total_lines / OUTPUT_CHUNK_LINES + 1);
    out.push(format!("{prefix}:START:{total_lines}"));

    for chunk in lines.chunks(OUTPUT_CHUNK_LINES) {
        let joined = chunk.join("\n");
        let escaped = joined.replace('\n', NEWLINE_ESCAPE);
        out.push(format!("{prefix}:CHUNK:{escaped}"));
    }

    out.push(format!("{prefix}:END"));
    out
}

/// Reverses the `<<<NL>>>` escaping applied to one chunk's payload.
pub fn decode_chunk(payload: &str) -> String {
    payload.replace(NEWLINE_ESCAPE, "\n")
}

/// Parses the `n` out of a `<prefix>:START:<n>` line; tolerant of a
/// non-integer or missing tail, degrading to 0 with the caller expected to
/// log a warning.
pub fn parse_total(start_line: &str) -> u32 {
    start_line
        .rsplit(':')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_output() {
        let frames = encode_chunks("OUTPUT", "hi");
        assert_eq!(frames[0], "OUTPUT:START:1");
        assert_eq!(frames[1], "OUTPUT:CHUNK:hi");
        assert_eq!(frames[2], "OUTPUT:END");
        assert_eq!(parse_total(&frames[0]), 1);
    }

    #[test]
    fn escapes_embedded_newlines_within_a_chunk() {
        let text = (0..5).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let frames = encode_chunks("FILETRU", &text);
        assert_eq!(frames[0], "FILETRU:START:5");
        let chunk_payload = frames[1].strip_prefix("FILETRU:CHUNK:").unwrap();
        assert!(chunk_payload.contains("<<<NL>>>"));
        assert_eq!(decode_chunk(chunk_payload), text);
    }

    #[test]
    fn splits_into_multiple_chunks_past_the_line_cap() {
        let text = (0..250).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let frames = encode_chunks("OUTPUT", &text);
        // START + 3 chunks (100/100/50) + END
        assert_eq!(frames.len(), 5);
    }
}
