/// Normalizes line endings and blank lines without touching in-line content.
///
/// - CRLF and lone CR become LF
/// - trailing whitespace is stripped from every line
/// - runs of blank lines collapse into one blank line
/// - leading and trailing blank lines are removed
pub fn normalize_whitespace(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut pending_blank = false;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        out.push_str(line);
    }
    out
}
