/// Inline citation markers the memory-injection prompt asks the model to
/// emit when it actually drew on an injected memory row, e.g.
/// `[[used:3f29e7b2-...]]`. The gateway strips these from what the client
/// sees and uses the ids to bump each row's recall weight.
const MARKER_PREFIX: &str = "[[used:";
const MARKER_SUFFIX: &str = "]]";

/// Scans `text` for citation markers, returning the text with every marker
/// removed and the list of ids found (not validated as UUIDs here — an
/// unparseable id is simply skipped when incrementing weight downstream).
pub fn strip_citations(text: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(text.len());
    let mut ids = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(MARKER_PREFIX) {
        out.push_str(&rest[..start]);
        let after_prefix = &rest[start + MARKER_PREFIX.len()..];
        match after_prefix.find(MARKER_SUFFIX) {
            Some(end) => {
                let id = after_prefix[..end].trim();
                if !id.is_empty() {
                    ids.push(id.to_string());
                }
                rest = &after_prefix[end + MARKER_SUFFIX.len()..];
            }
            None => {
                // Unterminated marker; keep the raw prefix rather than
                // silently swallow trailing text that looked like one.
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    (out, ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_marker_and_returns_id() {
        let (text, ids) = strip_citations("according to [[used:abc-123]] you said so");
        assert_eq!(text, "according to  you said so");
        assert_eq!(ids, vec!["abc-123".to_string()]);
    }

    #[test]
    fn strips_multiple_markers() {
        let (text, ids) = strip_citations("a[[used:1]]b[[used:2]]c");
        assert_eq!(text, "abc");
        assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn text_without_markers_is_unchanged() {
        let (text, ids) = strip_citations("nothing to see here");
        assert_eq!(text, "nothing to see here");
        assert!(ids.is_empty());
    }

    #[test]
    fn unterminated_marker_is_left_intact() {
        let (text, ids) = strip_citations("oops [[used:broken");
        assert_eq!(text, "oops [[used:broken");
        assert!(ids.is_empty());
    }
}
