//! Stop-sequence detection over generated text.

/// Result of a stop-sequence match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopMatch {
    /// Index into the configured stop list that matched.
    pub stop_index: usize,
    /// Byte length of the text to keep; everything from here on is the
    /// matched stop sequence (plus any trailing whitespace).
    pub keep_len: usize,
}

/// Check whether `text` ends with any configured stop sequence.
///
/// Pure over its inputs. All stop strings are checked each step; the first
/// one (in configured order) found at the tail wins, so ties are broken by
/// configuration order rather than length. Trailing whitespace after the
/// stop sequence does not defeat the match. Empty stop strings are
/// ignored.
pub fn match_stop(text: &str, stops: &[String]) -> Option<StopMatch> {
    let probe = text.trim_end();

    for (stop_index, stop) in stops.iter().enumerate() {
        if stop.is_empty() {
            continue;
        }
        if probe.ends_with(stop.as_str()) {
            return Some(StopMatch { stop_index, keep_len: probe.len() - stop.len() });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stops(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn matches_stop_at_tail() {
        let m = match_stop("hello world</s>", &stops(&["</s>"])).unwrap();
        assert_eq!(m.stop_index, 0);
        assert_eq!(&"hello world</s>"[..m.keep_len], "hello world");
    }

    #[test]
    fn no_match_mid_text() {
        assert!(match_stop("a</s>b", &stops(&["</s>"])).is_none());
    }

    #[test]
    fn trailing_whitespace_does_not_defeat_match() {
        let text = "hi</s>\n ";
        let m = match_stop(text, &stops(&["</s>"])).unwrap();
        assert_eq!(&text[..m.keep_len], "hi");
    }

    #[test]
    fn first_configured_stop_wins_over_longer_later_one() {
        // Both "nd>" and "</end>" sit at the tail; configuration order
        // decides, not length.
        let text = "abc</end>";
        let m = match_stop(text, &stops(&["nd>", "</end>"])).unwrap();
        assert_eq!(m.stop_index, 0);
        assert_eq!(&text[..m.keep_len], "abc</e");
    }

    #[test]
    fn empty_stop_strings_are_skipped() {
        let m = match_stop("done.", &stops(&["", "."])).unwrap();
        assert_eq!(m.stop_index, 1);
    }

    #[test]
    fn no_stops_configured() {
        assert!(match_stop("anything", &[]).is_none());
    }
}
