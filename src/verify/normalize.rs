//! Output normalization for text comparison.

/// Normalize program output so cosmetic whitespace differences don't matter.
///
/// Trims the whole text, turns `\r\n` and lone `\r` into `\n`, and strips
/// trailing whitespace from every line.
pub fn normalize_output(output: &str) -> String {
    output
        .trim()
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether two outputs are equal after [`normalize_output`].
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_and_line_endings_ignored() {
        assert!(outputs_match(" 5 \r\n ", "5"));
        assert!(outputs_match("a  \r\nb\rc\n\n", "a\nb\nc"));
        assert!(!outputs_match("5", "6"));
    }

    #[test]
    fn test_inner_blank_lines_and_indent_kept() {
        assert_eq!(normalize_output("a\n\n  b  \n"), "a\n\n  b");
        assert!(!outputs_match("a\nb", "a\n\nb"));
    }

    #[test]
    fn test_empty() {
        assert_eq!(normalize_output(""), "");
        assert_eq!(normalize_output(" \r\n\t"), "");
    }
}
