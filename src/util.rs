use std::path::Path;

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Keep the last `max_chars` characters; tool output puts the verdict at the end.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect::<String>()
}

/// Render a program and its arguments as one display string.
pub fn command_label(command: &[String]) -> String {
    command
        .iter()
        .map(|part| {
            if part.is_empty() || part.contains(char::is_whitespace) {
                format!("'{}'", part.replace('\'', "'\\''"))
            } else {
                part.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip `root` from an absolute path that lives inside it.
pub fn relative_to(path: &str, root: &Path) -> String {
    let candidate = Path::new(path);
    if !candidate.is_absolute() {
        return path.to_string();
    }
    let mut bases = vec![root.to_path_buf()];
    if let Ok(canonical) = root.canonicalize() {
        bases.push(canonical);
    }
    for base in &bases {
        if let Ok(rel) = candidate.strip_prefix(base) {
            if !rel.as_os_str().is_empty() {
                return rel.to_string_lossy().replace('\\', "/");
            }
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }

    #[test]
    fn command_label_quotes_spaces() {
        let cmd = vec!["sh".to_string(), "-c".to_string(), "exit 1".to_string()];
        assert_eq!(command_label(&cmd), "sh -c 'exit 1'");
    }

    #[test]
    fn relative_to_strips_root() {
        let root = PathBuf::from("/repo");
        assert_eq!(relative_to("/repo/src/a.ts", &root), "src/a.ts");
        assert_eq!(relative_to("src/a.ts", &root), "src/a.ts");
        assert_eq!(relative_to("/elsewhere/a.ts", &root), "/elsewhere/a.ts");
    }
}
