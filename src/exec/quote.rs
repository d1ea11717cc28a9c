/// Single-quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

// Lines ending in these words continue onto the next line; a `;` after them
// would be a syntax error.
const CONTINUATIONS: &[&str] = &["then", "do", "else", "{", "in"];

// Same for operators, which need no separating space: `&`, `&&`, `|`, `||`
// and the `;;` closing a case arm.
const OPERATOR_ENDINGS: &[char] = &['&', '|', ';'];

fn strip_statement_end(line: &str) -> &str {
    if line.ends_with(";;") {
        return line;
    }
    line.strip_suffix(';').unwrap_or(line).trim_end()
}

/// Collapses a multi-line script into one line, joining statements with `; `.
/// Trailing-backslash continuations are folded into the following line.
pub fn normalize_script_newlines(script: &str) -> String {
    let mut out = String::new();
    let mut continued = false;
    for raw in script.lines() {
        let mut line = strip_statement_end(raw.trim());
        let backslash = line.ends_with('\\');
        if backslash {
            line = line[..line.len() - 1].trim_end();
        }
        if line.is_empty() {
            continued |= backslash;
            continue;
        }
        if !out.is_empty() {
            let continues = continued
                || out.ends_with(OPERATOR_ENDINGS)
                || CONTINUATIONS
                    .iter()
                    .any(|tok| out == *tok || out.ends_with(&format!(" {}", tok)));
            out.push_str(if continues { " " } else { "; " });
        }
        out.push_str(line);
        continued = backslash;
    }
    out
}

/// Prepares a command for embedding in a double-quoted elevation script
/// argument (AppleScript `do shell script "..."`).
pub fn escape_for_elevation(command: &str) -> String {
    normalize_script_newlines(command)
        .replace('\\', r"\\")
        .replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_embedded_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn joins_statements_and_keeps_control_flow_valid() {
        let script = "key='x';\nif [ -z \"$key\" ]; then\n  echo none;\n  exit 0;\nfi;\nkill $pids || true\n";
        assert_eq!(
            normalize_script_newlines(script),
            "key='x'; if [ -z \"$key\" ]; then echo none; exit 0; fi; kill $pids || true"
        );
    }

    #[test]
    fn pipes_across_lines_are_not_split() {
        assert_eq!(normalize_script_newlines("ps ax |\ngrep x"), "ps ax | grep x");
        assert_eq!(
            normalize_script_newlines("for p in $pids; do\necho $p\ndone"),
            "for p in $pids; do echo $p; done"
        );
    }

    #[test]
    fn background_jobs_and_case_arms_stay_valid() {
        assert_eq!(
            normalize_script_newlines("sleep 1 &\necho hi"),
            "sleep 1 & echo hi"
        );
        let script = "case \"$1\" in\n  start) run;;\n  *) echo usage;;\nesac\necho done";
        assert_eq!(
            normalize_script_newlines(script),
            "case \"$1\" in start) run;; *) echo usage;; esac; echo done"
        );
    }

    #[test]
    fn escapes_quotes_and_backslashes_for_elevation() {
        let cmd = "printf \"a\\tb\" \\\n  | cat\nbash <(curl -fsSL 'https://x/y.sh')";
        assert_eq!(
            escape_for_elevation(cmd),
            "printf \\\"a\\\\tb\\\" | cat; bash <(curl -fsSL 'https://x/y.sh')"
        );
    }
}
