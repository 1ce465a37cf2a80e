//! `UsePAM` handling for sshd_config.

/// Directive added when PAM is not already in effect.
pub const USE_PAM_DIRECTIVE: &str = "UsePAM yes";

const USE_PAM_KEYWORD: &str = "usepam";
const MATCH_KEYWORD: &str = "match";

/// Split an uncommented sshd_config line into (keyword, first value).
///
/// sshd accepts both `Keyword value` and `Keyword=value`, and keywords are
/// case-insensitive.
fn keyword_and_value(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let split = trimmed
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(trimmed.len());
    let (keyword, rest) = trimmed.split_at(split);
    let value = rest
        .trim_start_matches(|c: char| c.is_whitespace() || c == '=')
        .split_whitespace()
        .next()
        .unwrap_or("");
    Some((keyword, value))
}

/// `Some(enabled)` for an uncommented `UsePAM` line, `None` for anything else.
///
/// Keywords are ASCII, so a lossy decode of the raw line is enough to match.
fn use_pam_value(line: &[u8]) -> Option<bool> {
    let text = String::from_utf8_lossy(line);
    let (keyword, value) = keyword_and_value(&text)?;
    keyword
        .eq_ignore_ascii_case(USE_PAM_KEYWORD)
        .then(|| value.eq_ignore_ascii_case("yes"))
}

fn is_match_block(line: &[u8]) -> bool {
    keyword_and_value(&String::from_utf8_lossy(line))
        .is_some_and(|(k, _)| k.eq_ignore_ascii_case(MATCH_KEYWORD))
}

/// Whether sshd would run with PAM enabled.
///
/// sshd keeps the first value it reads for a keyword, so only the first
/// uncommented `UsePAM` line before any `Match` block counts.
pub fn use_pam_enabled(lines: &[Vec<u8>]) -> bool {
    lines
        .iter()
        .take_while(|l| !is_match_block(l))
        .find_map(|l| use_pam_value(l))
        .unwrap_or(false)
}

/// Return the edited config that enables PAM, or `None` if it already is.
///
/// Existing uncommented `UsePAM` lines are commented out rather than removed
/// or edited in place. The new directive goes before the first `Match` block
/// (global keywords are not allowed inside one), otherwise at end of file.
pub fn enable_use_pam(lines: &[Vec<u8>]) -> Option<Vec<Vec<u8>>> {
    if use_pam_enabled(lines) {
        return None;
    }

    let mut out = Vec::with_capacity(lines.len() + 1);
    let mut insert_at = None;

    for line in lines {
        if insert_at.is_none() && is_match_block(line) {
            insert_at = Some(out.len());
        }
        if use_pam_value(line).is_some() {
            let mut commented = b"# ".to_vec();
            commented.extend_from_slice(line);
            out.push(commented);
        } else {
            out.push(line.clone());
        }
    }

    match insert_at {
        Some(idx) => out.insert(idx, USE_PAM_DIRECTIVE.as_bytes().to_vec()),
        None => out.push(USE_PAM_DIRECTIVE.as_bytes().to_vec()),
    }

    Some(out)
}
