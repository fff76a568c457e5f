//! Physical line model for a configuration document.
//!
//! The document is kept as an ordered vector of [`Line`]s so that writing it
//! back out preserves comments, blank lines and section ordering exactly
//! except where a `set`/`erase` call intentionally changed a value.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LineKind {
    /// Free-form comment or blank line, printed back verbatim.
    Comment(String),
    /// A `# name = value`-shaped line: a commented-out variable assignment,
    /// kept so that later re-adding `name` in the same section is placed
    /// right after it.
    VarComment { raw: String, name: String },
    /// A `[section]` header.
    Section(String),
    /// A live or formerly-live `name = value` assignment. `deleted` means
    /// the key was erased: the physical line is kept (so re-adding the key
    /// lands back in the same spot) but it no longer appears in the value
    /// map and is skipped on write.
    Var {
        name: String,
        value: String,
        deleted: bool,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Line {
    /// Section this line belongs to ("" is the root section). For a
    /// `Section` line this is the section it *opens*.
    pub section: String,
    pub kind: LineKind,
}

/// Parse configuration text into an ordered line list.
///
/// Implements the grammar from spec.md §4.1: lines ending in a backslash
/// are continued; `^\s*#\s*([A-Za-z0-9]+)\s*=` is a variable-comment bound
/// to that name; a `[name]` line opens a section; a line containing `=`
/// after trimming is an assignment; anything else is a plain comment.
pub(crate) fn parse(input: &str, trim_values: bool) -> Vec<Line> {
    let mut out = Vec::new();
    let mut section = String::new();

    let mut physical = input.lines().peekable();
    let mut joined = String::new();
    let mut pending: Vec<String> = Vec::new();
    while let Some(raw) = physical.next() {
        pending.push(raw.to_string());
        if ends_with_odd_backslashes(raw) && physical.peek().is_some() {
            // strip the trailing backslash and continue accumulating
            joined.push_str(raw.strip_suffix('\\').unwrap_or(raw));
            continue;
        }
        if !joined.is_empty() {
            joined.push_str(raw.strip_suffix('\\').unwrap_or(raw));
        } else {
            joined = raw.strip_suffix('\\').unwrap_or(raw).to_string();
        }
        let logical = std::mem::take(&mut joined);
        out.push(parse_logical_line(&logical, &mut section, trim_values));
        pending.clear();
    }
    out
}

fn ends_with_odd_backslashes(s: &str) -> bool {
    let mut n = 0;
    for c in s.chars().rev() {
        if c == '\\' {
            n += 1;
        } else {
            break;
        }
    }
    n % 2 == 1
}

fn parse_logical_line(line: &str, section: &mut String, trim_values: bool) -> Line {
    let trimmed = line.trim_start();

    if let Some(name) = variable_comment_name(trimmed) {
        return Line {
            section: section.clone(),
            kind: LineKind::VarComment {
                raw: line.to_string(),
                name,
            },
        };
    }

    if trimmed.trim_start().starts_with('#') || trimmed.trim().is_empty() {
        return Line {
            section: section.clone(),
            kind: LineKind::Comment(line.to_string()),
        };
    }

    let t = trimmed.trim_end();
    if t.starts_with('[') && t.ends_with(']') && t.len() >= 2 {
        let name = t[1..t.len() - 1].trim().to_string();
        *section = name.clone();
        return Line {
            section: name,
            kind: LineKind::Section(section.clone()),
        };
    }

    if let Some(eq) = line.find('=') {
        let name = line[..eq].trim().to_string();
        let mut value = line[eq + 1..].to_string();
        if !trim_values {
            value = value.trim_start().to_string();
        } else {
            value = value.trim().to_string();
        }
        return Line {
            section: section.clone(),
            kind: LineKind::Var {
                name,
                value,
                deleted: false,
            },
        };
    }

    Line {
        section: section.clone(),
        kind: LineKind::Comment(line.to_string()),
    }
}

/// Matches `^\s*#\s*([A-Za-z0-9]+)\s*=`.
fn variable_comment_name(trimmed: &str) -> Option<String> {
    let rest = trimmed.strip_prefix('#')?;
    let rest = rest.trim_start();
    let name_end = rest.find(|c: char| !(c.is_ascii_alphanumeric()))?;
    if name_end == 0 {
        return None;
    }
    let name = &rest[..name_end];
    let after = rest[name_end..].trim_start();
    if after.starts_with('=') {
        Some(name.to_string())
    } else {
        None
    }
}

/// Wrap a value at `width` columns on whitespace boundaries, continuing with
/// a trailing backslash-newline, as the original writer does.
pub(crate) fn wrap_value(value: &str, width: usize) -> String {
    if value.len() <= width {
        return value.to_string();
    }
    let mut out = String::new();
    let mut rest = value;
    while rest.len() > width {
        let slice = &rest[..width.min(rest.len())];
        let break_at = slice.rfind(char::is_whitespace);
        let cut = break_at.unwrap_or(width.min(rest.len()));
        if cut == 0 {
            break;
        }
        out.push_str(&rest[..cut]);
        out.push_str("\\\n");
        rest = rest[cut..].trim_start();
    }
    out.push_str(rest);
    out
}
