use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;

use crate::error::{Error, Result};
use crate::flags::Flags;
use crate::line::{self, Line, LineKind};

const WRAP_WIDTH: usize = 75;

/// Source backing a [`ConfSimple`]: a real file (atomically rewritten on
/// commit) or an in-memory string (no filesystem interaction, used for
/// tests and for the credentials shared-memory-like layout).
#[derive(Debug)]
enum Backing {
    File { path: PathBuf, mtime: Option<SystemTime> },
    Memory,
}

/// An ordered, comment-preserving INI-like configuration document.
///
/// See spec.md §4.1 for the full contract; this is the `ConfSimple`
/// equivalent: flat name/value pairs grouped into named sections (the
/// empty section name is the root scope).
#[derive(Debug)]
pub struct ConfSimple {
    flags: Flags,
    backing: Backing,
    lines: Vec<Line>,
    /// (section_norm, name_norm) -> index into `lines`, for *live* (alive,
    /// non-deleted) variables only.
    index: HashMap<(String, String), usize>,
    hold_writes: bool,
    error: bool,
}

impl ConfSimple {
    /// Build an empty, memory-only store.
    pub fn empty(flags: Flags) -> Self {
        ConfSimple {
            flags,
            backing: Backing::Memory,
            lines: Vec::new(),
            index: HashMap::new(),
            hold_writes: false,
            error: false,
        }
    }

    /// Build a store from an in-memory string (`CFSF_FROMSTRING`).
    pub fn from_string(data: &str, flags: Flags) -> Self {
        let mut c = ConfSimple {
            flags,
            backing: Backing::Memory,
            lines: Vec::new(),
            index: HashMap::new(),
            hold_writes: false,
            error: false,
        };
        c.reparse(data);
        c
    }

    /// Build a store backed by a file. If the file does not exist and
    /// `flags.read_only` is false, falls back to an empty, to-be-created
    /// store (matching the original's "file-not-found on RW open is not an
    /// error" rule); any other read failure puts the store in the error
    /// state.
    pub fn from_file(path: impl AsRef<Path>, flags: Flags) -> Self {
        let path = path.as_ref().to_path_buf();
        match fs::read_to_string(&path) {
            Ok(data) => {
                let mtime = fs::metadata(&path).ok().and_then(|m| m.modified().ok());
                let mut c = ConfSimple {
                    flags,
                    backing: Backing::File { path, mtime },
                    lines: Vec::new(),
                    index: HashMap::new(),
                    hold_writes: false,
                    error: false,
                };
                c.reparse(&data);
                c
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !flags.read_only => {
                ConfSimple {
                    flags,
                    backing: Backing::File { path, mtime: None },
                    lines: Vec::new(),
                    index: HashMap::new(),
                    hold_writes: false,
                    error: false,
                }
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to read configuration file");
                ConfSimple {
                    flags,
                    backing: Backing::File { path, mtime: None },
                    lines: Vec::new(),
                    index: HashMap::new(),
                    hold_writes: false,
                    error: true,
                }
            }
        }
    }

    pub fn ok(&self) -> bool {
        !self.error
    }

    fn tilde_expand(&self, section: &str) -> String {
        if self.flags.tilde_expand && section.starts_with('~') {
            if let Some(home) = dirs::home_dir() {
                let rest = section.trim_start_matches('~').trim_start_matches('/');
                return home.join(rest).to_string_lossy().to_string();
            }
        }
        section.to_string()
    }

    fn key(&self, section: &str, name: &str) -> (String, String) {
        let section = self.tilde_expand(section);
        (self.flags.norm_section(&section), self.flags.norm_key(name))
    }

    /// Replace the document with a fresh parse of `data`.
    pub fn reparse(&mut self, data: &str) {
        self.lines = line::parse(data, !self.flags.no_trim_values);
        self.rebuild_index();
        self.error = false;
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, l) in self.lines.iter().enumerate() {
            if let LineKind::Var { name, deleted, .. } = &l.kind {
                if !deleted {
                    let k = self.key(&l.section, name);
                    self.index.insert(k, i);
                }
            }
        }
    }

    pub fn get(&self, name: &str, section: &str) -> Option<String> {
        if self.error {
            return None;
        }
        let k = self.key(section, name);
        let idx = *self.index.get(&k)?;
        match &self.lines[idx].kind {
            LineKind::Var { value, deleted, .. } if !deleted => Some(value.clone()),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str, section: &str, default: i64) -> i64 {
        self.get(name, section)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_float(&self, name: &str, section: &str, default: f64) -> f64 {
        self.get(name, section)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, name: &str, section: &str, default: bool) -> bool {
        match self.get(name, section) {
            None => default,
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            },
        }
    }

    pub fn set(&mut self, name: &str, value: &str, section: &str) -> Result<()> {
        if self.error || self.flags.read_only {
            return Err(Error::StoreInError("set"));
        }
        let section_expanded = self.tilde_expand(section);
        let k = self.key(section, name);
        if let Some(&idx) = self.index.get(&k) {
            if let LineKind::Var {
                value: v, deleted, ..
            } = &mut self.lines[idx].kind
            {
                *v = value.to_string();
                *deleted = false;
            }
        } else if let Some(idx) = self.find_deleted_line(&section_expanded, name) {
            // A stale `erase()`d line for this key still occupies its
            // original physical position: revive it in place rather than
            // appending a new line (spec.md §3: "re-addition regenerates
            // the same physical placement"), mirroring
            // `examples/original_source/src/conftree.cpp`'s `i_set()`
            // reusing a stale order entry via `find_if` before inserting.
            if let LineKind::Var {
                value: v, deleted, ..
            } = &mut self.lines[idx].kind
            {
                *v = value.to_string();
                *deleted = false;
            }
            self.index.insert(k, idx);
        } else {
            let insert_at = self.find_insertion_point(&section_expanded, name);
            let new_line = Line {
                section: section_expanded.clone(),
                kind: LineKind::Var {
                    name: name.to_string(),
                    value: value.to_string(),
                    deleted: false,
                },
            };
            match insert_at {
                Some(pos) => self.lines.insert(pos + 1, new_line),
                None => {
                    let end = self.section_end(&section_expanded);
                    match end {
                        Some(pos) => self.lines.insert(pos, new_line),
                        None => {
                            // Section doesn't exist yet: open it at the end.
                            self.lines.push(Line {
                                section: section_expanded.clone(),
                                kind: LineKind::Section(section_expanded.clone()),
                            });
                            self.lines.push(new_line);
                        }
                    }
                }
            }
            self.rebuild_index();
        }
        self.maybe_commit()
    }

    /// Find a `VarComment` line for `name` in `section`, if any, to insert
    /// the new assignment right after it.
    fn find_insertion_point(&self, section: &str, name: &str) -> Option<usize> {
        let sec_norm = self.flags.norm_section(section);
        let name_norm = self.flags.norm_key(name);
        self.lines.iter().position(|l| {
            self.flags.norm_section(&l.section) == sec_norm
                && matches!(&l.kind, LineKind::VarComment { name: n, .. } if self.flags.norm_key(n) == name_norm)
        })
    }

    /// Find a previously `erase()`d `Var` line for `(section, name)`, if
    /// one still occupies a physical slot in `self.lines`.
    fn find_deleted_line(&self, section: &str, name: &str) -> Option<usize> {
        let sec_norm = self.flags.norm_section(section);
        let name_norm = self.flags.norm_key(name);
        self.lines.iter().position(|l| {
            self.flags.norm_section(&l.section) == sec_norm
                && matches!(&l.kind, LineKind::Var { name: n, deleted: true, .. } if self.flags.norm_key(n) == name_norm)
        })
    }

    /// Position just before the next `Section` line (or end of file) after
    /// the last line belonging to `section`, i.e. the insertion point for a
    /// new key appended at the end of that section. Returns `None` if the
    /// section has no existing lines at all (new section).
    fn section_end(&self, section: &str) -> Option<usize> {
        let sec_norm = self.flags.norm_section(section);
        let mut last = None;
        for (i, l) in self.lines.iter().enumerate() {
            if self.flags.norm_section(&l.section) == sec_norm {
                last = Some(i);
            }
        }
        last.map(|i| i + 1)
    }

    pub fn erase(&mut self, name: &str, section: &str) -> Result<()> {
        if self.error || self.flags.read_only {
            return Err(Error::StoreInError("erase"));
        }
        let k = self.key(section, name);
        if let Some(idx) = self.index.remove(&k) {
            if let LineKind::Var { deleted, .. } = &mut self.lines[idx].kind {
                *deleted = true;
            }
        }
        self.maybe_commit()
    }

    pub fn erase_key(&mut self, section: &str) -> Result<()> {
        if self.error || self.flags.read_only {
            return Err(Error::StoreInError("eraseKey"));
        }
        let sec_norm = self.flags.norm_section(section);
        let mut to_remove = Vec::new();
        for (i, l) in self.lines.iter_mut().enumerate() {
            if self.flags.norm_section(&l.section) == sec_norm {
                match &mut l.kind {
                    LineKind::Var { name, deleted, .. } => {
                        *deleted = true;
                        to_remove.push((sec_norm.clone(), self.flags.norm_key(name)));
                    }
                    _ => {}
                }
            }
        }
        self.lines
            .retain(|l| !(self.flags.norm_section(&l.section) == sec_norm && matches!(l.kind, LineKind::Section(_))));
        for k in to_remove {
            self.index.remove(&k);
        }
        self.maybe_commit()
    }

    pub fn has_sub_key(&self, section: &str) -> bool {
        let sec_norm = self.flags.norm_section(section);
        self.index.keys().any(|(s, _)| *s == sec_norm)
    }

    pub fn get_names(&self, section: &str, glob: Option<&str>) -> Vec<String> {
        let sec_norm = self.flags.norm_section(section);
        let mut names: Vec<String> = self
            .lines
            .iter()
            .filter_map(|l| match &l.kind {
                LineKind::Var { name, deleted, .. }
                    if !deleted && self.flags.norm_section(&l.section) == sec_norm =>
                {
                    Some(name.clone())
                }
                _ => None,
            })
            .collect();
        if let Some(glob) = glob {
            names.retain(|n| glob_match(glob, n));
        }
        names.sort();
        names.dedup();
        names
    }

    pub fn get_sub_keys(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for l in &self.lines {
            if let LineKind::Section(name) = &l.kind {
                if !name.is_empty() && seen.insert(name.clone()) {
                    out.push(name.clone());
                }
            }
        }
        out
    }

    pub fn has_name_anywhere(&self, name: &str) -> bool {
        let name_norm = self.flags.norm_key(name);
        self.index.keys().any(|(_, n)| *n == name_norm)
    }

    pub fn hold_writes(&mut self, on: bool) -> Result<()> {
        self.hold_writes = on;
        if !on {
            self.commit()
        } else {
            Ok(())
        }
    }

    fn maybe_commit(&mut self) -> Result<()> {
        if self.hold_writes {
            Ok(())
        } else {
            self.commit()
        }
    }

    fn commit(&mut self) -> Result<()> {
        let Backing::File { path, mtime } = &self.backing else {
            return Ok(());
        };
        let path = path.clone();
        let tmp = path.with_extension("tmp-upmpconfig");
        let mut text = String::new();
        self.render(&mut text);
        {
            let mut f = fs::File::create(&tmp).map_err(|e| Error::Write {
                path: tmp.clone(),
                source: e,
            })?;
            f.write_all(text.as_bytes()).map_err(|e| Error::Write {
                path: tmp.clone(),
                source: e,
            })?;
            f.sync_all().map_err(|e| Error::Write {
                path: tmp.clone(),
                source: e,
            })?;
        }
        fs::rename(&tmp, &path).map_err(|e| Error::Rename {
            tmp: tmp.clone(),
            path: path.clone(),
            source: e,
        })?;
        let new_mtime = fs::metadata(&path).ok().and_then(|m| m.modified().ok());
        *mtime = new_mtime;
        Ok(())
    }

    /// Write the document out as text, preserving order and comments.
    pub fn write(&self, out: &mut impl std::fmt::Write) -> std::fmt::Result {
        let mut buf = String::new();
        self.render(&mut buf);
        out.write_str(&buf)
    }

    fn render(&self, out: &mut String) {
        for l in &self.lines {
            match &l.kind {
                LineKind::Comment(raw) => {
                    out.push_str(raw);
                    out.push('\n');
                }
                LineKind::VarComment { raw, .. } => {
                    out.push_str(raw);
                    out.push('\n');
                }
                LineKind::Section(name) => {
                    out.push('[');
                    out.push_str(name);
                    out.push_str("]\n");
                }
                LineKind::Var {
                    name,
                    value,
                    deleted,
                } => {
                    if *deleted {
                        continue;
                    }
                    out.push_str(name);
                    out.push_str(" = ");
                    out.push_str(&line::wrap_value(value, WRAP_WIDTH));
                    out.push('\n');
                }
            }
        }
    }

    pub fn source_changed(&self) -> bool {
        match &self.backing {
            Backing::Memory => false,
            Backing::File { path, mtime } => {
                let current = fs::metadata(path).ok().and_then(|m| m.modified().ok());
                current != *mtime
            }
        }
    }

    /// Emit the XML-from-comments view: the sole protocol towards the
    /// (external) configuration GUI. See spec.md §4.1.
    pub fn comments_as_xml(&self, out: &mut impl std::io::Write) -> Result<()> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Start(BytesStart::new("confgui")))
            .map_err(Error::Xml)?;
        for l in &self.lines {
            match &l.kind {
                LineKind::Comment(raw) => {
                    let text = raw.trim_start().strip_prefix("# ").unwrap_or(raw.trim_start());
                    if text.is_empty() {
                        continue;
                    }
                    writer.write_event(Event::Text(BytesText::new(text))).map_err(Error::Xml)?;
                }
                LineKind::Section(name) => {
                    writer
                        .write_event(Event::Start(BytesStart::new("subkey")))
                        .map_err(Error::Xml)?;
                    writer.write_event(Event::Text(BytesText::new(name))).map_err(Error::Xml)?;
                    writer
                        .write_event(Event::End(BytesEnd::new("subkey")))
                        .map_err(Error::Xml)?;
                }
                LineKind::Var { name, value, deleted } if !deleted => {
                    let text = format!("{name} = {value}");
                    writer
                        .write_event(Event::Start(BytesStart::new("varsetting")))
                        .map_err(Error::Xml)?;
                    writer.write_event(Event::Text(BytesText::new(&text))).map_err(Error::Xml)?;
                    writer
                        .write_event(Event::End(BytesEnd::new("varsetting")))
                        .map_err(Error::Xml)?;
                }
                _ => {}
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new("confgui")))
            .map_err(Error::Xml)?;
        out.write_all(&writer.into_inner())
            .map_err(|e| Error::Write {
                path: PathBuf::new(),
                source: e,
            })
    }
}

/// Minimal `fnmatch`-style glob: `*` and `?` only, no character classes.
fn glob_match(glob: &str, text: &str) -> bool {
    fn helper(g: &[u8], t: &[u8]) -> bool {
        match (g.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => helper(&g[1..], t) || (!t.is_empty() && helper(g, &t[1..])),
            (Some(b'?'), Some(_)) => helper(&g[1..], &t[1..]),
            (Some(gc), Some(tc)) if gc == tc => helper(&g[1..], &t[1..]),
            _ => false,
        }
    }
    helper(glob.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_order_and_comments() {
        let input = "# leading comment\n\n[sect]\nfoo = bar\n# baz = qux\nother=1\n";
        let mut c = ConfSimple::from_string(input, Flags::NONE);
        assert_eq!(c.get("foo", "sect").as_deref(), Some("bar"));
        c.set("foo", "newval", "sect").unwrap();
        let mut out = String::new();
        c.write(&mut out).unwrap();
        assert!(out.contains("foo = newval"));
        assert!(out.contains("# leading comment"));
        assert!(out.contains("# baz = qux"));
        assert!(out.contains("other=1") || out.contains("other = 1"));
    }

    #[test]
    fn varcomment_placement_on_reintroduction() {
        let input = "[s]\n# shadow = 1\nalpha = 1\n";
        let mut c = ConfSimple::from_string(input, Flags::NONE);
        c.set("shadow", "42", "s").unwrap();
        let mut out = String::new();
        c.write(&mut out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        let comment_idx = lines.iter().position(|l| l.contains("# shadow")).unwrap();
        let var_idx = lines.iter().position(|l| l.starts_with("shadow")).unwrap();
        assert_eq!(var_idx, comment_idx + 1);
    }

    #[test]
    fn erase_then_readd_reuses_line_position() {
        let input = "[s]\nfirst = 1\nsecond = 2\nthird = 3\n";
        let mut c = ConfSimple::from_string(input, Flags::NONE);
        c.erase("second", "s").unwrap();
        assert_eq!(c.get("second", "s"), None);
        c.set("second", "22", "s").unwrap();
        let mut out = String::new();
        c.write(&mut out).unwrap();
        let lines: Vec<&str> = out.lines().filter(|l| l.contains('=')).collect();
        assert_eq!(lines, vec!["first = 1", "second = 22", "third = 3"]);
    }

    #[test]
    fn case_insensitive_keys_and_sections() {
        let input = "[Sect]\nFoo = bar\n";
        let c = ConfSimple::from_string(input, Flags::no_case());
        assert_eq!(c.get("foo", "sect").as_deref(), Some("bar"));
    }

    #[test]
    fn backslash_continuation() {
        let input = "x = one \\\ntwo\n";
        let c = ConfSimple::from_string(input, Flags::NONE);
        assert_eq!(c.get("x", "").as_deref(), Some("one two"));
    }

    #[test]
    fn names_and_subkeys() {
        let input = "[a]\nk1=1\nk2=2\n[b]\nk3=3\n";
        let c = ConfSimple::from_string(input, Flags::NONE);
        let mut names = c.get_names("a", None);
        names.sort();
        assert_eq!(names, vec!["k1", "k2"]);
        assert_eq!(c.get_sub_keys(), vec!["a", "b"]);
        assert!(c.has_name_anywhere("k3"));
        assert!(!c.has_name_anywhere("missing"));
    }

    #[test]
    fn atomic_write_on_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.ini");
        std::fs::write(&path, "a = 1\n").unwrap();
        let mut c = ConfSimple::from_file(&path, Flags::NONE);
        c.set("a", "2", "").unwrap();
        let reloaded = ConfSimple::from_file(&path, Flags::NONE);
        assert_eq!(reloaded.get("a", "").as_deref(), Some("2"));
    }
}
