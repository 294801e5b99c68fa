//! The stored program: a `line_number -> source_text` mapping, ordered
//! ascending, with a textual load/save format of `<line_number>
//! <source_text>` records, one per line.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LINE_RE: Regex = Regex::new(r"^\s*(\d+)\s?(.*)$").unwrap();
}

#[derive(Debug, Clone, Default)]
pub struct StoredProgram {
    lines: BTreeMap<u32, String>,
}

impl StoredProgram {
    pub fn new() -> StoredProgram {
        StoredProgram::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.lines.iter().map(|(&n, s)| (n, s.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, line: u32) -> Option<&str> {
        self.lines.get(&line).map(|s| s.as_str())
    }

    /// An empty source text deletes the line; otherwise sets or
    /// replaces it.
    pub fn set_line(&mut self, line: u32, source: &str) {
        if source.trim().is_empty() {
            self.lines.remove(&line);
        } else {
            self.lines.insert(line, source.to_string());
        }
    }

    pub fn delete_line(&mut self, line: u32) {
        self.lines.remove(&line);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Parses the textual `<line_number> <source_text>` format,
    /// ignoring blank lines.
    pub fn parse(text: &str) -> StoredProgram {
        let mut program = StoredProgram::new();
        for raw in text.lines() {
            if raw.trim().is_empty() {
                continue;
            }
            if let Some(caps) = LINE_RE.captures(raw) {
                if let Ok(num) = caps[1].parse::<u32>() {
                    program.set_line(num, &caps[2]);
                }
            }
        }
        program
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (num, src) in &self.lines {
            out.push_str(&num.to_string());
            out.push(' ');
            out.push_str(src);
            out.push('\n');
        }
        out
    }

    pub fn load(path: &Path) -> io::Result<StoredProgram> {
        let text = fs::read_to_string(path)?;
        Ok(StoredProgram::parse(&text))
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orders_ascending() {
        let p = StoredProgram::parse("20 PRINT 2\n10 PRINT 1\n");
        let lines: Vec<u32> = p.iter().map(|(n, _)| n).collect();
        assert_eq!(lines, vec![10, 20]);
    }

    #[test]
    fn test_parse_ignores_blank_lines() {
        let p = StoredProgram::parse("10 PRINT 1\n\n20 PRINT 2\n");
        assert_eq!(p.iter().count(), 2);
    }

    #[test]
    fn test_set_line_empty_source_deletes() {
        let mut p = StoredProgram::new();
        p.set_line(10, "PRINT 1");
        p.set_line(10, "");
        assert_eq!(p.get(10), None);
    }

    #[test]
    fn test_round_trip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.bas");
        let mut p = StoredProgram::new();
        p.set_line(10, "A = 3 : B = 4");
        p.set_line(20, "PRINT A + B");
        p.save(&path).unwrap();
        let loaded = StoredProgram::load(&path).unwrap();
        assert_eq!(loaded.get(10), Some("A = 3 : B = 4"));
        assert_eq!(loaded.get(20), Some("PRINT A + B"));
    }
}
