use crate::board::FootprintId;
use crate::error::DocsError;
use log::{debug, warn};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Rules shipped with the tool, used when no `rotations.cf` is supplied.
pub const DEFAULT_RULES: &str = include_str!("../data/rotations.cf");

#[derive(Debug, Clone)]
struct RotationRule {
    pattern: String,
    regex: Regex,
    delta: i32,
}

/// Footprint-name patterns mapped to a rotation correction in degrees.
///
/// Rules keep the order in which their pattern was first read; a repeated
/// pattern updates the existing rule's delta.
#[derive(Debug, Clone, Default)]
pub struct RotationDatabase {
    rules: Vec<RotationRule>,
}

impl RotationDatabase {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self::parse(DEFAULT_RULES)
    }

    pub fn load(path: &Path) -> Result<Self, DocsError> {
        let text = std::fs::read_to_string(path)?;
        let db = Self::parse(&text);
        debug!("loaded {} rotation rules from {}", db.len(), path.display());
        Ok(db)
    }

    /// Parse `<pattern> <integer>` lines. Lines that do not have this shape
    /// are ignored; patterns that are not valid regular expressions are
    /// skipped with a warning.
    pub fn parse(text: &str) -> Self {
        static LINE: OnceLock<Regex> = OnceLock::new();
        let line_re =
            LINE.get_or_init(|| Regex::new(r"^(\S+)\s+(-?\d+)$").expect("static regex"));

        let mut db = Self::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let Some(caps) = line_re.captures(line) else {
                continue;
            };
            let pattern = &caps[1];
            let Ok(delta) = caps[2].parse::<i32>() else {
                continue;
            };
            match Regex::new(pattern) {
                Ok(regex) => db.insert(pattern, regex, delta),
                Err(e) => warn!("rotation rule on line {}: {e}", lineno + 1),
            }
        }
        db
    }

    fn insert(&mut self, pattern: &str, regex: Regex, delta: i32) {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.pattern == pattern) {
            rule.delta = delta;
        } else {
            self.rules.push(RotationRule {
                pattern: pattern.to_string(),
                regex,
                delta,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rotation correction for a footprint; the first matching rule wins.
    ///
    /// Patterns containing a library separator are matched against the
    /// library-qualified name, all others against the bare footprint name.
    pub fn lookup(&self, fpid: &FootprintId) -> f64 {
        let qualified = fpid.qualified();
        self.rules
            .iter()
            .find(|rule| {
                let subject = if rule.pattern.contains(':') {
                    qualified.as_str()
                } else {
                    fpid.name.as_str()
                };
                rule.regex.is_match(subject)
            })
            .map(|rule| f64::from(rule.delta))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_lookup() {
        let db = RotationDatabase::parse("^SOT-23 180\n^QFN- 270\n\n# comment line\n");
        assert_eq!(db.len(), 2);
        assert_eq!(db.lookup(&FootprintId::parse("Package_TO_SOT_SMD:SOT-23")), 180.0);
        assert_eq!(db.lookup(&FootprintId::parse("Package_DFN_QFN:QFN-32-1EP_5x5mm")), 270.0);
        assert_eq!(db.lookup(&FootprintId::parse("Resistor_SMD:R_0603_1608Metric")), 0.0);
    }

    #[test]
    fn test_library_qualified_patterns() {
        let db = RotationDatabase::parse("^MyLib:LED 90\n^LED 45\n");
        assert_eq!(db.lookup(&FootprintId::parse("MyLib:LED_0805")), 90.0);
        assert_eq!(db.lookup(&FootprintId::parse("OtherLib:LED_0805")), 45.0);
        // bare-name rules never see the library prefix
        let bare = RotationDatabase::parse("^MyLib 90\n");
        assert_eq!(bare.lookup(&FootprintId::parse("MyLib:LED_0805")), 0.0);
    }

    #[test]
    fn test_first_match_wins() {
        let db = RotationDatabase::parse("^SOT 90\n^SOT-23 180\n");
        assert_eq!(db.lookup(&FootprintId::parse("SOT-23")), 90.0);
    }

    #[test]
    fn test_repeated_pattern_updates_in_place() {
        let db = RotationDatabase::parse("^SOT 90\n^QFN 270\n^SOT 180\n");
        assert_eq!(db.len(), 2);
        assert_eq!(db.lookup(&FootprintId::parse("SOT-23")), 180.0);
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let db = RotationDatabase::parse("^SOT-(23 180\n^QFN 270\n");
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_builtin_rules_load() {
        let db = RotationDatabase::builtin();
        assert!(!db.is_empty());
        assert_eq!(db.lookup(&FootprintId::parse("Package_TO_SOT_SMD:SOT-223-3_TabPin2")), 180.0);
    }
}
