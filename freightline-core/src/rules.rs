//! Rule matcher (C1): an (extension-set, name-regex) disjunction evaluated against a filename.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;

use crate::error::ConfigError;

/// Configuration-facing description of one match rule, before compilation.
#[derive(Clone, Debug)]
pub struct RuleSpec {
    /// File extensions this rule applies to (case-insensitive, leading dot optional).
    pub extensions: Vec<String>,
    /// Regular expression matched against the file's base name (without directory components).
    pub name_pattern: String,
}

struct CompiledRule {
    extensions: HashSet<String>,
    regex: Regex,
}

/// A compiled, ready-to-evaluate set of match rules.
///
/// Extensions are preprocessed into a hash set and regexes compiled exactly once, so repeated
/// calls to [`RuleSet::matches`] during a scan of thousands of files stay cheap.
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile a list of rule specs. Fails fast (this is a configuration error, not a runtime
    /// [`crate::model::Failure`]) if any pattern is not a valid regex.
    pub fn compile(specs: &[RuleSpec]) -> Result<Self, ConfigError> {
        let rules = specs
            .iter()
            .map(|spec| {
                let regex =
                    Regex::new(&spec.name_pattern).map_err(|source| ConfigError::InvalidRule {
                        pattern: spec.name_pattern.clone(),
                        source,
                    })?;
                let extensions = spec
                    .extensions
                    .iter()
                    .map(|ext| ext.trim_start_matches('.').to_lowercase())
                    .collect();
                Ok(CompiledRule { extensions, regex })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { rules })
    }

    /// A rule set that matches nothing; useful for tests.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Whether `filename` matches any rule: its extension is in that rule's extension set AND
    /// the rule's regex matches its base name. The first positive rule decides.
    pub fn matches(&self, filename: &str) -> bool {
        let base = base_name(filename);
        let Some(ext) = extension_of(filename) else {
            return false;
        };
        self.rules
            .iter()
            .any(|rule| rule.extensions.contains(&ext) && rule.regex.is_match(base))
    }
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

fn base_name(filename: &str) -> &str {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(extensions: &[&str], pattern: &str) -> RuleSpec {
        RuleSpec {
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            name_pattern: pattern.to_string(),
        }
    }

    #[test]
    fn matches_by_extension_and_name() {
        let rules = RuleSet::compile(&[rule(&["docx", "doc"], "^MeiTuan.*")]).expect("compile");
        assert!(rules.matches("MeiTuan-zip.docx"));
        assert!(!rules.matches("other.docx"));
        assert!(!rules.matches("MeiTuan-zip.pdf"));
    }

    #[test]
    fn extensions_are_case_insensitive_and_dot_optional() {
        let rules = RuleSet::compile(&[rule(&[".TXT"], "^a")]).expect("compile");
        assert!(rules.matches("a.TXT"));
        assert!(rules.matches("a.txt"));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = RuleSet::compile(&[rule(&["txt"], "(unterminated")]);
        assert!(matches!(err, Err(ConfigError::InvalidRule { .. })));
    }

    #[test]
    fn no_extension_never_matches() {
        let rules = RuleSet::compile(&[rule(&["txt"], ".*")]).expect("compile");
        assert!(!rules.matches("Makefile"));
    }
}
