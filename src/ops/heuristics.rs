//! post-diff adjustment hooks
//!
//! a heuristic runs after change detection and may annotate entries, but must
//! not touch names, kinds, addresses or versions.

use glob::Pattern;
use tracing::debug;

use crate::config::ModifierRule;
use crate::error::{Error, Result};
use crate::types::{Manifest, Modifier};

/// a named adjustment applied to a manifest after diffing
pub trait Heuristic: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, manifest: &mut Manifest);
}

/// run every heuristic in order
pub fn apply_heuristics(manifest: &mut Manifest, heuristics: &[Box<dyn Heuristic>]) {
    for heuristic in heuristics {
        heuristic.apply(manifest);
        debug!(manifest = %manifest.name, heuristic = heuristic.name(), "applied heuristic");
    }
}

/// sets entry modifiers from glob rules; the first matching rule wins
pub struct PathModifiers {
    rules: Vec<(Pattern, Modifier)>,
}

impl PathModifiers {
    pub fn new(rules: &[ModifierRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Pattern::new(&rule.pattern)
                    .map(|p| (p, rule.modifier))
                    .map_err(|e| {
                        Error::InvalidConfig(format!("bad modifier pattern {:?}: {}", rule.pattern, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    fn modifier_for(&self, name: &str) -> Option<Modifier> {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(name))
            .map(|(_, modifier)| *modifier)
    }
}

impl Heuristic for PathModifiers {
    fn name(&self) -> &str {
        "path-modifiers"
    }

    fn apply(&self, manifest: &mut Manifest) {
        for file in manifest.files.iter_mut() {
            if let Some(modifier) = self.modifier_for(&file.name) {
                file.modifier = modifier;
            }
        }
    }
}

/// build the heuristic list described by the configured rules
pub fn heuristics_from_rules(rules: &[ModifierRule]) -> Result<Vec<Box<dyn Heuristic>>> {
    if rules.is_empty() {
        return Ok(Vec::new());
    }
    let modifiers: Box<dyn Heuristic> = Box::new(PathModifiers::new(rules)?);
    Ok(vec![modifiers])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, AddressTable};
    use crate::object::{format_manifest, parse_manifest};
    use crate::types::{FileEntry, FileKind};

    fn rule(pattern: &str, modifier: Modifier) -> ModifierRule {
        ModifierRule {
            pattern: pattern.to_string(),
            modifier,
        }
    }

    fn manifest(names: &[&str]) -> Manifest {
        let mut m = Manifest::bootstrap("b", 1);
        for name in names {
            m.files
                .push(FileEntry::new(*name, FileKind::File, Address::ZERO, 1));
        }
        m
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let h = PathModifiers::new(&[
            rule("/etc/fstab", Modifier::State),
            rule("/etc/*", Modifier::Config),
            rule("/boot/*", Modifier::Boot),
        ])
        .unwrap();

        let mut m = manifest(&["/etc/fstab", "/etc/hosts", "/boot/vmlinuz", "/usr/bin/x"]);
        h.apply(&mut m);

        assert_eq!(m.get("/etc/fstab").unwrap().modifier, Modifier::State);
        assert_eq!(m.get("/etc/hosts").unwrap().modifier, Modifier::Config);
        assert_eq!(m.get("/boot/vmlinuz").unwrap().modifier, Modifier::Boot);
        assert_eq!(m.get("/usr/bin/x").unwrap().modifier, Modifier::None);
    }

    #[test]
    fn test_heuristic_does_not_touch_identity() {
        let h = PathModifiers::new(&[rule("/*", Modifier::State)]).unwrap();
        let mut m = manifest(&["/a"]);
        let before = m.files[0].clone();
        h.apply(&mut m);

        let after = &m.files[0];
        assert_eq!(after.name, before.name);
        assert_eq!(after.address, before.address);
        assert_eq!(after.version, before.version);
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let result = PathModifiers::new(&[rule("/etc/[", Modifier::Config)]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_no_rules_no_heuristics() {
        assert!(heuristics_from_rules(&[]).unwrap().is_empty());
        assert_eq!(
            heuristics_from_rules(&[rule("/etc/*", Modifier::Config)])
                .unwrap()
                .len(),
            1
        );
    }

    struct MarkRenames;

    impl Heuristic for MarkRenames {
        fn name(&self) -> &str {
            "mark-renames"
        }

        fn apply(&self, manifest: &mut Manifest) {
            for file in manifest.files.iter_mut() {
                file.rename = file.name.ends_with(".old") || file.name.ends_with(".new");
            }
        }
    }

    #[test]
    fn test_heuristic_sets_rename_flag() {
        let table = AddressTable::new();
        let mut m = manifest(&["/a.old", "/a.new", "/b"]);
        let heuristics: Vec<Box<dyn Heuristic>> = vec![Box::new(MarkRenames)];
        apply_heuristics(&mut m, &heuristics);

        let text = format_manifest(&m, &table).unwrap();
        assert!(text.contains("F..r\t"));
        let parsed = parse_manifest("b", &text, &table).unwrap();
        assert!(parsed.get("/a.old").unwrap().rename);
        assert!(parsed.get("/a.new").unwrap().rename);
        assert!(!parsed.get("/b").unwrap().rename);
    }
}
