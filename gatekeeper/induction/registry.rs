use serde::{Deserialize, Serialize};

use crate::catalog::RuleCatalog;
use crate::model::ActionKind;
use crate::rule::{Rule, RuleError, RuleOrigin};

/// Ordered rule collection with unique names.
#[derive(Debug, Clone, Default)]
pub struct RuleLibrary {
    rules: Vec<Rule>,
}

impl RuleLibrary {
    /// Empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a library; a later rule replaces an earlier one with the same name in place.
    #[must_use]
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut library = Self::new();
        for rule in rules {
            match library.rules.iter().position(|r| r.name() == rule.name()) {
                Some(idx) => library.rules[idx] = rule,
                None => library.rules.push(rule),
            }
        }
        library
    }

    /// Rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rule names in evaluation order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.rules.iter().map(|rule| rule.name().to_string()).collect()
    }

    /// Rule by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name() == name)
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the library is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Merges `new` into this library, see [`merge`].
    #[must_use]
    pub fn merge(&self, new: &[Rule]) -> Self {
        merge(&self.rules, new)
    }

    /// Persistable form of the library.
    #[must_use]
    pub fn manifest(&self) -> LibraryManifest {
        LibraryManifest {
            rules: self
                .rules
                .iter()
                .map(|rule| ManifestEntry {
                    name: rule.name().to_string(),
                    action: rule.action_kind().clone(),
                    origin: rule.origin(),
                    definition: rule.definition().to_string(),
                })
                .collect(),
        }
    }

    /// Persistable form with `retained` entries appended, except those whose
    /// name the library now defines itself.
    #[must_use]
    pub fn manifest_retaining(&self, retained: &[ManifestEntry]) -> LibraryManifest {
        let mut manifest = self.manifest();
        manifest.rules.extend(
            retained
                .iter()
                .filter(|entry| self.get(&entry.name).is_none())
                .cloned(),
        );
        manifest
    }
}

/// Existing rules whose names do not appear in `new`, followed by `new` in its order.
///
/// Merging the same `new` twice yields the same library as merging it once.
#[must_use]
pub fn merge(existing: &[Rule], new: &[Rule]) -> RuleLibrary {
    let kept = existing
        .iter()
        .filter(|rule| !new.iter().any(|incoming| incoming.name() == rule.name()))
        .cloned();
    RuleLibrary::from_rules(kept.chain(new.iter().cloned()))
}

/// One persisted rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Rule name.
    pub name: String,
    /// Governed action kind.
    pub action: ActionKind,
    /// Definition origin.
    pub origin: RuleOrigin,
    /// Catalog name or declarative spec text.
    pub definition: String,
}

/// Human-readable, re-loadable library listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryManifest {
    /// Entries in evaluation order.
    pub rules: Vec<ManifestEntry>,
}

/// Library rebuilt from a manifest, plus the entries that were not admitted.
#[derive(Debug, Clone, Default)]
pub struct LoadedLibrary {
    /// Admitted rules in manifest order.
    pub library: RuleLibrary,
    /// Entries that failed to resolve, with the reason.
    pub rejected: Vec<(String, RuleError)>,
    /// The refused entries verbatim, so a later save can write them back.
    pub unresolved: Vec<ManifestEntry>,
}

impl LibraryManifest {
    /// Resolves every entry against the catalog. Bad entries are skipped and
    /// reported, and kept in `unresolved` untouched.
    #[must_use]
    pub fn load(&self, catalog: &RuleCatalog) -> LoadedLibrary {
        let mut admitted = Vec::with_capacity(self.rules.len());
        let mut rejected = Vec::new();
        let mut unresolved = Vec::new();
        for entry in &self.rules {
            let loaded = catalog
                .load(&entry.name, entry.origin, &entry.definition)
                .and_then(|rule| {
                    if rule.action_kind() == &entry.action {
                        Ok(rule)
                    } else {
                        Err(RuleError::MalformedDefinition {
                            name: entry.name.clone(),
                            reason: format!(
                                "manifest says `{}` but definition governs `{}`",
                                entry.action,
                                rule.action_kind()
                            ),
                        })
                    }
                });
            match loaded {
                Ok(rule) => admitted.push(rule),
                Err(err) => {
                    tracing::warn!(rule = %entry.name, error = %err, "library entry not admitted");
                    rejected.push((entry.name.clone(), err));
                    unresolved.push(entry.clone());
                }
            }
        }
        LoadedLibrary {
            library: RuleLibrary::from_rules(admitted),
            rejected,
            unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::standard_specs;
    use crate::rule::Verdict;

    fn named(name: &str, explanation: &'static str) -> Rule {
        Rule::new(name, ActionKind::Open, RuleOrigin::Catalog, name, move |_, _, _| {
            Ok(Verdict::pass(explanation))
        })
    }

    #[test]
    fn merge_replaces_by_name_and_appends() {
        let existing = vec![named("A", "old a"), named("B", "b"), named("C", "c")];
        let new = vec![named("C", "new c"), named("A", "new a"), named("D", "d")];
        let merged = merge(&existing, &new);
        assert_eq!(merged.names(), vec!["B", "C", "A", "D"]);
        let again = merged.merge(&new);
        assert_eq!(again.names(), merged.names());
    }

    #[test]
    fn merge_with_empty_sides() {
        let existing = vec![named("A", "a")];
        assert_eq!(merge(&existing, &[]).names(), vec!["A"]);
        assert_eq!(merge(&[], &existing).names(), vec!["A"]);
        assert!(merge(&[], &[]).is_empty());
    }

    #[test]
    fn manifest_round_trips_through_catalog() {
        let catalog = RuleCatalog::builtin();
        let mut rules = vec![catalog.resolve("goto_requires_new_reachable_target").unwrap()];
        rules.extend(standard_specs().iter().take(2).map(|spec| spec.compile().unwrap()));
        let library = RuleLibrary::from_rules(rules);

        let json = serde_json::to_string(&library.manifest()).unwrap();
        let manifest: LibraryManifest = serde_json::from_str(&json).unwrap();
        let loaded = manifest.load(&catalog);
        assert!(loaded.rejected.is_empty());
        assert_eq!(loaded.library.names(), library.names());
        assert_eq!(loaded.library.manifest(), library.manifest());
    }

    #[test]
    fn bad_entries_are_not_admitted() {
        let catalog = RuleCatalog::builtin();
        let good = catalog.resolve("take_requires_visible_object").unwrap();
        let mut manifest = RuleLibrary::from_rules([good]).manifest();
        manifest.rules.push(ManifestEntry {
            name: "vanished".into(),
            action: ActionKind::Goto,
            origin: RuleOrigin::Catalog,
            definition: "vanished".into(),
        });
        manifest.rules.push(ManifestEntry {
            name: "garbled".into(),
            action: ActionKind::Open,
            origin: RuleOrigin::Declarative,
            definition: "this is = not [ toml".into(),
        });
        manifest.rules.push(ManifestEntry {
            name: "take_requires_visible_object".into(),
            action: ActionKind::Put,
            origin: RuleOrigin::Catalog,
            definition: "take_requires_visible_object".into(),
        });
        let loaded = manifest.load(&catalog);
        assert_eq!(loaded.library.names(), vec!["take_requires_visible_object"]);
        let names: Vec<_> = loaded.rejected.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec!["vanished", "garbled", "take_requires_visible_object"]
        );
        assert_eq!(loaded.unresolved.len(), 3);
        assert_eq!(loaded.unresolved[1], manifest.rules[2]);

        let rewritten = loaded.library.manifest_retaining(&loaded.unresolved);
        let names: Vec<_> = rewritten.rules.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["take_requires_visible_object", "vanished", "garbled"]
        );
        assert_eq!(rewritten.rules[0].action, ActionKind::Take);
    }
}
