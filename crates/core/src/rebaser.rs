//! Reconciliation of a conflicted chain file.
//!
//! The [`Rebaser`] is pure: it reads conflict output and the migration files
//! present in the merged working copy, and produces a [`RebasePlan`] (renames
//! plus the rebuilt chain). Applying the plan is left to
//! [`MigrationDir::stage`](crate::migration_dir::MigrationDir::stage).
//!
//! Renumbering: the incoming side's new entries are moved, in their original
//! order, above the highest version that is kept. Common and base-only
//! entries never change.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chain::version::rename_with_version;
use crate::chain::{ChainFormat, EntryMatcher, IntegrityChain, SumFormat, Version, VersionScheme};
use crate::conflict::{ConflictRegion, DivergenceSet};
use crate::errors::{ChainError, RebaseError};
use crate::migration_dir::MigrationFile;

// ---------------------------------------------------------------------------
// Plan types
// ---------------------------------------------------------------------------

/// One renumbered migration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
    pub old_version: Version,
    pub new_version: Version,
    /// Content written under the new name.
    #[serde(skip)]
    pub content: Vec<u8>,
}

/// Target state of the migration directory after a rebase.
#[derive(Debug, Clone, Serialize)]
pub struct RebasePlan {
    pub renames: Vec<Rename>,
    pub chain: IntegrityChain,
    /// The chain file as it will be written.
    pub rendered: String,
}

/// Result of [`Rebaser::reconcile`].
#[derive(Debug, Clone)]
pub enum RebaseOutcome {
    /// Both sides list the same entries; nothing to change.
    NoConflict,
    Rebased(RebasePlan),
}

// ---------------------------------------------------------------------------
// Rebaser
// ---------------------------------------------------------------------------

/// Decides whether a conflicted merge can be reconciled automatically and
/// computes the reconciled directory.
#[derive(Debug, Clone)]
pub struct Rebaser<F = SumFormat> {
    chain_file: String,
    matcher: EntryMatcher,
    scheme: VersionScheme,
    rewrite_embedded: bool,
    format: F,
}

impl Rebaser<SumFormat> {
    /// `chain_file` is the chain file's path as the VCS reports conflicted
    /// paths (relative to the repository root).
    pub fn new(chain_file: impl Into<String>, matcher: EntryMatcher, scheme: VersionScheme) -> Self {
        Self {
            chain_file: normalize_path(&chain_file.into()),
            matcher,
            scheme,
            rewrite_embedded: false,
            format: SumFormat,
        }
    }
}

impl<F: ChainFormat> Rebaser<F> {
    /// Also replace the old file name inside each renamed file.
    pub fn rewrite_embedded_version(mut self, enabled: bool) -> Self {
        self.rewrite_embedded = enabled;
        self
    }

    pub fn chain_file(&self) -> &str {
        &self.chain_file
    }

    pub fn matcher(&self) -> &EntryMatcher {
        &self.matcher
    }

    pub fn format(&self) -> &F {
        &self.format
    }

    /// Abort rule: every conflicted path must be the chain file.
    pub fn check_conflicts(&self, conflicted: &[String]) -> Result<(), RebaseError> {
        if conflicted.is_empty() {
            return Err(RebaseError::NoConflictedFiles);
        }
        let others: Vec<String> = conflicted
            .iter()
            .filter(|p| normalize_path(p) != self.chain_file)
            .cloned()
            .collect();
        if !others.is_empty() {
            warn!(chain_file = %self.chain_file, paths = ?others, "conflicts outside the chain file");
            return Err(RebaseError::UnsafeConflict {
                chain_file: self.chain_file.clone(),
                paths: others,
            });
        }
        Ok(())
    }

    /// Divergence across all conflict regions of the chain file.
    ///
    /// Fails with [`ChainError::NoEntries`] when either side lists no
    /// entries at all, since nothing can then be compared.
    pub fn divergence(&self, regions: &[ConflictRegion]) -> Result<DivergenceSet, RebaseError> {
        let (base, incoming) = self.side_entries(regions)?;
        Ok(diff_sides(&base, &incoming))
    }

    /// Entries listed by each side, combined over all regions.
    fn side_entries(&self, regions: &[ConflictRegion]) -> Result<(Vec<String>, Vec<String>), RebaseError> {
        let mut base = Vec::new();
        let mut incoming = Vec::new();
        for region in regions {
            base.extend(self.matcher.list_entries(&region.base));
            incoming.extend(self.matcher.list_entries(&region.incoming));
        }
        if base.is_empty() {
            return Err(ChainError::NoEntries { side: "base".into() }.into());
        }
        if incoming.is_empty() {
            return Err(ChainError::NoEntries {
                side: "incoming".into(),
            }
            .into());
        }
        Ok((base, incoming))
    }

    /// Renumber the incoming side's new entries and rebuild the chain.
    ///
    /// `files` are all migration files in the merged working copy.
    pub fn plan(&self, divergence: &DivergenceSet, files: &[MigrationFile]) -> Result<RebasePlan, RebaseError> {
        ensure_on_disk(divergence.base_only.iter().chain(&divergence.incoming_only), files)?;
        let by_name: HashMap<&str, &MigrationFile> =
            files.iter().map(|f| (f.name.as_str(), f)).collect();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut incoming: Vec<&MigrationFile> = Vec::new();
        for name in &divergence.incoming_only {
            if seen.insert(name.as_str()) {
                if let Some(file) = by_name.get(name.as_str()) {
                    incoming.push(*file);
                }
            }
        }

        let mut target: Vec<(String, Vec<u8>)> = files
            .iter()
            .filter(|f| !seen.contains(f.name.as_str()))
            .map(|f| (f.name.clone(), f.content.clone()))
            .collect();
        let floor = files
            .iter()
            .filter(|f| !seen.contains(f.name.as_str()))
            .map(|f| &f.version)
            .max();

        let mut renames = Vec::new();
        match floor {
            Some(floor) => {
                let versions = self.scheme.sequence_after(floor, incoming.len())?;
                for (file, new_version) in incoming.into_iter().zip(versions) {
                    let to = rename_with_version(&file.name, &new_version);
                    let content = if self.rewrite_embedded {
                        rewrite_embedded(&file.content, &file.name, &to)
                    } else {
                        file.content.clone()
                    };
                    if to != file.name || content != file.content {
                        debug!(from = %file.name, to = %to, "renumbered migration");
                        renames.push(Rename {
                            from: file.name.clone(),
                            to: to.clone(),
                            old_version: file.version.clone(),
                            new_version,
                            content: content.clone(),
                        });
                    }
                    target.push((to, content));
                }
            }
            None => {
                // Nothing is kept, so the incoming entries keep their versions.
                target.extend(incoming.into_iter().map(|f| (f.name.clone(), f.content.clone())));
            }
        }

        target.sort_by(|a, b| {
            Version::from_file_name(&a.0)
                .cmp(&Version::from_file_name(&b.0))
                .then_with(|| a.0.cmp(&b.0))
        });
        let pairs: Vec<(&str, &[u8])> = target
            .iter()
            .map(|(name, content)| (name.as_str(), content.as_slice()))
            .collect();
        let chain = self.format.hash(&pairs);
        chain.validate()?;
        let rendered = self.format.render(&chain);

        info!(
            renames = renames.len(),
            entries = chain.len(),
            "planned migration rebase"
        );
        Ok(RebasePlan {
            renames,
            chain,
            rendered,
        })
    }

    /// Full decision for one conflicted merge: abort rule, divergence,
    /// no-op rule, then the plan.
    pub fn reconcile(
        &self,
        conflicted: &[String],
        regions: &[ConflictRegion],
        files: &[MigrationFile],
    ) -> Result<RebaseOutcome, RebaseError> {
        self.check_conflicts(conflicted)?;
        if regions.is_empty() {
            return Err(RebaseError::NoConflictRegions {
                path: self.chain_file.clone(),
            });
        }
        let (base, incoming) = self.side_entries(regions)?;
        let divergence = diff_sides(&base, &incoming);
        if divergence.is_empty() {
            info!("chain file sides list the same entries");
            return Ok(RebaseOutcome::NoConflict);
        }
        // Common entries are rebuilt from disk too.
        ensure_on_disk(base.iter().chain(&incoming), files)?;
        Ok(RebaseOutcome::Rebased(self.plan(&divergence, files)?))
    }
}

fn diff_sides(base: &[String], incoming: &[String]) -> DivergenceSet {
    let div = DivergenceSet::diff(base, incoming);
    debug!(
        base_only = div.base_only.len(),
        incoming_only = div.incoming_only.len(),
        "computed divergence"
    );
    div
}

/// Every chain entry in `names` must be a file of the directory.
fn ensure_on_disk<'a>(
    names: impl Iterator<Item = &'a String>,
    files: &[MigrationFile],
) -> Result<(), RebaseError> {
    let present: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
    for name in names {
        if !present.contains(name.as_str()) {
            return Err(RebaseError::MissingMigration { name: name.clone() });
        }
    }
    Ok(())
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches("./").to_string()
}

/// Replace `from` with `to` in UTF-8 content; binary content is kept as is.
fn rewrite_embedded(content: &[u8], from: &str, to: &str) -> Vec<u8> {
    match std::str::from_utf8(content) {
        Ok(text) if text.contains(from) => text.replace(from, to).into_bytes(),
        _ => content.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::EntryPattern;

    const V1: &str = "20250309093454_init.sql";
    const V2: &str = "20250309093929_test.sql";
    const V3: &str = "20250309093833_second.sql";

    fn rebaser() -> Rebaser {
        Rebaser::new(
            "migrations/atlas.sum",
            EntryMatcher::from_pattern(EntryPattern::Timestamped).unwrap(),
            VersionScheme::Timestamp,
        )
    }

    fn chain_text(names: &[&str]) -> String {
        let mut out = String::from("h1:GplzCB5bzYwaRyf6zllMDN5xUpp139MxS/9lPRBbXwg=\n");
        for name in names {
            out.push_str(&format!("{} h1:h6tXd1Vw2kLh4cFBbqYE2aU2Y4YWe9jsMNlTbWbC8sc=\n", name));
        }
        out
    }

    fn region(base: &[&str], incoming: &[&str]) -> ConflictRegion {
        ConflictRegion {
            base: chain_text(base),
            incoming: chain_text(incoming),
        }
    }

    fn file(name: &str) -> MigrationFile {
        MigrationFile::new(name, format!("-- {}\nSELECT 1;\n", name))
    }

    fn conflicted() -> Vec<String> {
        vec!["migrations/atlas.sum".to_string()]
    }

    fn expect_plan(outcome: RebaseOutcome) -> RebasePlan {
        match outcome {
            RebaseOutcome::Rebased(plan) => plan,
            RebaseOutcome::NoConflict => panic!("expected a rebase plan"),
        }
    }

    #[test]
    fn test_one_new_file_each_side() {
        let files = vec![file(V1), file(V3), file(V2)];
        let outcome = rebaser()
            .reconcile(&conflicted(), &[region(&[V1, V2], &[V1, V3])], &files)
            .unwrap();
        let plan = expect_plan(outcome);

        assert_eq!(plan.renames.len(), 1);
        assert_eq!(plan.renames[0].from, V3);
        assert_eq!(plan.renames[0].to, "20250309093930_second.sql");
        assert!(plan.renames[0].new_version > Version::from_file_name(V2));
        assert_eq!(
            plan.chain.filenames(),
            vec![V1, V2, "20250309093930_second.sql"]
        );

        let expected = SumFormat.hash(&[
            (V1, files[0].content.as_slice()),
            (V2, files[2].content.as_slice()),
            ("20250309093930_second.sql", files[1].content.as_slice()),
        ]);
        assert_eq!(plan.chain, expected);
        assert_eq!(plan.rendered, SumFormat.render(&expected));
    }

    #[test]
    fn test_identical_sides_is_no_conflict() {
        let files = vec![file(V1), file(V2)];
        let outcome = rebaser()
            .reconcile(&conflicted(), &[region(&[V1, V2], &[V1, V2])], &files)
            .unwrap();
        assert!(matches!(outcome, RebaseOutcome::NoConflict));
    }

    #[test]
    fn test_other_conflicted_file_aborts() {
        let files = vec![file(V1), file(V2), file(V3)];
        let paths = vec!["migrations/atlas.sum".to_string(), "README.md".to_string()];
        let err = rebaser()
            .reconcile(&paths, &[region(&[V1, V2], &[V1, V3])], &files)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "conflict found in files other than migrations/atlas.sum"
        );
        match err {
            RebaseError::UnsafeConflict { paths, .. } => assert_eq!(paths, vec!["README.md"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_conflicted_paths() {
        let err = rebaser().check_conflicts(&[]).unwrap_err();
        assert!(matches!(err, RebaseError::NoConflictedFiles));
    }

    #[test]
    fn test_chain_path_normalized() {
        let paths = vec!["./migrations/atlas.sum".to_string()];
        assert!(rebaser().check_conflicts(&paths).is_ok());
    }

    #[test]
    fn test_no_regions_is_an_error() {
        let err = rebaser().reconcile(&conflicted(), &[], &[]).unwrap_err();
        assert!(matches!(err, RebaseError::NoConflictRegions { .. }));
    }

    #[test]
    fn test_header_only_side_is_parse_error() {
        let regions = vec![ConflictRegion {
            base: "h1:abc=".into(),
            incoming: chain_text(&[V1]),
        }];
        let err = rebaser().divergence(&regions).unwrap_err();
        assert!(matches!(
            err,
            RebaseError::Chain(ChainError::NoEntries { ref side }) if side == "base"
        ));
        assert!(err.to_string().contains("no chain entries found"));
    }

    #[test]
    fn test_incoming_order_preserved_and_monotonic() {
        let a = "20250309090000_a.sql";
        let b = "20250309090100_b.sql";
        let c = "20250309090200_c.sql";
        let base_new = "20250310000000_base.sql";
        let files = vec![file(V1), file(a), file(b), file(c), file(base_new)];

        let plan = expect_plan(
            rebaser()
                .reconcile(&conflicted(), &[region(&[V1, base_new], &[V1, a, b, c])], &files)
                .unwrap(),
        );
        let to: Vec<&str> = plan.renames.iter().map(|r| r.to.as_str()).collect();
        assert_eq!(
            to,
            vec![
                "20250310000001_a.sql",
                "20250310000002_b.sql",
                "20250310000003_c.sql"
            ]
        );
        for pair in plan.chain.entries().windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
        assert!(plan.chain.validate().is_ok());
    }

    #[test]
    fn test_second_run_is_no_conflict() {
        let files = vec![file(V1), file(V3), file(V2)];
        let r = rebaser();
        let plan = expect_plan(
            r.reconcile(&conflicted(), &[region(&[V1, V2], &[V1, V3])], &files)
                .unwrap(),
        );

        let rebased = ConflictRegion {
            base: plan.rendered.clone(),
            incoming: plan.rendered.clone(),
        };
        let outcome = r.reconcile(&conflicted(), &[rebased], &files).unwrap();
        assert!(matches!(outcome, RebaseOutcome::NoConflict));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let files = vec![file(V1), file(V3), file(V2)];
        let div = DivergenceSet::diff(
            &[V1.to_string(), V2.to_string()],
            &[V1.to_string(), V3.to_string()],
        );
        let first = rebaser().plan(&div, &files).unwrap();
        let second = rebaser().plan(&div, &files).unwrap();
        assert_eq!(first.renames, second.renames);
        assert_eq!(first.rendered, second.rendered);
    }

    #[test]
    fn test_missing_migration_file() {
        let files = vec![file(V1), file(V2)];
        let err = rebaser()
            .reconcile(&conflicted(), &[region(&[V1, V2], &[V1, V3])], &files)
            .unwrap_err();
        assert!(matches!(err, RebaseError::MissingMigration { ref name } if name == V3));
    }

    #[test]
    fn test_missing_common_migration_file() {
        let files = vec![file(V2), file(V3)];
        let err = rebaser()
            .reconcile(&conflicted(), &[region(&[V1, V2], &[V1, V3])], &files)
            .unwrap_err();
        assert!(matches!(err, RebaseError::MissingMigration { ref name } if name == V1));
    }

    #[test]
    fn test_numeric_scheme_with_any_sql_pattern() {
        let r = Rebaser::new(
            "atlas.sum",
            EntryMatcher::from_pattern(EntryPattern::AnySql).unwrap(),
            VersionScheme::Numeric,
        );
        let files = vec![file("001_a.sql"), file("002_b.sql"), file("002_c.sql")];
        let regions = vec![ConflictRegion {
            base: chain_text(&["001_a.sql", "002_b.sql"]),
            incoming: chain_text(&["001_a.sql", "002_c.sql"]),
        }];
        let plan = expect_plan(
            r.reconcile(&["atlas.sum".to_string()], &regions, &files)
                .unwrap(),
        );
        assert_eq!(plan.renames[0].to, "003_c.sql");
    }

    #[test]
    fn test_numeric_overflow() {
        let r = Rebaser::new(
            "atlas.sum",
            EntryMatcher::from_pattern(EntryPattern::AnySql).unwrap(),
            VersionScheme::Numeric,
        );
        let files = vec![file("1_a.sql"), file("9_z.sql"), file("5_b.sql")];
        let div = DivergenceSet::diff(
            &["1_a.sql".to_string(), "9_z.sql".to_string()],
            &["1_a.sql".to_string(), "5_b.sql".to_string()],
        );
        let err = r.plan(&div, &files).unwrap_err();
        assert!(matches!(
            err,
            RebaseError::Chain(ChainError::VersionOverflow { width: 1, .. })
        ));
    }

    #[test]
    fn test_rewrite_embedded_file_name() {
        let files = vec![file(V1), file(V3), file(V2)];
        let div = DivergenceSet::diff(
            &[V1.to_string(), V2.to_string()],
            &[V1.to_string(), V3.to_string()],
        );
        let plan = rebaser()
            .rewrite_embedded_version(true)
            .plan(&div, &files)
            .unwrap();
        let content = String::from_utf8(plan.renames[0].content.clone()).unwrap();
        assert_eq!(content, "-- 20250309093930_second.sql\nSELECT 1;\n");
    }

    #[test]
    fn test_base_only_without_incoming_only() {
        let files = vec![file(V1), file(V2)];
        let plan = expect_plan(
            rebaser()
                .reconcile(&conflicted(), &[region(&[V1, V2], &[V1])], &files)
                .unwrap(),
        );
        assert!(plan.renames.is_empty());
        assert_eq!(plan.chain.filenames(), vec![V1, V2]);
    }
}
