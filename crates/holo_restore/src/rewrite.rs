//! Key rewrite rules between backup table ids and restored table ids.

use std::collections::{BTreeMap, HashMap};

use crate::codec::{decode_table_id, encode_table_prefix, format_key};
use crate::types::{BackupFile, TableInfo};

/// Replace `old_key_prefix` with `new_key_prefix` on matching keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewriteRule {
    pub old_key_prefix: Vec<u8>,
    pub new_key_prefix: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewriteRules {
    pub data: Vec<RewriteRule>,
}

impl RewriteRules {
    /// Build table-prefix rules for a restored table and all its partitions.
    pub fn for_created_table(old: &TableInfo, new: &TableInfo) -> anyhow::Result<Self> {
        let mut data = vec![RewriteRule {
            old_key_prefix: encode_table_prefix(old.id),
            new_key_prefix: encode_table_prefix(new.id),
        }];
        for (old_id, new_id) in partition_id_map(new, old)? {
            data.push(RewriteRule {
                old_key_prefix: encode_table_prefix(old_id),
                new_key_prefix: encode_table_prefix(new_id),
            });
        }
        Ok(Self { data })
    }

    /// First rule whose old prefix matches `key`.
    pub fn find(&self, key: &[u8]) -> Option<&RewriteRule> {
        self.data
            .iter()
            .find(|rule| key.starts_with(&rule.old_key_prefix))
    }
}

/// Map old partition ids to new partition ids by partition name.
///
/// Every partition of `old` must exist in `new`; restored tables are created
/// from the backup schema, so a missing partition means the two disagree.
pub fn partition_id_map(new: &TableInfo, old: &TableInfo) -> anyhow::Result<BTreeMap<i64, i64>> {
    let new_by_name = new
        .partitions
        .iter()
        .map(|p| (p.name.as_str(), p.id))
        .collect::<HashMap<_, _>>();
    let mut out = BTreeMap::new();
    for partition in &old.partitions {
        let Some(new_id) = new_by_name.get(partition.name.as_str()) else {
            anyhow::bail!(
                "partition {} of backup table {} ({}) missing from restored table {} ({})",
                partition.name,
                old.name,
                old.id,
                new.name,
                new.id
            );
        };
        out.insert(partition.id, *new_id);
    }
    Ok(out)
}

/// Rewrite `key` with the first matching rule.
///
/// Output:
/// - `Some(rewritten)` when a rule matched, `None` otherwise.
pub fn rewrite_key(key: &[u8], rules: &RewriteRules) -> Option<Vec<u8>> {
    let rule = rules.find(key)?;
    let suffix = &key[rule.old_key_prefix.len()..];
    let mut out = Vec::with_capacity(rule.new_key_prefix.len() + suffix.len());
    out.extend_from_slice(&rule.new_key_prefix);
    out.extend_from_slice(suffix);
    Some(out)
}

/// Check that one backup file maps onto exactly one restored table.
///
/// Errors when either key has no rule, when start and end keys land in
/// different new prefixes, or when the file's own keys name two tables.
pub fn validate_file_rewrite_rule(file: &BackupFile, rules: &RewriteRules) -> anyhow::Result<()> {
    let Some(start_rule) = rules.find(&file.start_key) else {
        tracing::error!(
            file = %file.name,
            table_id = decode_table_id(&file.start_key),
            start_key = %format_key(&file.start_key),
            "cannot find rewrite rule for file start key"
        );
        anyhow::bail!("cannot find rewrite rule for start key of file {}", file.name);
    };
    let Some(end_rule) = rules.find(&file.end_key) else {
        tracing::error!(
            file = %file.name,
            table_id = decode_table_id(&file.end_key),
            end_key = %format_key(&file.end_key),
            "cannot find rewrite rule for file end key"
        );
        anyhow::bail!("cannot find rewrite rule for end key of file {}", file.name);
    };
    if start_rule.new_key_prefix != end_rule.new_key_prefix {
        let start_table_id = decode_table_id(&start_rule.new_key_prefix);
        let end_table_id = decode_table_id(&end_rule.new_key_prefix);
        anyhow::bail!(
            "unexpected rewrite rules for file {}: start key rewrites to table {start_table_id}, end key to table {end_table_id}",
            file.name
        );
    }
    let start_id = decode_table_id(&file.start_key);
    let end_id = decode_table_id(&file.end_key);
    if start_id != end_id {
        anyhow::bail!("file {} spans tables {start_id} and {end_id}", file.name);
    }
    Ok(())
}
