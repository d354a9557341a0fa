use std::collections::{HashMap, HashSet};

use mongodb::bson::{doc, Bson, Document};

use crate::core::error::MigrateError;

/// Record-level operations the merge needs from a collection.
///
/// The production implementation wraps a sync-driver collection; tests use an
/// in-memory double.
pub trait CollectionOps {
    fn find_all(&self) -> Result<Vec<Document>, MigrateError>;

    /// Insert one document; a duplicate primary key is a skip, not an error.
    /// Returns true when the document was actually inserted.
    fn insert_ignoring_duplicates(&self, document: &Document) -> Result<bool, MigrateError>;

    /// Apply `$set`-style `update` to every document matching `filter`;
    /// returns the matched count.
    fn update_many(&self, filter: Document, update: Document) -> Result<u64, MigrateError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub values_copied: u64,
    pub values_skipped: u64,
    pub metadata_inserted: u64,
    pub metadata_merged: u64,
    pub links_rewritten: u64,
}

/// Merge a misrouted source database pair into its destination.
///
/// Values are copied before metadata so that foreign-key rewrites always find
/// their rows in the destination. For each source metadata record whose
/// (workspace, path) pair already exists in the destination, the destination's
/// value records pointing at the source record are re-pointed at the surviving
/// destination record and the source record is dropped; unmatched records are
/// inserted as-is. Idempotent under the duplicate-key skip rule.
pub fn merge_collections(
    source_metadata: &dyn CollectionOps,
    source_values: &dyn CollectionOps,
    destination_metadata: &dyn CollectionOps,
    destination_values: &dyn CollectionOps,
    destination_label: &str,
    dry_run: bool,
) -> Result<MergeReport, MigrateError> {
    let dst_meta_docs = destination_metadata.find_all()?;
    check_destination_ready(&dst_meta_docs, destination_label)?;

    if dry_run {
        return preview(
            source_metadata,
            source_values,
            &dst_meta_docs,
            destination_values,
        );
    }

    let mut report = MergeReport::default();

    // Values first.
    for value in source_values.find_all()? {
        if destination_values.insert_ignoring_duplicates(&value)? {
            report.values_copied += 1;
        } else {
            report.values_skipped += 1;
        }
    }

    let mut by_natural_key: HashMap<(String, String), Bson> = dst_meta_docs
        .iter()
        .filter_map(|d| Some((natural_key(d)?, d.get("_id")?.clone())))
        .collect();

    for metadata in source_metadata.find_all()? {
        let src_id = match metadata.get("_id") {
            Some(id) => id.clone(),
            None => {
                // No primary key to remap against; carry the record over as-is.
                if destination_metadata.insert_ignoring_duplicates(&metadata)? {
                    report.metadata_inserted += 1;
                }
                continue;
            }
        };
        let key = natural_key(&metadata);
        let surviving = key.as_ref().and_then(|k| by_natural_key.get(k)).cloned();
        match surviving {
            Some(dst_id) => {
                report.links_rewritten += destination_values.update_many(
                    doc! { "metadataId": src_id },
                    doc! { "$set": { "metadataId": dst_id } },
                )?;
                report.metadata_merged += 1;
            }
            None => {
                if destination_metadata.insert_ignoring_duplicates(&metadata)? {
                    report.metadata_inserted += 1;
                }
                if let Some(k) = key {
                    // Later source records with the same pair merge into this one.
                    by_natural_key.insert(k, src_id);
                }
            }
        }
    }

    Ok(report)
}

/// Compute the report a real run would produce, without writing.
fn preview(
    source_metadata: &dyn CollectionOps,
    source_values: &dyn CollectionOps,
    dst_meta_docs: &[Document],
    destination_values: &dyn CollectionOps,
) -> Result<MergeReport, MigrateError> {
    let mut report = MergeReport::default();

    // Destination values as they would look after the copy phase: existing
    // rows win over incoming ones with the same primary key.
    let mut merged_values: HashMap<String, Document> = HashMap::new();
    for value in destination_values.find_all()? {
        if let Some(id) = value.get("_id") {
            merged_values.insert(id.to_string(), value);
        }
    }
    for value in source_values.find_all()? {
        let Some(id) = value.get("_id").map(Bson::to_string) else {
            continue;
        };
        if merged_values.contains_key(&id) {
            report.values_skipped += 1;
        } else {
            report.values_copied += 1;
            merged_values.insert(id, value);
        }
    }

    let mut keys: HashSet<(String, String)> =
        dst_meta_docs.iter().filter_map(natural_key).collect();
    for metadata in source_metadata.find_all()? {
        let key = natural_key(&metadata);
        match key {
            Some(k) if keys.contains(&k) => {
                report.metadata_merged += 1;
                if let Some(src_id) = metadata.get("_id") {
                    report.links_rewritten += merged_values
                        .values()
                        .filter(|v| v.get("metadataId") == Some(src_id))
                        .count() as u64;
                }
            }
            other => {
                report.metadata_inserted += 1;
                if let Some(k) = other {
                    keys.insert(k);
                }
            }
        }
    }
    Ok(report)
}

fn check_destination_ready(
    dst_meta_docs: &[Document],
    destination_label: &str,
) -> Result<(), MigrateError> {
    for d in dst_meta_docs {
        if !d.contains_key("workspace") {
            let id = d
                .get("_id")
                .map(Bson::to_string)
                .unwrap_or_else(|| "<no id>".into());
            return Err(MigrateError::DestinationNotReady(format!(
                "metadata record {id} in '{destination_label}' has no 'workspace' field; \
                 start the tag historian once so it backfills workspaces, then retry"
            )));
        }
    }
    Ok(())
}

fn natural_key(d: &Document) -> Option<(String, String)> {
    Some((d.get("workspace")?.to_string(), d.get("path")?.to_string()))
}

/// Sync-driver adapter.
pub struct MongoCollection {
    inner: mongodb::sync::Collection<Document>,
}

impl MongoCollection {
    pub fn new(inner: mongodb::sync::Collection<Document>) -> Self {
        Self { inner }
    }
}

impl CollectionOps for MongoCollection {
    fn find_all(&self) -> Result<Vec<Document>, MigrateError> {
        let cursor = self.inner.find(doc! {}).run()?;
        let mut docs = Vec::new();
        for d in cursor {
            docs.push(d?);
        }
        Ok(docs)
    }

    fn insert_ignoring_duplicates(&self, document: &Document) -> Result<bool, MigrateError> {
        match self.inner.insert_one(document.clone()).run() {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn update_many(&self, filter: Document, update: Document) -> Result<u64, MigrateError> {
        let result = self.inner.update_many(filter, update).run()?;
        Ok(result.matched_count)
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    const DUPLICATE_KEY: i32 = 11000;
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == DUPLICATE_KEY,
        _ => false,
    }
}
