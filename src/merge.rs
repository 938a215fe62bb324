//! 3-way merge for the update path
//!
//! Inputs are three package trees: `O` (the original upstream the local fork
//! was taken from), `U` (the new upstream) and `L` (the local package).
//! Resources correlate by identity; within a resource, mappings merge per
//! key, lists named in the association table merge per element key, and
//! everything else is a leaf. Where upstream and local both changed a leaf,
//! local wins and a conflict is recorded as a warning. Non-resource files
//! merge file-level with the same rules.
//!
//! The local manifest's `upstream`/`upstreamLock` never participate in the
//! merge; the update command rewrites the lock from the freshly resolved
//! commit afterwards.

use std::collections::BTreeMap;
use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::error::{KrmpackError, Result};
use crate::manifest::UpdateStrategy;
use crate::pkg::reader::{self, PackageContents, ReaderOptions, SourceDocument};
use crate::pkg::writer::{self, WriteOptions};
use crate::resource::{Resource, ResourceId};

/// One both-sides-changed leaf, resolved in local's favor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    pub resource: String,
    pub field: String,
}

impl std::fmt::Display for ConflictRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.resource, self.field)
    }
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub conflicts: Vec<ConflictRecord>,
}

/// Merge the update into `local_dir` in place.
pub fn merge_packages(
    local_dir: &Path,
    original_dir: &Path,
    updated_dir: &Path,
    strategy: UpdateStrategy,
) -> Result<MergeOutcome> {
    let options = ReaderOptions {
        include_subpackages: true,
        ..Default::default()
    };
    let original = reader::read_package(original_dir, &options)?;
    let updated = reader::read_package(updated_dir, &options)?;
    let local = reader::read_package(local_dir, &options)?;

    match strategy {
        UpdateStrategy::FastForward => {
            if local_modified(&local, &original) {
                return Err(KrmpackError::LocalChangesPreventFastForward);
            }
            take_updated(local_dir, &local, &updated)?;
            Ok(MergeOutcome::default())
        }
        UpdateStrategy::ForceDeleteReplace => {
            take_updated(local_dir, &local, &updated)?;
            Ok(MergeOutcome::default())
        }
        UpdateStrategy::ResourceMerge => resource_merge(local_dir, &original, &updated, &local),
    }
}

fn resource_merge(
    local_dir: &Path,
    original: &PackageContents,
    updated: &PackageContents,
    local: &PackageContents,
) -> Result<MergeOutcome> {
    let original_by_id = index_by_id(original);
    let updated_by_id = index_by_id(updated);
    let local_by_id = index_by_id(local);

    let mut conflicts = Vec::new();
    let mut merged: Vec<Resource> = Vec::new();

    // Local resources first, in local order.
    for resource in &local.resources {
        let id = resource.id();
        let o = original_by_id.get(&id);
        let u = updated_by_id.get(&id);
        if let Some(result) = merge_resource(o, u, Some(resource), &id, &mut conflicts) {
            merged.push(result);
        }
    }

    // Then upstream additions, in upstream order.
    for resource in &updated.resources {
        let id = resource.id();
        if local_by_id.contains_key(&id) {
            continue;
        }
        if original_by_id.contains_key(&id) {
            // Deleted locally; the deletion stands.
            continue;
        }
        merged.push(resource.clone());
    }

    preserve_local_manifest_pin(&mut merged, local);

    writer::write_package(local_dir, local, &merged, &WriteOptions::default())?;
    merge_file_units(local_dir, original, updated, local, &mut conflicts)?;

    Ok(MergeOutcome { conflicts })
}

fn merge_resource(
    original: Option<&&Resource>,
    updated: Option<&&Resource>,
    local: Option<&Resource>,
    id: &ResourceId,
    conflicts: &mut Vec<ConflictRecord>,
) -> Option<Resource> {
    let o = original.map(|r| r.body_without_location());
    let u = updated.map(|r| r.body_without_location());
    let l = local.map(|r| r.body_without_location());

    let mut ctx = MergeCtx {
        resource: id.to_string(),
        conflicts,
    };
    let body = merge_values(&mut ctx, o.as_ref(), u.as_ref(), l.as_ref(), "")?;

    let mut result = Resource::from_value(body)?;
    // Comments and location follow the local fork where it exists.
    let origin = local.or(updated.copied())?;
    result.set_comments(origin.comments().clone());
    if let Some(path) = origin.path() {
        let path = path.to_string();
        result.set_location(&path, origin.index());
    }
    Some(result)
}

struct MergeCtx<'a> {
    resource: String,
    conflicts: &'a mut Vec<ConflictRecord>,
}

fn merge_values(
    ctx: &mut MergeCtx<'_>,
    original: Option<&Value>,
    updated: Option<&Value>,
    local: Option<&Value>,
    path: &str,
) -> Option<Value> {
    if updated == original {
        return local.cloned();
    }
    if local == original {
        return updated.cloned();
    }
    if updated == local {
        return updated.cloned();
    }

    match (updated, local) {
        (Some(Value::Mapping(u)), Some(Value::Mapping(l))) => {
            let o = original.and_then(Value::as_mapping);
            Some(Value::Mapping(merge_mappings(ctx, o, u, l, path)))
        }
        (Some(Value::Sequence(u)), Some(Value::Sequence(l))) => {
            let field = path.rsplit('.').next().unwrap_or(path);
            match association_keys(field) {
                Some(keys) if keyed(u, keys) && keyed(l, keys) => {
                    let o = original.and_then(Value::as_sequence);
                    Some(Value::Sequence(merge_keyed_lists(ctx, o, u, l, path, keys)))
                }
                _ => leaf(ctx, updated, local, path),
            }
        }
        _ => leaf(ctx, updated, local, path),
    }
}

/// Both sides changed a leaf differently: local wins, conflict recorded.
fn leaf(
    ctx: &mut MergeCtx<'_>,
    _updated: Option<&Value>,
    local: Option<&Value>,
    path: &str,
) -> Option<Value> {
    ctx.conflicts.push(ConflictRecord {
        resource: ctx.resource.clone(),
        field: if path.is_empty() {
            ".".to_string()
        } else {
            path.to_string()
        },
    });
    local.cloned()
}

fn merge_mappings(
    ctx: &mut MergeCtx<'_>,
    original: Option<&Mapping>,
    updated: &Mapping,
    local: &Mapping,
    path: &str,
) -> Mapping {
    let mut result = Mapping::new();

    let child_path = |key: &Value| -> String {
        let key = key.as_str().unwrap_or("?");
        if path.is_empty() {
            key.to_string()
        } else {
            format!("{path}.{key}")
        }
    };

    // Local key order first, then upstream-only keys.
    for (key, local_value) in local {
        let merged = merge_values(
            ctx,
            original.and_then(|m| m.get(key)),
            updated.get(key),
            Some(local_value),
            &child_path(key),
        );
        if let Some(value) = merged {
            result.insert(key.clone(), value);
        }
    }
    for (key, updated_value) in updated {
        if local.contains_key(key) {
            continue;
        }
        let merged = merge_values(
            ctx,
            original.and_then(|m| m.get(key)),
            Some(updated_value),
            None,
            &child_path(key),
        );
        if let Some(value) = merged {
            result.insert(key.clone(), value);
        }
    }

    result
}

/// Fields whose sequences merge per element, and the key fields identifying
/// an element, tried in order.
fn association_keys(field: &str) -> Option<&'static [&'static str]> {
    match field {
        "containers" | "initContainers" | "ephemeralContainers" | "volumes" | "volumeMounts"
        | "env" | "envFrom" | "imagePullSecrets" => Some(&["name"]),
        "ports" => Some(&["containerPort", "port", "name"]),
        _ => None,
    }
}

fn element_key(element: &Value, keys: &[&str]) -> Option<String> {
    let mapping = element.as_mapping()?;
    for key in keys {
        if let Some(value) = mapping.get(*key) {
            return match value {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            };
        }
    }
    None
}

fn keyed(list: &[Value], keys: &[&str]) -> bool {
    !list.is_empty() && list.iter().all(|e| element_key(e, keys).is_some())
}

fn merge_keyed_lists(
    ctx: &mut MergeCtx<'_>,
    original: Option<&Vec<Value>>,
    updated: &[Value],
    local: &[Value],
    path: &str,
    keys: &[&str],
) -> Vec<Value> {
    let find = |list: Option<&[Value]>, key: &str| -> Option<Value> {
        list.and_then(|l| {
            l.iter()
                .find(|e| element_key(e, keys).as_deref() == Some(key))
                .cloned()
        })
    };
    let original = original.map(Vec::as_slice);

    let mut result = Vec::new();
    // Local element order first.
    for element in local {
        let Some(key) = element_key(element, keys) else {
            continue;
        };
        let merged = merge_values(
            ctx,
            find(original, &key).as_ref(),
            find(Some(updated), &key).as_ref(),
            Some(element),
            &format!("{path}[{key}]"),
        );
        if let Some(value) = merged {
            result.push(value);
        }
    }
    // New upstream elements appended; elements deleted locally stay deleted.
    for element in updated {
        let Some(key) = element_key(element, keys) else {
            continue;
        };
        let in_local = local
            .iter()
            .any(|e| element_key(e, keys).as_deref() == Some(key.as_str()));
        let in_original = original.is_some_and(|o| {
            o.iter()
                .any(|e| element_key(e, keys).as_deref() == Some(key.as_str()))
        });
        if !in_local && !in_original {
            result.push(element.clone());
        }
    }

    result
}

/// The local Kptfile keeps its own upstream pin through a merge.
fn preserve_local_manifest_pin(merged: &mut [Resource], local: &PackageContents) {
    for resource in merged.iter_mut().filter(|r| r.is_manifest()) {
        let path = resource.path().map(str::to_string);
        let local_manifest = local
            .resources
            .iter()
            .find(|r| r.is_manifest() && r.path().map(str::to_string) == path);
        let Some(local_manifest) = local_manifest else {
            continue;
        };
        let Some(mapping) = resource.body_mut().as_mapping_mut() else {
            continue;
        };
        for field in ["upstream", "upstreamLock"] {
            match local_manifest.body().get(field) {
                Some(value) => {
                    mapping.insert(Value::String(field.to_string()), value.clone());
                }
                None => {
                    mapping.remove(field);
                }
            }
        }
    }
}

fn index_by_id(contents: &PackageContents) -> BTreeMap<ResourceId, &Resource> {
    contents.resources.iter().map(|r| (r.id(), r)).collect()
}

/// Any local divergence from the original upstream blocks a fast-forward.
/// The manifest's own pin fields do not count: a fetched fork always carries
/// an `upstream`/`upstreamLock` the upstream copy lacks.
fn local_modified(local: &PackageContents, original: &PackageContents) -> bool {
    let local_ids = index_by_id(local);
    let original_ids = index_by_id(original);
    if local_ids.len() != original_ids.len() {
        return true;
    }
    for (id, resource) in &local_ids {
        match original_ids.get(id) {
            Some(o) if comparable_body(o) == comparable_body(resource) => {}
            _ => return true,
        }
    }
    file_units(local) != file_units(original)
}

fn comparable_body(resource: &Resource) -> Value {
    let mut body = resource.body_without_location();
    if resource.is_manifest() {
        if let Some(mapping) = body.as_mapping_mut() {
            mapping.remove("upstream");
            mapping.remove("upstreamLock");
        }
    }
    body
}

/// Replace local contents with the updated tree, keeping the manifest pin.
fn take_updated(
    local_dir: &Path,
    local: &PackageContents,
    updated: &PackageContents,
) -> Result<()> {
    let mut resources = updated.resources.clone();
    preserve_local_manifest_pin(&mut resources, local);
    writer::write_package(local_dir, local, &resources, &WriteOptions::default())?;

    let local_units = file_units(local);
    let updated_units = file_units(updated);
    for (path, data) in &updated_units {
        if local_units.get(path) != Some(data) {
            write_unit(local_dir, path, data)?;
        }
    }
    for path in local_units.keys() {
        if !updated_units.contains_key(path) {
            remove_unit(local_dir, path)?;
        }
    }
    Ok(())
}

/// Non-resource files: binary blobs plus YAML files with no KRM documents.
fn file_units(contents: &PackageContents) -> BTreeMap<String, Vec<u8>> {
    let mut units: BTreeMap<String, Vec<u8>> = contents
        .blobs
        .iter()
        .map(|b| (b.path.clone(), b.data.clone()))
        .collect();
    for (path, documents) in &contents.files {
        let all_opaque = documents
            .iter()
            .all(|d| matches!(d, SourceDocument::Opaque { .. }));
        if !all_opaque || documents.is_empty() {
            continue;
        }
        let mut text = String::new();
        for (i, document) in documents.iter().enumerate() {
            if let SourceDocument::Opaque { raw } = document {
                if i > 0 {
                    text.push_str("---\n");
                }
                text.push_str(raw);
            }
        }
        units.insert(path.clone(), text.into_bytes());
    }
    units
}

fn merge_file_units(
    local_dir: &Path,
    original: &PackageContents,
    updated: &PackageContents,
    local: &PackageContents,
    conflicts: &mut Vec<ConflictRecord>,
) -> Result<()> {
    let original_units = file_units(original);
    let updated_units = file_units(updated);
    let local_units = file_units(local);

    let mut paths: Vec<&String> = local_units.keys().chain(updated_units.keys()).collect();
    paths.sort();
    paths.dedup();

    for path in paths {
        let o = original_units.get(path);
        let u = updated_units.get(path);
        let l = local_units.get(path);

        let result = if u == o {
            l.cloned()
        } else if l == o {
            u.cloned()
        } else if u == l {
            u.cloned()
        } else {
            conflicts.push(ConflictRecord {
                resource: path.to_string(),
                field: "<file>".to_string(),
            });
            l.cloned()
        };

        match result {
            Some(data) => {
                if l != Some(&data) {
                    write_unit(local_dir, path, &data)?;
                }
            }
            None => {
                if l.is_some() {
                    remove_unit(local_dir, path)?;
                }
            }
        }
    }
    Ok(())
}

fn write_unit(dir: &Path, path: &str, data: &[u8]) -> Result<()> {
    let target = dir.join(reader::from_slash(path));
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| KrmpackError::file_write(parent, &e))?;
    }
    std::fs::write(&target, data).map_err(|e| KrmpackError::file_write(&target, &e))
}

fn remove_unit(dir: &Path, path: &str) -> Result<()> {
    let target = dir.join(reader::from_slash(path));
    if target.is_file() {
        std::fs::remove_file(&target).map_err(|e| KrmpackError::file_write(&target, &e))?;
    }
    Ok(())
}
