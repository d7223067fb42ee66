// src/metadata.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Stat, List and Delete expressed purely as bucket listings. Directories do
// not exist in the store; they are synthesized from key prefixes.

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::constants::{LIST_MAX_KEYS, PATH_DELIMITER};
use crate::error::{DriverError, Result};
use crate::object_store::FileInfo;
use crate::paths::PathMapper;
use crate::transport::{ListRequest, ObjectClient, ObjectSummary};

/// Classifies `path` as file, directory or missing from a single-entry
/// prefix listing. When that entry is a sibling sharing the prefix (`a-b`
/// for `a`), a second listing under `path/` decides between directory and
/// missing.
pub async fn stat(client: &dyn ObjectClient, paths: &PathMapper, path: &str) -> Result<FileInfo> {
    let key = paths.to_key(path);
    let children = if key.is_empty() || key.ends_with(PATH_DELIMITER) {
        key.clone()
    } else {
        format!("{}{}", key, PATH_DELIMITER)
    };

    let first = first_key(client, &key).await?;
    let Some(obj) = first else {
        return Err(DriverError::not_found(path));
    };

    if obj.key == key && key != children {
        let mod_time = DateTime::parse_from_rfc3339(&obj.last_modified)
            .with_context(|| format!("parsing LastModified {:?} of {}", obj.last_modified, key))?
            .with_timezone(&Utc);
        return Ok(FileInfo {
            path: path.to_string(),
            size: obj.size,
            mod_time: Some(mod_time),
            is_dir: false,
        });
    }

    if obj.key.starts_with(&children) || first_key(client, &children).await?.is_some() {
        return Ok(FileInfo::directory(path));
    }

    Err(DriverError::not_found(path))
}

async fn first_key(client: &dyn ObjectClient, prefix: &str) -> Result<Option<ObjectSummary>> {
    let page = client
        .list(&ListRequest {
            prefix: prefix.to_string(),
            delimiter: None,
            marker: None,
            max_keys: 1,
        })
        .await?;
    Ok(page.contents.into_iter().next())
}

/// Direct children of `path`: files in store order, then directories.
pub async fn list(client: &dyn ObjectClient, paths: &PathMapper, path: &str) -> Result<Vec<String>> {
    let mut dir = path.to_string();
    if dir != "/" && !dir.ends_with('/') {
        dir.push('/');
    }
    let prefix = paths.to_key(&dir);

    let mut files = Vec::new();
    let mut directories = Vec::new();
    let mut marker = None;
    loop {
        let page = client
            .list(&ListRequest {
                prefix: prefix.clone(),
                delimiter: Some(PATH_DELIMITER.to_string()),
                marker: marker.take(),
                max_keys: LIST_MAX_KEYS,
            })
            .await?;

        for obj in &page.contents {
            // The directory's own marker object is not a child.
            if obj.key == prefix {
                continue;
            }
            files.push(paths.from_key(&obj.key));
        }
        for cp in &page.common_prefixes {
            let trimmed = cp.strip_suffix(PATH_DELIMITER).unwrap_or(cp);
            directories.push(paths.from_key(trimmed));
        }

        if !page.is_truncated {
            break;
        }
        match page.next_marker {
            Some(next) => marker = Some(next),
            None => break,
        }
    }

    if path != "/" && files.is_empty() && directories.is_empty() {
        return Err(DriverError::not_found(path));
    }

    debug!("list {}: {} files, {} directories", path, files.len(), directories.len());
    files.extend(directories);
    Ok(files)
}

/// Removes the object at `path` and every object below `path/`. Siblings that
/// merely share the prefix (`/ab` when deleting `/a`) are left alone.
pub async fn delete(client: &dyn ObjectClient, paths: &PathMapper, path: &str) -> Result<()> {
    let key = paths.to_key(path);
    let children = format!("{}{}", key, PATH_DELIMITER);

    let mut deleted = 0usize;
    let mut marker = None;
    loop {
        let page = client
            .list(&ListRequest {
                prefix: key.clone(),
                delimiter: None,
                marker: marker.take(),
                max_keys: LIST_MAX_KEYS,
            })
            .await?;

        let batch: Vec<String> = page
            .contents
            .iter()
            .map(|o| o.key.clone())
            .filter(|k| *k == key || k.starts_with(&children))
            .collect();

        if !batch.is_empty() {
            client.delete_multi(&batch).await?;
            deleted += batch.len();
        }

        if !page.is_truncated {
            break;
        }
        match page.next_marker.or_else(|| page.contents.last().map(|o| o.key.clone())) {
            Some(next) => marker = Some(next),
            None => break,
        }
    }

    if deleted == 0 {
        return Err(DriverError::not_found(path));
    }
    info!("deleted {} object(s) under {}", deleted, path);
    Ok(())
}
