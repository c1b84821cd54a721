// projectbackup/src/backup/export.rs
use anyhow::{Context, Result};
use serde::Serialize;

use crate::platform::{FileSlice, PlatformApi, Table};
use crate::storage::BackupWriter;
use crate::utils::exclusions::is_excluded;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub structure_only: bool,
    pub include_versions: bool,
}

/// Writes the whole project into `writer`, stopping at the first failure.
///
/// # Arguments
/// * `platform` - Source project.
/// * `writer` - Initialized backup destination.
/// * `options` - What to leave out or add.
pub async fn export_project(
    platform: &dyn PlatformApi,
    writer: &mut dyn BackupWriter,
    options: ExportOptions,
) -> Result<()> {
    tracing::info!("Exporting buckets");
    let buckets = platform.list_buckets().await.context("Failed to list buckets")?;
    put_json(writer, "buckets.json", &buckets).await?;

    tracing::info!("Exporting tables");
    let tables: Vec<Table> = platform
        .list_tables()
        .await
        .context("Failed to list tables")?
        .into_iter()
        .filter(|t| !is_excluded(&t.id))
        .collect();
    put_json(writer, "tables.json", &tables).await?;

    if !options.structure_only {
        export_table_data(platform, writer, &tables).await?;
    }

    export_configurations(platform, writer, options.include_versions).await?;
    export_permanent_files(platform, writer).await?;

    writer.finish().await.context("Failed to finalize backup")?;
    Ok(())
}

async fn export_table_data(
    platform: &dyn PlatformApi,
    writer: &mut dyn BackupWriter,
    tables: &[Table],
) -> Result<()> {
    let total = tables.len();
    for (i, table) in tables.iter().enumerate() {
        tracing::info!("Table {}/{}", i + 1, total);
        let slices = platform
            .export_table(&table.id)
            .await
            .with_context(|| format!("Failed to export table {}", table.id))?;

        for (n, slice) in slices.iter().enumerate() {
            let key = format!("{}/{}.part_{}.csv.gz", table.bucket_id(), table.name, n);
            copy_slice(platform, writer, slice, &key).await?;
        }
    }
    Ok(())
}

async fn export_configurations(
    platform: &dyn PlatformApi,
    writer: &mut dyn BackupWriter,
    include_versions: bool,
) -> Result<()> {
    tracing::info!("Exporting configurations");
    let components = platform
        .list_components()
        .await
        .context("Failed to list component configurations")?;
    put_json(writer, "configurations.json", &components).await?;

    for component in &components {
        for configuration in &component.configurations {
            let base = format!("configurations/{}/{}", component.id, configuration.id);
            put_json(writer, &format!("{}.json", base), configuration).await?;

            if include_versions {
                let versions = platform
                    .list_configuration_versions(&component.id, &configuration.id)
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to list versions of configuration {}/{}",
                            component.id, configuration.id
                        )
                    })?;
                put_json(writer, &format!("{}/versions.json", base), &versions).await?;
            }
        }
    }
    Ok(())
}

async fn export_permanent_files(platform: &dyn PlatformApi, writer: &mut dyn BackupWriter) -> Result<()> {
    tracing::info!("Exporting permanent files");
    let files = platform
        .list_permanent_files()
        .await
        .context("Failed to list files")?;
    put_json(writer, "files.json", &files).await?;

    for file in &files {
        let slices = platform
            .file_slices(file)
            .await
            .with_context(|| format!("Failed to download file {}", file.id))?;
        let key = format!("files/{}/{}", file.id, file.name);
        if let [slice] = slices.as_slice() {
            copy_slice(platform, writer, slice, &key).await?;
            continue;
        }
        for (n, slice) in slices.iter().enumerate() {
            copy_slice(platform, writer, slice, &format!("{}.part_{}", key, n)).await?;
        }
    }
    Ok(())
}

// Holds one slice in memory between fetch and upload.
async fn copy_slice(
    platform: &dyn PlatformApi,
    writer: &mut dyn BackupWriter,
    slice: &FileSlice,
    key: &str,
) -> Result<()> {
    let content = platform
        .fetch_slice(slice)
        .await
        .with_context(|| format!("Failed to download {}", key))?;
    writer
        .put_object(key, content)
        .await
        .with_context(|| format!("Failed to store {}", key))?;
    Ok(())
}

async fn put_json<T: Serialize + ?Sized>(writer: &mut dyn BackupWriter, key: &str, value: &T) -> Result<()> {
    let body = serde_json::to_vec(value).with_context(|| format!("Failed to serialize {}", key))?;
    writer
        .put_object(key, body)
        .await
        .with_context(|| format!("Failed to store {}", key))?;
    Ok(())
}
