//! StorageClass, VolumeSnapshotClass and CDI StorageProfile lookups.

use k8s_openapi::serde_json::Value;
use kube::api::{DynamicObject, GroupVersionKind, ListParams};
use kube::ResourceExt;

use super::connector::K8sConnector;
use crate::error::{Error, Result};

pub const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";
pub const DEFAULT_VIRT_CLASS_ANNOTATION: &str = "storageclass.kubevirt.io/is-default-virt-class";

fn volume_snapshot_class_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("snapshot.storage.k8s.io", "v1", "VolumeSnapshotClass")
}

fn storage_profile_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("cdi.kubevirt.io", "v1beta1", "StorageProfile")
}

pub async fn storage_class_exists<C: K8sConnector + ?Sized>(connector: &C, name: &str) -> Result<bool> {
    Ok(connector.get_storage_class(name).await?.is_some())
}

/// Name of the cluster default class. With `prefer_virt` the KubeVirt default
/// wins when one is annotated.
#[tracing::instrument(skip(connector))]
pub async fn default_storage_class_name<C: K8sConnector + ?Sized>(
    connector: &C,
    prefer_virt: bool,
) -> Result<String> {
    let classes = connector.list_storage_classes().await?;
    let annotated = |key: &str| {
        classes
            .iter()
            .filter(|sc| sc.annotations().get(key).map(String::as_str) == Some("true"))
            .map(|sc| sc.name_any())
            .last()
    };

    let virt = prefer_virt.then(|| annotated(DEFAULT_VIRT_CLASS_ANNOTATION)).flatten();
    virt.or_else(|| annotated(DEFAULT_CLASS_ANNOTATION))
        .ok_or_else(|| Error::Backend("no default StorageClass was set".to_string()))
}

pub async fn supports_volume_expansion<C: K8sConnector + ?Sized>(connector: &C, name: &str) -> Result<bool> {
    let sc = connector
        .get_storage_class(name)
        .await?
        .ok_or_else(|| Error::Backend(format!("StorageClass {name} not found")))?;
    Ok(sc.allow_volume_expansion.unwrap_or(false))
}

/// Validates an explicit name, or falls back to the default class.
pub async fn storage_class_name<C: K8sConnector + ?Sized>(
    connector: &C,
    name: &str,
    prefer_virt: bool,
) -> Result<String> {
    if name.is_empty() {
        return default_storage_class_name(connector, prefer_virt).await;
    }
    if storage_class_exists(connector, name).await? {
        Ok(name.to_string())
    } else {
        Err(Error::Backend(format!("StorageClass {name} not found")))
    }
}

pub async fn provisioner<C: K8sConnector + ?Sized>(connector: &C, name: &str) -> Result<String> {
    connector
        .get_storage_class(name)
        .await?
        .map(|sc| sc.provisioner)
        .ok_or_else(|| Error::Backend(format!("StorageClass {name} not found")))
}

/// First VolumeSnapshotClass whose driver matches `provisioner`.
pub async fn volume_snapshot_class_for_provisioner<C: K8sConnector + ?Sized>(
    connector: &C,
    provisioner: &str,
) -> Result<Option<String>> {
    let classes = connector
        .list_dynamic(&volume_snapshot_class_gvk(), None, &ListParams::default())
        .await?;
    Ok(classes
        .iter()
        .find(|vsc| vsc.data.get("driver").and_then(Value::as_str) == Some(provisioner))
        .map(|vsc| vsc.name_any()))
}

pub async fn volume_snapshot_class_for_storage_class<C: K8sConnector + ?Sized>(
    connector: &C,
    storage_class: &str,
) -> Result<Option<String>> {
    let provisioner = provisioner(connector, storage_class).await?;
    volume_snapshot_class_for_provisioner(connector, &provisioner).await
}

pub async fn storage_profile<C: K8sConnector + ?Sized>(
    connector: &C,
    storage_class: &str,
) -> Result<DynamicObject> {
    connector
        .get_dynamic(&storage_profile_gvk(), None, storage_class)
        .await?
        .ok_or_else(|| Error::Backend(format!("StorageProfile {storage_class} not found")))
}

/// `status.dataImportCronSourceFormat` of the class's StorageProfile.
pub async fn data_import_cron_source_format<C: K8sConnector + ?Sized>(
    connector: &C,
    storage_class: &str,
) -> Result<String> {
    let profile = storage_profile(connector, storage_class).await?;
    let status = profile.data.get("status").ok_or_else(|| {
        Error::Backend("StorageProfile object does not have a status field".to_string())
    })?;
    status
        .get("dataImportCronSourceFormat")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Backend(
                "status field of StorageProfile object does not have a dataImportCronSourceFormat field"
                    .to_string(),
            )
        })
}
