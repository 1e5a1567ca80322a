//! Recovery from records left behind by earlier launches and app versions

mod common;

use common::TestDevice;
use docsync_storage::{FileKeyValueStore, KeyValueStore};
use docsync_uploads::{
    DispatchOutcome, InvoiceOwner, InvoiceProfile, ProgressStage, CURRENT_SCHEMA_VERSION,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_legacy_records_are_migrated_and_finished() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    Mock::given(method("POST"))
        .and(path("/invoice/"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&device.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/bucket/fresh.jpg"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&device.server)
        .await;

    let uploaded = device.capture("uploaded.jpg", b"uploaded")?;
    let signed = device.capture("fresh.jpg", b"signed only")?;

    // Records as the previous app version wrote them
    let kv = FileKeyValueStore::open(device.store_dir()).await?;
    kv.set(
        &uploaded,
        json!({
            "image": uploaded,
            "takenAt": 1_556_704_800_000i64,
            "restaurant": {"id": 12, "name": "Bistro"},
            "signedUrl": {"put_request": "https://s3/unused", "url": "https://cdn/uploaded.jpg", "upload_id": 5},
            "isUploaded": true
        })
        .to_string(),
    )
    .await?;
    kv.set(
        &signed,
        json!({
            "image": signed,
            "restaurant": {"id": "12"},
            "signedUrl": {
                "put_request": format!("{}/bucket/fresh.jpg", device.server.uri()),
                "url": "https://cdn/fresh.jpg",
                "upload_id": 6
            }
        })
        .to_string(),
    )
    .await?;
    kv.set(
        InvoiceProfile::INDEX_KEY,
        json!([uploaded, signed]).to_string(),
    )
    .await?;
    drop(kv);

    let invoices = device.invoices().await?;
    let outcomes = invoices.resume().await?;
    assert_eq!(
        outcomes,
        vec![
            (uploaded.clone(), DispatchOutcome::Completed),
            (signed.clone(), DispatchOutcome::Completed),
        ]
    );

    assert!(device.requests("GET", "/invoice/s3sign/").await.is_empty());
    assert_eq!(device.requests("PUT", "/bucket/fresh.jpg").await.len(), 1);

    let mut registered: Vec<Value> = device
        .requests("POST", "/invoice/")
        .await
        .iter()
        .map(|r| serde_json::from_slice(&r.body))
        .collect::<Result<_, _>>()?;
    registered.sort_by_key(|body| body["upload_id"].as_i64());
    assert_eq!(registered[0]["image"], "https://cdn/uploaded.jpg");
    assert_eq!(registered[1]["image"], "https://cdn/fresh.jpg");
    assert_eq!(registered[1]["restaurant"], 12);
    Ok(())
}

#[tokio::test]
async fn test_migrated_record_is_rewritten_with_schema_version() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    let image = device.capture("a.jpg", b"a")?;

    let kv = FileKeyValueStore::open(device.store_dir()).await?;
    kv.set(
        &image,
        json!({"image": image, "restaurant": {"id": 3}, "signedUrl": null}).to_string(),
    )
    .await?;
    kv.set(InvoiceProfile::INDEX_KEY, json!([image]).to_string())
        .await?;

    let invoices = device.invoices().await?;
    assert_eq!(invoices.store().migrate_legacy().await?, 1);

    let raw: Value = serde_json::from_str(&kv.get(&image).await?.expect("record present"))?;
    assert_eq!(raw["schema_version"], json!(CURRENT_SCHEMA_VERSION));
    assert_eq!(raw["local_path"], json!(image));
    assert_eq!(invoices.store().migrate_legacy().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_corrupt_record_does_not_block_others() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    Mock::given(method("GET"))
        .and(path("/invoice/s3sign/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&device.server)
        .await;
    let good = device.capture("good.jpg", b"good")?;
    let bad = device.capture("bad.jpg", b"bad")?;

    let invoices = device.invoices().await?;
    invoices
        .add(InvoiceOwner::new(12), good.as_str())
        .await?
        .dispatch
        .await?;

    let kv = FileKeyValueStore::open(device.store_dir()).await?;
    kv.set(&bad, "{\"schema_version\": 1, \"local_pa".to_string())
        .await?;
    let mut index = invoices.store().index().await?;
    index.push(bad.clone());
    invoices.store().set_index(&index).await?;

    let records = invoices.load_all().await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].local_path, good);
    assert_eq!(invoices.dispatch(&bad).await, DispatchOutcome::Missing);
    Ok(())
}

#[tokio::test]
async fn test_remove_deletes_record_and_local_file() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    let image = device.capture("a.jpg", b"to be cancelled")?;

    let invoices = device.invoices().await?;
    invoices
        .add(InvoiceOwner::new(12), image.as_str())
        .await?
        .dispatch
        .await?;
    assert!(invoices.remove(&image).await?);

    assert!(!std::path::Path::new(&image).exists());
    assert!(invoices.store().get(&image).await?.is_none());
    assert!(invoices.store().index().await?.is_empty());
    assert_eq!(
        device.progress.stages_for(&image).last(),
        Some(&ProgressStage::Removed)
    );

    // The record stays gone after a restart
    let relaunched = device.invoices().await?;
    assert!(relaunched.resume().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_clear_removes_every_record_on_disk() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    let invoices = device.invoices().await?;
    for name in ["a.jpg", "b.jpg"] {
        let image = device.capture(name, b"x")?;
        invoices
            .add(InvoiceOwner::new(12), image)
            .await?
            .dispatch
            .await?;
    }

    assert_eq!(invoices.clear().await?, 2);
    let relaunched = device.invoices().await?;
    assert!(relaunched.load_all().await?.is_empty());
    assert!(relaunched.store().index().await?.is_empty());
    Ok(())
}
