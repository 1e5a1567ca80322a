//! End-to-end transaction receipt uploads against a stub spend backend

mod common;

use common::TestDevice;
use docsync_uploads::{DispatchOutcome, ReceiptOwner, Stage};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const RECEIPT: &[u8] = b"receipt-bytes-0123456789";

async fn mount_sign(device: &TestDevice) {
    Mock::given(method("POST"))
        .and(path("/v0/s3sign/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "put_request": format!("{}/receipts-bucket", device.server.uri()),
            "url": "https://cdn.example.com/receipts/r.jpg",
            "fields": {
                "key": "receipts/r.jpg",
                "policy": "eyJleHBpcmF0aW9uIjoi",
                "x-amz-signature": "abc123"
            },
            "headers": {"Content-type": "image/png"}
        })))
        .mount(&device.server)
        .await;
}

#[tokio::test]
async fn test_receipt_uses_multipart_form_and_company_scope() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    mount_sign(&device).await;
    Mock::given(method("POST"))
        .and(path("/receipts-bucket"))
        .and(header("x-amz-acl", "public-read"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&device.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v0/transaction-receipt/"))
        .and(query_param("company", "9"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&device.server)
        .await;
    let image = device.capture("r.jpg", RECEIPT)?;

    let receipts = device.receipts().await?;
    let added = receipts.add(ReceiptOwner::new(501, 9), image.as_str()).await?;
    assert_eq!(added.dispatch.await?, DispatchOutcome::Completed);

    let signs = device.requests("POST", "/v0/s3sign/").await;
    assert_eq!(signs.len(), 1);
    let body: Value = serde_json::from_slice(&signs[0].body)?;
    assert_eq!(body, json!({"filename": "r.jpg"}));

    let uploads = device.requests("POST", "/receipts-bucket").await;
    assert_eq!(uploads.len(), 1);
    let form = String::from_utf8_lossy(&uploads[0].body).into_owned();
    assert!(form.contains("name=\"key\""));
    assert!(form.contains("receipts/r.jpg"));
    assert!(form.contains("name=\"x-amz-signature\""));
    assert!(form.contains("name=\"file\"; filename=\"r.jpg\""));
    assert!(form.to_lowercase().contains("content-type: image/png"));
    assert!(form.contains("receipt-bytes-0123456789"));
    // Policy fields precede the file part
    assert!(form.find("name=\"policy\"") < form.find("name=\"file\""));

    let registrations = device.requests("POST", "/v0/transaction-receipt/").await;
    assert_eq!(registrations.len(), 1);
    let body: Value = serde_json::from_slice(&registrations[0].body)?;
    assert_eq!(
        body,
        json!({"url": "https://cdn.example.com/receipts/r.jpg", "transaction": 501})
    );

    assert!(receipts.store().index().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_malformed_sign_response_stalls_at_sign() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    Mock::given(method("POST"))
        .and(path("/v0/s3sign/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "https://cdn/x"})))
        .mount(&device.server)
        .await;
    let image = device.capture("r.jpg", RECEIPT)?;

    let receipts = device.receipts().await?;
    let added = receipts.add(ReceiptOwner::new(501, 9), image.as_str()).await?;
    assert_eq!(
        added.dispatch.await?,
        DispatchOutcome::Stalled { stage: Stage::Sign }
    );

    let record = receipts.store().get(&image).await?.expect("record kept");
    assert!(record.signed_target.is_none());
    assert_eq!(receipts.store().index().await?, vec![image]);
    Ok(())
}

#[tokio::test]
async fn test_receipts_and_invoices_keep_separate_indexes() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    let image = device.capture("r.jpg", RECEIPT)?;

    // No routes are mounted, so every record stalls at signing
    let receipts = device.receipts().await?;
    receipts
        .add(ReceiptOwner::new(501, 9), image.as_str())
        .await?
        .dispatch
        .await?;

    let invoices = device.invoices().await?;
    assert!(invoices.load_all().await?.is_empty());
    assert_eq!(receipts.load_all().await?.len(), 1);
    Ok(())
}
