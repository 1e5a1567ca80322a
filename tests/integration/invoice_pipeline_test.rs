//! End-to-end invoice uploads against a stub backend

mod common;

use common::{TestDevice, AUTH_TOKEN};
use docsync_uploads::{DispatchOutcome, InvoiceOwner, PipelineOptions, ProgressStage, Stage};
use serde_json::{json, Map, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

const IMAGE: &[u8] = b"\xff\xd8\xff\xe0 fake jpeg payload \xff\xd9";

async fn mount_backend(device: &TestDevice) {
    let server = &device.server;
    Mock::given(method("GET"))
        .and(path("/invoice/s3sign/"))
        .and(header("authorization", format!("Token {}", AUTH_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "put_request": format!("{}/bucket/invoice.jpg", server.uri()),
            "url": "https://cdn.example.com/invoice.jpg",
            "upload_id": 77
        })))
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/bucket/invoice.jpg"))
        .and(header("content-type", "image/jpeg"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/invoice/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_invoice_is_signed_uploaded_and_registered() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    mount_backend(&device).await;
    let image = device.capture("a.jpg", IMAGE)?;

    let invoices = device.invoices().await?;
    let mut options = Map::new();
    options.insert("is_credit".to_string(), json!(true));
    let added = invoices
        .add(InvoiceOwner::new(12).with_options(options), image.as_str())
        .await?;
    assert_eq!(added.dispatch.await?, DispatchOutcome::Completed);

    let signs = device.requests("GET", "/invoice/s3sign/").await;
    assert_eq!(signs.len(), 1);
    let query: Vec<(String, String)> = signs[0].url.query_pairs().into_owned().collect();
    assert!(query.contains(&("filename".to_string(), "a.jpg".to_string())));
    assert!(query.contains(&("restaurant".to_string(), "12".to_string())));

    let uploads = device.requests("PUT", "/bucket/invoice.jpg").await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].body, IMAGE);
    // Presigned uploads must not carry the backend session token
    assert!(uploads[0].headers.get("authorization").is_none());

    let registrations = device.requests("POST", "/invoice/").await;
    assert_eq!(registrations.len(), 1);
    let body: Value = serde_json::from_slice(&registrations[0].body)?;
    assert_eq!(
        body,
        json!({
            "image": "https://cdn.example.com/invoice.jpg",
            "upload_id": 77,
            "restaurant": 12,
            "is_credit": true
        })
    );

    assert!(invoices.store().index().await?.is_empty());
    assert!(std::path::Path::new(&image).exists());
    assert_eq!(device.progress.percents_for(&image).last(), Some(&100));
    assert_eq!(device.progress.stages_for(&image).last(), Some(&ProgressStage::Done));
    Ok(())
}

#[tokio::test]
async fn test_retained_invoice_is_swept_on_next_launch() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    mount_backend(&device).await;
    let image = device.capture("a.jpg", IMAGE)?;

    let first_launch = device
        .invoices_with(PipelineOptions {
            retain_completed: true,
        })
        .await?;
    let added = first_launch.add(InvoiceOwner::new(12), image.as_str()).await?;
    added.dispatch.await?;

    let stored = first_launch.store().get(&image).await?.expect("record retained");
    assert!(stored.is_uploaded && stored.is_registered);
    drop(first_launch);

    let second_launch = device.invoices().await?;
    let outcomes = second_launch.resume().await?;
    assert!(outcomes.is_empty());
    assert!(second_launch.store().index().await?.is_empty());
    assert_eq!(device.requests("POST", "/invoice/").await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_upload_resumes_without_signing_again() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    Mock::given(method("PUT"))
        .and(path("/bucket/invoice.jpg"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&device.server)
        .await;
    mount_backend(&device).await;
    let image = device.capture("a.jpg", IMAGE)?;

    let invoices = device.invoices().await?;
    let added = invoices.add(InvoiceOwner::new(12), image.as_str()).await?;
    assert_eq!(
        added.dispatch.await?,
        DispatchOutcome::Stalled {
            stage: Stage::Upload
        }
    );

    let stalled = invoices.store().get(&image).await?.expect("record kept");
    assert!(stalled.signed_target.is_some());
    assert!(!stalled.is_uploaded);
    let failure = invoices.status(&image).and_then(|s| s.last_failure).expect("failure recorded");
    assert_eq!(failure.stage, Stage::Upload);
    assert!(failure.reason.contains("503"));

    assert_eq!(invoices.dispatch(&image).await, DispatchOutcome::Completed);
    assert_eq!(device.requests("GET", "/invoice/s3sign/").await.len(), 1);
    assert_eq!(device.requests("PUT", "/bucket/invoice.jpg").await.len(), 2);
    assert_eq!(device.requests("POST", "/invoice/").await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_restart_resumes_at_registration() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    Mock::given(method("POST"))
        .and(path("/invoice/"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "Try later"})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&device.server)
        .await;
    mount_backend(&device).await;
    let image = device.capture("a.jpg", IMAGE)?;

    let first_launch = device.invoices().await?;
    let added = first_launch.add(InvoiceOwner::new(12), image.as_str()).await?;
    assert_eq!(
        added.dispatch.await?,
        DispatchOutcome::Stalled {
            stage: Stage::Register
        }
    );
    drop(first_launch);

    let second_launch = device.invoices().await?;
    let record = second_launch.get(&image).await?.expect("record survives restart");
    assert!(record.is_uploaded);
    assert!(!record.is_busy);
    assert_eq!(record.upload_progress_percent, 100);

    let outcomes = second_launch.resume().await?;
    assert_eq!(outcomes, vec![(image.clone(), DispatchOutcome::Completed)]);
    assert_eq!(device.requests("GET", "/invoice/s3sign/").await.len(), 1);
    assert_eq!(device.requests("PUT", "/bucket/invoice.jpg").await.len(), 1);
    assert_eq!(device.requests("POST", "/invoice/").await.len(), 2);

    // A second resume has nothing left to do
    assert!(second_launch.resume().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_invoices_all_register() -> anyhow::Result<()> {
    let device = TestDevice::new().await?;
    mount_backend(&device).await;
    let invoices = device.invoices().await?;

    let mut dispatches = Vec::new();
    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        let image = device.capture(name, IMAGE)?;
        dispatches.push(invoices.add(InvoiceOwner::new(12), image).await?.dispatch);
    }
    for dispatch in dispatches {
        assert_eq!(dispatch.await?, DispatchOutcome::Completed);
    }

    assert_eq!(device.requests("POST", "/invoice/").await.len(), 3);
    assert!(invoices.store().index().await?.is_empty());
    Ok(())
}
