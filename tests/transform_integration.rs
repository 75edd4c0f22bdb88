mod support;

use anyhow::{Context, Result};

use support::*;

const SECRET: &str = "integration-secret";
const CAT: &[u8] = b"\x89PNG fake png bytes";

#[tokio::test]
async fn direct_transform_access_requires_secret() -> Result<()> {
    let harness = EdgeHarness::spawn(|_, settings| {
        settings.store_transformed_images = false;
        settings.variant_cache_dir = None;
        settings.transform_listen = Some("127.0.0.1:0".parse().expect("addr"));
        settings.secret_token = Some(imgedge::transform::SecretToken::new(SECRET).expect("token"));
    })
    .await?;
    harness.dirs.put_original("rio/cat.png", CAT)?;
    let transform = harness.transform_addr().context("transform listener")?;
    let key = "/rio/cat.png/format=png,width=400,height=400";

    let anonymous = get(transform, key).await?;
    assert_eq!(anonymous.status, 401);

    let wrong = request(
        transform,
        "GET",
        key,
        &[("x-origin-secret-header", "guess")],
    )
    .await?;
    assert_eq!(wrong.status, 401);
    assert_eq!(harness.origin.calls(), 0, "rejected calls must not read originals");

    let authorized = request(transform, "GET", key, &[("x-origin-secret-header", SECRET)]).await?;
    assert_eq!(authorized.status, 200);
    assert_eq!(authorized.header("content-type"), Some("image/png"));
    assert_eq!(authorized.header("cache-control"), Some("max-age=31622400"));
    assert_eq!(authorized.body, CAT);
    assert_eq!(harness.origin.calls(), 1);

    let malformed = request(transform, "GET", "/rio/cat.png", &[("x-origin-secret-header", SECRET)]).await?;
    assert_eq!(malformed.status, 400);
    Ok(())
}

#[tokio::test]
async fn edge_reaches_remote_transform_service() -> Result<()> {
    let backend = EdgeHarness::spawn(|_, settings| {
        settings.store_transformed_images = false;
        settings.variant_cache_dir = None;
        settings.transform_listen = Some("127.0.0.1:0".parse().expect("addr"));
        settings.secret_token = Some(imgedge::transform::SecretToken::new(SECRET).expect("token"));
    })
    .await?;
    backend.dirs.put_original("rio/cat.png", CAT)?;
    let transform = backend.transform_addr().context("transform listener")?;

    let edge = EdgeHarness::spawn(move |_, settings| {
        settings.store_transformed_images = false;
        settings.variant_cache_dir = None;
        settings.transform_command = Vec::new();
        settings.transform_url = Some(format!("http://{transform}"));
        settings.secret_token = Some(imgedge::transform::SecretToken::new(SECRET).expect("token"));
    })
    .await?;

    let response = get(edge.edge_addr(), "/400x400/png/rio/cat.png").await?;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-cache"), Some("Miss from transform"));
    assert_eq!(response.body, CAT);
    assert_eq!(backend.origin.calls(), 1);
    assert_eq!(edge.origin.calls(), 0);

    let missing = get(edge.edge_addr(), "/400x400/png/rio/missing.png").await?;
    assert_eq!(missing.status, 404);
    Ok(())
}

#[tokio::test]
async fn edge_with_wrong_secret_gets_gateway_error() -> Result<()> {
    let backend = EdgeHarness::spawn(|_, settings| {
        settings.store_transformed_images = false;
        settings.variant_cache_dir = None;
        settings.transform_listen = Some("127.0.0.1:0".parse().expect("addr"));
        settings.secret_token = Some(imgedge::transform::SecretToken::new(SECRET).expect("token"));
    })
    .await?;
    backend.dirs.put_original("rio/cat.png", CAT)?;
    let transform = backend.transform_addr().context("transform listener")?;

    let edge = EdgeHarness::spawn(move |_, settings| {
        settings.store_transformed_images = false;
        settings.variant_cache_dir = None;
        settings.transform_command = Vec::new();
        settings.transform_url = Some(format!("http://{transform}"));
        settings.secret_token = Some(imgedge::transform::SecretToken::new("other").expect("token"));
    })
    .await?;

    let response = get(edge.edge_addr(), "/400x400/png/rio/cat.png").await?;
    assert_eq!(response.status, 502);
    assert_eq!(backend.origin.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn metrics_endpoint_reports_degraded_counter() -> Result<()> {
    let harness = EdgeHarness::spawn(|_, settings| {
        settings.metrics_listen = Some("127.0.0.1:0".parse().expect("addr"));
    })
    .await?;
    let metrics = harness.metrics_addr().context("metrics listener")?;
    let response = get(metrics, "/metrics").await?;
    assert_eq!(response.status, 200);
    let text = String::from_utf8_lossy(&response.body);
    assert!(text.contains("variant_store_degraded_total"), "{text}");
    Ok(())
}
