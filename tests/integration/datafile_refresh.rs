//! Cache-first delivery, conditional refresh, throttling, and deduplication end to end.

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use datafile_cache::{DatafileEvent, DatafileIdentity, DatafileLoader, Error, Result};
use tokio::task::JoinSet;
use wiremock::{
	Mock, MockServer, Request, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::settings_for;

const STAMP: &str = "Sat, 17 Oct 2026 08:00:00 GMT";
const DATAFILE_V1: &str = r#"{"version":"4","revision":"1","experiments":[]}"#;
const DATAFILE_V2: &str = r#"{"version":"4","revision":"2","experiments":[]}"#;

fn cached(content: &str) -> DatafileEvent {
	DatafileEvent::Cached(content.into())
}

fn downloaded(content: &str) -> DatafileEvent {
	DatafileEvent::Downloaded(content.into())
}

#[tokio::test]
async fn first_download_populates_cache_then_revalidates() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let dir = tempfile::tempdir()?;

	Mock::given(method("GET"))
		.and(path("/json/1234.json"))
		.and(|request: &Request| {
			request.headers.get("if-modified-since").and_then(|value| value.to_str().ok())
				== Some(STAMP)
		})
		.respond_with(ResponseTemplate::new(304))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/json/1234.json"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(DATAFILE_V1)
				.insert_header("last-modified", STAMP),
		)
		.expect(1)
		.mount(&server)
		.await;

	let settings = settings_for(&server, &dir).with_min_download_interval(Duration::ZERO);
	let loader = DatafileLoader::new(settings)?;
	let identity = DatafileIdentity::project("1234");
	let first = loader.get_datafile(identity.clone()).await?.collect().await;
	let second = loader.get_datafile(identity.clone()).await?.collect().await;

	assert_eq!(first, vec![downloaded(DATAFILE_V1)]);
	assert_eq!(second, vec![cached(DATAFILE_V1)]);
	assert!(dir.path().join("datafile-1234.json").exists());

	let metrics = loader.metrics().snapshot();

	assert_eq!(metrics.downloads_updated, 1);
	assert_eq!(metrics.downloads_not_modified, 1);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn newer_remote_replaces_cached_copy() -> Result<()> {
	let server = MockServer::start().await;
	let dir = tempfile::tempdir()?;

	Mock::given(method("GET"))
		.and(path("/datafiles/sdk-key/production.json"))
		.respond_with(ResponseTemplate::new(200).set_body_string(DATAFILE_V2))
		.expect(1)
		.mount(&server)
		.await;

	let loader = DatafileLoader::new(settings_for(&server, &dir))?;
	let identity = DatafileIdentity::sdk_key_with_environment("sdk-key", "production");
	let cache = loader.cache(&identity);

	assert_eq!(cache.file_name(), "datafile-sdk-key_production.json");
	assert!(cache.save(DATAFILE_V1).await);

	let events = loader.get_datafile(identity).await?.collect().await;

	assert_eq!(events, vec![cached(DATAFILE_V1), downloaded(DATAFILE_V2)]);
	assert_eq!(cache.load().await, Some(serde_json::from_str(DATAFILE_V2)?));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn exhausted_retries_without_cache_report_unavailable() -> Result<()> {
	let server = MockServer::start().await;
	let dir = tempfile::tempdir()?;

	Mock::given(method("GET"))
		.and(path("/datafiles/missing.json"))
		.respond_with(ResponseTemplate::new(503))
		.expect(3)
		.mount(&server)
		.await;

	let loader = DatafileLoader::new(settings_for(&server, &dir))?;
	let receiver = loader.get_datafile(DatafileIdentity::sdk_key("missing")).await?;

	assert_eq!(receiver.collect().await, vec![DatafileEvent::Unavailable]);
	assert_eq!(loader.metrics().snapshot().downloads_failed, 1);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn throttled_request_never_reaches_the_cdn() -> Result<()> {
	let server = MockServer::start().await;
	let dir = tempfile::tempdir()?;

	Mock::given(method("GET"))
		.and(path("/datafiles/sdk-key.json"))
		.respond_with(ResponseTemplate::new(200).set_body_string(DATAFILE_V1))
		.expect(1)
		.mount(&server)
		.await;

	let loader = DatafileLoader::new(settings_for(&server, &dir))?;
	let identity = DatafileIdentity::sdk_key("sdk-key");

	loader.get_datafile(identity.clone()).await?.collect().await;

	let events = loader.get_datafile(identity.clone()).await?.collect().await;
	let status = loader.status(&identity).await;

	assert_eq!(events, vec![cached(DATAFILE_V1)]);
	assert!(status.cached);
	assert!(status.last_download_at.is_some());

	server.verify().await;

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_request() -> Result<()> {
	let server = MockServer::start().await;
	let dir = tempfile::tempdir()?;

	Mock::given(method("GET"))
		.and(path("/json/77.json"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(DATAFILE_V2)
				.set_delay(Duration::from_millis(300)),
		)
		.expect(1)
		.mount(&server)
		.await;

	let loader = DatafileLoader::new(settings_for(&server, &dir))?;
	let mut tasks = JoinSet::new();

	for _ in 0..6 {
		let loader = loader.clone();

		tasks.spawn(async move {
			let receiver = loader.get_datafile(DatafileIdentity::project("77")).await?;

			Ok::<_, Error>(receiver.latest().await)
		});
	}

	while let Some(joined) = tasks.join_next().await {
		assert_eq!(joined.expect("task")?.as_deref(), Some(DATAFILE_V2));
	}

	assert_eq!(loader.metrics().snapshot().deduplicated, 5);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn deleted_cache_triggers_unconditional_download() -> Result<()> {
	let server = MockServer::start().await;
	let dir = tempfile::tempdir()?;

	Mock::given(method("GET"))
		.and(path("/json/5.json"))
		.and(|request: &Request| request.headers.contains_key("if-modified-since"))
		.respond_with(ResponseTemplate::new(304))
		.expect(0)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/json/5.json"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(DATAFILE_V1)
				.insert_header("last-modified", STAMP),
		)
		.expect(2)
		.mount(&server)
		.await;

	let settings = settings_for(&server, &dir).with_min_download_interval(Duration::ZERO);
	let loader = DatafileLoader::new(settings)?;
	let identity = DatafileIdentity::project("5");

	loader.get_datafile(identity.clone()).await?.collect().await;

	assert!(loader.cache(&identity).delete().await);

	let events = loader.get_datafile(identity).await?.collect().await;

	assert_eq!(events, vec![downloaded(DATAFILE_V1)]);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn unreadable_download_is_repaired_on_next_refresh() -> Result<()> {
	let server = MockServer::start().await;
	let dir = tempfile::tempdir()?;
	let served = Arc::new(AtomicUsize::new(0));
	let counter = served.clone();

	Mock::given(method("GET"))
		.and(path("/json/9.json"))
		.and(|request: &Request| request.headers.contains_key("if-modified-since"))
		.respond_with(ResponseTemplate::new(304))
		.expect(0)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/json/9.json"))
		.respond_with(move |_: &Request| {
			let body = match counter.fetch_add(1, Ordering::SeqCst) {
				0 => "<html>oops</html>",
				_ => DATAFILE_V1,
			};

			ResponseTemplate::new(200).set_body_string(body).insert_header("last-modified", STAMP)
		})
		.expect(2)
		.mount(&server)
		.await;

	let settings = settings_for(&server, &dir).with_min_download_interval(Duration::ZERO);
	let loader = DatafileLoader::new(settings)?;
	let identity = DatafileIdentity::project("9");

	assert_eq!(
		loader.get_datafile(identity.clone()).await?.collect().await,
		vec![downloaded("<html>oops</html>")]
	);
	assert_eq!(loader.cache(&identity).load().await, None);
	assert_eq!(
		loader.get_datafile(identity.clone()).await?.collect().await,
		vec![downloaded(DATAFILE_V1)]
	);
	assert_eq!(loader.cache(&identity).load().await, Some(serde_json::from_str(DATAFILE_V1)?));

	server.verify().await;

	Ok(())
}
