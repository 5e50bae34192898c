//! Background watching across restarts and the engine manager end to end.

// std
use std::time::Duration;
// crates.io
use datafile_cache::{
	DatafileConsumer, DatafileIdentity, DatafileService, ManagerBuilder, PlatformSignal, Result,
};
use serde::Deserialize;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::{fast_retry_policy, settings_for};

#[derive(Debug, Deserialize)]
struct Flags {
	revision: String,
}
impl DatafileConsumer for Flags {
	fn from_datafile(datafile: &str) -> Result<Self> {
		Ok(serde_json::from_str(datafile)?)
	}
}

#[tokio::test]
async fn watched_identities_are_restored_after_restart() -> Result<()> {
	let server = MockServer::start().await;
	let dir = tempfile::tempdir()?;
	let watched = DatafileIdentity::sdk_key_with_environment("sdk-key", "staging");
	let dropped = DatafileIdentity::project("99");

	{
		let service = DatafileService::new(settings_for(&server, &dir))?;

		service.start();
		service.start_watching(watched.clone()).await?;
		service.start_watching(dropped.clone()).await?;

		assert!(service.stop_watching(&dropped).await);

		service.stop().await;
	}

	let restarted = DatafileService::new(settings_for(&server, &dir))?;

	assert!(restarted.scheduler().scheduled().await.is_empty());
	assert_eq!(restarted.rescheduler().on_signal(PlatformSignal::BootCompleted).await, 1);
	assert_eq!(restarted.scheduler().scheduled().await, vec![watched]);

	Ok(())
}

#[tokio::test]
async fn headless_refresh_requests_stop_once_settled() -> Result<()> {
	let server = MockServer::start().await;
	let dir = tempfile::tempdir()?;

	Mock::given(method("GET"))
		.and(path("/datafiles/sdk-key.json"))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{"revision":"5"}"#))
		.expect(1)
		.mount(&server)
		.await;

	let service = DatafileService::new(settings_for(&server, &dir))?;
	let identity = DatafileIdentity::sdk_key("sdk-key");

	service.loader().refresh(identity.clone()).await?;

	tokio::time::timeout(Duration::from_secs(5), service.stop_requested())
		.await
		.expect("service asked to stop");

	assert!(service.loader().cache(&identity).exists().await);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn manager_builds_engine_from_cdn() -> Result<()> {
	let server = MockServer::start().await;
	let dir = tempfile::tempdir()?;

	Mock::given(method("GET"))
		.and(path("/json/4242.json"))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{"revision":"12"}"#))
		.expect(1)
		.mount(&server)
		.await;

	let manager = ManagerBuilder::new(DatafileIdentity::project("4242"), dir.path())
		.cdn_base_url(server.uri())
		.retry_policy(fast_retry_policy())
		.build::<Flags>()?;

	assert!(manager.with_engine(|flags| flags.revision.clone()).await.is_none());
	assert!(manager.initialize().await?);
	assert_eq!(
		manager.with_engine(|flags| flags.revision.clone()).await.as_deref(),
		Some("12")
	);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn manager_falls_back_to_cache_when_cdn_is_down() -> Result<()> {
	let server = MockServer::start().await;
	let dir = tempfile::tempdir()?;

	Mock::given(method("GET"))
		.and(path("/json/4242.json"))
		.respond_with(ResponseTemplate::new(500))
		.mount(&server)
		.await;

	let manager = ManagerBuilder::new(DatafileIdentity::project("4242"), dir.path())
		.cdn_base_url(server.uri())
		.retry_policy(fast_retry_policy())
		.build::<Flags>()?;

	assert!(manager.service().loader().cache(manager.identity()).save(r#"{"revision":"8"}"#).await);
	assert!(manager.initialize().await?);
	assert_eq!(manager.with_engine(|flags| flags.revision.clone()).await.as_deref(), Some("8"));

	Ok(())
}
