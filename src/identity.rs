//! Datafile identities and the names, URLs, and keys derived from them.

// std
use std::{
	fmt::{Display, Formatter, Result as FmtResult},
	hash::{Hash, Hasher},
	str::FromStr,
};
// crates.io
use serde::{Deserialize, Serialize};
use url::{Url, form_urlencoded};
// self
use crate::_prelude::*;

const PROJECT_TAG: &str = "project";
const SDK_KEY_TAG: &str = "sdk";
const DELIMITER: char = ':';

/// Flavour of key an identity carries; selects the CDN path template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
	/// Legacy numeric project identifier.
	ProjectId,
	/// SDK key, optionally scoped to an environment.
	SdkKey,
}

/// Identifies one remotely hosted datafile.
///
/// Equality and hashing consider only the key and the environment, so a project id and an SDK
/// key with the same text collapse onto the same cache file and throttle slot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatafileIdentity {
	kind: KeyKind,
	key: Arc<str>,
	environment: Option<Arc<str>>,
}
impl DatafileIdentity {
	/// Identity for a bare project id.
	pub fn project(project_id: impl Into<Arc<str>>) -> Self {
		Self { kind: KeyKind::ProjectId, key: project_id.into(), environment: None }
	}

	/// Identity for an SDK key.
	pub fn sdk_key(sdk_key: impl Into<Arc<str>>) -> Self {
		Self { kind: KeyKind::SdkKey, key: sdk_key.into(), environment: None }
	}

	/// Identity for an SDK key scoped to an environment.
	pub fn sdk_key_with_environment(
		sdk_key: impl Into<Arc<str>>,
		environment: impl Into<Arc<str>>,
	) -> Self {
		Self { kind: KeyKind::SdkKey, key: sdk_key.into(), environment: Some(environment.into()) }
	}

	/// Key flavour.
	pub fn kind(&self) -> KeyKind {
		self.kind
	}

	/// Project id or SDK key.
	pub fn key(&self) -> &str {
		&self.key
	}

	/// Environment discriminator, if any.
	pub fn environment(&self) -> Option<&str> {
		self.environment.as_deref()
	}

	/// Whether the key component is blank.
	pub fn is_empty(&self) -> bool {
		self.key.trim().is_empty()
	}

	/// Reject identities that cannot address a cache file or a CDN path.
	pub fn validate(&self) -> Result<()> {
		if self.is_empty() {
			return Err(Error::Validation {
				field: "identity",
				reason: "Key must not be empty.".into(),
			});
		}
		if self.key.contains(DELIMITER) {
			return Err(Error::Validation {
				field: "identity",
				reason: format!("Key must not contain '{DELIMITER}'."),
			});
		}
		if let Some(environment) = self.environment() {
			if environment.trim().is_empty() {
				return Err(Error::Validation {
					field: "identity.environment",
					reason: "Environment must not be blank when present.".into(),
				});
			}
			if environment.contains(DELIMITER) {
				return Err(Error::Validation {
					field: "identity.environment",
					reason: format!("Environment must not contain '{DELIMITER}'."),
				});
			}
		}

		Ok(())
	}

	/// Suffix used to build the cache file name.
	///
	/// Components are percent-encoded, underscores included; `_` joins key and environment.
	pub fn cache_suffix(&self) -> String {
		match self.environment() {
			Some(environment) =>
				format!("{}_{}", escape_component(&self.key), escape_component(environment)),
			None => escape_component(&self.key),
		}
	}

	/// Cache file name, `<prefix>-<suffix>.json`.
	pub fn file_name(&self, prefix: &str) -> String {
		format!("{prefix}-{}.json", self.cache_suffix())
	}

	/// Resolve the CDN URL serving this identity's datafile.
	pub fn datafile_url(&self, base: &Url) -> Result<Url> {
		self.validate()?;

		let mut url = base.clone();

		{
			let mut segments = url.path_segments_mut().map_err(|_| Error::Validation {
				field: "cdn_base_url",
				reason: format!("{base} cannot be used as a base URL."),
			})?;

			segments.pop_if_empty();

			match (self.kind, self.environment()) {
				(KeyKind::ProjectId, _) => {
					segments.extend(["json", format!("{}.json", self.key).as_str()]);
				},
				(KeyKind::SdkKey, None) => {
					segments.extend(["datafiles", format!("{}.json", self.key).as_str()]);
				},
				(KeyKind::SdkKey, Some(environment)) => {
					segments.extend([
						"datafiles",
						&*self.key,
						format!("{environment}.json").as_str(),
					]);
				},
			}
		}

		Ok(url)
	}
}
impl PartialEq for DatafileIdentity {
	fn eq(&self, other: &Self) -> bool {
		self.key == other.key && self.environment == other.environment
	}
}
impl Eq for DatafileIdentity {}
impl Hash for DatafileIdentity {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.key.hash(state);
		self.environment.hash(state);
	}
}
impl Display for DatafileIdentity {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match (self.kind, self.environment()) {
			(KeyKind::ProjectId, _) => write!(f, "{PROJECT_TAG}:{}", self.key),
			(KeyKind::SdkKey, None) => write!(f, "{SDK_KEY_TAG}:{}", self.key),
			(KeyKind::SdkKey, Some(environment)) =>
				write!(f, "{SDK_KEY_TAG}:{}:{environment}", self.key),
		}
	}
}
impl FromStr for DatafileIdentity {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self> {
		let Some((tag, rest)) = value.split_once(DELIMITER) else {
			return Err(Error::UnknownIdentity(value.into()));
		};

		match tag {
			PROJECT_TAG => Ok(Self::project(rest)),
			SDK_KEY_TAG => match rest.split_once(DELIMITER) {
				Some((key, environment)) => Ok(Self::sdk_key_with_environment(key, environment)),
				None => Ok(Self::sdk_key(rest)),
			},
			_ => Err(Error::UnknownIdentity(value.into())),
		}
	}
}
impl TryFrom<String> for DatafileIdentity {
	type Error = Error;

	fn try_from(value: String) -> Result<Self> {
		value.parse()
	}
}
impl From<DatafileIdentity> for String {
	fn from(value: DatafileIdentity) -> Self {
		value.to_string()
	}
}

fn escape_component(component: &str) -> String {
	form_urlencoded::byte_serialize(component.as_bytes())
		.collect::<String>()
		.replace('_', "%5F")
		.replace('*', "%2A")
}
