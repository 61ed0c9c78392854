// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The identity flags are evaluated for.

use serde::{Deserialize, Serialize};

/// A user-defined attribute sent along with the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomProperty {
	pub name: String,
	pub value: String,
}

/// An end user of the application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
	pub key_id: String,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub customized_properties: Vec<CustomProperty>,
}

impl User {
	pub fn builder(key_id: impl Into<String>) -> UserBuilder {
		UserBuilder::new(key_id)
	}

	/// A user needs a non-blank key id to be identified.
	pub fn is_valid(&self) -> bool {
		!self.key_id.trim().is_empty()
	}

	pub fn property(&self, name: &str) -> Option<&str> {
		self
			.customized_properties
			.iter()
			.find(|p| p.name == name)
			.map(|p| p.value.as_str())
	}
}

/// Builder for [`User`].
///
/// ```
/// use loom_flagsync_core::User;
///
/// let user = User::builder("u-42")
///     .name("Ada")
///     .custom("plan", "enterprise")
///     .build();
/// assert_eq!(user.property("plan"), Some("enterprise"));
/// ```
#[derive(Debug, Clone)]
pub struct UserBuilder {
	user: User,
}

impl UserBuilder {
	pub fn new(key_id: impl Into<String>) -> Self {
		Self {
			user: User {
				key_id: key_id.into(),
				..Default::default()
			},
		}
	}

	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.user.name = name.into();
		self
	}

	/// Adds a custom property, replacing an existing one with the same name.
	pub fn custom(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		let name = name.into();
		let value = value.into();
		match self
			.user
			.customized_properties
			.iter_mut()
			.find(|p| p.name == name)
		{
			Some(existing) => existing.value = value,
			None => self
				.user
				.customized_properties
				.push(CustomProperty { name, value }),
		}
		self
	}

	pub fn build(self) -> User {
		self.user
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_serializes_camel_case() {
		let user = User::builder("k1").name("n").custom("country", "nl").build();
		let json = serde_json::to_value(&user).unwrap();
		assert_eq!(
			json,
			serde_json::json!({
				"keyId": "k1",
				"name": "n",
				"customizedProperties": [{"name": "country", "value": "nl"}]
			})
		);
	}

	#[test]
	fn test_custom_replaces_same_name() {
		let user = User::builder("k1")
			.custom("tier", "free")
			.custom("tier", "pro")
			.build();
		assert_eq!(user.customized_properties.len(), 1);
		assert_eq!(user.property("tier"), Some("pro"));
	}

	#[test]
	fn test_blank_key_is_invalid() {
		assert!(!User::builder("").build().is_valid());
		assert!(!User::builder("   ").build().is_valid());
		assert!(User::builder("a").build().is_valid());
	}
}
