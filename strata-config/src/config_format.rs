// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::str::FromStr;

use anyhow::{bail, Context};
use json_comments::StripComments;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::warn;

/// Serialization formats accepted for settings payloads.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Yaml => "yaml",
        }
    }

    /// Guesses the format from a file name or path extension.
    pub fn sniff_from_path(path: &str) -> anyhow::Result<ConfigFormat> {
        let extension = path
            .rsplit_once('.')
            .map(|(_, extension)| extension)
            .with_context(|| {
                format!(
                    "failed to read settings file `{path}`: file extension is missing. Supported \
                     file formats and extensions are JSON (.json), TOML (.toml), and YAML (.yaml \
                     or .yml)"
                )
            })?;
        ConfigFormat::from_str(extension)
    }

    /// Parses `payload`. JSON payloads may carry comments, and a numeric
    /// `version` is accepted and turned into a string.
    pub fn parse<T>(&self, payload: &[u8]) -> anyhow::Result<T>
    where T: DeserializeOwned {
        match self {
            ConfigFormat::Json => {
                let mut json_value: JsonValue = serde_json::from_reader(StripComments::new(payload))
                    .context("failed to read JSON settings")?;
                if let Some(version_value) = json_value.get_mut("version") {
                    if let Some(version_number) = version_value.as_f64() {
                        warn!("`version` is supposed to be a string");
                        *version_value = JsonValue::String(version_number.to_string());
                    }
                }
                serde_json::from_value(json_value).context("failed to parse JSON settings")
            }
            ConfigFormat::Toml => {
                let payload_str = std::str::from_utf8(payload)
                    .context("settings payload contains invalid UTF-8 characters")?;
                toml::from_str(payload_str).context("failed to read TOML settings")
            }
            ConfigFormat::Yaml => {
                serde_yaml::from_slice(payload).context("failed to read YAML settings")
            }
        }
    }
}

impl FromStr for ConfigFormat {
    type Err = anyhow::Error;

    fn from_str(ext: &str) -> anyhow::Result<Self> {
        match ext {
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => bail!(
                "file extension `.{ext}` is not supported. Supported file formats and extensions \
                 are JSON (.json), TOML (.toml), and YAML (.yaml or .yml)",
            ),
        }
    }
}
