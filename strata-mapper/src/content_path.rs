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

use itertools::Itertools;

/// Path of the object currently being parsed, as a stack of segments.
///
/// The path also carries a "within leaf object" flag. While it is set, the
/// object being read is the value of a leaf field (for instance a geo point
/// given as `{"lat": .., "lon": ..}`) and dots in its keys must not be expanded.
#[derive(Clone, Debug, Default)]
pub struct ContentPath {
    segments: Vec<String>,
    within_leaf_object: bool,
}

impl ContentPath {
    pub fn new() -> ContentPath {
        ContentPath::default()
    }

    pub fn add(&mut self, segment: impl Into<String>) {
        self.segments.push(segment.into());
    }

    pub fn remove(&mut self) -> Option<String> {
        self.segments.pop()
    }

    /// Returns the full dotted path of `name` within the current object.
    pub fn path_as_text(&self, name: &str) -> String {
        if self.segments.is_empty() {
            return name.to_string();
        }
        format!("{}.{name}", self.segments.iter().join("."))
    }

    /// Returns the dotted path of the current object, empty for the root.
    pub fn current_path(&self) -> String {
        self.segments.iter().join(".")
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn set_within_leaf_object(&mut self, within_leaf_object: bool) {
        self.within_leaf_object = within_leaf_object;
    }

    pub fn is_within_leaf_object(&self) -> bool {
        self.within_leaf_object
    }
}
